use crate::error::PoolError;
use crate::task_future::{Outcome, TaskFuture};

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

/// How `join_all_with` reacts to a failing input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinMode {
  /// Wait until every input settles, then report the first failure in
  /// input order.
  #[default]
  WaitAll,
  /// Fail the combined future as soon as any input fails.
  FailFast,
}

struct JoinState<T> {
  slots: Vec<Option<Outcome<T>>>,
  remaining: usize,
  settled: bool,
}

/// Combines `futures` into one future holding every value in input order.
///
/// Equivalent to `join_all_with(futures, JoinMode::WaitAll)`.
pub fn join_all<T>(futures: Vec<TaskFuture<T>>) -> TaskFuture<Vec<T>>
where
  T: Clone + Send + 'static,
{
  join_all_with(futures, JoinMode::WaitAll)
}

/// Combines `futures` into one future holding every value in input order,
/// regardless of completion order.
///
/// The combined future registers a continuation on each input and settles
/// from whichever thread settles the last input (or, under
/// `JoinMode::FailFast`, the first failing one). An empty input resolves
/// immediately to an empty vector.
pub fn join_all_with<T>(futures: Vec<TaskFuture<T>>, mode: JoinMode) -> TaskFuture<Vec<T>>
where
  T: Clone + Send + 'static,
{
  let combined = TaskFuture::new();
  if futures.is_empty() {
    let _ = combined.resolve(Vec::new());
    return combined;
  }

  let state = Arc::new(Mutex::new(JoinState {
    slots: vec![None; futures.len()],
    remaining: futures.len(),
    settled: false,
  }));

  for (index, input) in futures.iter().enumerate() {
    let state = state.clone();
    let combined = combined.clone();
    let input_id = input.id();
    input.on_complete(move |outcome| {
      let verdict = {
        let mut join = state.lock();
        if join.settled {
          return;
        }
        join.slots[index] = Some(outcome.clone());
        join.remaining -= 1;
        trace!(task_id = input_id, index, remaining = join.remaining, "Join input settled.");

        if let (JoinMode::FailFast, Err(error)) = (mode, outcome) {
          join.settled = true;
          Err(error.clone())
        } else if join.remaining == 0 {
          join.settled = true;
          collect_in_order(std::mem::take(&mut join.slots))
        } else {
          return;
        }
      };
      let _ = match verdict {
        Ok(values) => combined.resolve(values),
        Err(error) => combined.fail(error),
      };
    });
  }
  combined
}

fn collect_in_order<T>(slots: Vec<Option<Outcome<T>>>) -> Result<Vec<T>, PoolError> {
  slots
    .into_iter()
    .map(|slot| slot.unwrap_or(Err(PoolError::Cancelled)))
    .collect()
}

//! Bounded worker pool.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tracing::trace;

/// Run `f` over `items` with at most `concurrency` tasks in flight.
///
/// Each of the workers has a stable index in `0..workers`, passed to `f`
/// alongside the item. Results come back in input order. A concurrency of
/// `0` starts one worker per item.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, concurrency: usize, f: F) -> Vec<R>
where
  T: Send + 'static,
  R: Send + 'static,
  F: Fn(usize, T) -> Fut + Send + Sync + 'static,
  Fut: Future<Output = R> + Send + 'static,
{
  let total = items.len();
  if total == 0 {
    return Vec::new();
  }

  let workers = if concurrency == 0 { total } else { concurrency.min(total) };
  let queue: Arc<Mutex<VecDeque<(usize, T)>>> = Arc::new(Mutex::new(items.into_iter().enumerate().collect()));
  let f = Arc::new(f);

  let mut join_set = JoinSet::new();
  for worker in 0..workers {
    let queue = queue.clone();
    let f = f.clone();

    join_set.spawn(async move {
      let mut done = Vec::new();
      loop {
        let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let Some((idx, item)) = next else {
          break;
        };
        trace!(worker, item = idx, "worker picked item");
        done.push((idx, f(worker, item).await));
      }
      done
    });
  }

  let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
  while let Some(joined) = join_set.join_next().await {
    match joined {
      Ok(done) => {
        for (idx, result) in done {
          slots[idx] = Some(result);
        }
      }
      Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
      Err(e) => trace!(error = %e, "worker task cancelled"),
    }
  }

  slots.into_iter().flatten().collect()
}

// ── Bounded parallel fetch ──
//
// Fans out detail requests with at most `concurrency` in flight. The
// first failure cancels every other fetch, all tasks are joined, and
// the caller gets either the complete ordered result or that one error.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::CoreError;

pub async fn fetch_bounded<T, R, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    mut fetch: F,
) -> Result<Vec<R>, CoreError>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, CoreError>> + Send + 'static,
    R: Send + 'static,
{
    let total = items.len();
    let cancel = CancellationToken::new();
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => {
                permit.map_err(|_| CoreError::Cancelled)?
            }
        };

        let token = cancel.clone();
        let fut = fetch(item);
        tasks.spawn(async move {
            let _permit = permit;
            let result = tokio::select! {
                biased;
                () = token.cancelled() => Err(CoreError::Cancelled),
                result = fut => result,
            };
            if result.is_err() {
                token.cancel();
            }
            (index, result)
        });
    }

    let mut slots: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
    let mut first_error = None;

    while let Some(joined) = tasks.join_next().await {
        let failure = match joined {
            Ok((index, Ok(value))) => {
                if let Some(slot) = slots.get_mut(index) {
                    *slot = Some(value);
                }
                continue;
            }
            Ok((_, Err(CoreError::Cancelled))) => continue,
            Ok((_, Err(err))) => err,
            Err(join_err) => CoreError::Internal(format!("fetch task failed: {join_err}")),
        };
        cancel.cancel();
        first_error.get_or_insert(failure);
    }

    if let Some(err) = first_error {
        return Err(err);
    }
    slots
        .into_iter()
        .map(|slot| slot.ok_or(CoreError::Cancelled))
        .collect()
}

//! Event coalescing for bursty change notifications.
//!
//! Raw filesystem notifications arrive in rapid bursts (editor saves,
//! branch checkouts). The coalescer groups everything that happens close
//! together into one batch so downstream consumers see a single update per
//! burst: a batch is flushed once no event has arrived for the min-rest
//! window, or once the max-wait ceiling expires for sources that never
//! pause.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::CoalesceConfig;

/// Handle to a running coalescer: the batch receiver plus its task.
#[derive(Debug)]
pub struct Coalesced<T> {
    pub batches: mpsc::Receiver<Vec<T>>,
    pub task: JoinHandle<()>,
}

/// Turn a stream of discrete events into a stream of debounced batches.
///
/// Batches are never empty. If the input channel closes mid-batch, the
/// partial batch is still emitted before the coalescer terminates.
pub fn coalesce<T: Send + 'static>(
    mut events: mpsc::Receiver<T>,
    windows: CoalesceConfig,
) -> Coalesced<T> {
    let (tx, batches) = mpsc::channel(1);

    let task = tokio::spawn(async move {
        loop {
            let Some(first) = events.recv().await else {
                return;
            };
            let mut batch = vec![first];

            // The ceiling runs from the first event of the batch and is
            // never reset, so a sustained burst still flushes in bounded
            // time.
            let max_wait = tokio::time::sleep(windows.max_wait());
            tokio::pin!(max_wait);

            let mut closed = false;
            loop {
                // Recreated on every event: the quiet period restarts each
                // time something new arrives.
                let min_rest = tokio::time::sleep(windows.min_rest());
                tokio::pin!(min_rest);

                tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => {
                            batch.push(event);
                            continue;
                        }
                        None => {
                            closed = true;
                            break;
                        }
                    },
                    _ = &mut min_rest => break,
                    _ = &mut max_wait => break,
                }
            }

            if tx.send(batch).await.is_err() {
                return;
            }
            if closed {
                return;
            }
        }
    });

    Coalesced { batches, task }
}

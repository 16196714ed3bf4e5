//! Debounced, single-writer auth saves.
//!
//! Save requests post into a per-account mailbox; an actor coalesces them
//! behind a quiet window and a minimum gap between actual writes. Forced
//! saves (stabilization, creds rotation, shutdown) jump the queue and drain
//! whatever was pending.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use {
    tokio::{
        sync::{Mutex, mpsc, oneshot},
        task::JoinHandle,
        time::Instant,
    },
    tracing::{debug, warn},
};

/// The actual write, captured as a closure over the account's vault state.
pub type SaveFn =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> + Send + Sync>;

struct SaveRequest {
    forced: bool,
    done: Option<oneshot::Sender<Result<(), String>>>,
}

/// Handle to one account's save actor.
pub struct DebouncedSaver {
    tx: mpsc::Sender<SaveRequest>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DebouncedSaver {
    /// Spawn the actor. `quiet` is the debounce window, `floor` the minimum
    /// gap between actual writes.
    #[must_use]
    pub fn spawn(save_fn: SaveFn, quiet: Duration, floor: Duration) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(actor_loop(rx, save_fn, quiet, floor));
        Self {
            tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queue a debounced save. Never blocks; a full mailbox means a save is
    /// already pending, which is all this request wanted.
    pub fn request_save(&self) {
        let _ = self.tx.try_send(SaveRequest {
            forced: false,
            done: None,
        });
    }

    /// Save now, bypassing quiet window and floor, and wait for the write.
    pub async fn force_save(&self) -> anyhow::Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(SaveRequest {
                forced: true,
                done: Some(done_tx),
            })
            .await
            .map_err(|_| anyhow::anyhow!("saver actor is gone"))?;
        match done_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(msg)) => Err(anyhow::anyhow!(msg)),
            Err(_) => Err(anyhow::anyhow!("saver actor dropped the request")),
        }
    }

    /// Stop the actor. Pending debounced requests are abandoned; callers
    /// that need a final write should `force_save` first.
    pub async fn stop(&self) {
        let mut handle = self.handle.lock().await;
        if let Some(h) = handle.take() {
            h.abort();
        }
    }
}

async fn actor_loop(
    mut rx: mpsc::Receiver<SaveRequest>,
    save_fn: SaveFn,
    quiet: Duration,
    floor: Duration,
) {
    let mut last_write: Option<Instant> = None;

    while let Some(first) = rx.recv().await {
        let mut forced = first.forced;
        let mut waiters: Vec<oneshot::Sender<Result<(), String>>> =
            first.done.into_iter().collect();

        if !forced {
            // Debounce: keep absorbing requests until the mailbox stays
            // quiet for the full window, or a forced request arrives.
            let mut deadline = Instant::now() + quiet;
            loop {
                tokio::select! {
                    more = rx.recv() => match more {
                        Some(req) => {
                            waiters.extend(req.done);
                            if req.forced {
                                forced = true;
                                break;
                            }
                            deadline = Instant::now() + quiet;
                        },
                        None => break,
                    },
                    () = tokio::time::sleep_until(deadline) => break,
                }
            }
        }

        if !forced
            && let Some(written) = last_write
        {
            let since = written.elapsed();
            if since < floor {
                tokio::time::sleep(floor - since).await;
            }
        }

        let result = (save_fn)().await;
        last_write = Some(Instant::now());

        match &result {
            Ok(()) => debug!("auth blob saved"),
            Err(err) => warn!(error = %err, "auth blob save failed"),
        }
        let outcome = result.map_err(|e| e.to_string());
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn counting_save(counter: Arc<AtomicU32>) -> SaveFn {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn burst_of_requests_coalesces_into_one_write() {
        let writes = Arc::new(AtomicU32::new(0));
        let saver = DebouncedSaver::spawn(
            counting_save(Arc::clone(&writes)),
            Duration::from_millis(50),
            Duration::from_millis(10),
        );

        for _ in 0..10 {
            saver.request_save();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        saver.stop().await;
    }

    #[tokio::test]
    async fn forced_save_writes_immediately_and_reports() {
        let writes = Arc::new(AtomicU32::new(0));
        let saver = DebouncedSaver::spawn(
            counting_save(Arc::clone(&writes)),
            Duration::from_secs(3600),
            Duration::from_secs(3600),
        );

        saver.force_save().await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 1);

        // Forced saves ignore the floor too.
        saver.force_save().await.unwrap();
        assert_eq!(writes.load(Ordering::SeqCst), 2);
        saver.stop().await;
    }

    #[tokio::test]
    async fn forced_save_surfaces_errors() {
        let failing: SaveFn =
            Arc::new(|| Box::pin(async { Err(anyhow::anyhow!("disk full")) }));
        let saver = DebouncedSaver::spawn(
            failing,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );

        let err = saver.force_save().await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        saver.stop().await;
    }

    #[tokio::test]
    async fn floor_spaces_consecutive_debounced_writes() {
        let writes = Arc::new(AtomicU32::new(0));
        let saver = DebouncedSaver::spawn(
            counting_save(Arc::clone(&writes)),
            Duration::from_millis(10),
            Duration::from_millis(150),
        );

        saver.request_save();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(writes.load(Ordering::SeqCst), 1);

        // Second debounced save must wait out the floor.
        saver.request_save();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(writes.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(writes.load(Ordering::SeqCst), 2);
        saver.stop().await;
    }
}

//! # Frame Watcher
//!
//! Osserva una directory di output dei tool AI e pubblica il conteggio dei
//! frame prodotti. Nessun effetto sul processo osservato.
//!
//! Lo stop è esplicito: `stop` invia il segnale e attende che il task sia
//! terminato, così il chiamante può cancellare la directory senza race.

use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::events::{EventSink, PipelineEvent};
use crate::file_manager::FileManager;

/// Running poller over one directory
pub struct FrameWatcher {
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<usize>,
    already: usize,
}

impl FrameWatcher {
    /// Count what already exists, then poll `target_dir` until `expected`
    /// entries exist or `stop` is called.
    pub async fn start(
        target_dir: PathBuf,
        expected: usize,
        poll_interval: Duration,
        name: String,
        events: EventSink,
    ) -> Self {
        let already = FileManager::count_entries(&target_dir).await.unwrap_or(0);
        info!("Already progressed : {}/{}", already, expected);
        info!(
            "Remain to progress : {}/{}",
            expected.saturating_sub(already),
            expected
        );
        events.emit(PipelineEvent::ProgressStart {
            name: name.clone(),
            already,
            total: expected,
        });

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last = already;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!("Frame watcher on {} stopped", target_dir.display());
                        break;
                    }
                    _ = ticker.tick() => {
                        let count = FileManager::count_entries(&target_dir).await.unwrap_or(last);
                        if count != last {
                            last = count;
                            events.emit(PipelineEvent::ProgressTick {
                                name: name.clone(),
                                done: count,
                                total: expected,
                            });
                        }
                        if count >= expected {
                            break;
                        }
                    }
                }
            }

            let done = FileManager::count_entries(&target_dir).await.unwrap_or(last);
            events.emit(PipelineEvent::ProgressStop {
                name,
                done,
                total: expected,
            });
            done
        });

        Self {
            stop_tx,
            handle,
            already,
        }
    }

    /// Entries present when the watcher started
    pub fn already(&self) -> usize {
        self.already
    }

    /// Request a stop and wait until the poller has exited.
    ///
    /// Returns the last observed entry count.
    pub async fn stop(self) -> usize {
        // the poller may already have finished on its own
        let _ = self.stop_tx.send(());
        self.handle.await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_resumes_and_finishes_naturally() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().to_path_buf();
        std::fs::write(dir.join("frame00000001.jpg"), b"x").unwrap();
        std::fs::write(dir.join("frame00000002.jpg"), b"x").unwrap();

        let (sink, mut rx) = EventSink::channel();
        let watcher =
            FrameWatcher::start(dir.clone(), 4, Duration::from_millis(10), "a".to_string(), sink).await;
        assert_eq!(watcher.already(), 2);

        std::fs::write(dir.join("frame00000003.jpg"), b"x").unwrap();
        std::fs::write(dir.join("frame00000004.jpg"), b"x").unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(watcher.stop().await, 4);
        let events = drain(&mut rx);
        assert!(matches!(
            events.first(),
            Some(PipelineEvent::ProgressStart { already: 2, total: 4, .. })
        ));
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::ProgressStop { done: 4, total: 4, .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_before_target() {
        let temp_dir = TempDir::new().unwrap();
        let (sink, mut rx) = EventSink::channel();
        let watcher = FrameWatcher::start(
            temp_dir.path().to_path_buf(),
            1_000,
            Duration::from_millis(10),
            "a".to_string(),
            sink,
        )
        .await;

        let done = tokio::time::timeout(Duration::from_secs(5), watcher.stop())
            .await
            .unwrap();
        assert_eq!(done, 0);

        // stop returned only after the poller published its last event
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some(PipelineEvent::ProgressStop { .. })));
    }
}

//! Live screenshot broadcast channel.
//!
//! A periodic sampler captures the rendered state of the active page for the
//! duration of one job and publishes frames to subscribers, tagged with job
//! identity. The sampler is fire-and-forget: its failures never affect the
//! job outcome, and a page that disappears mid-capture (job completion
//! racing the next tick) silently stops the loop.

use crate::error::Result;
use crate::job::now_millis;
use crate::metrics;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Default sampling interval.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Identity tag attached to every frame of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTag {
    pub game_id: i64,
    pub game_name: String,
    pub action: String,
    pub team_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// One captured screenshot with its identity tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotFrame {
    /// PNG image bytes.
    pub image: Vec<u8>,
    #[serde(flatten)]
    pub tag: FrameTag,
    pub timestamp_ms: u64,
}

impl ScreenshotFrame {
    /// Frame image as a `data:` URI for direct embedding.
    pub fn as_data_uri(&self) -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(&self.image))
    }
}

/// Anything the sampler can capture a screenshot from.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Capture the current rendered state as PNG bytes. An error means the
    /// source is gone (page closed) and the sampler should stop.
    async fn capture(&self) -> Result<Vec<u8>>;
}

/// Publish side of the screenshot channel. Cheap to clone.
#[derive(Clone)]
pub struct ScreenshotBroadcaster {
    tx: broadcast::Sender<ScreenshotFrame>,
}

impl ScreenshotBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScreenshotFrame> {
        self.tx.subscribe()
    }

    /// Publish a frame. Having zero subscribers is not an error.
    pub fn publish(&self, frame: ScreenshotFrame) {
        metrics::record_frame_published();
        let _ = self.tx.send(frame);
    }
}

impl Default for ScreenshotBroadcaster {
    fn default() -> Self {
        Self::new(32)
    }
}

/// Handle to a running sampler. Dropping the guard stops the sampler, so a
/// panicking job still tears its timer down.
pub struct SamplerGuard {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SamplerGuard {
    /// Stop the sampler and wait for the task to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        let _ = (&mut self.handle).await;
    }

    /// Whether the sampler task has already exited on its own.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SamplerGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Periodic screenshot sampler for one job.
pub struct ScreenshotSampler;

impl ScreenshotSampler {
    /// Start sampling `source` every `interval`, publishing tagged frames
    /// until stopped or until the source reports it is gone.
    pub fn start(
        source: Arc<dyn CaptureSource>,
        tag: FrameTag,
        broadcaster: ScreenshotBroadcaster,
        interval: Duration,
    ) -> SamplerGuard {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match source.capture().await {
                            Ok(image) => {
                                broadcaster.publish(ScreenshotFrame {
                                    image,
                                    tag: tag.clone(),
                                    timestamp_ms: now_millis(),
                                });
                            }
                            // The page is gone; expected when the job just
                            // finished. Stop quietly.
                            Err(_) => break,
                        }
                    }
                }
            }
        });

        SamplerGuard { cancel, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedSource {
        /// Number of successful captures before the source "closes".
        successes: usize,
        captures: AtomicUsize,
    }

    #[async_trait]
    impl CaptureSource for ScriptedSource {
        async fn capture(&self) -> Result<Vec<u8>> {
            let n = self.captures.fetch_add(1, Ordering::SeqCst);
            if n < self.successes {
                Ok(vec![0x89, 0x50, 0x4e, 0x47])
            } else {
                Err(Error::Browser("page already closed".to_string()))
            }
        }
    }

    fn tag() -> FrameTag {
        FrameTag {
            game_id: 7,
            game_name: "orionstars".to_string(),
            action: "recharge".to_string(),
            team_id: 1,
            session_id: Some("sess-1".to_string()),
        }
    }

    #[tokio::test]
    async fn publishes_tagged_frames() {
        let broadcaster = ScreenshotBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        let source = Arc::new(ScriptedSource {
            successes: usize::MAX,
            captures: AtomicUsize::new(0),
        });
        let guard = ScreenshotSampler::start(
            source,
            tag(),
            broadcaster.clone(),
            Duration::from_millis(5),
        );

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.tag.team_id, 1);
        assert_eq!(frame.tag.action, "recharge");
        assert!(frame.as_data_uri().starts_with("data:image/png;base64,"));

        guard.stop().await;
    }

    #[tokio::test]
    async fn closed_page_stops_sampler_silently() {
        let broadcaster = ScreenshotBroadcaster::default();
        let mut rx = broadcaster.subscribe();

        let source = Arc::new(ScriptedSource {
            successes: 2,
            captures: AtomicUsize::new(0),
        });
        let guard = ScreenshotSampler::start(
            source.clone(),
            tag(),
            broadcaster.clone(),
            Duration::from_millis(5),
        );

        // Two frames arrive, then the source errors and the loop exits on
        // its own, no stop() required.
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !guard.is_finished() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("sampler should stop after the source closes");

        assert_eq!(source.captures.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let broadcaster = ScreenshotBroadcaster::default();
        broadcaster.publish(ScreenshotFrame {
            image: vec![1, 2, 3],
            tag: tag(),
            timestamp_ms: now_millis(),
        });
    }

    #[tokio::test]
    async fn dropping_guard_stops_the_task() {
        let broadcaster = ScreenshotBroadcaster::default();
        let source = Arc::new(ScriptedSource {
            successes: usize::MAX,
            captures: AtomicUsize::new(0),
        });
        let guard = ScreenshotSampler::start(
            source,
            tag(),
            broadcaster,
            Duration::from_millis(5),
        );
        drop(guard);
        // Nothing to assert beyond "no panic"; the abort tears the task down.
    }
}

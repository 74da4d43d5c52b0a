use super::monitor::MotionMonitor;
use super::state::MotionTransition;
use crate::events::{EngineEvent, EventBus};
use crate::frame_cache::FrameCache;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Pause between cache polls when there is nothing to analyze
const IDLE_DELAY: Duration = Duration::from_millis(10);

/// Runs the motion analyzer against the cached raw frame every
/// `check_interval` captured frames, independently of the capture loop.
pub struct DetectionLoop {
    monitor: Arc<MotionMonitor>,
    cache: Arc<FrameCache>,
    events: EventBus,
    check_interval: u64,
}

impl DetectionLoop {
    pub fn new(
        monitor: Arc<MotionMonitor>,
        cache: Arc<FrameCache>,
        events: EventBus,
        check_interval: u64,
    ) -> Self {
        Self {
            monitor,
            cache,
            events,
            check_interval: check_interval.max(1),
        }
    }

    /// Whether the frame with id `latest` is due for analysis
    fn is_due(&self, last_analyzed: Option<u64>, latest: u64) -> bool {
        match last_analyzed {
            None => true,
            // Ids went backwards: the cache was refilled from scratch
            Some(last) if latest < last => true,
            Some(last) => latest - last >= self.check_interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "Detection loop started, analyzing every {} frame(s)",
            self.check_interval
        );

        let mut last_analyzed: Option<u64> = None;

        while !cancel.is_cancelled() {
            let due = self.monitor.is_enabled()
                && self
                    .cache
                    .latest_raw_id()
                    .is_some_and(|latest| self.is_due(last_analyzed, latest));

            // Copy out of the cache, then analyze without holding its lock
            let frame = if due { self.cache.get_raw() } else { None };

            let Some(frame) = frame else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_DELAY) => {}
                }
                continue;
            };

            last_analyzed = Some(frame.id);
            let frame_id = frame.id;
            let monitor = Arc::clone(&self.monitor);

            let mut analysis = tokio::task::spawn_blocking(move || monitor.process(&frame));
            let transition = tokio::select! {
                _ = cancel.cancelled() => {
                    // A blocking analysis cannot be interrupted; it must be done
                    // before the engine resets the analyzer.
                    if let Err(e) = (&mut analysis).await {
                        error!("Motion analysis task for frame {} failed: {}", frame_id, e);
                    }
                    break;
                }
                result = &mut analysis => match result {
                    Ok(transition) => transition,
                    Err(e) => {
                        error!("Motion analysis task for frame {} failed: {}", frame_id, e);
                        None
                    }
                },
            };

            match transition {
                Some(MotionTransition::Started {
                    total_area,
                    regions,
                }) => {
                    self.events.publish(EngineEvent::MotionStarted {
                        total_area,
                        regions,
                        timestamp: SystemTime::now(),
                    });
                }
                Some(MotionTransition::Ended) => {
                    self.events.publish(EngineEvent::MotionEnded {
                        timestamp: SystemTime::now(),
                    });
                }
                None => debug!("Frame {} analyzed, motion state unchanged", frame_id),
            }
        }

        info!("Detection loop stopped");
    }
}

use crate::frame::Frame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Latest raw and annotated frame, guarded by a single lock.
///
/// Writers hand over ownership of a frame; readers always get a deep copy, so
/// nobody ever observes a frame being modified underneath them. The annotated
/// slot is only valid for the raw frame it was rendered from: writing a new raw
/// frame invalidates it.
pub struct FrameCache {
    slots: Mutex<CacheSlots>,
    stats: FrameCacheStats,
}

#[derive(Default)]
struct CacheSlots {
    raw: Option<Frame>,
    annotated: Option<Frame>,
}

#[derive(Debug, Default)]
pub struct FrameCacheStats {
    pub raw_writes: AtomicU64,
    pub annotated_writes: AtomicU64,
    pub stale_annotations: AtomicU64,
    pub reads: AtomicU64,
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameCacheStatsSnapshot {
    pub raw_writes: u64,
    pub annotated_writes: u64,
    pub stale_annotations: u64,
    pub reads: u64,
}

impl FrameCacheStats {
    pub fn snapshot(&self) -> FrameCacheStatsSnapshot {
        FrameCacheStatsSnapshot {
            raw_writes: self.raw_writes.load(Ordering::Relaxed),
            annotated_writes: self.annotated_writes.load(Ordering::Relaxed),
            stale_annotations: self.stale_annotations.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
        }
    }
}

impl FrameCache {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(CacheSlots::default()),
            stats: FrameCacheStats::default(),
        }
    }

    /// Replace the raw frame and drop an annotated copy rendered from an older one
    pub fn set_raw(&self, frame: Frame) {
        trace!("Caching raw frame {}", frame.id);
        let mut slots = self.slots.lock();
        if slots
            .annotated
            .as_ref()
            .map_or(false, |annotated| annotated.id != frame.id)
        {
            slots.annotated = None;
        }
        slots.raw = Some(frame);
        self.stats.raw_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_raw(&self) -> Option<Frame> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().raw.clone()
    }

    /// Store an annotated frame. Rejected (returns false) when it was rendered
    /// from a raw frame that has since been replaced.
    pub fn set_annotated(&self, frame: Frame) -> bool {
        let mut slots = self.slots.lock();
        let current = slots.raw.as_ref().map(|raw| raw.id);
        if current != Some(frame.id) {
            self.stats.stale_annotations.fetch_add(1, Ordering::Relaxed);
            trace!(
                "Discarding annotated frame {} (current raw: {:?})",
                frame.id,
                current
            );
            return false;
        }
        slots.annotated = Some(frame);
        self.stats.annotated_writes.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn get_annotated(&self) -> Option<Frame> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().annotated.clone()
    }

    /// Id of the cached raw frame, without copying pixels
    pub fn latest_raw_id(&self) -> Option<u64> {
        self.slots.lock().raw.as_ref().map(|raw| raw.id)
    }

    /// Drop both slots
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.raw = None;
        slots.annotated = None;
    }

    pub fn stats(&self) -> FrameCacheStatsSnapshot {
        self.stats.snapshot()
    }
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new()
    }
}

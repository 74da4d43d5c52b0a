use super::backend::{CaptureBackend, DeviceHandle, DeviceProperty, DeviceSettings};
use crate::error::DeviceError;
use crate::frame::Frame;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Scriptable capture backend for tests and for collaborators that need a
/// camera without hardware.
///
/// Clones share their script, so a test can keep one copy and steer the copy
/// that was handed to the engine.
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    control: Arc<MockControl>,
}

struct MockControl {
    width: u32,
    height: u32,
    gray: u8,
    square: Mutex<Option<(u32, u32, u32)>>,
    open_failures: AtomicU32,
    read_failures: AtomicU32,
    stream_drops: AtomicU32,
    fail_all_reads: AtomicBool,
    disconnected: AtomicBool,
    read_delay_ms: AtomicU64,
    opens: AtomicU32,
    open_attempts: AtomicU32,
    releases: AtomicU32,
    reads: AtomicU64,
}

impl MockBackend {
    /// Uniform gray frames of the given size
    pub fn new(width: u32, height: u32, gray: u8) -> Self {
        Self::named("mock", width, height, gray)
    }

    pub fn named(name: &str, width: u32, height: u32, gray: u8) -> Self {
        Self {
            name: name.to_string(),
            control: Arc::new(MockControl {
                width,
                height,
                gray,
                square: Mutex::new(None),
                open_failures: AtomicU32::new(0),
                read_failures: AtomicU32::new(0),
                stream_drops: AtomicU32::new(0),
                fail_all_reads: AtomicBool::new(false),
                disconnected: AtomicBool::new(false),
                read_delay_ms: AtomicU64::new(0),
                opens: AtomicU32::new(0),
                open_attempts: AtomicU32::new(0),
                releases: AtomicU32::new(0),
                reads: AtomicU64::new(0),
            }),
        }
    }

    /// The next `count` open attempts fail
    pub fn fail_next_opens(&self, count: u32) {
        self.control.open_failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` reads fail
    pub fn fail_next_reads(&self, count: u32) {
        self.control.read_failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` reads report a disconnect while the handle still
    /// claims to be open, like a pipeline hitting end-of-stream
    pub fn drop_next_reads(&self, count: u32) {
        self.control.stream_drops.store(count, Ordering::SeqCst);
    }

    /// Every read fails until switched off again
    pub fn fail_all_reads(&self, fail: bool) {
        self.control.fail_all_reads.store(fail, Ordering::SeqCst);
    }

    /// Simulate unplugging the camera: open handles report closed, opens fail
    pub fn disconnect(&self) {
        self.control.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn reconnect(&self) {
        self.control.disconnected.store(false, Ordering::SeqCst);
    }

    /// Delay every read, e.g. to exercise read timeouts
    pub fn set_read_delay(&self, delay: Duration) {
        self.control
            .read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Draw a white square at (x, y) with the given side, or remove it
    pub fn set_square(&self, square: Option<(u32, u32, u32)>) {
        *self.control.square.lock() = square;
    }

    /// Successful opens so far
    pub fn opens(&self) -> u32 {
        self.control.opens.load(Ordering::SeqCst)
    }

    pub fn open_attempts(&self) -> u32 {
        self.control.open_attempts.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> u32 {
        self.control.releases.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u64 {
        self.control.reads.load(Ordering::SeqCst)
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl MockControl {
    fn render(&self) -> Frame {
        let mut frame = Frame::filled(self.width, self.height, [self.gray; 3]);
        frame.timestamp = SystemTime::now();

        if let Some((x0, y0, size)) = *self.square.lock() {
            let width = self.width as usize;
            let data = frame.data_mut();
            for y in y0..(y0 + size).min(self.height) {
                for x in x0..(x0 + size).min(self.width) {
                    let offset = (y as usize * width + x as usize) * 3;
                    data[offset..offset + 3].copy_from_slice(&[255; 3]);
                }
            }
        }

        frame
    }
}

#[async_trait]
impl CaptureBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&self, settings: &DeviceSettings) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        self.control.open_attempts.fetch_add(1, Ordering::SeqCst);

        if self.control.disconnected.load(Ordering::SeqCst)
            || Self::take_failure(&self.control.open_failures)
        {
            return Err(DeviceError::Open {
                device: settings.index,
                details: "mock device unavailable".to_string(),
            });
        }

        self.control.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            name: self.name.clone(),
            control: Arc::clone(&self.control),
            released: false,
        }))
    }
}

struct MockHandle {
    name: String,
    control: Arc<MockControl>,
    released: bool,
}

#[async_trait]
impl DeviceHandle for MockHandle {
    fn backend(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        !self.released && !self.control.disconnected.load(Ordering::SeqCst)
    }

    fn apply_property(&mut self, _property: DeviceProperty) -> Result<(), DeviceError> {
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        if self.released {
            return Err(DeviceError::NotOpen);
        }

        let delay = self.control.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.control.reads.fetch_add(1, Ordering::SeqCst);

        if self.control.disconnected.load(Ordering::SeqCst)
            || MockBackend::take_failure(&self.control.stream_drops)
        {
            return Err(DeviceError::Disconnected);
        }
        if self.control.fail_all_reads.load(Ordering::SeqCst)
            || MockBackend::take_failure(&self.control.read_failures)
        {
            return Err(DeviceError::read("mock read failure"));
        }

        Ok(self.control.render())
    }

    async fn release(&mut self) -> Result<(), DeviceError> {
        if !self.released {
            self.released = true;
            self.control.releases.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        if !self.released {
            self.control.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

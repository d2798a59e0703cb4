//! Output sinks
//!
//! [`Screen`] and [`Stream`] are what video and audio components write to.
//! Both honour the run-ahead flag: while the committed pass of a run-ahead
//! frame runs, nothing reaches the host.
//!
//! ```text
//! ┌──────────┐    ┌────────────┐    ┌───────────┐
//! │  Screen  │───►│ FrameQueue │───►│ Presenter │
//! │ (domain) │    │ (bounded)  │    │ (thread)  │
//! └──────────┘    └────────────┘    └───────────┘
//! ```
//!
//! The queue never blocks the emulation: when the presenter falls behind,
//! new frames are dropped and counted.

use crate::scheduler::Scheduler;
use crate::serializer::Serializer;
use crate::thread::Frequency;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// ============================================================================
// Frames
// ============================================================================

/// One presented video frame, 0x00RRGGBB pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Emulated frame number
    pub number: u64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

// ============================================================================
// Frame Queue
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub pushed: u64,
    pub popped: u64,
    pub dropped: u64,
}

/// Bounded frame queue between the core and a presentation thread
pub struct FrameQueue {
    depth: usize,
    frames: Mutex<VecDeque<VideoFrame>>,
    ready_cond: Condvar,
    closed: AtomicBool,
    frames_pushed: AtomicU64,
    frames_popped: AtomicU64,
    frames_dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            depth,
            frames: Mutex::new(VecDeque::with_capacity(depth)),
            ready_cond: Condvar::new(),
            closed: AtomicBool::new(false),
            frames_pushed: AtomicU64::new(0),
            frames_popped: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        }
    }

    /// Queue a frame. Returns false (and drops it) when the queue is full.
    pub fn push(&self, frame: VideoFrame) -> bool {
        let mut queue = self.frames.lock();
        if queue.len() >= self.depth || self.closed.load(Ordering::SeqCst) {
            self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        queue.push_back(frame);
        self.frames_pushed.fetch_add(1, Ordering::Relaxed);
        self.ready_cond.notify_one();
        true
    }

    pub fn pop(&self) -> Option<VideoFrame> {
        let frame = self.frames.lock().pop_front()?;
        self.frames_popped.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Pop, waiting up to `timeout` for a frame. Returns `None` on timeout or
    /// once the queue is closed and drained.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<VideoFrame> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.frames.lock();

        while queue.is_empty() {
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            self.ready_cond.wait_for(&mut queue, remaining);
        }

        let frame = queue.pop_front()?;
        self.frames_popped.fetch_add(1, Ordering::Relaxed);
        Some(frame)
    }

    /// Discard queued frames
    pub fn flush(&self) {
        let flushed = {
            let mut queue = self.frames.lock();
            let flushed = queue.len();
            queue.clear();
            flushed
        };
        self.frames_dropped.fetch_add(flushed as u64, Ordering::Relaxed);
        tracing::debug!(flushed, "frame queue flushed");
    }

    /// Stop accepting frames and wake any waiting consumer
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let _queue = self.frames.lock();
        self.ready_cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.len(),
            pushed: self.frames_pushed.load(Ordering::Relaxed),
            popped: self.frames_popped.load(Ordering::Relaxed),
            dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Screen
// ============================================================================

/// Video sink written by a video component once per emulated frame
pub struct Screen {
    scheduler: Scheduler,
    width: u32,
    height: u32,
    latest: Mutex<Option<VideoFrame>>,
    sink: Mutex<Option<Arc<FrameQueue>>>,
    presented: AtomicU64,
    suppressed: AtomicU64,
}

impl Screen {
    pub fn new(scheduler: Scheduler, width: u32, height: u32) -> Self {
        Self {
            scheduler,
            width,
            height,
            latest: Mutex::new(None),
            sink: Mutex::new(None),
            presented: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Also forward presented frames to `queue`
    pub fn attach(&self, queue: Arc<FrameQueue>) {
        *self.sink.lock() = Some(queue);
    }

    pub fn detach(&self) {
        *self.sink.lock() = None;
    }

    /// Present a finished frame. Dropped during the committed pass of a
    /// run-ahead frame.
    pub fn frame(&self, number: u64, pixels: &[u32]) {
        if self.scheduler.run_ahead() {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let frame = VideoFrame {
            number,
            width: self.width,
            height: self.height,
            pixels: pixels.to_vec(),
        };
        if let Some(queue) = self.sink.lock().as_ref() {
            queue.push(frame.clone());
        }
        *self.latest.lock() = Some(frame);
        self.presented.fetch_add(1, Ordering::Relaxed);
    }

    /// Most recently presented frame
    pub fn latest(&self) -> Option<VideoFrame> {
        self.latest.lock().clone()
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Stream
// ============================================================================

struct StreamState {
    accumulator: u64,
    buffer: Vec<f32>,
}

/// Audio sink resampling a domain's per-step samples to the host rate.
///
/// The input rate comes from the domain's frequency, so the stream stays
/// exact for rational clocks.
pub struct Stream {
    scheduler: Scheduler,
    frequency: Frequency,
    master_hz: u64,
    output_rate: u32,
    state: Mutex<StreamState>,
}

impl Stream {
    pub fn new(scheduler: Scheduler, frequency: Frequency, master_hz: u64, output_rate: u32) -> Self {
        Self {
            scheduler,
            frequency,
            master_hz,
            output_rate,
            state: Mutex::new(StreamState {
                accumulator: 0,
                buffer: Vec::with_capacity(1024),
            }),
        }
    }

    /// Samples produced by the domain per second
    pub fn input_rate(&self) -> f64 {
        self.frequency.rate_hz(self.master_hz)
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Feed one input sample
    pub fn sample(&self, value: f32) {
        // One input step lasts numerator / (master_hz * denominator) seconds
        let threshold = self.master_hz * self.frequency.denominator();
        let suppressed = self.scheduler.run_ahead();

        let mut state = self.state.lock();
        state.accumulator += self.output_rate as u64 * self.frequency.numerator();
        while state.accumulator >= threshold {
            state.accumulator -= threshold;
            if !suppressed {
                state.buffer.push(value);
            }
        }
    }

    /// Take the samples produced so far
    pub fn drain(&self) -> Vec<f32> {
        std::mem::take(&mut self.state.lock().buffer)
    }

    pub fn pending(&self) -> usize {
        self.state.lock().buffer.len()
    }

    /// Resampler phase is machine state; buffered output is not.
    pub fn serialize(&self, s: &mut Serializer) {
        let mut state = self.state.lock();
        s.integer(&mut state.accumulator);
    }
}

// ============================================================================
// Presenter
// ============================================================================

/// Worker thread that hands queued frames to a callback
pub struct Presenter {
    queue: Arc<FrameQueue>,
    worker: Option<JoinHandle<u64>>,
}

impl Presenter {
    pub fn spawn<F>(queue: Arc<FrameQueue>, mut present: F) -> std::io::Result<Self>
    where
        F: FnMut(VideoFrame) + Send + 'static,
    {
        let consumer = Arc::clone(&queue);
        let worker = std::thread::Builder::new()
            .name("presenter".into())
            .spawn(move || {
                let mut shown = 0u64;
                while !consumer.is_closed() || !consumer.is_empty() {
                    if let Some(frame) = consumer.pop_blocking(Duration::from_millis(50)) {
                        present(frame);
                        shown += 1;
                    }
                }
                tracing::debug!(shown, "presenter stopped");
                shown
            })?;

        Ok(Self {
            queue,
            worker: Some(worker),
        })
    }

    pub fn queue(&self) -> &Arc<FrameQueue> {
        &self.queue
    }

    /// Close the queue, wait for the worker and return frames shown
    pub fn finish(mut self) -> u64 {
        self.stop()
    }

    fn stop(&mut self) -> u64 {
        self.queue.close();
        match self.worker.take() {
            Some(worker) => worker.join().unwrap_or(0),
            None => 0,
        }
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.stop();
    }
}

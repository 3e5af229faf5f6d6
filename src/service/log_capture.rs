//! Bounded output buffer shared between a reader thread and a consumer.
//!
//! The reader appends lines as the child produces them; the UI or CLI drains
//! at its own pace. Oldest lines are evicted once capacity is reached.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Lines kept before the oldest is evicted.
pub const DEFAULT_MAX_LOG_LINES: usize = 1000;

/// Fill ratio at which a one-time warning is logged.
const LOG_BUFFER_WARNING_THRESHOLD: f64 = 0.8;

/// Ring buffer of output lines. Cloning shares the same buffer.
#[derive(Clone)]
pub struct LogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    max_lines: usize,
    dropped_count: Arc<AtomicUsize>,
    warned_at_capacity: Arc<AtomicBool>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_max_lines(DEFAULT_MAX_LOG_LINES)
    }

    pub fn with_max_lines(max_lines: usize) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(max_lines))),
            max_lines,
            dropped_count: Arc::new(AtomicUsize::new(0)),
            warned_at_capacity: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let len = {
            let mut lines = self.lines.lock();
            lines.push_back(line.into());
            if lines.len() > self.max_lines {
                lines.pop_front();
                self.dropped_count.fetch_add(1, Ordering::Relaxed);
            }
            lines.len()
        };

        let threshold = (self.max_lines as f64 * LOG_BUFFER_WARNING_THRESHOLD) as usize;
        if len >= threshold && !self.warned_at_capacity.swap(true, Ordering::Relaxed) {
            tracing::debug!(
                "Output buffer at {}/{} lines, oldest lines will be dropped",
                len,
                self.max_lines
            );
        }
    }

    /// Take every buffered line, oldest first, leaving the buffer empty.
    pub fn drain(&self) -> Vec<String> {
        self.lines.lock().drain(..).collect()
    }

    /// Copy of the most recent `n` lines without consuming them.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_lines
    }

    /// Lines evicted because the buffer was full.
    pub fn dropped_count(&self) -> usize {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
        self.warned_at_capacity.store(false, Ordering::Relaxed);
    }
}

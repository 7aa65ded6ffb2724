//! Adaptive throttling of the live answer feed.
//!
//! During a delta storm the backend can push fragments far faster than the
//! UI should repaint. The throttle bounds the visible update rate while
//! guaranteeing the last accumulated value is always shown exactly once.
//! The pending flush is a single-slot deferred task owned by the throttle
//! state, aborted and rescheduled whenever a newer delta preempts it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Emission intervals and the content thresholds that select between them.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Interval while the answer is short and growing slowly.
    pub base_interval: Duration,
    /// Interval once the accumulated answer is already long.
    pub long_answer_interval: Duration,
    /// Interval after a large jump in content length since the last emit.
    pub large_jump_interval: Duration,
    /// Answer length (chars) beyond which `long_answer_interval` applies.
    pub long_answer_chars: usize,
    /// Length growth (chars) beyond which `large_jump_interval` applies.
    pub large_jump_chars: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(150),
            long_answer_interval: Duration::from_millis(200),
            large_jump_interval: Duration::from_millis(250),
            long_answer_chars: 500,
            large_jump_chars: 100,
        }
    }
}

impl ThrottleConfig {
    /// Picks the interval for a content of `len` chars given the length at
    /// the previous emission. Large jumps win over long answers.
    pub fn interval_for(&self, len: usize, last_len: usize) -> Duration {
        if len > last_len + self.large_jump_chars {
            self.large_jump_interval
        } else if len > self.long_answer_chars {
            self.long_answer_interval
        } else {
            self.base_interval
        }
    }
}

/// Terminal classification of a finished turn's accumulated answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalAnswer {
    /// The full answer text, already emitted to the consumer.
    Content(String),
    /// Nothing usable streamed. Distinct terminal state rather than a
    /// zero-length emission, so the UI can offer a retry.
    Empty,
}

struct ThrottleInner {
    tx: mpsc::UnboundedSender<String>,
    last_emit: Option<Instant>,
    last_len: usize,
    last_value: Option<String>,
    /// Most recent content waiting on the deferred flush.
    latest: Option<String>,
    pending: Option<JoinHandle<()>>,
    done: bool,
}

impl ThrottleInner {
    fn cancel_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    fn emit(&mut self, value: String, len: usize, now: Instant) {
        let _ = self.tx.send(value.clone());
        self.last_emit = Some(now);
        self.last_len = len;
        self.last_value = Some(value);
    }
}

/// Coalesces a rapid sequence of cumulative content updates into a bounded
/// rate of consumer-visible emissions.
///
/// Lives for one streaming turn; discarded once the turn completes or
/// errors. Emissions preserve arrival order - a deferred flush only ever
/// delivers the newest known content, and is aborted when a fresher delta
/// either emits directly or reschedules it.
pub struct AdaptiveThrottle {
    inner: Arc<Mutex<ThrottleInner>>,
    config: ThrottleConfig,
}

impl AdaptiveThrottle {
    /// Creates a throttle emitting visible updates into `tx`.
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self::with_config(tx, ThrottleConfig::default())
    }

    pub fn with_config(tx: mpsc::UnboundedSender<String>, config: ThrottleConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ThrottleInner {
                tx,
                last_emit: None,
                last_len: 0,
                last_value: None,
                latest: None,
                pending: None,
                done: false,
            })),
            config,
        }
    }

    /// Offers the current accumulated content. Emits immediately if the
    /// dynamic interval has elapsed, otherwise (re)schedules the deferred
    /// flush for the remainder of the interval.
    ///
    /// Must be called from within a tokio runtime.
    pub fn offer(&self, content: String) {
        let mut inner = self.inner.lock().unwrap();
        if inner.done {
            return;
        }

        let len = content.chars().count();
        let interval = self.config.interval_for(len, inner.last_len);
        let now = Instant::now();

        let elapsed = inner.last_emit.map(|t| now.duration_since(t));
        let due = match elapsed {
            None => true,
            Some(e) => e > interval,
        };

        if due {
            inner.cancel_pending();
            inner.latest = None;
            inner.emit(content, len, now);
            return;
        }

        inner.latest = Some(content);
        inner.cancel_pending();

        let delay = interval.saturating_sub(elapsed.unwrap_or_default());
        let shared = Arc::clone(&self.inner);
        inner.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = shared.lock().unwrap();
            if inner.done {
                return;
            }
            if let Some(value) = inner.latest.take() {
                let len = value.chars().count();
                inner.emit(value, len, Instant::now());
            }
            inner.pending = None;
        }));
    }

    /// Completes the turn with the final accumulated content.
    ///
    /// Cancels any deferred flush and guarantees the consumer has observed
    /// the final content exactly once: it is emitted now unless the last
    /// emission already carried it. A blank answer is reported as
    /// [`FinalAnswer::Empty`] without a zero-length emission.
    pub fn finish(&self, content: String) -> FinalAnswer {
        let mut inner = self.inner.lock().unwrap();
        inner.done = true;
        inner.cancel_pending();
        inner.latest = None;

        if content.trim().is_empty() {
            return FinalAnswer::Empty;
        }

        if inner.last_value.as_deref() != Some(content.as_str()) {
            let len = content.chars().count();
            inner.emit(content.clone(), len, Instant::now());
        }
        FinalAnswer::Content(content)
    }

    /// Discards the throttle state without a final emission. Used when the
    /// turn errors out mid-stream.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.done = true;
        inner.cancel_pending();
        inner.latest = None;
    }
}

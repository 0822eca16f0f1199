//! Execution channels: the request/response boundary between the scheduler
//! and the filter engine.
//!
//! A channel accepts at most one `process` request at a time. Requests move
//! the frame into the channel; the only way to get a buffer back is the
//! `Processed` event. Completion is observed by polling, never by blocking.

pub mod inline;
pub mod worker;

use std::time::{Duration, Instant};

use livefx_common::filter::FilterConfig;
use livefx_common::frame::Frame;
use tracing::{debug, warn};

use crate::engine::FilterEngine;

pub use inline::InlineChannel;
pub use worker::WorkerChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    Initializing,
    Ready,
    Busy,
    Failed,
}

/// One frame plus the filter config captured when it was submitted.
#[derive(Debug)]
pub struct ProcessJob {
    pub frame: Frame,
    pub config: FilterConfig,
}

#[derive(Debug)]
pub enum ChannelEvent {
    /// `init` completed (or was repeated while already Ready).
    Initialized,
    /// The outstanding frame came back transformed.
    Processed(Frame),
    /// The engine failed on the outstanding frame. The buffer is gone; the
    /// channel is Ready again.
    FrameFailed(String),
    /// The channel is unusable until `init` is called again.
    Fatal(ChannelError),
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("filter engine failed to initialize: {0}")]
    InitFailed(String),
    #[error("a frame is already in flight")]
    Busy,
    #[error("channel is not ready (state {0:?})")]
    NotReady(ChannelState),
    #[error("worker exited unexpectedly")]
    WorkerExited,
    #[error("no init response within {0:?}")]
    InitTimeout(Duration),
    #[error("no process response within {0:?}")]
    ProcessTimeout(Duration),
}

/// Limits for how long a request may stay unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTimeouts {
    pub init: Duration,
    pub process: Duration,
}

impl Default for ChannelTimeouts {
    fn default() -> Self {
        Self {
            init: Duration::from_secs(5),
            process: Duration::from_secs(2),
        }
    }
}

/// Request/response interface to a filter engine running somewhere else.
pub trait ExecutionChannel: Send {
    /// Start (or restart) the engine. The outcome arrives as `Initialized`
    /// or `Fatal` from `poll`. Repeating `init` while Ready re-reports
    /// `Initialized` and changes nothing.
    fn init(&mut self);

    /// Hand a frame to the engine. Refused with `Busy` while a frame is
    /// outstanding and `NotReady` before init; a refused job is dropped.
    fn process(&mut self, job: ProcessJob) -> Result<(), ChannelError>;

    /// Next protocol event, if any. Never blocks.
    fn poll(&mut self) -> Option<ChannelEvent>;

    fn state(&self) -> ChannelState;

    /// Tear the engine down. Any outstanding frame is dropped.
    fn shutdown(&mut self);

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Raw replies from the engine side, before protocol bookkeeping.
#[derive(Debug)]
pub(crate) enum Response {
    Initialized,
    InitFailed(String),
    Processed(Frame),
    Failed(String),
}

impl Response {
    fn kind(&self) -> &'static str {
        match self {
            Response::Initialized => "initialized",
            Response::InitFailed(_) => "init_failed",
            Response::Processed(_) => "processed",
            Response::Failed(_) => "failed",
        }
    }
}

/// Apply a response to the channel state, yielding the event the caller
/// should see. Responses that do not fit the current state are dropped.
pub(crate) fn settle(state: &mut ChannelState, response: Response) -> Option<ChannelEvent> {
    match (response, *state) {
        (Response::Initialized, ChannelState::Initializing) => {
            *state = ChannelState::Ready;
            Some(ChannelEvent::Initialized)
        }
        (Response::Initialized, ChannelState::Ready | ChannelState::Busy) => {
            Some(ChannelEvent::Initialized)
        }
        (Response::InitFailed(reason), ChannelState::Initializing) => {
            *state = ChannelState::Failed;
            Some(ChannelEvent::Fatal(ChannelError::InitFailed(reason)))
        }
        (Response::Processed(frame), ChannelState::Busy) => {
            *state = ChannelState::Ready;
            Some(ChannelEvent::Processed(frame))
        }
        (Response::Failed(reason), ChannelState::Busy) => {
            *state = ChannelState::Ready;
            Some(ChannelEvent::FrameFailed(reason))
        }
        (response, current) => {
            warn!(
                response = response.kind(),
                state = ?current,
                "dropping response that does not match channel state"
            );
            None
        }
    }
}

/// Run one job through an engine, rebuilding the frame around the output.
pub(crate) fn run_job(engine: &dyn FilterEngine, job: ProcessJob) -> Response {
    let ProcessJob { frame, config } = job;
    let (width, height) = (frame.width(), frame.height());
    let (seq, captured_at_ms) = (frame.seq, frame.captured_at_ms);

    let started = Instant::now();
    let result = engine.apply(
        frame.into_pixels(),
        width,
        height,
        config.filter,
        config.brightness,
    );
    let elapsed = started.elapsed();

    match result {
        Ok(pixels) => match Frame::new(width, height, pixels, seq, captured_at_ms) {
            Ok(out) => {
                debug!(
                    seq,
                    filter = %config.filter,
                    elapsed_ms = format!("{:.1}", elapsed.as_secs_f64() * 1000.0),
                    "processed frame"
                );
                Response::Processed(out)
            }
            Err(e) => Response::Failed(format!("{} returned a bad buffer: {e}", engine.name())),
        },
        Err(e) => Response::Failed(e.to_string()),
    }
}

use std::collections::VecDeque;
use std::time::Duration;

use livefx_common::config::Config;
use livefx_common::filter::{BrightnessError, FilterConfig};
use livefx_common::frame::Frame;
use livefx_common::source::{FrameSource, SourceConstraints, SourceError};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backpressure::{BackpressureController, BackpressureStats, TickDecision};
use crate::channel::{ChannelError, ChannelEvent, ChannelState, ExecutionChannel, ProcessJob};
use crate::control::{ControlEvent, FilterControl, FilterSnapshot};
use crate::render::Renderer;

/// Oldest reports are dropped once this many are waiting to be drained.
const MAX_PENDING_REPORTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    /// Waiting for the first frame and for the channel to report ready.
    Acquiring,
    Streaming,
    /// Stop requested; waiting for the outstanding frame (if any) to drain.
    Stopping,
    Error,
}

/// Things the caller may want to surface, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineReport {
    AcquisitionFailed(SourceError),
    /// The source went away while streaming.
    SourceLost(SourceError),
    ChannelFailed(ChannelError),
    FrameFailed { seq: u64, reason: String },
    RestartScheduled { attempt: u32, after: Duration },
    RestartStarted { attempt: u32 },
    RestartsExhausted { attempts: u32 },
    Stopped,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PipelineError {
    #[error("cannot {action} while {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: PipelineState,
    },
    #[error("frame source failed: {0}")]
    Acquisition(#[from] SourceError),
    #[error(transparent)]
    Brightness(#[from] BrightnessError),
}

/// Which user controls make sense in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlAvailability {
    pub start: bool,
    pub stop: bool,
    pub filters: bool,
}

impl ControlAvailability {
    fn for_state(state: PipelineState, restart_pending: bool) -> Self {
        Self {
            start: matches!(state, PipelineState::Idle | PipelineState::Error),
            stop: matches!(state, PipelineState::Acquiring | PipelineState::Streaming)
                || (state == PipelineState::Error && restart_pending),
            filters: state == PipelineState::Streaming,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub channel_state: ChannelState,
    /// Restart cycles started over the pipeline's lifetime.
    pub restarts: u32,
    pub restart_pending: bool,
    pub controls: ControlAvailability,
    pub stats: BackpressureStats,
    pub rendered: u64,
    pub config: FilterConfig,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub constraints: SourceConstraints,
    pub restart_backoff: Duration,
    /// Consecutive automatic restarts allowed before giving up.
    pub max_auto_restarts: u32,
    /// Shut the channel down on stop instead of leaving it Ready.
    pub teardown_on_stop: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            constraints: SourceConstraints::default(),
            restart_backoff: Duration::from_millis(1000),
            max_auto_restarts: 1,
            teardown_on_stop: false,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            constraints: config.source.constraints(),
            restart_backoff: config.pipeline.restart_backoff(),
            max_auto_restarts: config.pipeline.max_auto_restarts,
            teardown_on_stop: config.channel.teardown_on_stop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not streaming; nothing was submitted.
    Inactive,
    /// A frame is still outstanding.
    SkippedBusy,
    /// The source had no frame.
    SkippedEmpty,
    Submitted,
    /// The tick ended in Error.
    Faulted,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    seq: u64,
    config: FilterConfig,
}

/// The pipeline context: owns the source, channel, renderer, and every piece
/// of scheduling state. Driven by calling `tick` once per refresh.
pub struct Pipeline<S: FrameSource, R: Renderer> {
    state: PipelineState,
    source: S,
    renderer: R,
    channel: Box<dyn ExecutionChannel>,
    control: FilterControl,
    snapshot: FilterSnapshot,
    backpressure: BackpressureController,
    settings: PipelineSettings,
    source_open: bool,
    channel_ready: bool,
    /// Newest frame seen while acquiring; becomes the first submission.
    primed: Option<Frame>,
    in_flight: Option<InFlight>,
    restart_at: Option<Instant>,
    restarts: u32,
    consecutive_restarts: u32,
    reports: VecDeque<PipelineReport>,
    rendered: u64,
}

impl<S: FrameSource, R: Renderer> Pipeline<S, R> {
    pub fn new(
        source: S,
        channel: Box<dyn ExecutionChannel>,
        renderer: R,
        initial: FilterConfig,
        settings: PipelineSettings,
    ) -> Self {
        let (control, snapshot) = FilterControl::new(initial);
        info!(
            source = source.name(),
            channel = channel.name(),
            renderer = renderer.name(),
            filter = %initial.filter,
            "pipeline created"
        );
        Self {
            state: PipelineState::Idle,
            source,
            renderer,
            channel,
            control,
            snapshot,
            backpressure: BackpressureController::new(),
            settings,
            source_open: false,
            channel_ready: false,
            primed: None,
            in_flight: None,
            restart_at: None,
            restarts: 0,
            consecutive_restarts: 0,
            reports: VecDeque::new(),
            rendered: 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Handle for changing the filter config from anywhere.
    pub fn control(&self) -> FilterControl {
        self.control.clone()
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn status(&self) -> PipelineStatus {
        let restart_pending = self.restart_at.is_some();
        PipelineStatus {
            state: self.state,
            channel_state: self.channel.state(),
            restarts: self.restarts,
            restart_pending,
            controls: ControlAvailability::for_state(self.state, restart_pending),
            stats: self.backpressure.stats(),
            rendered: self.rendered,
            config: self.snapshot.current(),
        }
    }

    pub fn drain_reports(&mut self) -> Vec<PipelineReport> {
        self.reports.drain(..).collect()
    }

    pub fn handle_control(&mut self, event: ControlEvent) -> Result<(), PipelineError> {
        match event {
            ControlEvent::SelectFilter(filter) => {
                self.control.select_filter(filter);
                Ok(())
            }
            ControlEvent::SetBrightness(value) => {
                self.control.set_brightness(value)?;
                Ok(())
            }
            ControlEvent::Start => self.start(),
            ControlEvent::Stop => self.stop(),
        }
    }

    /// Idle/Error → Acquiring. Source open failures are returned directly
    /// and leave the pipeline in Error.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        match self.state {
            PipelineState::Idle => {}
            PipelineState::Error => {
                // An explicit start is the caller's decision to keep trying.
                self.consecutive_restarts = 0;
                self.restart_at = None;
                self.abandon_in_flight();
                self.channel.shutdown();
            }
            state => {
                return Err(PipelineError::InvalidTransition {
                    action: "start",
                    state,
                })
            }
        }
        self.begin_acquiring()
    }

    /// Acquiring/Streaming → Stopping. Reaches Idle once nothing is in flight.
    /// From Error this cancels a pending restart and is refused when none is
    /// pending.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        match self.state {
            PipelineState::Acquiring | PipelineState::Streaming => {}
            PipelineState::Error if self.restart_at.is_some() => {}
            state => {
                return Err(PipelineError::InvalidTransition {
                    action: "stop",
                    state,
                })
            }
        }
        info!(
            from = ?self.state,
            outstanding = self.backpressure.is_outstanding(),
            "stop requested"
        );
        self.close_source();
        self.primed = None;
        self.channel_ready = false;
        self.restart_at = None;
        self.set_state(PipelineState::Stopping);
        self.try_finish_stop();
        Ok(())
    }

    /// Close everything down immediately. Anything in flight is abandoned.
    pub fn shutdown(&mut self) {
        self.close_source();
        self.abandon_in_flight();
        self.primed = None;
        self.channel_ready = false;
        self.restart_at = None;
        self.channel.shutdown();
        self.set_state(PipelineState::Idle);
    }

    /// One scheduling step. Never blocks.
    pub fn tick(&mut self) -> TickOutcome {
        while let Some(event) = self.channel.poll() {
            self.on_channel_event(event);
        }

        match self.state {
            PipelineState::Idle => TickOutcome::Inactive,
            PipelineState::Stopping => {
                self.try_finish_stop();
                TickOutcome::Inactive
            }
            PipelineState::Error => {
                self.maybe_restart();
                TickOutcome::Inactive
            }
            PipelineState::Acquiring => self.tick_acquiring(),
            PipelineState::Streaming => self.tick_streaming(),
        }
    }

    fn tick_acquiring(&mut self) -> TickOutcome {
        match self.source.try_acquire_frame() {
            Ok(Some(frame)) => {
                if let Some(old) = self.primed.replace(frame) {
                    debug!(seq = old.seq, "superseded primed frame");
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.acquisition_failed(e);
                return TickOutcome::Faulted;
            }
        }

        if !(self.channel_ready && self.primed.is_some()) {
            return TickOutcome::Inactive;
        }
        self.consecutive_restarts = 0;
        self.set_state(PipelineState::Streaming);
        self.tick_streaming()
    }

    fn tick_streaming(&mut self) -> TickOutcome {
        if self.backpressure.begin_tick() == TickDecision::Busy {
            return TickOutcome::SkippedBusy;
        }

        let next = match self.primed.take() {
            Some(frame) => Ok(Some(frame)),
            None => self.source.try_acquire_frame(),
        };
        match next {
            Ok(Some(frame)) => self.submit(frame),
            Ok(None) => {
                self.backpressure.no_frame();
                TickOutcome::SkippedEmpty
            }
            Err(e) => {
                self.source_lost(e);
                TickOutcome::Faulted
            }
        }
    }

    fn submit(&mut self, frame: Frame) -> TickOutcome {
        let config = self.snapshot.current();
        let seq = frame.seq;
        self.backpressure.submit();
        match self.channel.process(ProcessJob { frame, config }) {
            Ok(()) => {
                self.in_flight = Some(InFlight { seq, config });
                TickOutcome::Submitted
            }
            Err(e) => {
                // The backpressure flag should have prevented this.
                self.backpressure.reject();
                error!(seq, error = %e, "channel refused a frame");
                self.channel_failed(e);
                TickOutcome::Faulted
            }
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Initialized => {
                if self.state == PipelineState::Acquiring {
                    debug!(channel = self.channel.name(), "channel ready");
                    self.channel_ready = true;
                }
            }
            ChannelEvent::Processed(frame) => {
                let Some(flight) = self.take_in_flight() else {
                    return;
                };
                self.backpressure.complete();
                debug!(seq = flight.seq, filter = %flight.config.filter, "rendering frame");
                self.renderer
                    .present(frame.pixels(), frame.width(), frame.height());
                self.rendered += 1;
            }
            ChannelEvent::FrameFailed(reason) => {
                let Some(flight) = self.take_in_flight() else {
                    return;
                };
                self.backpressure.fail();
                warn!(seq = flight.seq, filter = %flight.config.filter, %reason, "frame failed");
                self.report(PipelineReport::FrameFailed {
                    seq: flight.seq,
                    reason,
                });
            }
            ChannelEvent::Fatal(err) => {
                self.abandon_in_flight();
                match self.state {
                    PipelineState::Acquiring | PipelineState::Streaming => self.channel_failed(err),
                    state => debug!(?state, error = %err, "channel failure outside a session"),
                }
            }
        }
    }

    /// The in-flight record, if the result should be used. Late results
    /// (after stop or error) are discarded here.
    fn take_in_flight(&mut self) -> Option<InFlight> {
        let flight = self.in_flight.take();
        if self.state == PipelineState::Streaming && flight.is_some() {
            return flight;
        }
        if let Some(flight) = flight {
            debug!(seq = flight.seq, state = ?self.state, "discarding late result");
            self.backpressure.discard();
        }
        None
    }

    fn abandon_in_flight(&mut self) {
        if let Some(flight) = self.in_flight.take() {
            debug!(seq = flight.seq, "abandoning outstanding frame");
            self.backpressure.discard();
        }
    }

    fn begin_acquiring(&mut self) -> Result<(), PipelineError> {
        self.set_state(PipelineState::Acquiring);
        self.channel_ready = false;
        self.primed = None;

        if !self.source_open {
            if let Err(e) = self.source.open(&self.settings.constraints) {
                self.acquisition_failed(e.clone());
                return Err(PipelineError::Acquisition(e));
            }
            self.source_open = true;
            info!(source = self.source.name(), "source opened");
        }
        self.channel.init();
        Ok(())
    }

    fn acquisition_failed(&mut self, err: SourceError) {
        error!(source = self.source.name(), error = %err, "frame acquisition failed");
        self.close_source();
        self.primed = None;
        self.restart_at = None;
        self.channel.shutdown();
        self.set_state(PipelineState::Error);
        self.report(PipelineReport::AcquisitionFailed(err));
    }

    fn source_lost(&mut self, err: SourceError) {
        error!(source = self.source.name(), error = %err, "source lost while streaming");
        self.close_source();
        self.set_state(PipelineState::Error);
        self.report(PipelineReport::SourceLost(err));
        self.schedule_restart();
    }

    fn channel_failed(&mut self, err: ChannelError) {
        error!(channel = self.channel.name(), error = %err, "execution channel failed");
        self.primed = None;
        self.channel_ready = false;
        self.set_state(PipelineState::Error);
        self.report(PipelineReport::ChannelFailed(err));
        self.schedule_restart();
    }

    fn schedule_restart(&mut self) {
        if self.consecutive_restarts >= self.settings.max_auto_restarts {
            warn!(
                attempts = self.consecutive_restarts,
                "automatic restarts exhausted, waiting for an explicit start"
            );
            self.restart_at = None;
            self.report(PipelineReport::RestartsExhausted {
                attempts: self.consecutive_restarts,
            });
            return;
        }
        let after = self.settings.restart_backoff;
        let attempt = self.consecutive_restarts + 1;
        info!(attempt, after_ms = after.as_millis() as u64, "restart scheduled");
        self.restart_at = Some(Instant::now() + after);
        self.report(PipelineReport::RestartScheduled { attempt, after });
    }

    fn maybe_restart(&mut self) {
        let Some(at) = self.restart_at else {
            return;
        };
        if Instant::now() < at {
            return;
        }
        if self.backpressure.is_outstanding() || self.channel.state() == ChannelState::Busy {
            debug!("restart waiting for stale response");
            return;
        }

        self.restart_at = None;
        self.consecutive_restarts += 1;
        self.restarts += 1;
        let attempt = self.consecutive_restarts;
        info!(attempt, total = self.restarts, "restarting pipeline");
        self.report(PipelineReport::RestartStarted { attempt });
        self.channel.shutdown();
        // Open failures are already reported and leave the pipeline in Error.
        let _ = self.begin_acquiring();
    }

    fn try_finish_stop(&mut self) {
        if self.backpressure.is_outstanding() || self.channel.state() == ChannelState::Busy {
            debug!("stop waiting for outstanding frame");
            return;
        }
        if self.settings.teardown_on_stop {
            self.channel.shutdown();
        }
        self.set_state(PipelineState::Idle);
        self.report(PipelineReport::Stopped);
    }

    fn close_source(&mut self) {
        if self.source_open {
            self.source.close();
            self.source_open = false;
            info!(source = self.source.name(), "source closed");
        }
    }

    fn set_state(&mut self, next: PipelineState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "pipeline state change");
            self.state = next;
        }
    }

    fn report(&mut self, report: PipelineReport) {
        if self.reports.len() == MAX_PENDING_REPORTS {
            self.reports.pop_front();
        }
        self.reports.push_back(report);
    }
}

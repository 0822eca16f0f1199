//! Scripted doubles for driving the pipeline tick by tick in tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use livefx_common::filter::{FilterConfig, FilterId};
use livefx_common::frame::Frame;
use livefx_common::source::{FrameSource, SourceConstraints, SourceError};

use crate::channel::{
    settle, ChannelError, ChannelEvent, ChannelState, ExecutionChannel, ProcessJob, Response,
};
use crate::render::Renderer;

/// 1x1 frames whose red byte is the sequence number.
#[derive(Debug)]
pub struct ScriptedSource {
    /// Returned by every `open` while set.
    pub open_error: Option<SourceError>,
    /// Returned once by the next `try_acquire_frame`.
    pub next_error: Option<SourceError>,
    pub available: bool,
    pub is_open: bool,
    pub opens: u32,
    pub closes: u32,
    pub next_seq: u64,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            open_error: None,
            next_error: None,
            available: true,
            is_open: false,
            opens: 0,
            closes: 0,
            next_seq: 0,
        }
    }
}

impl FrameSource for ScriptedSource {
    fn open(&mut self, _constraints: &SourceConstraints) -> Result<(), SourceError> {
        self.opens += 1;
        if let Some(e) = self.open_error.clone() {
            return Err(e);
        }
        self.is_open = true;
        Ok(())
    }

    fn try_acquire_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        if !self.is_open {
            return Err(SourceError::NotOpen);
        }
        if let Some(e) = self.next_error.take() {
            return Err(e);
        }
        if !self.available {
            return Ok(None);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let frame = Frame::new(1, 1, vec![seq as u8, 0, 0, 255], seq, 0).unwrap();
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if self.is_open {
            self.closes += 1;
        }
        self.is_open = false;
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Marker written into the green byte of processed frames.
pub fn filter_tag(filter: FilterId) -> u8 {
    FilterId::ALL
        .iter()
        .position(|id| *id == filter)
        .map_or(u8::MAX, |i| i as u8 + 1)
}

fn tagged(job: ProcessJob) -> Frame {
    let ProcessJob { frame, config } = job;
    let mut pixels = frame.pixels().to_vec();
    pixels[1] = filter_tag(config.filter);
    frame.with_pixels(pixels).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitBehaviour {
    Succeed,
    Fail,
    /// Stay Initializing until the test calls `release_init`.
    Hold,
}

#[derive(Debug)]
pub struct ChannelScript {
    pub state: ChannelState,
    pub init_behaviour: InitBehaviour,
    /// Resolve every accepted job immediately.
    pub auto_complete: bool,
    /// Refuse every `process` with `Busy`, as a misbehaving channel would.
    pub force_busy: bool,
    pub inits: u32,
    pub shutdowns: u32,
    pub submissions: Vec<(u64, FilterConfig)>,
    pub refused: u32,
    pub in_flight: u32,
    pub max_in_flight: u32,
    pending: Option<ProcessJob>,
    responses: VecDeque<Response>,
    fatal: Option<ChannelError>,
}

/// Test-side view of a `ScriptedChannel` that has been moved into a pipeline.
#[derive(Debug, Clone)]
pub struct ChannelHandle(Arc<Mutex<ChannelScript>>);

impl ChannelHandle {
    pub fn with<T>(&self, f: impl FnOnce(&mut ChannelScript) -> T) -> T {
        f(&mut self.0.lock().unwrap())
    }

    pub fn inits(&self) -> u32 {
        self.with(|s| s.inits)
    }

    pub fn shutdowns(&self) -> u32 {
        self.with(|s| s.shutdowns)
    }

    pub fn submissions(&self) -> Vec<(u64, FilterConfig)> {
        self.with(|s| s.submissions.clone())
    }

    pub fn has_pending(&self) -> bool {
        self.with(|s| s.pending.is_some())
    }

    /// Finish the pending job successfully. Returns false if none was pending.
    pub fn complete(&self) -> bool {
        self.with(|s| match s.pending.take() {
            Some(job) => {
                s.responses.push_back(Response::Processed(tagged(job)));
                true
            }
            None => false,
        })
    }

    /// Fail the pending job; its buffer is dropped.
    pub fn fail(&self, reason: &str) -> bool {
        self.with(|s| match s.pending.take() {
            Some(_) => {
                s.responses.push_back(Response::Failed(reason.to_string()));
                true
            }
            None => false,
        })
    }

    /// Report `err` as fatal on the next poll.
    pub fn kill(&self, err: ChannelError) {
        self.with(|s| s.fatal = Some(err));
    }

    /// Answer a held init.
    pub fn release_init(&self, ok: bool) {
        self.with(|s| {
            s.responses.push_back(if ok {
                Response::Initialized
            } else {
                Response::InitFailed("scripted init failure".into())
            })
        });
    }

    pub fn set_init(&self, behaviour: InitBehaviour) {
        self.with(|s| s.init_behaviour = behaviour);
    }
}

pub struct ScriptedChannel(ChannelHandle);

pub fn scripted_channel() -> (Box<dyn ExecutionChannel>, ChannelHandle) {
    let handle = ChannelHandle(Arc::new(Mutex::new(ChannelScript {
        state: ChannelState::Uninitialized,
        init_behaviour: InitBehaviour::Succeed,
        auto_complete: false,
        force_busy: false,
        inits: 0,
        shutdowns: 0,
        submissions: Vec::new(),
        refused: 0,
        in_flight: 0,
        max_in_flight: 0,
        pending: None,
        responses: VecDeque::new(),
        fatal: None,
    })));
    (Box::new(ScriptedChannel(handle.clone())), handle)
}

impl ExecutionChannel for ScriptedChannel {
    fn init(&mut self) {
        self.0.with(|s| {
            s.inits += 1;
            match s.state {
                ChannelState::Ready | ChannelState::Busy => {
                    s.responses.push_back(Response::Initialized)
                }
                ChannelState::Initializing => {}
                ChannelState::Uninitialized | ChannelState::Failed => {
                    s.state = ChannelState::Initializing;
                    match s.init_behaviour {
                        InitBehaviour::Succeed => s.responses.push_back(Response::Initialized),
                        InitBehaviour::Fail => s
                            .responses
                            .push_back(Response::InitFailed("scripted init failure".into())),
                        InitBehaviour::Hold => {}
                    }
                }
            }
        });
    }

    fn process(&mut self, job: ProcessJob) -> Result<(), ChannelError> {
        self.0.with(|s| {
            if s.force_busy {
                s.refused += 1;
                return Err(ChannelError::Busy);
            }
            match s.state {
                ChannelState::Ready => {}
                ChannelState::Busy => {
                    s.refused += 1;
                    return Err(ChannelError::Busy);
                }
                other => return Err(ChannelError::NotReady(other)),
            }
            s.state = ChannelState::Busy;
            s.submissions.push((job.frame.seq, job.config));
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            if s.auto_complete {
                s.responses.push_back(Response::Processed(tagged(job)));
            } else {
                s.pending = Some(job);
            }
            Ok(())
        })
    }

    fn poll(&mut self) -> Option<ChannelEvent> {
        self.0.with(|s| {
            if let Some(err) = s.fatal.take() {
                s.state = ChannelState::Failed;
                s.pending = None;
                s.responses.clear();
                s.in_flight = 0;
                return Some(ChannelEvent::Fatal(err));
            }
            while let Some(response) = s.responses.pop_front() {
                let event = settle(&mut s.state, response);
                if matches!(
                    event,
                    Some(ChannelEvent::Processed(_) | ChannelEvent::FrameFailed(_))
                ) {
                    s.in_flight -= 1;
                }
                if event.is_some() {
                    return event;
                }
            }
            None
        })
    }

    fn state(&self) -> ChannelState {
        self.0.with(|s| s.state)
    }

    fn shutdown(&mut self) {
        self.0.with(|s| {
            s.shutdowns += 1;
            s.state = ChannelState::Uninitialized;
            s.pending = None;
            s.responses.clear();
            s.fatal = None;
            s.in_flight = 0;
        });
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Keeps a copy of every presented buffer.
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub frames: Vec<(Vec<u8>, u32, u32)>,
}

impl RecordingRenderer {
    /// Red bytes, i.e. source sequence numbers, in presentation order.
    pub fn seqs(&self) -> Vec<u8> {
        self.frames.iter().map(|(p, _, _)| p[0]).collect()
    }

    /// Green bytes, i.e. `filter_tag` of the config each frame ran with.
    pub fn tags(&self) -> Vec<u8> {
        self.frames.iter().map(|(p, _, _)| p[1]).collect()
    }
}

impl Renderer for RecordingRenderer {
    fn present(&mut self, pixels: &[u8], width: u32, height: u32) {
        self.frames.push((pixels.to_vec(), width, height));
    }

    fn name(&self) -> &str {
        "recording"
    }
}

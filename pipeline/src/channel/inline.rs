use std::collections::VecDeque;

use tracing::{debug, info};

use super::{
    run_job, settle, ChannelError, ChannelEvent, ChannelState, ExecutionChannel, ProcessJob,
    Response,
};
use crate::engine::{EngineFactory, FilterEngine};

/// Runs the engine on the caller's thread.
///
/// `process` does the work immediately but the result is still delivered
/// through `poll`, so the scheduler sees the same protocol as with a worker.
pub struct InlineChannel {
    factory: EngineFactory,
    engine: Option<Box<dyn FilterEngine>>,
    state: ChannelState,
    inbox: VecDeque<Response>,
}

impl InlineChannel {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            factory,
            engine: None,
            state: ChannelState::Uninitialized,
            inbox: VecDeque::new(),
        }
    }
}

impl ExecutionChannel for InlineChannel {
    fn init(&mut self) {
        match self.state {
            ChannelState::Ready | ChannelState::Busy => {
                self.inbox.push_back(Response::Initialized);
            }
            ChannelState::Initializing => {
                debug!("inline init already pending");
            }
            ChannelState::Uninitialized | ChannelState::Failed => {
                self.state = ChannelState::Initializing;
                self.inbox.clear();
                let response = match (self.factory)() {
                    Ok(engine) => {
                        info!(engine = engine.name(), "inline filter engine ready");
                        self.engine = Some(engine);
                        Response::Initialized
                    }
                    Err(e) => {
                        self.engine = None;
                        Response::InitFailed(e.to_string())
                    }
                };
                self.inbox.push_back(response);
            }
        }
    }

    fn process(&mut self, job: ProcessJob) -> Result<(), ChannelError> {
        match self.state {
            ChannelState::Ready => {}
            ChannelState::Busy => return Err(ChannelError::Busy),
            other => return Err(ChannelError::NotReady(other)),
        }
        let response = match &self.engine {
            Some(engine) => run_job(engine.as_ref(), job),
            None => Response::Failed("filter engine not initialized".into()),
        };
        self.state = ChannelState::Busy;
        self.inbox.push_back(response);
        Ok(())
    }

    fn poll(&mut self) -> Option<ChannelEvent> {
        while let Some(response) = self.inbox.pop_front() {
            if let Some(event) = settle(&mut self.state, response) {
                return Some(event);
            }
        }
        None
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    fn shutdown(&mut self) {
        self.engine = None;
        self.inbox.clear();
        self.state = ChannelState::Uninitialized;
        debug!("inline channel shut down");
    }

    fn name(&self) -> &str {
        "inline"
    }
}

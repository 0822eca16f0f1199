use std::collections::VecDeque;
use std::thread::JoinHandle;

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{
    run_job, settle, ChannelError, ChannelEvent, ChannelState, ChannelTimeouts, ExecutionChannel,
    ProcessJob, Response,
};
use crate::engine::{EngineFactory, FilterEngine};

enum Request {
    Init,
    Process(ProcessJob),
    Shutdown,
}

struct WorkerLink {
    requests: UnboundedSender<Request>,
    responses: UnboundedReceiver<Response>,
    _thread: JoinHandle<()>,
}

/// Runs the engine on a dedicated OS thread, reached only through messages.
///
/// The worker is spawned lazily by `init` and respawned by the next `init`
/// after it fails. A request that stays unanswered past its timeout fails
/// the channel; the late reply, if it ever comes, is discarded with the
/// old worker.
pub struct WorkerChannel {
    factory: EngineFactory,
    timeouts: ChannelTimeouts,
    state: ChannelState,
    link: Option<WorkerLink>,
    /// Responses produced without a round trip (re-acks, spawn failures).
    local: VecDeque<Response>,
    deadline: Option<Instant>,
    spawned: u32,
}

impl WorkerChannel {
    pub fn new(factory: EngineFactory, timeouts: ChannelTimeouts) -> Self {
        Self {
            factory,
            timeouts,
            state: ChannelState::Uninitialized,
            link: None,
            local: VecDeque::new(),
            deadline: None,
            spawned: 0,
        }
    }

    /// Number of worker threads started over the channel's lifetime.
    pub fn workers_spawned(&self) -> u32 {
        self.spawned
    }

    fn spawn_worker(&mut self) -> Result<WorkerLink, std::io::Error> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let factory = self.factory.clone();
        let generation = self.spawned + 1;
        let thread = std::thread::Builder::new()
            .name(format!("livefx-worker-{generation}"))
            .spawn(move || worker_loop(factory, request_rx, response_tx))?;
        self.spawned = generation;
        info!(generation, "filter worker spawned");
        Ok(WorkerLink {
            requests: request_tx,
            responses: response_rx,
            _thread: thread,
        })
    }

    fn fail(&mut self, err: ChannelError) -> Option<ChannelEvent> {
        error!(error = %err, state = ?self.state, "worker channel failed");
        self.state = ChannelState::Failed;
        self.deadline = None;
        // Dropping the link closes the request queue; the thread exits on
        // its own once any in-progress frame finishes.
        self.link = None;
        Some(ChannelEvent::Fatal(err))
    }

    fn next_response(&mut self) -> Result<Option<Response>, ChannelError> {
        if let Some(response) = self.local.pop_front() {
            return Ok(Some(response));
        }
        let Some(link) = self.link.as_mut() else {
            return Ok(None);
        };
        match link.responses.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(TryRecvError::Empty) => match self.deadline {
                Some(deadline) if Instant::now() >= deadline => Err(match self.state {
                    ChannelState::Initializing => ChannelError::InitTimeout(self.timeouts.init),
                    _ => ChannelError::ProcessTimeout(self.timeouts.process),
                }),
                _ => Ok(None),
            },
            Err(TryRecvError::Disconnected) => Err(ChannelError::WorkerExited),
        }
    }
}

impl ExecutionChannel for WorkerChannel {
    fn init(&mut self) {
        match self.state {
            ChannelState::Ready | ChannelState::Busy => {
                self.local.push_back(Response::Initialized);
            }
            ChannelState::Initializing => {
                debug!("worker init already in flight");
            }
            ChannelState::Uninitialized | ChannelState::Failed => {
                self.link = None;
                self.local.clear();
                self.state = ChannelState::Initializing;
                self.deadline = Some(Instant::now() + self.timeouts.init);
                match self.spawn_worker() {
                    Ok(link) => {
                        if link.requests.send(Request::Init).is_err() {
                            self.local
                                .push_back(Response::InitFailed("worker exited before init".into()));
                        }
                        self.link = Some(link);
                    }
                    Err(e) => {
                        self.local.push_back(Response::InitFailed(format!(
                            "failed to spawn worker thread: {e}"
                        )));
                    }
                }
            }
        }
    }

    fn process(&mut self, job: ProcessJob) -> Result<(), ChannelError> {
        match self.state {
            ChannelState::Ready => {}
            ChannelState::Busy => return Err(ChannelError::Busy),
            other => return Err(ChannelError::NotReady(other)),
        }
        let sent = match &self.link {
            Some(link) => link.requests.send(Request::Process(job)).is_ok(),
            None => false,
        };
        if !sent {
            // The job came back inside the send error and is dropped here.
            self.fail(ChannelError::WorkerExited);
            return Err(ChannelError::WorkerExited);
        }
        self.state = ChannelState::Busy;
        self.deadline = Some(Instant::now() + self.timeouts.process);
        Ok(())
    }

    fn poll(&mut self) -> Option<ChannelEvent> {
        loop {
            match self.next_response() {
                Ok(Some(response)) => {
                    let event = settle(&mut self.state, response);
                    if !matches!(self.state, ChannelState::Initializing | ChannelState::Busy) {
                        self.deadline = None;
                    }
                    if event.is_some() {
                        return event;
                    }
                }
                Ok(None) => return None,
                Err(err) => return self.fail(err),
            }
        }
    }

    fn state(&self) -> ChannelState {
        self.state
    }

    fn shutdown(&mut self) {
        if let Some(link) = self.link.take() {
            let _ = link.requests.send(Request::Shutdown);
            debug!(state = ?self.state, "worker channel shut down");
        }
        self.local.clear();
        self.deadline = None;
        self.state = ChannelState::Uninitialized;
    }

    fn name(&self) -> &str {
        "worker"
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    factory: EngineFactory,
    mut requests: UnboundedReceiver<Request>,
    responses: UnboundedSender<Response>,
) {
    let mut engine: Option<Box<dyn FilterEngine>> = None;

    while let Some(request) = requests.blocking_recv() {
        let response = match request {
            Request::Init => match &engine {
                Some(_) => Response::Initialized,
                None => match factory() {
                    Ok(e) => {
                        debug!(engine = e.name(), "worker engine initialized");
                        engine = Some(e);
                        Response::Initialized
                    }
                    Err(e) => {
                        warn!(error = %e, "worker engine failed to initialize");
                        Response::InitFailed(e.to_string())
                    }
                },
            },
            Request::Process(job) => match &engine {
                Some(e) => run_job(e.as_ref(), job),
                None => Response::Failed("filter engine not initialized".into()),
            },
            Request::Shutdown => break,
        };
        if responses.send(response).is_err() {
            break;
        }
    }
    debug!("filter worker exiting");
}

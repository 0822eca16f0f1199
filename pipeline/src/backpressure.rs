/// Drop-if-busy admission control: at most one frame in flight.
///
/// The controller never buffers. When a frame is outstanding the tick is a
/// no-op and nothing is pulled from the source, so latency stays bounded by
/// one engine round trip no matter how slow the engine is.
#[derive(Debug, Default)]
pub struct BackpressureController {
    outstanding: bool,
    stats: BackpressureStats,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackpressureStats {
    /// Scheduling ticks seen while streaming.
    pub ticks: u64,
    pub submitted: u64,
    pub completed: u64,
    /// Per-frame engine failures.
    pub failed: u64,
    /// Submissions the channel refused outright.
    pub rejected: u64,
    /// Results that arrived after the pipeline stopped caring about them.
    pub discarded: u64,
    pub skipped_busy: u64,
    pub skipped_empty: u64,
}

impl BackpressureStats {
    /// Frames submitted but not yet resolved one way or another.
    pub fn in_flight(&self) -> u64 {
        self.submitted - self.completed - self.failed - self.discarded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// A frame is still outstanding; skip this tick entirely.
    Busy,
    /// Nothing outstanding; pull a frame and submit it.
    Pull,
}

impl BackpressureController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_tick(&mut self) -> TickDecision {
        self.stats.ticks += 1;
        if self.outstanding {
            self.stats.skipped_busy += 1;
            TickDecision::Busy
        } else {
            TickDecision::Pull
        }
    }

    /// The source had nothing to give this tick.
    pub fn no_frame(&mut self) {
        self.stats.skipped_empty += 1;
    }

    /// Mark a frame as in flight. Called right before handing it over.
    pub fn submit(&mut self) {
        debug_assert!(!self.outstanding, "submitted while a frame is outstanding");
        self.outstanding = true;
        self.stats.submitted += 1;
    }

    /// The channel refused the frame handed over by the last `submit`.
    pub fn reject(&mut self) {
        if self.outstanding {
            self.outstanding = false;
            self.stats.submitted -= 1;
            self.stats.rejected += 1;
        }
    }

    pub fn complete(&mut self) {
        self.resolve(|s| s.completed += 1);
    }

    pub fn fail(&mut self) {
        self.resolve(|s| s.failed += 1);
    }

    /// The result arrived (or the channel died) after the pipeline left
    /// Streaming; the flag is cleared but nothing is rendered.
    pub fn discard(&mut self) {
        self.resolve(|s| s.discarded += 1);
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding
    }

    pub fn stats(&self) -> BackpressureStats {
        self.stats
    }

    fn resolve(&mut self, count: impl FnOnce(&mut BackpressureStats)) {
        if self.outstanding {
            self.outstanding = false;
            count(&mut self.stats);
        }
    }
}

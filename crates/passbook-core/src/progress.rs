//! Progress reporting for long-running protocol calls

/// Receives `(message, percent)` progress updates
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, message: &str, percent: u8);
}

impl<F> ProgressObserver for F
where
    F: Fn(&str, u8) + Send + Sync,
{
    fn on_progress(&self, message: &str, percent: u8) {
        self(message, percent);
    }
}

/// Observer that discards every update
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _message: &str, _percent: u8) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Completed,
    Failed,
}

/// Guards the progress contract for one operation
///
/// Percent never decreases, 100 is emitted exactly once and only by
/// [`complete`](Self::complete), and nothing is emitted after
/// [`fail`](Self::fail).
pub struct ProgressReporter<'a> {
    observer: &'a dyn ProgressObserver,
    last: u8,
    phase: Phase,
}

impl<'a> ProgressReporter<'a> {
    #[must_use]
    pub fn new(observer: &'a dyn ProgressObserver) -> Self {
        Self {
            observer,
            last: 0,
            phase: Phase::Running,
        }
    }

    /// Report an intermediate step; capped at 99 and clamped to the last value
    pub fn report(&mut self, message: &str, percent: u8) {
        if self.phase != Phase::Running {
            return;
        }
        let percent = percent.min(99).max(self.last);
        self.last = percent;
        self.observer.on_progress(message, percent);
    }

    /// Emit the single 100% update
    pub fn complete(&mut self, message: &str) {
        if self.phase != Phase::Running {
            return;
        }
        self.phase = Phase::Completed;
        self.last = 100;
        self.observer.on_progress(message, 100);
    }

    /// Silence the reporter after a failure
    pub fn fail(&mut self) {
        if self.phase == Phase::Running {
            self.phase = Phase::Failed;
        }
    }

    #[inline]
    #[must_use]
    pub fn last_percent(&self) -> u8 {
        self.last
    }
}

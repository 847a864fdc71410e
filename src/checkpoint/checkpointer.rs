use std::io;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

use log::debug;
use log::error;
use log::info;

use crate::checkpoint::progress::CheckpointProgress;
use crate::checkpoint::progress::CheckpointState;
use crate::errors::CheckpointError;
use crate::CheckpointEntry;
use crate::CheckpointReason;
use crate::WalPointer;

pub type CheckpointResult = Result<CheckpointEntry, CheckpointError>;

type Waiter = SyncSender<CheckpointResult>;

/// Runs one checkpoint. Implemented by the engine; the scheduler only
/// decides when.
pub(crate) trait RunCheckpoint: Send + 'static {
    fn run(
        &mut self,
        reason: &CheckpointReason,
        progress: &ProgressReporter,
    ) -> CheckpointResult;
}

/// Lets a running checkpoint publish its id and WAL mark.
pub(crate) struct ProgressReporter {
    shared: Arc<Shared>,
}

impl ProgressReporter {
    pub(crate) fn set_mark(&self, id: u64, mark: WalPointer) {
        let mut st = self.shared.lock();
        st.progress.id = Some(id);
        st.progress.mark = Some(mark);
    }
}

#[derive(Debug, Default)]
struct SchedulerState {
    state: CheckpointState,

    /// Reason of the next checkpoint; set when one is scheduled.
    pending: Option<CheckpointReason>,

    /// Waiting for the next checkpoint to start and complete.
    scheduled_waiters: Vec<Waiter>,

    /// Waiting for the running checkpoint.
    running_waiters: Vec<Waiter>,

    progress: CheckpointProgress,

    last_error: Option<CheckpointError>,
    consecutive_failures: u64,
    completed: u64,

    /// When the timer triggers the next checkpoint; `None` disables it.
    next_deadline: Option<Instant>,

    shutdown: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<SchedulerState>,
    cond: Condvar,
    frequency: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn schedule(&self, reason: CheckpointReason) {
        if let Err(e) = reason.check_size() {
            error!("Checkpoint request ignored: {}", e);
            return;
        }

        let mut st = self.lock();
        if st.shutdown {
            return;
        }

        if st.pending.is_none() {
            debug!("Schedule checkpoint: {}", reason);
            st.pending = Some(reason);
        }

        if st.state == CheckpointState::Idle {
            st.state = CheckpointState::Scheduled;
        }
        self.cond.notify_all();
    }
}

/// Requests checkpoints from the WAL writer when too much is written since
/// the last one.
#[derive(Debug, Clone)]
pub struct CheckpointTrigger {
    shared: Arc<Shared>,
}

impl CheckpointTrigger {
    pub fn schedule(&self, reason: CheckpointReason) {
        self.shared.schedule(reason)
    }
}

/// Decides when checkpoints run, and runs them one at a time on a worker
/// thread.
///
/// A checkpoint starts when the timer fires, when the WAL size trigger
/// fires, or when requested. Requests made while one is already scheduled
/// collapse into it. A forced request made while a checkpoint runs waits for
/// the running one; any other request made meanwhile schedules exactly one
/// follow-up checkpoint.
#[derive(Debug)]
pub struct Checkpointer {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Checkpointer {
    pub(crate) fn new(frequency: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::default()),
                cond: Condvar::new(),
                frequency,
            }),
            handle: Mutex::new(None),
        }
    }

    pub(crate) fn trigger(&self) -> CheckpointTrigger {
        CheckpointTrigger {
            shared: self.shared.clone(),
        }
    }

    /// Start the worker thread.
    pub(crate) fn start<R: RunCheckpoint>(&self, runner: R) -> Result<(), io::Error> {
        {
            let mut st = self.shared.lock();
            st.next_deadline = Instant::now().checked_add(self.shared.frequency);
        }

        let shared = self.shared.clone();
        let h = std::thread::Builder::new()
            .name("checkpointer".to_string())
            .spawn(move || {
                Self::run(shared, runner);
            })?;

        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(h);
        Ok(())
    }

    /// Request a checkpoint without waiting for it.
    ///
    /// A reason longer than [`CheckpointReason::MAX_SIZE`] is logged and
    /// ignored.
    pub fn schedule(&self, reason: CheckpointReason) {
        self.shared.schedule(reason)
    }

    /// Request a checkpoint and block until it completes.
    ///
    /// If a checkpoint is running, this returns the running checkpoint's
    /// result. With a `timeout`, [`CheckpointError::Timeout`] is returned if
    /// it passes first; the checkpoint itself is not cancelled.
    ///
    /// A reason longer than [`CheckpointReason::MAX_SIZE`] is rejected with
    /// [`CheckpointError::ReasonTooLarge`] before anything is written.
    pub fn force(
        &self,
        reason: CheckpointReason,
        timeout: Option<Duration>,
    ) -> CheckpointResult {
        reason.check_size()?;

        let (tx, rx) = std::sync::mpsc::sync_channel(1);

        {
            let mut st = self.shared.lock();
            if st.shutdown {
                return Err(CheckpointError::ShutDown);
            }

            match st.state {
                CheckpointState::Running => {
                    debug!("Force checkpoint({}): join the running one", reason);
                    st.running_waiters.push(tx);
                }
                CheckpointState::Idle | CheckpointState::Scheduled => {
                    st.scheduled_waiters.push(tx);
                    if st.pending.is_none() {
                        st.pending = Some(reason);
                    }
                    st.state = CheckpointState::Scheduled;
                    self.shared.cond.notify_all();
                }
            }
        }

        match timeout {
            None => rx.recv().map_err(|_| CheckpointError::ShutDown)?,
            Some(t) => match rx.recv_timeout(t) {
                Ok(res) => res,
                Err(RecvTimeoutError::Timeout) => {
                    Err(CheckpointError::Timeout { waited: t })
                }
                Err(RecvTimeoutError::Disconnected) => Err(CheckpointError::ShutDown),
            },
        }
    }

    pub fn state(&self) -> CheckpointState {
        self.shared.lock().state
    }

    /// The running checkpoint, or the last one.
    pub fn progress(&self) -> CheckpointProgress {
        let st = self.shared.lock();
        let mut p = st.progress.clone();
        p.state = st.state;
        p
    }

    /// Error of the last checkpoint, if it failed.
    pub fn last_error(&self) -> Option<CheckpointError> {
        self.shared.lock().last_error.clone()
    }

    pub fn consecutive_failures(&self) -> u64 {
        self.shared.lock().consecutive_failures
    }

    /// Number of checkpoints completed since the engine opened.
    pub fn completed_count(&self) -> u64 {
        self.shared.lock().completed
    }

    /// Stop the worker after the running checkpoint, if any, completes.
    /// Callers still waiting get [`CheckpointError::ShutDown`].
    pub(crate) fn shutdown(&self) {
        {
            let mut st = self.shared.lock();
            st.shutdown = true;
            self.shared.cond.notify_all();
        }

        let h = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(h) = h {
            if h.join().is_err() {
                error!("Checkpointer thread panicked");
            }
        }

        // No worker ever started, or it quit: nobody else answers.
        let mut guard = self.shared.lock();
        let st = &mut *guard;
        let waiters = st
            .scheduled_waiters
            .drain(..)
            .chain(st.running_waiters.drain(..))
            .collect::<Vec<_>>();
        for w in waiters {
            let _ = w.send(Err(CheckpointError::ShutDown));
        }
    }

    fn run<R: RunCheckpoint>(shared: Arc<Shared>, mut runner: R) {
        let reporter = ProgressReporter {
            shared: shared.clone(),
        };

        let mut st = shared.lock();

        loop {
            if st.shutdown {
                for w in st.scheduled_waiters.drain(..) {
                    let _ = w.send(Err(CheckpointError::ShutDown));
                }
                info!("Checkpointer shut down, quit");
                return;
            }

            if let Some(reason) = st.pending.take() {
                st.state = CheckpointState::Running;
                st.running_waiters = std::mem::take(&mut st.scheduled_waiters);
                st.progress = CheckpointProgress {
                    state: CheckpointState::Running,
                    id: None,
                    reason: Some(reason.to_string()),
                    mark: None,
                };
                drop(st);

                let res = runner.run(&reason, &reporter);

                st = shared.lock();

                for w in std::mem::take(&mut st.running_waiters) {
                    let _ = w.send(res.clone());
                }

                match res {
                    Ok(entry) => {
                        st.completed += 1;
                        st.consecutive_failures = 0;
                        st.last_error = None;
                        debug!("Checkpoint completed: {}", entry);
                    }
                    Err(e) => {
                        st.consecutive_failures += 1;
                        error!(
                            "Checkpoint failed, consecutive failures: {}: {}",
                            st.consecutive_failures, e
                        );
                        st.last_error = Some(e);
                    }
                }

                st.state = if st.pending.is_some() {
                    CheckpointState::Scheduled
                } else {
                    CheckpointState::Idle
                };
                st.next_deadline = Instant::now().checked_add(shared.frequency);
                continue;
            }

            match st.next_deadline {
                None => {
                    st = shared.cond.wait(st).unwrap_or_else(|e| e.into_inner());
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        st.pending = Some(CheckpointReason::Timeout);
                        st.state = CheckpointState::Scheduled;
                        continue;
                    }

                    st = shared
                        .cond
                        .wait_timeout(st, deadline - now)
                        .map(|(g, _)| g)
                        .unwrap_or_else(|e| e.into_inner().0);
                }
            }
        }
    }
}

//! Priority work scheduler
//!
//! Single persistent worker thread running one job at a time. At most one job
//! is pending per priority level: submitting at an occupied level replaces the
//! pending job. When a job finishes, the highest-priority pending job runs next.
//!
//! Cancellation is cooperative. [`WorkScheduler::interrupt`] raises the running
//! job's [`CancelToken`]; the job is expected to check it at least once per
//! unit of work and return without publishing partial results. Once an
//! interrupted job returns, every pending job is discarded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Job priority (higher value runs first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPriority {
    /// End-of-work notifications; always runs last
    Cleanup = 0,
    /// Routine batch delivery
    Normal = 1,
    /// Preempts queued normal work, e.g. an estimator switch
    High = 2,
}

impl JobPriority {
    const COUNT: usize = 3;

    fn slot(self) -> usize {
        self as usize
    }
}

/// Cooperative cancellation flag handed to each running job
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }
}

type Job = Box<dyn FnOnce(&CancelToken) + Send + 'static>;

struct Slots {
    pending: [Option<Job>; JobPriority::COUNT],
    /// Token of the job currently running, if any
    running: Option<CancelToken>,
}

impl Slots {
    fn take_highest(&mut self) -> Option<(JobPriority, Job)> {
        [JobPriority::High, JobPriority::Normal, JobPriority::Cleanup]
            .into_iter()
            .find_map(|p| self.pending[p.slot()].take().map(|job| (p, job)))
    }

    fn has_pending(&self) -> bool {
        self.pending.iter().any(|s| s.is_some())
    }

    fn clear(&mut self) -> usize {
        self.pending.iter_mut().filter_map(|s| s.take()).count()
    }
}

/// Shared state between submitters and the worker
struct SchedulerState {
    slots: Mutex<Slots>,

    /// Signals new work or shutdown to the worker
    work_available: Condvar,

    /// Signals the worker went idle
    idle: Condvar,

    stop_flag: AtomicBool,
}

/// Single-worker, priority-coalescing job queue
pub struct WorkScheduler {
    name: String,
    state: Arc<SchedulerState>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkScheduler {
    /// Create the scheduler and start its worker thread
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let state = Arc::new(SchedulerState {
            slots: Mutex::new(Slots {
                pending: [None, None, None],
                running: None,
            }),
            work_available: Condvar::new(),
            idle: Condvar::new(),
            stop_flag: AtomicBool::new(false),
        });

        let state_clone = Arc::clone(&state);
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::worker_loop(&thread_name, state_clone))
            .map_err(|e| Error::Pipeline(format!("Failed to start {} worker: {}", name, e)))?;

        debug!("Work scheduler '{}' started", name);

        Ok(Self {
            name,
            state,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Submit a job, replacing any job pending at the same priority
    pub fn submit<F>(&self, priority: JobPriority, job: F) -> Result<()>
    where
        F: FnOnce(&CancelToken) + Send + 'static,
    {
        if self.state.stop_flag.load(Ordering::Acquire) {
            return Err(Error::Pipeline(format!(
                "Work scheduler '{}' is shutting down",
                self.name
            )));
        }

        {
            let mut slots = self.state.slots.lock().unwrap();
            if slots.pending[priority.slot()].replace(Box::new(job)).is_some() {
                debug!("{}: replaced pending {:?} job", self.name, priority);
            }
        }
        self.state.work_available.notify_one();
        Ok(())
    }

    /// Interrupt the running job; pending jobs are dropped once it returns
    pub fn interrupt(&self) {
        let slots = self.state.slots.lock().unwrap();
        if let Some(token) = &slots.running {
            debug!("{}: interrupting running job", self.name);
            token.cancel();
        }
    }

    /// Jobs waiting to run
    pub fn pending_count(&self) -> usize {
        self.state
            .slots
            .lock()
            .unwrap()
            .pending
            .iter()
            .filter(|s| s.is_some())
            .count()
    }

    /// Block until no job is running or pending
    pub fn wait_idle(&self) {
        let mut slots = self.state.slots.lock().unwrap();
        while (slots.running.is_some() || slots.has_pending())
            && !self.state.stop_flag.load(Ordering::Acquire)
        {
            slots = self.state.idle.wait(slots).unwrap();
        }
    }

    /// Stop the worker after the running job and join it
    ///
    /// Pending jobs are discarded. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.state.stop_flag.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Shutting down work scheduler '{}'", self.name);

        {
            let mut slots = self.state.slots.lock().unwrap();
            slots.clear();
            if let Some(token) = &slots.running {
                token.cancel();
            }
        }
        self.state.work_available.notify_all();
        self.state.idle.notify_all();

        if let Some(handle) = self.thread.lock().unwrap().take() {
            // A job dropping the last handle can't join its own thread
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if let Err(e) = handle.join() {
                error!("Work scheduler '{}' worker join failed: {:?}", self.name, e);
            }
        }
    }

    fn worker_loop(name: &str, state: Arc<SchedulerState>) {
        debug!("{} worker started", name);

        loop {
            let (priority, job, token) = {
                let mut slots = state.slots.lock().unwrap();
                while !slots.has_pending() && !state.stop_flag.load(Ordering::Acquire) {
                    slots = state.work_available.wait(slots).unwrap();
                }
                if state.stop_flag.load(Ordering::Acquire) {
                    debug!("{} worker received shutdown signal", name);
                    break;
                }
                let Some((priority, job)) = slots.take_highest() else {
                    continue;
                };
                let token = CancelToken::new();
                slots.running = Some(token.clone());
                (priority, job, token)
            };

            debug!("{}: running {:?} job", name, priority);
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| job(&token)));
            if outcome.is_err() {
                error!("{}: {:?} job panicked", name, priority);
            }

            let mut slots = state.slots.lock().unwrap();
            slots.running = None;
            if token.is_cancelled() {
                let dropped = slots.clear();
                debug!("{}: job interrupted, discarded {} pending job(s)", name, dropped);
            }
            if !slots.has_pending() {
                state.idle.notify_all();
            }
        }

        // Wake anyone still waiting for idle
        state.idle.notify_all();
        debug!("{} worker stopped", name);
    }
}

impl Drop for WorkScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

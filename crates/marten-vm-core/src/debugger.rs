//! Debugger job rendezvous
//!
//! Engine state may only be touched from the engine thread. A debugger
//! living on another thread hands work over through a capacity-one
//! mailbox: [`submit`] blocks until the engine has executed the job at
//! one of its safe points, so at most one job is ever in flight and
//! the debugger observes a quiescent engine.
//!
//! [`submit`]: DebuggerRendezvous::submit

use crate::engine::ExecutionEngine;
use parking_lot::{Condvar, Mutex};

/// A unit of work to run on the engine thread
pub trait Job: Send {
    /// Execute against the paused engine
    fn run(&mut self, engine: &ExecutionEngine);
}

struct Mailbox {
    job: Option<Box<dyn Job>>,
    /// Completed-job counter; submitters wait for it to pass their own
    generation: u64,
}

/// Capacity-one job mailbox between a debugger thread and the engine
pub struct DebuggerRendezvous {
    mailbox: Mutex<Mailbox>,
    posted: Condvar,
    completed: Condvar,
}

impl DebuggerRendezvous {
    /// Create an empty rendezvous
    pub fn new() -> Self {
        Self {
            mailbox: Mutex::new(Mailbox {
                job: None,
                generation: 0,
            }),
            posted: Condvar::new(),
            completed: Condvar::new(),
        }
    }

    /// Hand a job to the engine and block until it has run.
    ///
    /// Called from the debugger thread, never from the engine thread
    /// (the engine would deadlock waiting on itself).
    pub fn submit(&self, job: Box<dyn Job>) {
        let mut mailbox = self.mailbox.lock();
        while mailbox.job.is_some() {
            self.completed.wait(&mut mailbox);
        }
        mailbox.job = Some(job);
        let target = mailbox.generation + 1;
        self.posted.notify_one();
        while mailbox.generation < target {
            self.completed.wait(&mut mailbox);
        }
    }

    /// Run the pending job, if any. The engine calls this at safe
    /// points; returns whether a job ran.
    pub fn process(&self, engine: &ExecutionEngine) -> bool {
        let job = {
            let mut mailbox = self.mailbox.lock();
            mailbox.job.take()
        };
        let Some(mut job) = job else {
            return false;
        };
        job.run(engine);
        let mut mailbox = self.mailbox.lock();
        mailbox.generation += 1;
        self.completed.notify_all();
        true
    }

    /// Whether a job is waiting
    pub fn has_pending_job(&self) -> bool {
        self.mailbox.lock().job.is_some()
    }
}

impl Default for DebuggerRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

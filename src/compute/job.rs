//! Handles of query jobs.

use std::fmt;

use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use crate::compute::cancel::CancelToken;
use crate::error::{FacetreeError, Result};
use crate::timeout::{Timeout, remaining};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending | JobState::Running)
    }
}

/// Shared view of one job: its state and the token cancelling it.
pub struct JobHandle {
    id: Uuid,
    label: String,
    state: Mutex<JobState>,
    changed: Condvar,
    cancel: CancelToken,
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl JobHandle {
    pub fn new<S: Into<String>>(label: S, cancel: CancelToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            state: Mutex::new(JobState::Pending),
            changed: Condvar::new(),
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> JobState {
        self.state.lock().clone()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Move to `Running`. Returns false when the job was cancelled before
    /// it got a thread.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock();
        if *state != JobState::Pending {
            return false;
        }
        if self.cancel.is_cancelled() {
            *state = JobState::Cancelled;
            self.changed.notify_all();
            return false;
        }
        *state = JobState::Running;
        true
    }

    /// Record the outcome of the job body.
    pub fn finish(&self, outcome: &Result<()>) {
        let mut state = self.state.lock();
        *state = match outcome {
            Ok(()) => JobState::Succeeded,
            Err(e) if e.is_cancellation() => JobState::Cancelled,
            Err(e) => JobState::Failed(e.to_string()),
        };
        self.changed.notify_all();
    }

    /// Request cancellation. A pending job is cancelled at once, a running
    /// one stops at its next cancellation check.
    pub fn cancel(&self) {
        self.cancel.cancel();
        let mut state = self.state.lock();
        if *state == JobState::Pending {
            *state = JobState::Cancelled;
            self.changed.notify_all();
        }
    }

    /// Wait for a terminal state. Returns `None` if the wait gave up first.
    pub fn wait(&self, timeout: Timeout) -> Option<JobState> {
        let deadline = timeout.deadline();
        let mut state = self.state.lock();
        while !state.is_terminal() {
            match remaining(deadline) {
                None => self.changed.wait(&mut state),
                Some(left) if left.is_zero() => return None,
                Some(left) => {
                    self.changed.wait_for(&mut state, left);
                }
            }
        }
        Some(state.clone())
    }

    /// Like [`Self::wait`], failing for cancelled jobs.
    pub fn wait_done(&self, timeout: Timeout) -> Result<bool> {
        match self.wait(timeout) {
            None => Ok(false),
            Some(JobState::Cancelled) => Err(FacetreeError::cancelled(format!(
                "job '{}' was cancelled",
                self.label
            ))),
            Some(_) => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_lifecycle() {
        let job = JobHandle::new("q1", CancelToken::new());
        assert_eq!(job.wait(Timeout::NonBlocking), None);
        assert!(job.start());
        assert!(!job.start());
        job.finish(&Ok(()));
        assert_eq!(job.wait(Timeout::Infinite), Some(JobState::Succeeded));
    }

    #[test]
    fn test_cancel_before_start() {
        let job = JobHandle::new("q1", CancelToken::new());
        job.cancel();
        assert!(!job.start());
        assert!(job.wait_done(Timeout::NonBlocking).is_err());
    }

    #[test]
    fn test_cancellation_outcome() {
        let job = Arc::new(JobHandle::new("q1", CancelToken::new()));
        assert!(job.start());
        let worker = {
            let job = job.clone();
            thread::spawn(move || {
                while job.cancel_token().check().is_ok() {
                    thread::sleep(Duration::from_millis(1));
                }
                job.finish(&job.cancel_token().check());
            })
        };
        job.cancel();
        assert_eq!(
            job.wait(Timeout::Bounded(Duration::from_secs(5))),
            Some(JobState::Cancelled)
        );
        worker.join().unwrap();
    }

    #[test]
    fn test_failure_keeps_message() {
        let job = JobHandle::new("q1", CancelToken::new());
        job.start();
        job.finish(&Err(FacetreeError::query("boom")));
        assert!(matches!(job.state(), JobState::Failed(m) if m.contains("boom")));
        assert!(job.wait_done(Timeout::NonBlocking).unwrap());
    }
}

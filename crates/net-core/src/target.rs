//! Convergence targets
//!
//! A target records the state an attribute or collection is expected to
//! reach and signals every waiter once the mirror reports it. Waiters are
//! detached from the owning state, so they can be awaited after the state
//! lock is released.

use std::time::Duration;

use tokio::sync::watch;

/// A goal plus the signal raised when it is reached
#[derive(Debug)]
pub struct ConvergenceTarget<G> {
    goal: Option<G>,
    signal: watch::Sender<bool>,
}

impl<G> Default for ConvergenceTarget<G> {
    fn default() -> Self {
        let (signal, _) = watch::channel(false);
        Self { goal: None, signal }
    }
}

impl<G> ConvergenceTarget<G> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new goal. `reached` tells whether the current state
    /// already matches it, in which case the signal is raised immediately.
    pub fn set(&mut self, goal: G, reached: bool) -> TargetWaiter {
        self.goal = Some(goal);
        self.signal.send_replace(reached);
        self.waiter()
    }

    /// Raise the signal if a goal is installed and `reached` accepts it
    pub fn check(&self, reached: impl FnOnce(&G) -> bool) {
        if let Some(goal) = &self.goal {
            if reached(goal) {
                self.signal.send_replace(true);
            }
        }
    }

    /// Discard the goal without signaling
    pub fn clear(&mut self) {
        self.goal = None;
        self.signal.send_replace(false);
    }

    pub fn goal(&self) -> Option<&G> {
        self.goal.as_ref()
    }

    pub fn is_set(&self) -> bool {
        *self.signal.borrow()
    }

    pub fn waiter(&self) -> TargetWaiter {
        TargetWaiter {
            receiver: self.signal.subscribe(),
        }
    }
}

impl<G: PartialEq> ConvergenceTarget<G> {
    pub fn set_target(&mut self, goal: G, current: &G) -> TargetWaiter {
        let reached = goal == *current;
        self.set(goal, reached)
    }
}

/// Detached handle waiting for a target signal
#[derive(Debug, Clone)]
pub struct TargetWaiter {
    receiver: watch::Receiver<bool>,
}

impl TargetWaiter {
    pub fn is_set(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until the target is reached. Returns false on timeout or when
    /// the owning state was dropped.
    pub async fn wait(mut self, timeout: Duration) -> bool {
        let reached = tokio::time::timeout(timeout, self.receiver.wait_for(|reached| *reached)).await;
        matches!(reached, Ok(Ok(_)))
    }
}

//! Commit notifications.
//!
//! Handlers run on the committing thread while the dataset lock is held, so
//! they must not call back into the dataset.
use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
};

use tracing::warn;

use crate::{
    array::util::Shape,
    schema::Rectangle,
    variable::VariableId,
};

#[derive(Debug, Clone, PartialEq)]
pub struct CommitEvent {
    pub variable: VariableId,
    pub name: String,
    pub changeset: u64,
    pub shape: Shape,
    pub affected: Option<Rectangle>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackEvent {
    pub variable: VariableId,
    /// The variable was created in the rolled back transaction and is gone.
    pub removed: bool,
}

type CommittingHandler = Box<dyn Fn(&CommitEvent) -> Result<(), String> + Send + Sync>;
type CommittedHandler = Box<dyn Fn(&CommitEvent) + Send + Sync>;
type RolledBackHandler = Box<dyn Fn(&RollbackEvent) + Send + Sync>;

/// Returned by every subscribe call; pass it to
/// [`DataSet::unsubscribe`](crate::DataSet::unsubscribe) to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription(u64);

#[derive(Default)]
pub(crate) struct EventHub {
    next: u64,
    committing: Vec<(Subscription, CommittingHandler)>,
    committed: Vec<(Subscription, CommittedHandler)>,
    rolled_back: Vec<(Subscription, RolledBackHandler)>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("committing", &self.committing.len())
            .field("committed", &self.committed.len())
            .field("rolled_back", &self.rolled_back.len())
            .finish()
    }
}

impl EventHub {
    fn next_subscription(&mut self) -> Subscription {
        self.next += 1;
        Subscription(self.next)
    }

    pub fn on_committing<F>(&mut self, handler: F) -> Subscription
    where
        F: Fn(&CommitEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        let sub = self.next_subscription();
        self.committing.push((sub, Box::new(handler)));
        sub
    }

    pub fn on_committed<F>(&mut self, handler: F) -> Subscription
    where
        F: Fn(&CommitEvent) + Send + Sync + 'static,
    {
        let sub = self.next_subscription();
        self.committed.push((sub, Box::new(handler)));
        sub
    }

    pub fn on_rolled_back<F>(&mut self, handler: F) -> Subscription
    where
        F: Fn(&RollbackEvent) + Send + Sync + 'static,
    {
        let sub = self.next_subscription();
        self.rolled_back.push((sub, Box::new(handler)));
        sub
    }

    pub fn unsubscribe(&mut self, sub: Subscription) -> bool {
        let before = self.committing.len() + self.committed.len() + self.rolled_back.len();
        self.committing.retain(|(s, _)| *s != sub);
        self.committed.retain(|(s, _)| *s != sub);
        self.rolled_back.retain(|(s, _)| *s != sub);
        before != self.committing.len() + self.committed.len() + self.rolled_back.len()
    }

    /// Ask every committing handler. The first refusal (or panic) cancels.
    pub fn committing(&self, event: &CommitEvent) -> Result<(), String> {
        for (_, handler) in &self.committing {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(reason)) => return Err(reason),
                Err(_) => return Err("committing handler panicked".to_string()),
            }
        }
        Ok(())
    }

    pub fn committed(&self, event: &CommitEvent) {
        for (_, handler) in &self.committed {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(variable = %event.variable, "committed handler panicked");
            }
        }
    }

    pub fn rolled_back(&self, event: &RollbackEvent) {
        for (_, handler) in &self.rolled_back {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!(variable = %event.variable, "rolled-back handler panicked");
            }
        }
    }
}

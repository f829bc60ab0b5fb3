//! Commit throttling.
//!
//! A [`Throttle`] is an external counting primitive; a dataset holds one slot
//! of it for the duration of each commit.
use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

pub trait Throttle: Send + Sync {
    /// Block until a slot is free.
    fn acquire(&self, priority: Priority);

    fn release(&self);
}

/// A held slot, released on drop.
#[must_use]
pub struct Permit {
    throttle: Arc<dyn Throttle>,
}

impl Permit {
    pub fn acquire(throttle: Arc<dyn Throttle>, priority: Priority) -> Self {
        throttle.acquire(priority);
        trace!(?priority, "throttle slot acquired");
        Self { throttle }
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.throttle.release();
        trace!("throttle slot released");
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counting {
        held: AtomicUsize,
        acquired: AtomicUsize,
    }

    impl Throttle for Counting {
        fn acquire(&self, _priority: Priority) {
            self.held.fetch_add(1, Ordering::SeqCst);
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }

        fn release(&self) {
            self.held.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn permit_releases_on_drop() {
        let counting = Arc::new(Counting::default());
        {
            let _permit = Permit::acquire(counting.clone(), Priority::High);
            assert_eq!(counting.held.load(Ordering::SeqCst), 1);
        }
        assert_eq!(counting.held.load(Ordering::SeqCst), 0);
        assert_eq!(counting.acquired.load(Ordering::SeqCst), 1);
    }
}

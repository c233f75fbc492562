//! Connection admission control (C5): a simple cap on concurrent sessions.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Tracks the number of live sessions against a configured maximum.
///
/// A session holds an [`Admission`] guard for its lifetime; dropping the
/// guard releases the slot, so admission accounting can't be leaked by an
/// early return or a panic unwinding through the session task.
pub struct AdmissionController {
    max: usize,
    current: AtomicUsize,
}

impl AdmissionController {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            current: AtomicUsize::new(0),
        }
    }

    /// Attempt to admit one more session. Returns `None` if at capacity.
    pub fn try_admit(self: &std::sync::Arc<Self>) -> Option<Admission> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(Admission {
                    controller: self.clone(),
                });
            }
        }
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }
}

/// RAII guard for one admitted session's slot.
pub struct Admission {
    controller: std::sync::Arc<AdmissionController>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.controller.current.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn admits_up_to_max_then_rejects() {
        let controller = Arc::new(AdmissionController::new(2));
        let a = controller.try_admit().unwrap();
        let b = controller.try_admit().unwrap();
        assert!(controller.try_admit().is_none());
        assert_eq!(controller.current(), 2);
        drop(a);
        assert_eq!(controller.current(), 1);
        let c = controller.try_admit().unwrap();
        assert_eq!(controller.current(), 2);
        drop(b);
        drop(c);
        assert_eq!(controller.current(), 0);
    }
}

use std::sync::atomic::{AtomicBool, Ordering};

/// Mutual-exclusion guard ensuring at most one scale-up/scale-down action is
/// in flight at a time. A tick that finds the flag already held skips
/// straight to the metrics-sampling branch instead of blocking.
#[derive(Debug, Default)]
pub struct ScalingFlag(AtomicBool);

impl ScalingFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Attempts to acquire the flag. Returns `None` without blocking if a
    /// scaling action is already in progress.
    pub fn try_acquire(&self) -> Option<ScalingGuard<'_>> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ScalingGuard(&self.0))
    }

    pub fn is_in_progress(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the flag when dropped, including on an early return or panic
/// unwind out of the scaling action that holds it.
pub struct ScalingGuard<'a>(&'a AtomicBool);

impl Drop for ScalingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_first_guard_lives() {
        let flag = ScalingFlag::new();
        let first = flag.try_acquire();
        assert!(first.is_some());
        assert!(flag.try_acquire().is_none());
        assert!(flag.is_in_progress());
    }

    #[test]
    fn dropping_guard_releases_flag() {
        let flag = ScalingFlag::new();
        {
            let _guard = flag.try_acquire().unwrap();
            assert!(flag.is_in_progress());
        }
        assert!(!flag.is_in_progress());
        assert!(flag.try_acquire().is_some());
    }
}

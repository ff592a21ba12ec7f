//! Atomic version counter for optimistic concurrency control

use std::sync::atomic::{AtomicU64, Ordering, fence};

/// Version counter using even/odd optimistic versioning
///
/// The single writer moves the counter to an odd value before touching the
/// guarded data and back to the next even value afterwards. Readers sample
/// it before and after a copy; equal, even samples mean the copy is
/// consistent.
#[derive(Debug)]
pub struct VersionCounter {
    counter: AtomicU64,
}

impl VersionCounter {
    /// Create a new version counter starting at 0 (even)
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Current version with acquire ordering (reader's first sample)
    #[inline]
    pub fn load(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Reader's second sample. Issues the acquire fence that orders the
    /// preceding data copy before the counter load.
    #[inline]
    pub fn validate(&self, before: u64) -> bool {
        fence(Ordering::Acquire);
        Self::is_stable(before) && self.counter.load(Ordering::Relaxed) == before
    }

    /// Begin write operation - increment to odd version
    ///
    /// Only one thread may act as writer for a given counter.
    #[inline]
    pub fn begin_write(&self) -> u64 {
        let next = self.counter.load(Ordering::Relaxed).wrapping_add(1);
        self.counter.store(next, Ordering::Relaxed);
        fence(Ordering::Release);
        next
    }

    /// Complete write operation - increment to even version
    #[inline]
    pub fn end_write(&self) -> u64 {
        let next = self.counter.load(Ordering::Relaxed).wrapping_add(1);
        self.counter.store(next, Ordering::Release);
        next
    }

    /// Check if version is stable (even)
    #[inline]
    pub const fn is_stable(version: u64) -> bool {
        version % 2 == 0
    }

    /// Check if version indicates write in progress (odd)
    #[inline]
    pub const fn is_writing(version: u64) -> bool {
        version % 2 == 1
    }
}

impl Default for VersionCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_counter_creation() {
        let counter = VersionCounter::new();
        assert_eq!(counter.load(), 0);
        assert!(VersionCounter::is_stable(counter.load()));
    }

    #[test]
    fn test_write_cycle() {
        let counter = VersionCounter::new();

        let v1 = counter.begin_write();
        assert_eq!(v1, 1);
        assert!(VersionCounter::is_writing(v1));

        let v2 = counter.end_write();
        assert_eq!(v2, 2);
        assert!(VersionCounter::is_stable(v2));
    }

    #[test]
    fn test_validate_detects_interleaved_write() {
        let counter = VersionCounter::new();
        let before = counter.load();
        assert!(counter.validate(before));

        counter.begin_write();
        assert!(!counter.validate(before));
        let odd = counter.load();
        assert!(!counter.validate(odd));

        counter.end_write();
        assert!(!counter.validate(before));
        assert!(counter.validate(counter.load()));
    }
}

//! Single-writer versioned snapshot cell.
//!
//! [`snapshot_channel`] allocates one [`SnapshotCell`] and returns its only
//! writer plus a first reader. Readers are `Clone`; the writer is not.

use crate::error::{SharedStateError, SharedStateResult};
use crate::version::VersionCounter;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::Arc;

/// Spins before a blocking reader starts yielding the thread.
const SPIN_ATTEMPTS: u32 = 16;

/// Versioned storage shared by one writer and many readers.
pub struct SnapshotCell<T> {
    version: VersionCounter,
    data: UnsafeCell<T>,
}

// SAFETY: the only `&mut` access to `data` goes through the single
// non-Clone `SnapshotWriter`, bracketed by the version counter. Readers copy
// the bytes into a `MaybeUninit<T>` and only assume it initialised once the
// version check shows no write overlapped, so a torn value is never
// materialised as `T`. `T: Copy` means discarded copies own nothing.
//
// The overlapping byte copy itself is still a race in the language model;
// this is the usual seqlock compromise, as the stable language has no
// per-byte atomic memcpy.
unsafe impl<T: Copy + Send> Sync for SnapshotCell<T> {}

impl<T: Copy> SnapshotCell<T> {
    fn new(initial: T) -> Self {
        Self {
            version: VersionCounter::new(),
            data: UnsafeCell::new(initial),
        }
    }

    #[inline]
    fn try_copy(&self) -> Option<(T, u64)> {
        let before = self.version.load();
        if VersionCounter::is_writing(before) {
            return None;
        }
        // SAFETY: pointer is valid for the cell's lifetime. The copy stays
        // uninterpreted until `validate` confirms no write overlapped it.
        let raw = unsafe { std::ptr::read_volatile(self.data.get().cast::<MaybeUninit<T>>()) };
        if !self.version.validate(before) {
            return None;
        }
        // SAFETY: the copy was taken between two equal, even versions, so it
        // holds a complete value the writer published.
        Some((unsafe { raw.assume_init() }, before))
    }
}

/// Create a snapshot cell holding `initial` and return its writer and a reader.
pub fn snapshot_channel<T: Copy + Send>(initial: T) -> (SnapshotWriter<T>, SnapshotReader<T>) {
    let cell = Arc::new(SnapshotCell::new(initial));
    let reader = SnapshotReader {
        cell: Arc::clone(&cell),
        last_seen_version: 0,
    };
    (SnapshotWriter { cell }, reader)
}

/// Exclusive writer. Writes are unconditional and wait-free.
pub struct SnapshotWriter<T> {
    cell: Arc<SnapshotCell<T>>,
}

impl<T: Copy + Send> SnapshotWriter<T> {
    /// Publish a complete new value. Returns the new (even) version.
    #[inline]
    pub fn write(&mut self, value: T) -> u64 {
        self.cell.version.begin_write();
        // SAFETY: `&mut self` on the unique writer; readers never write.
        unsafe { std::ptr::write_volatile(self.cell.data.get(), value) };
        self.cell.version.end_write()
    }

    /// Read-modify-publish starting from the last written value.
    #[inline]
    pub fn update(&mut self, f: impl FnOnce(&mut T)) -> u64 {
        let mut value = self.latest();
        f(&mut value);
        self.write(value)
    }

    /// Last value published by this writer. Never conflicts: only this
    /// writer mutates the cell.
    #[inline]
    pub fn latest(&self) -> T {
        // SAFETY: no other thread writes `data`.
        unsafe { std::ptr::read_volatile(self.cell.data.get()) }
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.cell.version.load()
    }

    /// Attach another reader.
    pub fn reader(&self) -> SnapshotReader<T> {
        SnapshotReader {
            cell: Arc::clone(&self.cell),
            last_seen_version: 0,
        }
    }
}

/// Lock-free reader with conflict detection
pub struct SnapshotReader<T> {
    cell: Arc<SnapshotCell<T>>,
    last_seen_version: u64,
}

impl<T> Clone for SnapshotReader<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            last_seen_version: self.last_seen_version,
        }
    }
}

impl<T: Copy + Send> SnapshotReader<T> {
    /// Bounded read for real-time callers: at most `max_retries` attempts,
    /// spinning (never yielding) between them.
    #[inline]
    pub fn try_read(&mut self, max_retries: u32) -> SharedStateResult<T> {
        let attempts = max_retries.max(1);
        for _ in 0..attempts {
            if let Some((value, version)) = self.cell.try_copy() {
                self.last_seen_version = version;
                return Ok(value);
            }
            std::hint::spin_loop();
        }
        Err(SharedStateError::VersionConflict { attempts })
    }

    /// Read until a stable copy is obtained. Spins briefly, then yields.
    pub fn read(&mut self) -> T {
        let mut attempt = 0u32;
        loop {
            if let Some((value, version)) = self.cell.try_copy() {
                self.last_seen_version = version;
                return value;
            }
            attempt = attempt.saturating_add(1);
            if attempt < SPIN_ATTEMPTS {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Version of the last successful read
    pub fn version(&self) -> u64 {
        self.last_seen_version
    }

    /// Check if a newer stable value has been published since the last read
    pub fn has_changed(&self) -> bool {
        let current = self.cell.version.load();
        current != self.last_seen_version && VersionCounter::is_stable(current)
    }
}

//! Cross-thread tear-freedom tests for the snapshot cell

use duo_shared_state::{SharedStateError, snapshot_channel};
use proptest::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Every field carries the same generation number, so any torn copy shows
/// up as a mismatch.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Record {
    words: [u64; 8],
}

impl Record {
    fn generation(n: u64) -> Self {
        Self { words: [n; 8] }
    }

    fn is_consistent(&self) -> bool {
        self.words.iter().all(|&w| w == self.words[0])
    }
}

#[test]
fn test_readers_never_observe_torn_record() {
    let (mut writer, reader) = snapshot_channel(Record::generation(0));
    let done = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let mut reader = reader.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut last = 0u64;
                let mut reads = 0u64;
                while !done.load(Ordering::Relaxed) {
                    let rec = reader.read();
                    assert!(rec.is_consistent(), "torn read: {rec:?}");
                    assert!(rec.words[0] >= last, "generation went backwards");
                    last = rec.words[0];
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    for n in 1..=20_000u64 {
        writer.write(Record::generation(n));
    }
    done.store(true, Ordering::Relaxed);

    for handle in handles {
        assert!(handle.join().unwrap() > 0);
    }
}

#[test]
fn test_bounded_reader_reports_conflicts_not_garbage() {
    let (mut writer, reader) = snapshot_channel(Record::generation(0));
    let done = Arc::new(AtomicBool::new(false));

    let mut bounded = reader.clone();
    let flag = Arc::clone(&done);
    let handle = thread::spawn(move || {
        let mut ok = 0u64;
        while !flag.load(Ordering::Relaxed) {
            match bounded.try_read(2) {
                Ok(rec) => {
                    assert!(rec.is_consistent());
                    ok += 1;
                }
                Err(SharedStateError::VersionConflict { attempts }) => {
                    assert_eq!(attempts, 2);
                }
            }
        }
        ok
    });

    for n in 1..=20_000u64 {
        writer.write(Record::generation(n));
    }
    done.store(true, Ordering::Relaxed);
    handle.join().unwrap();
}

/// Record with an enum and padding: a torn copy could hold a discriminant
/// that no variant has.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Even,
    Odd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tagged {
    phase: Phase,
    armed: bool,
    count: u32,
    stamp: u64,
}

impl Tagged {
    fn generation(n: u64) -> Self {
        Self {
            phase: if n % 2 == 0 { Phase::Even } else { Phase::Odd },
            armed: n % 3 == 0,
            count: n as u32,
            stamp: n,
        }
    }
}

#[test]
fn test_mixed_layout_record_is_never_torn() {
    let (mut writer, reader) = snapshot_channel(Tagged::generation(0));
    let done = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let mut reader = reader.clone();
            let done = Arc::clone(&done);
            thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    if let Ok(rec) = reader.try_read(4) {
                        assert_eq!(rec, Tagged::generation(rec.stamp), "torn read");
                    }
                }
            })
        })
        .collect();

    for n in 1..=20_000u64 {
        writer.write(Tagged::generation(n));
    }
    done.store(true, Ordering::Relaxed);

    for handle in handles {
        handle.join().unwrap();
    }
}

proptest! {
    #[test]
    fn prop_last_write_wins(values in proptest::collection::vec(any::<i64>(), 1..64)) {
        let (mut writer, mut reader) = snapshot_channel(0i64);
        for v in &values {
            writer.write(*v);
        }
        prop_assert_eq!(reader.read(), *values.last().unwrap());
        prop_assert_eq!(writer.version(), 2 * values.len() as u64);
    }
}

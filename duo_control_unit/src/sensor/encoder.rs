//! Quadrature decoder: widens a bounded hardware edge counter into an
//! unbounded signed position.
//!
//! The hardware counter is cleared by the limit handler each time it hits
//! ±`COUNTER_LIMIT`; the handler accounts for the wrap in an overflow count.
//! Counter reset and overflow update are bracketed by a [`VersionCounter`]
//! so a reader can never combine a freshly cleared counter with a stale
//! overflow count.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use duo_common::consts::COUNTER_LIMIT;
use duo_common::hal::PulseCounter;
use duo_shared_state::VersionCounter;

/// Reads attempted before falling back to the last good position.
const MAX_READ_ATTEMPTS: u32 = 32;

/// Direction in which the hardware counter reached its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountDirection {
    Up,
    Down,
}

/// State shared between the decoder and its interrupt-side handle.
#[derive(Debug, Default)]
struct EncoderShared {
    version: VersionCounter,
    overflow: AtomicI32,
    error: AtomicBool,
}

/// Interrupt-side handle: counter-limit and error notifications.
///
/// Every method is a handful of atomic stores; safe to call from an
/// interrupt or any thread.
#[derive(Debug, Clone)]
pub struct EncoderIrq {
    shared: Arc<EncoderShared>,
}

impl EncoderIrq {
    /// Counter reached ±limit. `reset` must clear the hardware counter; it
    /// runs inside the version bracket. Only one limit handler may run at a
    /// time per encoder.
    #[inline]
    pub fn on_counter_limit(&self, direction: CountDirection, reset: impl FnOnce()) {
        let s = &self.shared;
        s.version.begin_write();
        let step = match direction {
            CountDirection::Up => 1,
            CountDirection::Down => -1,
        };
        let ov = s.overflow.load(Ordering::Relaxed);
        s.overflow.store(ov.wrapping_add(step), Ordering::Relaxed);
        reset();
        s.version.end_write();
    }

    /// Hardware detected an invalid quadrature transition or signal loss.
    #[inline]
    pub fn set_error(&self) {
        self.shared.error.store(true, Ordering::Release);
    }
}

/// One decoder channel. Owned by the control context.
pub struct QuadratureDecoder {
    counter: Arc<dyn PulseCounter>,
    shared: Arc<EncoderShared>,
    counts_per_rev: f32,
    /// Subtracted from the raw extended count.
    offset: i32,
    position: i32,
    previous_position: i32,
    velocity: f32,
    filtered_velocity: f32,
    filter_alpha: f32,
    torn_reads: u32,
}

impl QuadratureDecoder {
    pub fn new(counter: Arc<dyn PulseCounter>, counts_per_rev: u32, filter_alpha: f32) -> Self {
        Self {
            counter,
            shared: Arc::new(EncoderShared::default()),
            counts_per_rev: counts_per_rev.max(1) as f32,
            offset: 0,
            position: 0,
            previous_position: 0,
            velocity: 0.0,
            filtered_velocity: 0.0,
            filter_alpha: filter_alpha.clamp(f32::EPSILON, 1.0),
            torn_reads: 0,
        }
    }

    /// Handle for the counter-limit interrupt and hardware error reporting.
    pub fn irq_handle(&self) -> EncoderIrq {
        EncoderIrq {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Consistent `(overflow, raw)` pair, or `None` if every attempt
    /// overlapped a limit handler.
    #[inline]
    fn read_extended(&self) -> Option<i32> {
        for _ in 0..MAX_READ_ATTEMPTS {
            let before = self.shared.version.load();
            if VersionCounter::is_writing(before) {
                std::hint::spin_loop();
                continue;
            }
            let raw = self.counter.read();
            let overflow = self.shared.overflow.load(Ordering::Relaxed);
            if self.shared.version.validate(before) {
                return Some(
                    overflow
                        .wrapping_mul(i32::from(COUNTER_LIMIT))
                        .wrapping_add(i32::from(raw)),
                );
            }
            std::hint::spin_loop();
        }
        None
    }

    /// Current position [counts]. Falls back to the last sampled position
    /// if a consistent read could not be obtained.
    #[inline]
    pub fn position(&self) -> i32 {
        match self.read_extended() {
            Some(ext) => ext.wrapping_sub(self.offset),
            None => self.position,
        }
    }

    /// Sample position and compute `(position − previous) / dt` [counts/s].
    /// Returns the unfiltered velocity.
    #[inline]
    pub fn update_velocity(&mut self, dt: f32) -> f32 {
        let position = match self.read_extended() {
            Some(ext) => ext.wrapping_sub(self.offset),
            None => {
                self.torn_reads = self.torn_reads.wrapping_add(1);
                self.position
            }
        };
        self.previous_position = self.position;
        self.position = position;
        if dt > 0.0 {
            self.velocity = position.wrapping_sub(self.previous_position) as f32 / dt;
            self.filtered_velocity += self.filter_alpha * (self.velocity - self.filtered_velocity);
        }
        self.velocity
    }

    /// Last sampled position.
    #[inline]
    pub fn sampled_position(&self) -> i32 {
        self.position
    }

    /// Unfiltered velocity of the last sample [counts/s].
    #[inline]
    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    /// Low-pass filtered velocity [counts/s].
    #[inline]
    pub fn filtered_velocity(&self) -> f32 {
        self.filtered_velocity
    }

    /// Filtered velocity [RPM].
    #[inline]
    pub fn velocity_rpm(&self) -> f32 {
        self.counts_per_sec_to_rpm(self.filtered_velocity)
    }

    /// Make the current position read as zero.
    pub fn reset_position(&mut self) {
        self.set_position(0);
    }

    /// Make the current position read as `position`. Velocity history is
    /// rebased so no spurious step is seen.
    pub fn set_position(&mut self, position: i32) {
        let ext = self
            .read_extended()
            .unwrap_or_else(|| self.position.wrapping_add(self.offset));
        self.offset = ext.wrapping_sub(position);
        self.position = position;
        self.previous_position = position;
    }

    /// Raw hardware counter value.
    #[inline]
    pub fn raw_count(&self) -> i16 {
        self.counter.read()
    }

    #[inline]
    pub fn overflow_count(&self) -> i32 {
        self.shared.overflow.load(Ordering::Acquire)
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        self.shared.error.load(Ordering::Acquire)
    }

    pub fn set_error(&self) {
        self.shared.error.store(true, Ordering::Release);
    }

    pub fn clear_error(&self) {
        self.shared.error.store(false, Ordering::Release);
    }

    /// Samples that fell back to the previous position.
    #[inline]
    pub fn torn_reads(&self) -> u32 {
        self.torn_reads
    }

    // ─── Unit conversions ───────────────────────────────────────────

    #[inline]
    pub fn counts_to_revolutions(&self, counts: i32) -> f32 {
        counts as f32 / self.counts_per_rev
    }

    #[inline]
    pub fn revolutions_to_counts(&self, revolutions: f32) -> i32 {
        (revolutions * self.counts_per_rev).round() as i32
    }

    #[inline]
    pub fn counts_per_sec_to_rpm(&self, counts_per_sec: f32) -> f32 {
        counts_per_sec * 60.0 / self.counts_per_rev
    }

    #[inline]
    pub fn rpm_to_counts_per_sec(&self, rpm: f32) -> f32 {
        rpm * self.counts_per_rev / 60.0
    }
}

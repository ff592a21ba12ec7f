//! Trajectory buffer and linear setpoint interpolation.
//!
//! The dispatcher pushes [`TrajectoryPoint`]s into a lock-free SPSC ring;
//! the control tick consumes them point-by-point. Every sample is tagged
//! with the trajectory epoch current at push time. Stopping a trajectory
//! bumps the epoch, so points left over from a cancelled run are discarded
//! instead of resumed.
//!
//! Timestamps are milliseconds since trajectory start. Deltas are position
//! offsets [counts] from the previous point (the first point is relative to
//! the anchor position captured at start).

use std::ptr::NonNull;
use std::sync::Arc;

use duo_common::consts::{MOTOR_COUNT, TRAJECTORY_QUEUE_SLOTS};
use duo_common::protocol::TrajectoryPoint;
use heapless::spsc::{Consumer, Producer, Queue};

type SampleQueue = Queue<TrajectorySample, TRAJECTORY_QUEUE_SLOTS>;

/// One buffered point plus the epoch it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrajectorySample {
    pub epoch: u8,
    pub point: TrajectoryPoint,
}

/// Ring storage shared by both endpoints, freed with the last of them.
struct Ring(NonNull<SampleQueue>);

// SAFETY: the queue is only reached through its split endpoints, one per
// thread; `Ring` itself never dereferences it outside `drop`.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Drop for Ring {
    fn drop(&mut self) {
        // SAFETY: allocated in `trajectory_channel`; both endpoints drop
        // their queue handle before their `Arc<Ring>`.
        drop(unsafe { Box::from_raw(self.0.as_ptr()) });
    }
}

/// Allocate a ring and split it into its two endpoints.
pub fn trajectory_channel() -> (TrajectoryProducer, TrajectoryFollower) {
    let raw = NonNull::from(Box::leak(Box::new(SampleQueue::new())));
    let ring = Arc::new(Ring(raw));
    // SAFETY: the endpoints borrow the allocation for as long as they hold
    // `ring`, which keeps it alive.
    let queue: &'static mut SampleQueue = unsafe { &mut *raw.as_ptr() };
    let (producer, consumer) = queue.split();
    (
        TrajectoryProducer {
            inner: producer,
            _ring: Arc::clone(&ring),
        },
        TrajectoryFollower::new(consumer, ring),
    )
}

/// Epoch `sample` predates `current` (wrapping).
#[inline]
fn is_stale(sample: u8, current: u8) -> bool {
    (current.wrapping_sub(sample) as i8) > 0
}

// ─── Producer (dispatch side) ───────────────────────────────────────

pub struct TrajectoryProducer {
    inner: Producer<'static, TrajectorySample, TRAJECTORY_QUEUE_SLOTS>,
    // Declared last: dropped after `inner`.
    _ring: Arc<Ring>,
}

impl TrajectoryProducer {
    /// Enqueue a point. Returns it back when the ring is full.
    pub fn push(&mut self, epoch: u8, point: TrajectoryPoint) -> Result<(), TrajectoryPoint> {
        self.inner
            .enqueue(TrajectorySample { epoch, point })
            .map_err(|s| s.point)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

// ─── Follower (control side) ────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
struct Waypoint {
    t_ms: f32,
    position: [f32; MOTOR_COUNT],
}

/// Interpolated setpoint for one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrajectorySetpoint {
    /// Position setpoint [counts].
    pub position: [f32; MOTOR_COUNT],
    /// Segment velocity [counts/s], used as feedforward.
    pub velocity: [f32; MOTOR_COUNT],
    /// No further point is buffered and the last one has been reached.
    pub exhausted: bool,
}

pub struct TrajectoryFollower {
    consumer: Consumer<'static, TrajectorySample, TRAJECTORY_QUEUE_SLOTS>,
    epoch: u8,
    active: bool,
    elapsed_ms: f32,
    from: Waypoint,
    to: Option<Waypoint>,
    last_seq: u8,
    consumed: u32,
    _ring: Arc<Ring>,
}

impl TrajectoryFollower {
    fn new(consumer: Consumer<'static, TrajectorySample, TRAJECTORY_QUEUE_SLOTS>, ring: Arc<Ring>) -> Self {
        Self {
            consumer,
            epoch: 0,
            active: false,
            elapsed_ms: 0.0,
            from: Waypoint::default(),
            to: None,
            last_seq: 0,
            consumed: 0,
            _ring: ring,
        }
    }

    /// Begin following epoch `epoch` from `anchor`.
    pub fn start(&mut self, epoch: u8, anchor: [i32; MOTOR_COUNT]) {
        self.epoch = epoch;
        self.active = true;
        self.elapsed_ms = 0.0;
        self.from = Waypoint {
            t_ms: 0.0,
            position: anchor.map(|p| p as f32),
        };
        self.to = None;
    }

    /// Stop following. Buffered points stay until discarded by epoch.
    pub fn cancel(&mut self) {
        self.active = false;
        self.to = None;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn epoch(&self) -> u8 {
        self.epoch
    }

    /// Points currently buffered (any epoch).
    #[inline]
    pub fn buffered(&self) -> usize {
        self.consumer.len()
    }

    #[inline]
    pub fn last_seq(&self) -> u8 {
        self.last_seq
    }

    #[inline]
    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    /// Position the follower is holding or heading from.
    #[inline]
    pub fn hold_position(&self) -> [f32; MOTOR_COUNT] {
        self.from.position
    }

    /// Advance time by `dt` [s] and return the interpolated setpoint.
    /// Bounded: consumes at most one ring's worth of points per call.
    pub fn advance(&mut self, dt: f32) -> TrajectorySetpoint {
        if self.active && dt > 0.0 {
            self.elapsed_ms += dt * 1000.0;
        }
        for _ in 0..=TRAJECTORY_QUEUE_SLOTS {
            let to = match self.to {
                Some(to) => to,
                None => match self.next_waypoint() {
                    Some(to) => {
                        self.to = Some(to);
                        to
                    }
                    None => {
                        return TrajectorySetpoint {
                            position: self.from.position,
                            velocity: [0.0; MOTOR_COUNT],
                            exhausted: true,
                        };
                    }
                },
            };

            if self.elapsed_ms >= to.t_ms {
                self.from = to;
                self.to = None;
                continue;
            }

            let span = to.t_ms - self.from.t_ms;
            let frac = (self.elapsed_ms - self.from.t_ms) / span;
            let mut sp = TrajectorySetpoint::default();
            for i in 0..MOTOR_COUNT {
                let delta = to.position[i] - self.from.position[i];
                sp.position[i] = self.from.position[i] + delta * frac;
                sp.velocity[i] = delta / span * 1000.0;
            }
            return sp;
        }
        TrajectorySetpoint {
            position: self.from.position,
            velocity: [0.0; MOTOR_COUNT],
            exhausted: false,
        }
    }

    /// Drop stale points, then dequeue the next point of the active epoch.
    /// Points from a newer epoch are left in place.
    fn next_waypoint(&mut self) -> Option<Waypoint> {
        if !self.active {
            return None;
        }
        for _ in 0..TRAJECTORY_QUEUE_SLOTS {
            let sample = *self.consumer.peek()?;
            if sample.epoch == self.epoch {
                self.consumer.dequeue();
                self.last_seq = sample.point.seq;
                self.consumed = self.consumed.wrapping_add(1);
                let deltas = sample.point.deltas();
                let mut position = self.from.position;
                for (p, d) in position.iter_mut().zip(deltas) {
                    *p += d as f32;
                }
                return Some(Waypoint {
                    t_ms: sample.point.timestamp_ms as f32,
                    position,
                });
            }
            if is_stale(sample.epoch, self.epoch) {
                self.consumer.dequeue();
                continue;
            }
            return None;
        }
        None
    }

    /// Discard every point that predates `epoch` without starting.
    pub fn purge_stale(&mut self, epoch: u8) {
        for _ in 0..TRAJECTORY_QUEUE_SLOTS {
            match self.consumer.peek() {
                Some(s) if is_stale(s.epoch, epoch) => {
                    self.consumer.dequeue();
                }
                _ => break,
            }
        }
    }
}

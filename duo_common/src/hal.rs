//! Hardware and transport collaborator traits.
//!
//! The drive core talks to the outside world only through these seams:
//!
//! - [`PulseCounter`] - bounded hardware quadrature edge counter
//! - [`HBridge`] - PWM / direction outputs plus current and temperature sense
//! - [`Clock`] - monotonic microsecond time source
//! - [`FrameTransport`] - identifier-keyed frame transmit
//!
//! All methods take `&self` so one instance can be shared between the
//! control context, the dispatch context and interrupt handlers. Every
//! method must be non-blocking and O(1).

use std::sync::Arc;
use thiserror::Error;

/// Physical drive direction of one H-bridge channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Direction {
    Forward = 0,
    Reverse = 1,
    /// Both low-side switches on: active braking.
    Brake = 2,
    /// All switches off: free-wheeling.
    #[default]
    Coast = 3,
}

impl Direction {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Forward),
            1 => Some(Self::Reverse),
            2 => Some(Self::Brake),
            3 => Some(Self::Coast),
            _ => None,
        }
    }
}

/// Bounded hardware edge counter for one encoder channel.
///
/// The counter counts ±1 per quadrature transition and is cleared by the
/// limit handler when it reaches ±`COUNTER_LIMIT`.
pub trait PulseCounter: Send + Sync {
    /// Current raw count.
    fn read(&self) -> i16;
    /// Reset the raw count to zero.
    fn clear(&self);
}

/// Dual-channel H-bridge with current and temperature sensing.
pub trait HBridge: Send + Sync {
    /// Apply direction and raw PWM compare value (0..=`PWM_MAX_DUTY`).
    fn set_output(&self, motor: usize, direction: Direction, pwm: u16);
    /// Raw current-sense ADC sample.
    fn read_current_raw(&self, motor: usize) -> u16;
    /// Driver stage temperature [°C].
    fn read_temperature(&self, motor: usize) -> f32;
}

/// Monotonic time source.
pub trait Clock: Send + Sync {
    /// Microseconds since an arbitrary fixed origin.
    fn now_us(&self) -> u64;

    #[inline]
    fn now_ms(&self) -> u64 {
        self.now_us() / 1000
    }
}

/// Transport-level transmit failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Transmit queue full; frame dropped.
    #[error("transmit queue full")]
    QueueFull,

    /// Bus in error-passive / bus-off state.
    #[error("bus unavailable: {0}")]
    BusUnavailable(String),

    /// Payload longer than one frame.
    #[error("payload too long: {0} bytes")]
    PayloadTooLong(usize),
}

/// Outbound half of the external bus. Inbound frames arrive through a
/// queue owned by the dispatcher.
pub trait FrameTransport: Send + Sync {
    fn transmit(&self, id: u16, payload: &[u8]) -> Result<(), TransportError>;
}

impl<T: PulseCounter + ?Sized> PulseCounter for Arc<T> {
    fn read(&self) -> i16 {
        (**self).read()
    }
    fn clear(&self) {
        (**self).clear()
    }
}

impl<T: HBridge + ?Sized> HBridge for Arc<T> {
    fn set_output(&self, motor: usize, direction: Direction, pwm: u16) {
        (**self).set_output(motor, direction, pwm)
    }
    fn read_current_raw(&self, motor: usize) -> u16 {
        (**self).read_current_raw(motor)
    }
    fn read_temperature(&self, motor: usize) -> f32 {
        (**self).read_temperature(motor)
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

impl<T: FrameTransport + ?Sized> FrameTransport for Arc<T> {
    fn transmit(&self, id: u16, payload: &[u8]) -> Result<(), TransportError> {
        (**self).transmit(id, payload)
    }
}

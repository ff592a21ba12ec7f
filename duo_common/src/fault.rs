//! Fault bitmask (FaultFlags).
//!
//! Bit positions follow the firmware fault catalog so the value can be
//! published unchanged in the FAULT wire record.

use bitflags::bitflags;

bitflags! {
    /// Latched safety faults. Sticky until an accepted clear request finds
    /// no active condition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FaultFlags: u32 {
        const OVERCURRENT_1    = 1 << 0;
        const OVERCURRENT_2    = 1 << 1;
        const OVERTEMP_1       = 1 << 2;
        const OVERTEMP_2       = 1 << 3;
        const ENCODER_ERROR_1  = 1 << 4;
        const ENCODER_ERROR_2  = 1 << 5;
        /// No accepted command within the watchdog timeout.
        const COMMAND_WATCHDOG = 1 << 6;
        const POSITION_LIMIT   = 1 << 7;
        const VELOCITY_LIMIT   = 1 << 8;
        const ACCEL_LIMIT      = 1 << 9;
        /// Consecutive loop overruns reached the configured threshold.
        const LOOP_OVERRUN     = 1 << 10;
        const MEMORY_ERROR     = 1 << 11;
        const CONFIG_ERROR     = 1 << 12;
    }
}

impl FaultFlags {
    /// Overcurrent bit for actuator `index` (0-based).
    #[inline]
    pub const fn overcurrent(index: usize) -> Self {
        Self::per_motor(Self::OVERCURRENT_1, Self::OVERCURRENT_2, index)
    }

    /// Overtemperature bit for actuator `index` (0-based).
    #[inline]
    pub const fn overtemp(index: usize) -> Self {
        Self::per_motor(Self::OVERTEMP_1, Self::OVERTEMP_2, index)
    }

    /// Encoder error bit for actuator `index` (0-based).
    #[inline]
    pub const fn encoder_error(index: usize) -> Self {
        Self::per_motor(Self::ENCODER_ERROR_1, Self::ENCODER_ERROR_2, index)
    }

    /// Bits that concern actuator `index`.
    #[inline]
    pub const fn motor_mask(index: usize) -> Self {
        Self::from_bits_truncate(
            Self::overcurrent(index).bits()
                | Self::overtemp(index).bits()
                | Self::encoder_error(index).bits(),
        )
    }

    const fn per_motor(first: Self, second: Self, index: usize) -> Self {
        match index {
            0 => first,
            1 => second,
            _ => Self::empty(),
        }
    }
}

impl Default for FaultFlags {
    fn default() -> Self {
        Self::empty()
    }
}

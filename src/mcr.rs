//! Media Clock Recovery HAL contract
//!
//! When a listener must reconstruct the talker's media clock, the mapping
//! forwards its configured intervals to a platform clock-recovery HAL on
//! `rx_init` and closes it on `end`. The HAL itself is outside this crate.

/// Clock recovery mode, forwarded opaquely from configuration to the HAL.
/// Zero means disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct McrMode(pub u32);

impl McrMode {
    pub const DISABLED: McrMode = McrMode(0);

    pub fn is_enabled(self) -> bool {
        self.0 != 0
    }
}

/// Platform media clock recovery
pub trait ClockRecovery {
    fn init(
        &mut self,
        mode: McrMode,
        tx_interval: u32,
        packing_factor: u32,
        timestamp_interval: u32,
        recovery_interval: u32,
    );

    fn close(&mut self);
}

/// No-op clock recovery for hosts without an MCR HAL
#[derive(Debug, Default)]
pub struct NullClockRecovery;

impl ClockRecovery for NullClockRecovery {
    fn init(&mut self, _: McrMode, _: u32, _: u32, _: u32, _: u32) {}

    fn close(&mut self) {}
}

//! AVTP presentation time
//!
//! Minimal realization of the AVTP time contract: a 64-bit nanosecond time
//! with validity and uncertainty flags, projected onto the 32-bit AVTP
//! presentation timestamp carried on the wire.

use crate::constants::NANOSECONDS_PER_USEC;

/// Presentation time attached to a media queue item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvtpTime {
    time_nsec: u64,
    valid: bool,
    uncertain: bool,
}

impl AvtpTime {
    /// Valid presentation time from an absolute nanosecond clock value
    pub fn from_nanoseconds(nsec: u64) -> Self {
        Self {
            time_nsec: nsec,
            valid: true,
            uncertain: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn is_uncertain(&self) -> bool {
        self.uncertain
    }

    pub fn set_uncertain(&mut self, uncertain: bool) {
        self.uncertain = uncertain;
    }

    pub fn add_usec(&mut self, usec: u32) {
        self.time_nsec = self
            .time_nsec
            .wrapping_add(u64::from(usec) * NANOSECONDS_PER_USEC);
    }

    pub fn sub_usec(&mut self, usec: u32) {
        self.time_nsec = self
            .time_nsec
            .wrapping_sub(u64::from(usec) * NANOSECONDS_PER_USEC);
    }

    /// The 32-bit AVTP presentation timestamp (low word of the time)
    pub fn avtp_timestamp(&self) -> u32 {
        self.time_nsec as u32
    }

    /// Replace the time with a received 32-bit AVTP timestamp
    pub fn set_to_timestamp(&mut self, timestamp: u32) {
        self.time_nsec = u64::from(timestamp);
    }
}

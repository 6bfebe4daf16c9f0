//! Error types for the AAF mapping

use thiserror::Error;

/// Stream configuration errors
///
/// A configuration error leaves the mapping in an inert state: `tx` reports
/// [`TxOutcome::NotReady`](crate::map::TxOutcome) and `rx` rejects frames
/// until the mapping is reconfigured and reinitialized.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unsupported audio rate: {0} Hz")]
    InvalidRate(u32),

    #[error("Unsupported bit depth {bit_depth} for {audio_type}")]
    InvalidBitDepth {
        audio_type: &'static str,
        bit_depth: u8,
    },

    #[error("Transmit interval must be non-zero")]
    InvalidTxInterval,

    #[error("Temporal redundancy offset ({offset_samples} samples) is not a multiple of the packet size ({frames_per_packet} frames)")]
    UnalignedRedundancyOffset {
        offset_samples: u32,
        frames_per_packet: u32,
    },
}

/// Frame parsing errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    #[error("Frame too short for AAF header: {0} bytes")]
    TooShort(usize),
}

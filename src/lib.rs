//! # AVTP Audio Format (AAF) Stream Mapping
//!
//! Mapping layer between a timestamped media queue and AVTP Ethernet frames,
//! implementing IEEE 1722-2016 Clause 7 (AAF, uncompressed PCM).
//!
//! ## Architecture Overview
//!
//! ```text
//!                TALKER                                LISTENER
//!  ┌───────────────────────────────┐    ┌─────────────────────────────────┐
//!  │  Media Queue (audio items)    │    │  AVTP frame from the wire       │
//!  │            │                  │    │            │                    │
//!  │            ▼                  │    │            ▼                    │
//!  │  ┌─────────────────────────┐  │    │  ┌──────────────────────────┐   │
//!  │  │ AafMap::tx              │  │    │  │ AafMap::rx / rx_lost     │   │
//!  │  │  - drain one packet     │  │    │  │  - parse + validate hdr  │   │
//!  │  │  - AAF header + avtp ts │  │    │  │  - width conversion      │   │
//!  │  │  - sparse timestamping  │  │    │  │  - deliver into queue    │   │
//!  │  └───────────┬─────────────┘  │    │  └───────────┬──────────────┘   │
//!  │              │                │    │              │                  │
//!  │              ▼                │    │              ▼                  │
//!  │  ┌─────────────────────────┐  │    │  ┌──────────────────────────┐   │
//!  │  │ RedundancyEngine        │  │    │  │ RedundancyEngine         │   │
//!  │  │  delay line: primary at │  │    │  │  saved copies repair up  │   │
//!  │  │  seq N = fresh at N - D │  │    │  │  to D lost packets       │   │
//!  │  └─────────────────────────┘  │    │  └──────────────────────────┘   │
//!  └───────────────────────────────┘    └─────────────────────────────────┘
//! ```
//!
//! Each AVTP frame carries a 24-byte header (the 12-byte AVTP common header
//! plus the 12-byte AAF header) followed by tightly packed interleaved
//! samples. When temporal redundancy is enabled, the frame additionally
//! carries a redundant copy of the audio transmitted `D` packets earlier,
//! letting a listener ride out up to the configured Max Allowed Dropout Time
//! of consecutive loss.
//!
//! The host pipeline drives the mapping through the [`map::MapModule`]
//! capability trait; the media queue, AVTP time, and clock-recovery HAL are
//! external collaborators realized here by their minimal contracts.

pub mod config;
pub mod convert;
pub mod error;
pub mod map;
pub mod mcr;
pub mod mediaq;
pub mod packet;
pub mod queue;
pub mod redundancy;
pub mod time;

pub use error::{ConfigError, PacketError};
pub use map::{AafMap, MapModule, TxOutcome};

/// Mapping-wide constants
pub mod constants {
    /// Default number of media queue items
    pub const DEFAULT_ITEM_COUNT: u32 = 20;

    /// Default transmit interval in packets per second
    pub const DEFAULT_TX_INTERVAL: u32 = 4000;

    /// Default packing factor (packets of audio per media queue item)
    pub const DEFAULT_PACKING_FACTOR: u32 = 1;

    /// Default media clock recovery timestamp interval
    pub const DEFAULT_MCR_TIMESTAMP_INTERVAL: u32 = 144;

    /// Default media clock recovery recovery interval
    pub const DEFAULT_MCR_RECOVERY_INTERVAL: u32 = 512;

    /// Rate limit for repeating receive-side error logs
    pub const RX_LOG_INTERVAL: u32 = 1000;

    pub const NANOSECONDS_PER_SECOND: u64 = 1_000_000_000;
    pub const NANOSECONDS_PER_USEC: u64 = 1_000;
    pub const MICROSECONDS_PER_SECOND: u64 = 1_000_000;
}

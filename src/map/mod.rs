//! AAF mapping state machine
//!
//! Owns the stream configuration and derived sizes, the temporal redundancy
//! delay line, and the clock-recovery handle, and implements the callbacks
//! the stream pipeline drives: lifecycle (`gen_init`/`tx_init`/`rx_init`/
//! `end`/`gen_end`), the talker packetizer (`tx`), and the listener
//! depacketizer (`rx`/`rx_lost`).
//!
//! One mapping serves one stream endpoint. The first `tx_init` or `rx_init`
//! decides the role; the talker and listener paths never run concurrently
//! within a stream.

mod listener;
mod talker;

use std::time::Instant;

use tracing::{error, info, warn};

use crate::config::{packing_factor_valid_for_sparse, MapConfig, SparseMode};
use crate::constants::MICROSECONDS_PER_SECOND;
use crate::error::ConfigError;
use crate::mcr::ClockRecovery;
use crate::mediaq::{AudioType, MediaQueue, StreamInfo};
use crate::packet::{self, ChannelLayout, NominalRate, SampleFormat};
use crate::redundancy::RedundancyEngine;

/// Result of one talker interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    /// A packet of the given total length was produced
    Ready(usize),
    /// Nothing to send this interval; retry on the next one
    NotReady,
}

/// Capability set the stream pipeline binds per mapping instance
pub trait MapModule {
    /// Apply one stream configuration name/value pair
    fn config_value(&mut self, name: &str, value: &str);

    /// AVTP subtype produced and accepted by this mapping
    fn subtype(&self) -> u8;

    /// AVTP version carried in the common header
    fn avtp_version(&self) -> u8;

    /// Largest frame this mapping can produce or accept, headers included
    fn max_data_size(&self) -> usize;

    /// Intended transmit interval in packets per second
    fn transmit_interval(&self) -> u32;

    /// Compute derived sizes and prepare shared stream state
    fn gen_init(&mut self, queue: &mut MediaQueue) -> Result<(), ConfigError>;

    /// This mapping will be a talker
    fn tx_init(&mut self);

    /// Produce one packet into `frame`
    fn tx(&mut self, queue: &mut MediaQueue, frame: &mut [u8]) -> TxOutcome;

    /// This mapping will be a listener
    fn rx_init(&mut self);

    /// Consume one received frame
    fn rx(&mut self, queue: &mut MediaQueue, frame: &[u8]) -> bool;

    /// The lower layer detected `num_lost` missing packets
    fn rx_lost(&mut self, queue: &mut MediaQueue, num_lost: u16) -> bool;

    /// Stream teardown
    fn end(&mut self);

    /// Release shared stream state
    fn gen_end(&mut self);
}

/// AAF mapping instance for one stream
pub struct AafMap {
    pub(crate) config: MapConfig,

    // Derived from the stream format at gen_init
    pub(crate) aaf_rate: NominalRate,
    pub(crate) aaf_format: SampleFormat,
    pub(crate) aaf_bit_depth: u8,
    pub(crate) payload_size: usize,
    pub(crate) payload_size_max_talker: usize,
    pub(crate) payload_size_max_listener: usize,
    pub(crate) event_field: u8,

    // Live copies that may diverge from the configuration at runtime: a
    // listener follows the remote's sparse mode, and temporal redundancy is
    // disabled for the stream when frames arrive without the second copy.
    pub(crate) sparse_mode: SparseMode,
    pub(crate) tr_offset_usec: u32,
    pub(crate) tr_offset_samples: u32,
    pub(crate) tr_offset_packets: u32,
    pub(crate) tr_frame_size: usize,

    pub(crate) is_talker: bool,
    pub(crate) data_valid: bool,
    pub(crate) media_q_item_sync_ts: bool,
    /// Reserved for pacing hooks
    #[allow(dead_code)]
    pub(crate) interval_counter: u32,

    pub(crate) redundancy: Option<RedundancyEngine>,
    pub(crate) mcr: Option<Box<dyn ClockRecovery>>,

    epoch: Instant,
    pub(crate) queue_full_events: u32,
    pub(crate) sync_drop_events: u32,
}

impl AafMap {
    /// Create a mapping with default configuration and the stream class's
    /// transit budget
    pub fn new(max_transit_usec: u32) -> Self {
        Self {
            config: MapConfig::new(max_transit_usec),
            aaf_rate: NominalRate::Unspec,
            aaf_format: SampleFormat::Unspec,
            aaf_bit_depth: 0,
            payload_size: 0,
            payload_size_max_talker: 0,
            payload_size_max_listener: 0,
            event_field: ChannelLayout::Static as u8,
            sparse_mode: SparseMode::Disabled,
            tr_offset_usec: 0,
            tr_offset_samples: 0,
            tr_offset_packets: 0,
            tr_frame_size: 0,
            is_talker: false,
            data_valid: false,
            media_q_item_sync_ts: false,
            interval_counter: 0,
            redundancy: None,
            mcr: None,
            epoch: Instant::now(),
            queue_full_events: 0,
            sync_drop_events: 0,
        }
    }

    /// Attach a platform clock-recovery HAL
    pub fn with_clock_recovery(mut self, mcr: Box<dyn ClockRecovery>) -> Self {
        self.mcr = Some(mcr);
        self
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Listener-side temporal redundancy statistics
    pub fn redundancy_stats(&self) -> crate::redundancy::RedundancyStats {
        self.redundancy.as_ref().map(|r| r.stats()).unwrap_or_default()
    }

    pub(crate) fn now_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Derive the wire format and all packet/item sizes from the stream
    /// description. On failure the mapping is left inert.
    fn calculate_sizes(&mut self, info: &mut StreamInfo) -> Result<(), ConfigError> {
        self.aaf_format = SampleFormat::Unspec;

        self.aaf_rate = NominalRate::from_hz(info.sample_rate);
        if self.aaf_rate == NominalRate::Unspec {
            error!(rate = info.sample_rate, "Invalid audio frequency configured");
            return Err(ConfigError::InvalidRate(info.sample_rate));
        }
        self.tr_offset_samples = (u64::from(self.config.temporal_redundant_offset_usec)
            * u64::from(info.sample_rate)
            / MICROSECONDS_PER_SECOND) as u32;
        info!(rate = ?self.aaf_rate, hz = info.sample_rate, "aaf_rate");

        let (format, sample_size, bit_depth) = match (info.audio_type, info.bit_depth) {
            (AudioType::Float, 32) => (SampleFormat::Float32, 4, 32),
            (AudioType::Int, 32) => (SampleFormat::Int32, 4, 32),
            (AudioType::Int, 24) => (SampleFormat::Int24, 3, 24),
            (AudioType::Int, 16) => (SampleFormat::Int16, 2, 16),
            (audio_type, bit_depth) => {
                error!(?audio_type, bit_depth, "Invalid audio bit-depth configured");
                return Err(ConfigError::InvalidBitDepth {
                    audio_type: match audio_type {
                        AudioType::Int => "int",
                        AudioType::Float => "float",
                    },
                    bit_depth,
                });
            }
        };
        self.aaf_bit_depth = bit_depth;
        info.item_sample_size = sample_size;
        info.packet_sample_size = sample_size;
        info!(format = ?format, bit_depth, "aaf_format");

        if self.config.tx_interval == 0 {
            error!("Transmit interval not configured");
            return Err(ConfigError::InvalidTxInterval);
        }
        let mut frames_per_packet = (info.sample_rate / self.config.tx_interval) as usize;
        if info.sample_rate % self.config.tx_interval != 0 {
            warn!(
                rate = info.sample_rate,
                tx_interval = self.config.tx_interval,
                "Audio rate is not an integer multiple of the TX interval"
            );
            frames_per_packet += 1;
        }
        info.frames_per_packet = frames_per_packet;

        info.packet_frame_size = info.packet_sample_size * usize::from(info.channels);
        self.payload_size = frames_per_packet * info.packet_frame_size;
        self.payload_size_max_talker = self.payload_size;
        self.payload_size_max_listener = self.payload_size;
        if format.is_linear() {
            // The largest integer payload a remote talker could send us.
            self.payload_size_max_listener = 4 * usize::from(info.channels) * frames_per_packet;
        }

        info.packing_factor = self.config.packing_factor;
        info.frames_per_item = frames_per_packet * self.config.packing_factor as usize;
        info.item_frame_size = info.item_sample_size * usize::from(info.channels);
        info.item_size = info.item_frame_size * info.frames_per_item;
        info!(
            payload_size = self.payload_size,
            item_size = info.item_size,
            frames_per_packet,
            packing_factor = info.packing_factor,
            "packet and item sizes"
        );

        // Temporal redundancy adjustments. The delay-line stride matches the
        // largest payload a listener accepts; the listener maximum doubles
        // unconditionally in case the remote talker sends redundantly.
        self.tr_frame_size = self.payload_size_max_listener;
        self.payload_size_max_listener *= 2;
        self.sparse_mode = self.config.sparse_mode;
        self.tr_offset_usec = self.config.temporal_redundant_offset_usec;
        if self.tr_offset_usec > 0 {
            self.payload_size_max_talker *= 2;
            self.tr_offset_packets = self.tr_offset_samples / frames_per_packet as u32;
            info!(
                offset_usec = self.tr_offset_usec,
                offset_samples = self.tr_offset_samples,
                offset_packets = self.tr_offset_packets,
                "temporal redundancy offset"
            );
        }

        self.aaf_format = format;
        Ok(())
    }
}

impl MapModule for AafMap {
    fn config_value(&mut self, name: &str, value: &str) {
        self.config.apply(name, value);
    }

    fn subtype(&self) -> u8 {
        packet::SUBTYPE_AAF
    }

    fn avtp_version(&self) -> u8 {
        packet::AVTP_VERSION
    }

    fn max_data_size(&self) -> usize {
        // Until the role is known, report the larger listener maximum.
        if self.is_talker {
            self.payload_size_max_talker + packet::HEADER_LEN
        } else {
            self.payload_size_max_listener + packet::HEADER_LEN
        }
    }

    fn transmit_interval(&self) -> u32 {
        self.config.tx_interval
    }

    fn gen_init(&mut self, queue: &mut MediaQueue) -> Result<(), ConfigError> {
        queue.set_max_latency(self.config.max_transit_usec);
        self.calculate_sizes(&mut queue.info)?;
        queue.set_size(self.config.item_count as usize, queue.info.item_size);

        if self.tr_offset_usec > 0 && self.tr_offset_samples > 0 {
            if self.tr_offset_samples as usize % queue.info.frames_per_packet != 0 {
                error!(
                    "Temporal redundancy not supported when redundant data would be split between two packets"
                );
                return Err(ConfigError::UnalignedRedundancyOffset {
                    offset_samples: self.tr_offset_samples,
                    frames_per_packet: queue.info.frames_per_packet as u32,
                });
            }
            self.redundancy = Some(RedundancyEngine::new(
                self.tr_frame_size,
                self.tr_offset_packets as usize,
            ));
        }

        self.data_valid = true;
        Ok(())
    }

    fn tx_init(&mut self) {
        self.is_talker = true;
    }

    fn tx(&mut self, queue: &mut MediaQueue, frame: &mut [u8]) -> TxOutcome {
        self.transmit(queue, frame)
    }

    fn rx_init(&mut self) {
        self.is_talker = false;

        if self.config.audio_mcr.is_enabled() {
            if let Some(mcr) = self.mcr.as_mut() {
                mcr.init(
                    self.config.audio_mcr,
                    self.config.tx_interval,
                    self.config.packing_factor,
                    self.config.mcr_timestamp_interval,
                    self.config.mcr_recovery_interval,
                );
            }
        }

        if self.sparse_mode == SparseMode::Enabled
            && !packing_factor_valid_for_sparse(self.config.packing_factor)
        {
            warn!(
                packing_factor = self.config.packing_factor,
                "Wrong packing factor value set for sparse timestamping mode"
            );
        }

        if self.tr_offset_usec > 0 {
            if let Some(engine) = self.redundancy.as_mut() {
                engine.arm_listener();
            }
        }
    }

    fn rx(&mut self, queue: &mut MediaQueue, frame: &[u8]) -> bool {
        self.receive(queue, frame)
    }

    fn rx_lost(&mut self, queue: &mut MediaQueue, num_lost: u16) -> bool {
        self.receive_lost(queue, num_lost)
    }

    fn end(&mut self) {
        if self.config.audio_mcr.is_enabled() {
            if let Some(mcr) = self.mcr.as_mut() {
                mcr.close();
            }
        }
        self.media_q_item_sync_ts = false;
    }

    fn gen_end(&mut self) {
        self.redundancy = None;
    }
}

#[cfg(test)]
pub(crate) mod testsupport {
    use super::*;
    use crate::time::AvtpTime;

    /// 48 kHz, 16-bit integer, stereo: frames_per_packet 12, 4-byte frames,
    /// 48-byte packet payloads at the default 4000 packets/s.
    pub(crate) fn stream_info() -> StreamInfo {
        StreamInfo::new(48_000, AudioType::Int, 16, 2)
    }

    pub(crate) fn init_map(pairs: &[(&str, &str)]) -> (AafMap, MediaQueue) {
        let mut map = AafMap::new(2_000);
        for (name, value) in pairs {
            map.config_value(name, value);
        }
        let mut queue = MediaQueue::new(stream_info());
        map.gen_init(&mut queue).unwrap();
        (map, queue)
    }

    /// Fill and publish one media queue item with a recognizable byte
    pub(crate) fn fill_item(queue: &mut MediaQueue, fill: u8, time_ns: u64) {
        let item = queue.head_lock().unwrap();
        let size = item.item_size();
        item.data_mut().fill(fill);
        item.data_len = size;
        item.avtp_time = AvtpTime::from_nanoseconds(time_ns);
        queue.head_push();
    }
}

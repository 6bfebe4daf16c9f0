//! Temporal redundancy
//!
//! With temporal redundancy (IEEE 1722-2016 Clause 7.5) every sample is
//! transmitted twice: once immediately as the frame's redundant payload and
//! once `offset_packets` packets later as a primary payload. A listener can
//! then ride out up to the configured Max Allowed Dropout Time of
//! consecutive loss by replaying the saved redundant copies.
//!
//! The delay line is a byte ring holding `offset_packets` fixed-stride
//! blocks. On the listener side a parallel one-byte-per-block ring tracks
//! the sample format each saved block arrived in (`Unspec` marks a block
//! synthesized for a gap), keeping a strict 1:1 correspondence with the
//! data ring.

use tracing::{debug, info};

use crate::constants::NANOSECONDS_PER_SECOND;
use crate::convert;
use crate::packet::SampleFormat;
use crate::queue::ByteRing;

/// Listener-side loss and recovery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedundancyStats {
    /// Frames accounted for, received or lost
    pub total_frames: u32,
    /// Frames reported lost by the lower layer
    pub lost_frames: u32,
    /// Lost frames repaired from a saved redundant copy
    pub needed_available: u32,
    /// Lost frames with no saved copy (substituted with silence)
    pub needed_not_available: u32,
}

/// Listener-only state: format tracking, statistics, conversion scratch
#[derive(Debug)]
struct ListenerState {
    entry_types: ByteRing,
    stats: RedundancyStats,
    scratch: Vec<u8>,
    next_report_ns: u64,
}

/// Delay line realizing the temporal redundancy send and recovery paths
#[derive(Debug)]
pub struct RedundancyEngine {
    data: ByteRing,
    /// Stride of one delay-line block in bytes
    frame_size: usize,
    offset_packets: usize,
    listener: Option<ListenerState>,
}

impl RedundancyEngine {
    /// Create the delay line, prefilled with `offset_packets` blocks of
    /// silence for the initial packets
    pub fn new(frame_size: usize, offset_packets: usize) -> Self {
        let mut data = ByteRing::new(frame_size * (offset_packets + 2));
        data.push_zeros(frame_size * offset_packets);
        Self {
            data,
            frame_size,
            offset_packets,
            listener: None,
        }
    }

    /// Prepare the listener side: format tracking ring (prefilled with
    /// `Unspec` entries matching the silence blocks), statistics, and the
    /// per-stream conversion scratch buffer
    pub fn arm_listener(&mut self) {
        let mut entry_types = ByteRing::new(self.offset_packets + 10);
        entry_types.push_zeros(self.offset_packets);
        self.listener = Some(ListenerState {
            entry_types,
            stats: RedundancyStats::default(),
            scratch: vec![0u8; self.frame_size],
            next_report_ns: 0,
        });
    }

    pub fn offset_packets(&self) -> usize {
        self.offset_packets
    }

    /// Bytes currently queued in the data delay line
    pub fn data_queued(&self) -> usize {
        self.data.len()
    }

    pub fn stats(&self) -> RedundancyStats {
        self.listener.as_ref().map(|l| l.stats).unwrap_or_default()
    }

    /// Talker path for one outgoing frame.
    ///
    /// `payload_region` is the frame's audio region of `2 * payload_size`
    /// bytes with the freshly dequeued audio already written into the second
    /// (redundant) half. The fresh audio enters the delay line and the block
    /// delayed by `offset_packets` comes out as the primary half.
    pub fn talker_reorder(&mut self, payload_region: &mut [u8], payload_size: usize) {
        debug_assert_eq!(payload_region.len(), 2 * payload_size);

        let (primary, redundant) = payload_region.split_at_mut(payload_size);
        self.data.push(redundant);
        if payload_size < self.frame_size {
            self.data.push_zeros(self.frame_size - payload_size);
        }
        self.data.pull(primary);
        if payload_size < self.frame_size {
            self.data.discard(self.frame_size - payload_size);
        }
    }

    /// Save the redundant payload of a received frame, pre-conversion,
    /// together with the format it arrived in
    pub fn save_received(&mut self, redundant: &[u8], format: SampleFormat) {
        let Some(listener) = self.listener.as_mut() else {
            return;
        };
        listener.entry_types.push(&[format as u8]);
        self.data.push(redundant);
        if redundant.len() < self.frame_size {
            self.data.push_zeros(self.frame_size - redundant.len());
        }
    }

    /// Drop the saved block that is no longer needed because its packet
    /// arrived. At debug level, cross-checks it against the arrived primary.
    pub fn release_oldest(&mut self, primary: &[u8]) {
        let Some(listener) = self.listener.as_mut() else {
            return;
        };

        let mut stored = [0u8; 1];
        listener.entry_types.pull(&mut stored);
        if tracing::enabled!(tracing::Level::DEBUG)
            && stored[0] != SampleFormat::Unspec as u8
            && !self.data.matches(primary)
        {
            debug!("Redundant data does not match primary data");
        }
        self.data.discard(self.frame_size);

        listener.stats.total_frames += 1;
    }

    /// Recover the payload of one lost packet into `dst` (`payload_size`
    /// bytes of the configured format).
    ///
    /// Returns whether a saved redundant copy was available; otherwise
    /// `dst` is filled with silence. Either way a synthesized block enters
    /// the delay line so it keeps its depth.
    pub fn recover_into(
        &mut self,
        configured: SampleFormat,
        channels: usize,
        frames_per_packet: usize,
        dst: &mut [u8],
    ) -> bool {
        let payload_size = dst.len();
        let Some(listener) = self.listener.as_mut() else {
            return false;
        };

        listener.stats.total_frames += 1;
        listener.stats.lost_frames += 1;

        let mut stored = [0u8; 1];
        listener.entry_types.pull(&mut stored);
        let stored_format = SampleFormat::from_wire(stored[0]);

        let available = if stored_format == SampleFormat::Unspec {
            listener.stats.needed_not_available += 1;
            self.data.pull(dst);
            if payload_size < self.frame_size {
                self.data.discard(self.frame_size - payload_size);
            }
            false
        } else {
            listener.stats.needed_available += 1;
            match (stored_format.int_sample_width(), configured.int_sample_width()) {
                (Some(in_width), Some(out_width)) if stored_format != configured => {
                    let in_len = in_width * channels * frames_per_packet;
                    self.data.pull(&mut listener.scratch[..self.frame_size]);
                    convert::convert_width(&listener.scratch[..in_len], in_width, dst, out_width);
                }
                _ => {
                    self.data.pull(dst);
                    if payload_size < self.frame_size {
                        self.data.discard(self.frame_size - payload_size);
                    }
                }
            }
            true
        };

        // Keep the delay line's depth with a synthesized gap block.
        listener.entry_types.push(&[SampleFormat::Unspec as u8]);
        self.data.push_zeros(self.frame_size);

        available
    }

    /// Emit and reset the statistics once per reporting period. Overshot
    /// deadlines (long stalls) re-base on the current time.
    pub fn maybe_report(&mut self, report_seconds: u32, now_ns: u64) {
        if report_seconds == 0 {
            return;
        }
        let data_queued = self.data.len();
        let Some(listener) = self.listener.as_mut() else {
            return;
        };
        if now_ns <= listener.next_report_ns {
            return;
        }

        let stats = listener.stats;
        info!(
            total_frames = stats.total_frames,
            lost_frames = stats.lost_frames,
            needed_available = stats.needed_available,
            needed_not_available = stats.needed_not_available,
            "Temporal redundancy statistics"
        );
        debug!(
            data_queue_bytes = data_queued,
            tracking_queue_entries = listener.entry_types.len(),
            "Temporal redundancy queue depths"
        );
        listener.stats = RedundancyStats::default();

        listener.next_report_ns += u64::from(report_seconds) * NANOSECONDS_PER_SECOND;
        if now_ns > listener.next_report_ns {
            listener.next_report_ns = now_ns + u64::from(report_seconds) * NANOSECONDS_PER_SECOND;
        }
    }

    #[cfg(test)]
    fn next_report_ns(&self) -> u64 {
        self.listener.as_ref().map(|l| l.next_report_ns).unwrap_or(0)
    }
}

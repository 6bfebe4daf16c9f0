//! Talker path: one AVTP packet per observation interval

use tracing::{debug, error};

use crate::config::SparseMode;
use crate::mediaq::MediaQueue;
use crate::packet::{AafHeader, SampleFormat, HEADER_LEN, SEQ_OFFSET};

use super::{AafMap, TxOutcome};

impl AafMap {
    /// Drain one packet's worth of audio from the media queue into `frame`,
    /// filling the AAF header around it. The lower layer has already written
    /// the common-header subtype, stream ID, and sequence number.
    pub(crate) fn transmit(&mut self, queue: &mut MediaQueue, frame: &mut [u8]) -> TxOutcome {
        if self.aaf_format == SampleFormat::Unspec {
            return TxOutcome::NotReady;
        }

        let info = queue.info;
        let bytes_needed = info.item_frame_size * info.frames_per_packet;
        if !queue.is_available_bytes(bytes_needed) {
            debug!("Not enough bytes are ready");
            return TxOutcome::NotReady;
        }

        if frame.len() < HEADER_LEN + self.payload_size {
            error!("Not enough room in packet for payload");
            return TxOutcome::NotReady;
        }
        if self.tr_offset_usec > 0 {
            if frame.len() < HEADER_LEN + self.payload_size * 2 {
                error!("Not enough room in packet for temporal offset payload");
                return TxOutcome::NotReady;
            }
            if self.redundancy.is_none() {
                error!("No queue for temporal offset payload");
                return TxOutcome::NotReady;
            }
        }

        // Under temporal redundancy the fresh audio lands in the redundant
        // slot; the delay line fills the primary slot afterwards.
        let payload_offset = if self.tr_offset_usec > 0 {
            HEADER_LEN + bytes_needed
        } else {
            HEADER_LEN
        };

        let sequence = frame[SEQ_OFFSET];
        let mut bytes_processed = 0;
        while bytes_processed < bytes_needed {
            let Some(item) = queue.tail_lock() else {
                return TxOutcome::NotReady;
            };
            if item.data_len == 0 {
                queue.tail_pull();
                continue;
            }

            // The interface module stamped the item; decide what the packet
            // carries. In sparse mode only every eighth sequence number gets
            // a timestamp.
            let sparse = self.sparse_mode == SparseMode::Enabled;
            let (timestamp_valid, timestamp_uncertain, timestamp) = if sparse && sequence & 0x07 != 0
            {
                (false, false, 0)
            } else if !item.avtp_time.is_valid() {
                error!("Unable to get the timestamp value");
                (false, false, 0)
            } else {
                item.avtp_time.add_usec(self.config.max_transit_usec);
                if self.tr_offset_usec > 0 {
                    // Delay presentation so the primary copy still plays on
                    // time after riding the delay line.
                    item.avtp_time.add_usec(self.tr_offset_usec);
                }
                let timestamp = item.avtp_time.avtp_timestamp();
                let uncertain = item.avtp_time.is_uncertain();
                item.avtp_time.set_valid(false);
                (true, uncertain, timestamp)
            };

            AafHeader {
                sequence,
                timestamp_valid,
                timestamp_uncertain,
                sparse,
                timestamp,
                format: self.aaf_format,
                rate: self.aaf_rate,
                channels: info.channels,
                bit_depth: self.aaf_bit_depth,
                payload_len: self.payload_size as u16,
                event: self.event_field,
            }
            .write_to(frame);

            if item.data_len - item.read_idx < self.payload_size {
                // This should not happen so we just toss the item away.
                error!("Not enough data in media queue item for packet");
                queue.tail_pull();
                return TxOutcome::NotReady;
            }

            let dst = payload_offset + bytes_processed;
            frame[dst..dst + self.payload_size]
                .copy_from_slice(&item.data()[item.read_idx..item.read_idx + self.payload_size]);
            item.read_idx += self.payload_size;
            bytes_processed += self.payload_size;

            if item.read_idx >= item.data_len {
                queue.tail_pull();
            } else {
                queue.tail_unlock();
            }
        }

        let mut total = HEADER_LEN + bytes_needed;
        if self.tr_offset_usec > 0 {
            if let Some(engine) = self.redundancy.as_mut() {
                engine.talker_reorder(
                    &mut frame[HEADER_LEN..HEADER_LEN + 2 * bytes_needed],
                    bytes_needed,
                );
            }
            total += bytes_needed;
        }

        TxOutcome::Ready(total)
    }
}

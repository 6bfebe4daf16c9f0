//! Listener path: frame validation, delivery, and loss recovery

use tracing::{error, info, warn};

use crate::config::SparseMode;
use crate::constants::RX_LOG_INTERVAL;
use crate::convert;
use crate::mediaq::MediaQueue;
use crate::packet::{AafHeader, SampleFormat, HEADER_LEN};

use super::AafMap;

impl AafMap {
    /// Validate a received frame against the configured stream and deliver
    /// its payload into the media queue. Returns `false` when the frame was
    /// not delivered (invalid stream data or no queue slot).
    pub(crate) fn receive(&mut self, queue: &mut MediaQueue, frame: &[u8]) -> bool {
        if self.aaf_format == SampleFormat::Unspec {
            return false;
        }

        let info = queue.info;
        let hdr = match AafHeader::parse(frame) {
            Ok(hdr) => hdr,
            Err(err) => {
                if self.data_valid {
                    error!(%err, "Dropping malformed frame");
                }
                return self.mute();
            }
        };

        let mut frame_valid = true;
        let payload_len = usize::from(hdr.payload_len);

        if payload_len > frame.len() - HEADER_LEN {
            if self.data_valid {
                error!(
                    advertised = payload_len,
                    actual = frame.len() - HEADER_LEN,
                    "Header data length exceeds the received data"
                );
            }
            frame_valid = false;
        }

        // A differing integer format can be width-converted; anything else
        // mismatched is invalid stream data.
        let mut conversion: Option<(usize, usize)> = None;
        if hdr.format != self.aaf_format {
            match (
                hdr.format.int_sample_width(),
                self.aaf_format.int_sample_width(),
            ) {
                (Some(in_width), Some(out_width)) => conversion = Some((in_width, out_width)),
                _ => {
                    if self.data_valid {
                        error!(
                            configured = ?self.aaf_format,
                            received = ?hdr.format,
                            "Listener format doesn't match received data"
                        );
                    }
                    frame_valid = false;
                }
            }
        }
        if hdr.rate != self.aaf_rate {
            if self.data_valid {
                error!(
                    configured = ?self.aaf_rate,
                    received = ?hdr.rate,
                    "Listener sample rate doesn't match received data"
                );
            }
            frame_valid = false;
        }
        if hdr.channels != info.channels {
            if self.data_valid {
                error!(
                    configured = info.channels,
                    received = hdr.channels,
                    "Listener channel count doesn't match received data"
                );
            }
            frame_valid = false;
        }
        if hdr.bit_depth == 0 {
            if self.data_valid {
                error!("Listener bit depth not valid");
            }
            frame_valid = false;
        }
        match conversion {
            Some((in_width, out_width)) => {
                // Conversion only works on equal sample counts.
                if payload_len / in_width != self.payload_size / out_width {
                    if self.data_valid {
                        error!(
                            configured = self.payload_size / out_width,
                            received = payload_len / in_width,
                            "Listener payload samples don't match received data samples"
                        );
                    }
                    frame_valid = false;
                }
            }
            None => {
                if payload_len != self.payload_size {
                    if self.data_valid {
                        error!(
                            configured = self.payload_size,
                            received = payload_len,
                            "Listener payload size doesn't match received data"
                        );
                    }
                    frame_valid = false;
                }
            }
        }
        if hdr.event != self.event_field && self.data_valid {
            error!(
                configured = self.event_field,
                received = hdr.event,
                "Listener event field doesn't match received data"
            );
        }

        // Follow the remote's sparse timestamping in either direction.
        if hdr.sparse && self.sparse_mode == SparseMode::Disabled {
            info!("Listener enabling sparse mode to match incoming stream");
            self.sparse_mode = SparseMode::Enabled;
        } else if !hdr.sparse && self.sparse_mode == SparseMode::Enabled {
            info!("Listener disabling sparse mode to match incoming stream");
            self.sparse_mode = SparseMode::Disabled;
        }

        if self.tr_offset_usec > 0 && frame.len() < HEADER_LEN + 2 * payload_len {
            warn!("Listener disabling temporal redundancy due to lack of data");
            self.tr_offset_usec = 0;
        }

        if !frame_valid {
            return self.mute();
        }
        if !self.data_valid {
            info!("RX data valid, stream un-muted");
            self.data_valid = true;
        }

        let now_ns = self.now_ns();
        let Some(item) = queue.head_lock() else {
            let events = self.queue_full_events;
            self.queue_full_events += 1;
            if events % RX_LOG_INTERVAL == 0 {
                error!("Media queue full");
            }
            return false;
        };

        // The first bytes written to an item decide its presentation time.
        // Until the first timestamped packet is seen the queue is not
        // synchronized and un-timestamped items are dropped.
        let mut deliver = true;
        if item.data_len == 0 {
            item.avtp_time.set_valid(hdr.timestamp_valid);
            if hdr.timestamp_valid {
                item.avtp_time.set_to_timestamp(hdr.timestamp);
                item.avtp_time.sub_usec(info.presentation_latency_usec);
                item.avtp_time.set_uncertain(hdr.timestamp_uncertain);
                self.media_q_item_sync_ts = true;
            } else if !self.media_q_item_sync_ts {
                let events = self.sync_drop_events;
                self.sync_drop_events += 1;
                if events % RX_LOG_INTERVAL == 0 {
                    error!("Timestamp not valid for media queue item, initial packets dropped");
                }
                deliver = false;
            }
        }

        if deliver {
            let start = item.data_len;
            let dst = &mut item.data_mut()[start..start + self.payload_size];
            match conversion {
                Some((in_width, out_width)) => {
                    let src = &frame[HEADER_LEN..HEADER_LEN + payload_len];
                    convert::convert_width(src, in_width, dst, out_width);
                }
                None => {
                    dst.copy_from_slice(&frame[HEADER_LEN..HEADER_LEN + self.payload_size]);
                }
            }
            if let Some(translate) = info.rx_translate {
                translate(dst);
            }
            item.data_len += self.payload_size;
        }

        if item.data_len < item.item_size() {
            queue.head_unlock();
        } else {
            queue.head_push();
        }

        if self.tr_offset_usec > 0 {
            if let Some(engine) = self.redundancy.as_mut() {
                // Save the pre-conversion redundant copy with its format,
                // then retire the copy this packet made unnecessary.
                engine.save_received(
                    &frame[HEADER_LEN + payload_len..HEADER_LEN + 2 * payload_len],
                    hdr.format,
                );
                engine.release_oldest(&frame[HEADER_LEN..HEADER_LEN + payload_len]);
                engine.maybe_report(self.config.report_seconds, now_ns);
            }
        }

        true
    }

    /// Repair `num_lost` missing packets from the temporal redundancy delay
    /// line, substituting silence where no copy was saved. Recovered items
    /// carry no presentation timestamp.
    pub(crate) fn receive_lost(&mut self, queue: &mut MediaQueue, num_lost: u16) -> bool {
        if self.tr_offset_usec == 0 || !self.data_valid {
            return false;
        }

        let info = queue.info;
        for _ in 0..num_lost {
            let Some(item) = queue.head_lock() else {
                continue;
            };
            let Some(engine) = self.redundancy.as_mut() else {
                break;
            };

            item.avtp_time.set_valid(false);

            let start = item.data_len;
            let dst = &mut item.data_mut()[start..start + self.payload_size];
            engine.recover_into(
                self.aaf_format,
                usize::from(info.channels),
                info.frames_per_packet,
                dst,
            );
            if let Some(translate) = info.rx_translate {
                translate(dst);
            }
            item.data_len += self.payload_size;

            if item.data_len < item.item_size() {
                queue.head_unlock();
            } else {
                queue.head_push();
            }
        }

        false
    }

    fn mute(&mut self) -> bool {
        if self.data_valid {
            info!("RX data invalid, stream muted");
            self.data_valid = false;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::super::testsupport::*;
    use super::*;
    use crate::map::{MapModule, TxOutcome};
    use crate::packet::{NominalRate, SEQ_OFFSET};
    use crate::redundancy::RedundancyStats;

    const PAYLOAD: usize = 48;

    struct FrameSpec {
        timestamp: u32,
        timestamp_valid: bool,
        sparse: bool,
        format: SampleFormat,
        bit_depth: u8,
        payload: Vec<u8>,
    }

    impl Default for FrameSpec {
        fn default() -> Self {
            Self {
                timestamp: 0x1000_0000,
                timestamp_valid: true,
                sparse: false,
                format: SampleFormat::Int16,
                bit_depth: 16,
                payload: vec![0x5A; PAYLOAD],
            }
        }
    }

    fn build_frame(spec: &FrameSpec) -> Vec<u8> {
        let mut frame = vec![0u8; HEADER_LEN + spec.payload.len()];
        AafHeader {
            sequence: 0,
            timestamp_valid: spec.timestamp_valid,
            timestamp_uncertain: false,
            sparse: spec.sparse,
            timestamp: spec.timestamp,
            format: spec.format,
            rate: NominalRate::R48k,
            channels: 2,
            bit_depth: spec.bit_depth,
            payload_len: spec.payload.len() as u16,
            event: 0,
        }
        .write_to(&mut frame);
        frame[HEADER_LEN..].copy_from_slice(&spec.payload);
        frame
    }

    fn listener(pairs: &[(&str, &str)]) -> (AafMap, MediaQueue) {
        let (mut map, queue) = init_map(pairs);
        map.rx_init();
        (map, queue)
    }

    #[test]
    fn test_rx_delivers_payload_and_timestamp() {
        let (mut map, mut queue) = listener(&[]);
        queue.info.presentation_latency_usec = 100;

        let frame = build_frame(&FrameSpec::default());
        assert!(map.rx(&mut queue, &frame));

        // packing factor 1: one packet fills an item
        let item = queue.tail_lock().expect("item pushed");
        assert_eq!(item.data(), &[0x5A; PAYLOAD]);
        assert!(item.avtp_time.is_valid());
        assert_eq!(item.avtp_time.avtp_timestamp(), 0x1000_0000 - 100_000);
    }

    #[test]
    fn test_rx_applies_translate_callback() {
        fn invert(payload: &mut [u8]) {
            for byte in payload {
                *byte = !*byte;
            }
        }

        let (mut map, mut queue) = listener(&[]);
        queue.info.rx_translate = Some(invert);

        let frame = build_frame(&FrameSpec::default());
        assert!(map.rx(&mut queue, &frame));
        let item = queue.tail_lock().unwrap();
        assert_eq!(item.data(), &[!0x5Au8; PAYLOAD]);
    }

    #[test]
    fn test_rx_mutes_on_rate_mismatch_and_recovers() {
        let (mut map, mut queue) = listener(&[]);

        let mut bad = build_frame(&FrameSpec::default());
        // Corrupt the rate nibble (8 kHz instead of 48 kHz).
        bad[17] = (bad[17] & 0x0F) | 0x10;
        assert!(!map.rx(&mut queue, &bad));
        assert!(!map.data_valid);

        // Repeated bad frames stay muted; a good frame un-mutes.
        assert!(!map.rx(&mut queue, &bad));
        let good = build_frame(&FrameSpec::default());
        assert!(map.rx(&mut queue, &good));
        assert!(map.data_valid);
    }

    #[test]
    fn test_rx_rejects_oversized_advertised_length() {
        let (mut map, mut queue) = listener(&[]);
        let mut frame = build_frame(&FrameSpec::default());
        // Advertise more payload than the frame carries.
        frame[20] = 0x01;
        assert!(!map.rx(&mut queue, &frame));
    }

    #[test]
    fn test_rx_widens_narrow_stream() {
        // Remote talker sends Int16; we are configured for Int24.
        let mut map = AafMap::new(2_000);
        let mut queue = MediaQueue::new(crate::mediaq::StreamInfo::new(
            48_000,
            crate::mediaq::AudioType::Int,
            24,
            2,
        ));
        map.gen_init(&mut queue).unwrap();
        map.rx_init();

        let samples = 24; // 12 frames * 2 channels
        let payload: Vec<u8> = (0..samples)
            .flat_map(|s| [s as u8, 0x80 | s as u8])
            .collect();
        let frame = build_frame(&FrameSpec {
            payload,
            ..FrameSpec::default()
        });
        assert!(map.rx(&mut queue, &frame));

        let item = queue.tail_lock().unwrap();
        assert_eq!(item.data_len, samples * 3);
        assert_eq!(&item.data()[..6], &[0x00, 0x80, 0x00, 0x01, 0x81, 0x00]);
    }

    #[test]
    fn test_rx_sample_count_mismatch_is_invalid() {
        // Int16 frame whose sample count disagrees with ours.
        let mut map = AafMap::new(2_000);
        let mut queue = MediaQueue::new(crate::mediaq::StreamInfo::new(
            48_000,
            crate::mediaq::AudioType::Int,
            24,
            2,
        ));
        map.gen_init(&mut queue).unwrap();
        map.rx_init();

        let frame = build_frame(&FrameSpec {
            payload: vec![0; 40],
            ..FrameSpec::default()
        });
        assert!(!map.rx(&mut queue, &frame));
        assert!(!map.data_valid);
    }

    #[test]
    fn test_rx_drops_unsynced_items_until_first_timestamp() {
        let (mut map, mut queue) = listener(&[]);

        let untimed = build_frame(&FrameSpec {
            timestamp_valid: false,
            ..FrameSpec::default()
        });
        // Stream data is fine, so the frame is accepted, but nothing is
        // delivered before the first timestamped packet.
        assert!(map.rx(&mut queue, &untimed));
        assert!(queue.tail_lock().is_none());

        let timed = build_frame(&FrameSpec::default());
        assert!(map.rx(&mut queue, &timed));
        assert!(queue.tail_lock().is_some());

        // Once synchronized, un-timestamped packets flow.
        queue.tail_pull();
        assert!(map.rx(&mut queue, &untimed));
        assert!(queue.tail_lock().is_some());
    }

    #[test]
    fn test_rx_follows_remote_sparse_mode() {
        let (mut map, mut queue) = listener(&[]);
        assert_eq!(map.sparse_mode, SparseMode::Disabled);

        let sparse = build_frame(&FrameSpec {
            sparse: true,
            ..FrameSpec::default()
        });
        assert!(map.rx(&mut queue, &sparse));
        assert_eq!(map.sparse_mode, SparseMode::Enabled);

        let plain = build_frame(&FrameSpec::default());
        assert!(map.rx(&mut queue, &plain));
        assert_eq!(map.sparse_mode, SparseMode::Disabled);
    }

    #[test]
    fn test_rx_disables_redundancy_on_single_copy_frames() {
        let (mut map, mut queue) = listener(&[("map_nv_temporal_redundant_offset", "500")]);
        assert_eq!(map.tr_offset_usec, 500);

        // Frame carries only one payload copy: MADT cannot work.
        let frame = build_frame(&FrameSpec::default());
        assert!(map.rx(&mut queue, &frame));
        assert_eq!(map.tr_offset_usec, 0);
        assert_eq!(map.redundancy_stats(), RedundancyStats::default());
    }

    #[test]
    fn test_rx_queue_full_drops_frame() {
        let (mut map, mut queue) = listener(&[("map_nv_item_count", "2")]);
        let frame = build_frame(&FrameSpec::default());
        assert!(map.rx(&mut queue, &frame));
        assert!(map.rx(&mut queue, &frame));
        // Both items are pushed and unread: the queue is full.
        assert!(!map.rx(&mut queue, &frame));
        assert!(map.data_valid);
    }

    #[test]
    fn test_rx_lost_without_redundancy_is_noop() {
        let (mut map, mut queue) = listener(&[]);
        assert!(!map.rx_lost(&mut queue, 3));
        assert!(queue.tail_lock().is_none());
    }

    /// End-to-end loss recovery: a talker with a two-packet dropout budget
    /// feeds a listener that loses one frame in the middle.
    #[test]
    fn test_loss_recovery_matches_lossless_reference() {
        let madt = &[("map_nv_temporal_redundant_offset", "500")];
        let (mut talker, mut tx_queue) = init_map(madt);
        talker.tx_init();
        let (mut listener, mut rx_queue) = listener(madt);

        let fills = [0xA1u8, 0xB2, 0xC3, 0xD4];
        let mut frames = Vec::new();
        for (k, fill) in fills.iter().enumerate() {
            fill_item(&mut tx_queue, *fill, 1_000 * (k as u64 + 1));
            let mut frame = vec![0u8; HEADER_LEN + 2 * PAYLOAD];
            frame[SEQ_OFFSET] = k as u8;
            let TxOutcome::Ready(len) = talker.tx(&mut tx_queue, &mut frame) else {
                panic!("talker not ready");
            };
            frame.truncate(len);
            frames.push(frame);
        }

        // Frames 0, 1 arrive; frame 2 is lost; frame 3 arrives.
        assert!(listener.rx(&mut rx_queue, &frames[0]));
        assert!(listener.rx(&mut rx_queue, &frames[1]));
        assert!(!listener.rx_lost(&mut rx_queue, 1));
        assert!(listener.rx(&mut rx_queue, &frames[3]));

        // Lossless reference: the stream is delayed by the two-packet
        // offset, so the delivered items are silence, silence, P0, P1.
        let expected: [&[u8]; 4] = [
            &[0u8; PAYLOAD],
            &[0u8; PAYLOAD],
            &[fills[0]; PAYLOAD],
            &[fills[1]; PAYLOAD],
        ];
        for (k, want) in expected.iter().enumerate() {
            let item = queue_pop(&mut rx_queue);
            assert_eq!(&item.0[..], *want, "item {k}");
            // The recovered item (from the lost frame) has no timestamp.
            assert_eq!(item.1, k != 2);
        }

        let stats = listener.redundancy_stats();
        assert_eq!(stats.total_frames, 4);
        assert_eq!(stats.lost_frames, 1);
        assert_eq!(stats.needed_available, 1);
        assert_eq!(stats.needed_not_available, 0);
    }

    /// Losing more packets than the dropout budget substitutes silence once
    /// the delay line runs dry.
    #[test]
    fn test_loss_beyond_budget_substitutes_silence() {
        let madt = &[("map_nv_temporal_redundant_offset", "500")];
        let (mut talker, mut tx_queue) = init_map(madt);
        talker.tx_init();
        let (mut listener, mut rx_queue) = listener(madt);

        for k in 0..2u8 {
            fill_item(&mut tx_queue, 0x10 + k, 1_000);
            let mut frame = vec![0u8; HEADER_LEN + 2 * PAYLOAD];
            frame[SEQ_OFFSET] = k;
            let TxOutcome::Ready(_) = talker.tx(&mut tx_queue, &mut frame) else {
                panic!("talker not ready");
            };
            assert!(listener.rx(&mut rx_queue, &frame));
        }

        // Three consecutive losses exceed the two-packet budget.
        assert!(!listener.rx_lost(&mut rx_queue, 3));

        let expected: [&[u8]; 5] = [
            &[0u8; PAYLOAD],
            &[0u8; PAYLOAD],
            &[0x10; PAYLOAD],
            &[0x11; PAYLOAD],
            &[0u8; PAYLOAD],
        ];
        for (k, want) in expected.iter().enumerate() {
            let item = queue_pop(&mut rx_queue);
            assert_eq!(&item.0[..], *want, "item {k}");
        }

        let stats = listener.redundancy_stats();
        assert_eq!(stats.total_frames, 5);
        assert_eq!(stats.lost_frames, 3);
        assert_eq!(stats.needed_available, 2);
        assert_eq!(stats.needed_not_available, 1);
    }

    /// Pop the tail item, returning its bytes and timestamp validity
    fn queue_pop(queue: &mut MediaQueue) -> (Vec<u8>, bool) {
        let item = queue.tail_lock().expect("item available");
        let bytes = item.data()[..item.data_len].to_vec();
        let valid = item.avtp_time.is_valid();
        queue.tail_pull();
        (bytes, valid)
    }
}

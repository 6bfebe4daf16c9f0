//! Media queue contract
//!
//! The media queue is the pipeline-owned FIFO of fixed-size audio items
//! sitting between the platform interface module and this mapping. This is
//! a minimal single-threaded realization of its contract: a writer cursor
//! (head) fills one item at a time, a reader cursor (tail) drains pushed
//! items, and both sides lock, mutate, and release within one callback.

use crate::time::AvtpTime;

/// Translation hook applied to each received payload before delivery
pub type RxTranslate = fn(&mut [u8]);

/// Sample encoding family of the stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioType {
    Int,
    Float,
}

/// Public stream description shared between the interface module and the
/// mapping. The interface module fills the audio parameters before
/// `gen_init`; the mapping fills the derived sizes.
#[derive(Debug, Clone, Copy)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub audio_type: AudioType,
    pub bit_depth: u8,
    pub channels: u16,

    // Derived by the mapping
    pub item_sample_size: usize,
    pub packet_sample_size: usize,
    pub packet_frame_size: usize,
    pub frames_per_packet: usize,
    pub frames_per_item: usize,
    pub item_frame_size: usize,
    pub item_size: usize,
    pub packing_factor: u32,

    /// Latency subtracted from received presentation timestamps
    pub presentation_latency_usec: u32,

    pub rx_translate: Option<RxTranslate>,
}

impl StreamInfo {
    pub fn new(sample_rate: u32, audio_type: AudioType, bit_depth: u8, channels: u16) -> Self {
        Self {
            sample_rate,
            audio_type,
            bit_depth,
            channels,
            item_sample_size: 0,
            packet_sample_size: 0,
            packet_frame_size: 0,
            frames_per_packet: 0,
            frames_per_item: 0,
            item_frame_size: 0,
            item_size: 0,
            packing_factor: 0,
            presentation_latency_usec: 0,
            rx_translate: None,
        }
    }
}

/// One fixed-size audio block within the queue
#[derive(Debug)]
pub struct MediaQueueItem {
    data: Box<[u8]>,
    /// Writer's cursor: bytes of valid audio in `data`
    pub data_len: usize,
    /// Reader's cursor within `data`
    pub read_idx: usize,
    pub avtp_time: AvtpTime,
}

impl MediaQueueItem {
    fn new(item_size: usize) -> Self {
        Self {
            data: vec![0u8; item_size].into_boxed_slice(),
            data_len: 0,
            read_idx: 0,
            avtp_time: AvtpTime::default(),
        }
    }

    pub fn item_size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    fn reset(&mut self) {
        self.data_len = 0;
        self.read_idx = 0;
        self.avtp_time = AvtpTime::default();
    }
}

/// FIFO of fixed-size audio items with head/tail access
#[derive(Debug)]
pub struct MediaQueue {
    pub info: StreamInfo,
    items: Vec<MediaQueueItem>,
    head: usize,
    tail: usize,
    /// Items pushed and not yet pulled (excludes the partially written head)
    count: usize,
    max_latency_usec: u32,
}

impl MediaQueue {
    pub fn new(info: StreamInfo) -> Self {
        Self {
            info,
            items: Vec::new(),
            head: 0,
            tail: 0,
            count: 0,
            max_latency_usec: 0,
        }
    }

    /// Size the queue: `item_count` items of `item_size` bytes each
    pub fn set_size(&mut self, item_count: usize, item_size: usize) {
        self.items = (0..item_count).map(|_| MediaQueueItem::new(item_size)).collect();
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    pub fn set_max_latency(&mut self, usec: u32) {
        self.max_latency_usec = usec;
    }

    pub fn max_latency(&self) -> u32 {
        self.max_latency_usec
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Whether at least `n` unread bytes are queued across pushed items
    pub fn is_available_bytes(&self, n: usize) -> bool {
        let mut available = 0;
        for i in 0..self.count {
            let item = &self.items[(self.tail + i) % self.items.len()];
            available += item.data_len - item.read_idx;
            if available >= n {
                return true;
            }
        }
        available >= n
    }

    /// Lock the head item for writing; `None` when the queue is full
    pub fn head_lock(&mut self) -> Option<&mut MediaQueueItem> {
        if self.items.is_empty() || self.count >= self.items.len() {
            return None;
        }
        Some(&mut self.items[self.head])
    }

    /// Publish the head item and advance the writer
    pub fn head_push(&mut self) {
        self.head = (self.head + 1) % self.items.len();
        self.count += 1;
    }

    /// Release the head item without publishing it
    pub fn head_unlock(&mut self) {}

    /// Lock the tail item for reading; `None` when nothing is queued
    pub fn tail_lock(&mut self) -> Option<&mut MediaQueueItem> {
        if self.count == 0 {
            return None;
        }
        Some(&mut self.items[self.tail])
    }

    /// Consume the tail item and advance the reader
    pub fn tail_pull(&mut self) {
        self.items[self.tail].reset();
        self.tail = (self.tail + 1) % self.items.len();
        self.count -= 1;
    }

    /// Release the tail item with data left for the next interval
    pub fn tail_unlock(&mut self) {}
}

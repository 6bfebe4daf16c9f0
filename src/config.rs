//! Mapping configuration
//!
//! The host feeds the mapping `map_nv_*` name/value pairs from its stream
//! configuration. Values are base-10 integers; a malformed value is silently
//! ignored and the prior value kept.

use crate::constants::{
    DEFAULT_ITEM_COUNT, DEFAULT_MCR_RECOVERY_INTERVAL, DEFAULT_MCR_TIMESTAMP_INTERVAL,
    DEFAULT_PACKING_FACTOR, DEFAULT_TX_INTERVAL,
};
use crate::mcr::McrMode;

/// Timestamp economy mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SparseMode {
    /// A valid timestamp in every packet
    #[default]
    Disabled,
    /// A valid timestamp in every eighth packet
    Enabled,
}

/// Stream configuration, immutable once `gen_init` has run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapConfig {
    /// map_nv_item_count
    pub item_count: u32,

    /// map_nv_tx_rate / map_nv_tx_interval: talker packets per second
    pub tx_interval: u32,

    /// map_nv_packing_factor: packets of audio aggregated per queue item
    pub packing_factor: u32,

    /// map_nv_sparse_mode
    pub sparse_mode: SparseMode,

    /// map_nv_audio_mcr
    pub audio_mcr: McrMode,

    /// map_nv_mcr_timestamp_interval
    pub mcr_timestamp_interval: u32,

    /// map_nv_mcr_recovery_interval
    pub mcr_recovery_interval: u32,

    /// map_nv_temporal_redundant_offset / map_nv_max_allowed_dropout_time:
    /// delay of the redundant copy in microseconds, 0 disables
    pub temporal_redundant_offset_usec: u32,

    /// map_nv_report_seconds: statistics reporting cadence
    pub report_seconds: u32,

    /// Transit budget added to presentation timestamps
    pub max_transit_usec: u32,
}

impl MapConfig {
    pub fn new(max_transit_usec: u32) -> Self {
        Self {
            item_count: DEFAULT_ITEM_COUNT,
            tx_interval: DEFAULT_TX_INTERVAL,
            packing_factor: DEFAULT_PACKING_FACTOR,
            sparse_mode: SparseMode::Disabled,
            audio_mcr: McrMode::DISABLED,
            mcr_timestamp_interval: DEFAULT_MCR_TIMESTAMP_INTERVAL,
            mcr_recovery_interval: DEFAULT_MCR_RECOVERY_INTERVAL,
            temporal_redundant_offset_usec: 0,
            report_seconds: 0,
            max_transit_usec,
        }
    }

    /// Apply one configuration name/value pair
    pub fn apply(&mut self, name: &str, value: &str) {
        match name {
            "map_nv_item_count" => {
                if let Ok(v) = value.parse() {
                    self.item_count = v;
                }
            }
            "map_nv_packing_factor" => {
                if let Ok(v) = value.parse() {
                    self.packing_factor = v;
                }
            }
            "map_nv_tx_rate" | "map_nv_tx_interval" => {
                if let Ok(v) = value.parse() {
                    self.tx_interval = v;
                }
            }
            "map_nv_sparse_mode" => match value.parse::<u32>() {
                Ok(1) => self.sparse_mode = SparseMode::Enabled,
                Ok(0) => self.sparse_mode = SparseMode::Disabled,
                _ => {}
            },
            "map_nv_audio_mcr" => {
                if let Ok(v) = value.parse() {
                    self.audio_mcr = McrMode(v);
                }
            }
            "map_nv_mcr_timestamp_interval" => {
                if let Ok(v) = value.parse() {
                    self.mcr_timestamp_interval = v;
                }
            }
            "map_nv_mcr_recovery_interval" => {
                if let Ok(v) = value.parse() {
                    self.mcr_recovery_interval = v;
                }
            }
            "map_nv_temporal_redundant_offset" | "map_nv_max_allowed_dropout_time" => {
                if let Ok(v) = value.parse() {
                    self.temporal_redundant_offset_usec = v;
                }
            }
            "map_nv_report_seconds" => {
                if let Ok(v) = value.parse() {
                    self.report_seconds = v;
                }
            }
            _ => {}
        }
    }
}

/// Packing factors a sparse-mode listener can work with: powers of two below
/// eight, or any positive multiple of eight.
pub fn packing_factor_valid_for_sparse(packing_factor: u32) -> bool {
    if packing_factor == 0 {
        false
    } else if packing_factor < 8 {
        packing_factor.is_power_of_two()
    } else {
        packing_factor % 8 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = MapConfig::new(2000);
        assert_eq!(cfg.item_count, 20);
        assert_eq!(cfg.tx_interval, 4000);
        assert_eq!(cfg.packing_factor, 1);
        assert_eq!(cfg.sparse_mode, SparseMode::Disabled);
        assert_eq!(cfg.mcr_timestamp_interval, 144);
        assert_eq!(cfg.mcr_recovery_interval, 512);
        assert_eq!(cfg.temporal_redundant_offset_usec, 0);
        assert_eq!(cfg.max_transit_usec, 2000);
    }

    #[test]
    fn test_apply_known_keys() {
        let mut cfg = MapConfig::new(0);
        cfg.apply("map_nv_item_count", "8");
        cfg.apply("map_nv_tx_rate", "8000");
        cfg.apply("map_nv_packing_factor", "16");
        cfg.apply("map_nv_sparse_mode", "1");
        cfg.apply("map_nv_audio_mcr", "1");
        cfg.apply("map_nv_max_allowed_dropout_time", "500");
        cfg.apply("map_nv_report_seconds", "10");

        assert_eq!(cfg.item_count, 8);
        assert_eq!(cfg.tx_interval, 8000);
        assert_eq!(cfg.packing_factor, 16);
        assert_eq!(cfg.sparse_mode, SparseMode::Enabled);
        assert!(cfg.audio_mcr.is_enabled());
        assert_eq!(cfg.temporal_redundant_offset_usec, 500);
        assert_eq!(cfg.report_seconds, 10);
    }

    #[test]
    fn test_tx_interval_alias() {
        let mut cfg = MapConfig::new(0);
        cfg.apply("map_nv_tx_interval", "6000");
        assert_eq!(cfg.tx_interval, 6000);
        cfg.apply("map_nv_temporal_redundant_offset", "750");
        assert_eq!(cfg.temporal_redundant_offset_usec, 750);
    }

    #[test]
    fn test_malformed_values_ignored() {
        let mut cfg = MapConfig::new(0);
        cfg.apply("map_nv_item_count", "12");
        cfg.apply("map_nv_item_count", "not-a-number");
        cfg.apply("map_nv_item_count", "");
        assert_eq!(cfg.item_count, 12);

        cfg.apply("map_nv_sparse_mode", "2");
        assert_eq!(cfg.sparse_mode, SparseMode::Disabled);

        cfg.apply("unknown_key", "5");
    }

    #[test]
    fn test_sparse_packing_factor_validator() {
        for pf in [1, 2, 4, 8, 16, 24, 32, 40, 48] {
            assert!(packing_factor_valid_for_sparse(pf), "{pf} should be valid");
        }
        for pf in [0, 3, 5, 6, 7, 9, 10, 12, 20] {
            assert!(!packing_factor_valid_for_sparse(pf), "{pf} should be invalid");
        }
    }
}

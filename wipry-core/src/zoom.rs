//! Zoom window validation and sample masking.
//!
//! With zoom enabled the accessory sweeps only `[start_index,
//! start_index + width - 1]`, which raises the effective scan rate. The
//! frame length stays at the native resolution; samples outside the
//! window are overwritten with [`INVALID_SAMPLE`] so stale or undefined
//! values never reach the subscriber.

use crate::codec::INVALID_SAMPLE;
use crate::error::WipryError;
use crate::message::DataType;

/// Largest start index the accessory interface documents (20 bits).
pub const MAX_ZOOM_START_INDEX: u32 = 0x0F_FFFF;

// ── RssiStreamConfig ─────────────────────────────────────────────

/// Parameters of an RSSI stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RssiStreamConfig {
    pub data_type: DataType,
    pub zoom_enabled: bool,
    pub start_index: u32,
    pub width: u8,
}

impl RssiStreamConfig {
    /// A full-resolution stream with zoom disabled.
    pub fn full(data_type: DataType) -> Self {
        Self {
            data_type,
            zoom_enabled: false,
            start_index: 0,
            width: 0,
        }
    }

    pub fn zoomed(data_type: DataType, start_index: u32, width: u8) -> Self {
        Self {
            data_type,
            zoom_enabled: true,
            start_index,
            width,
        }
    }
}

// ── ZoomMask ─────────────────────────────────────────────────────

/// The rule applied to every decoded frame of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomMask {
    /// Zoom disabled: frames pass through untouched.
    Full,
    /// Only `start..end` (exclusive) carries live samples.
    Window { start: usize, end: usize },
}

impl ZoomMask {
    /// Validate a stream request and derive its mask.
    ///
    /// `start_index` and `width` are ignored when zoom is disabled.
    pub fn validate(config: &RssiStreamConfig) -> Result<Self, WipryError> {
        let resolution = config
            .data_type
            .resolution()
            .ok_or(WipryError::UnstreamableDataType(config.data_type))?;
        if !config.zoom_enabled {
            return Ok(ZoomMask::Full);
        }

        let out_of_range = WipryError::ZoomOutOfRange {
            start: config.start_index,
            width: config.width,
            resolution,
        };
        if config.start_index > MAX_ZOOM_START_INDEX {
            return Err(out_of_range);
        }
        let start = config.start_index as usize;
        let end = start + config.width as usize;
        if end > resolution {
            return Err(out_of_range);
        }
        Ok(ZoomMask::Window { start, end })
    }

    /// The `(start_index, width)` pair sent to the accessory, if zoomed.
    pub fn as_request(&self) -> Option<(u32, u8)> {
        match *self {
            ZoomMask::Full => None,
            ZoomMask::Window { start, end } => Some((start as u32, (end - start) as u8)),
        }
    }

    /// Mark every sample outside the window invalid.
    pub fn apply(&self, samples: &mut [f32]) {
        let ZoomMask::Window { start, end } = *self else {
            return;
        };
        let start = start.min(samples.len());
        let end = end.clamp(start, samples.len());
        samples[..start].fill(INVALID_SAMPLE);
        samples[end..].fill(INVALID_SAMPLE);
    }

    pub fn contains(&self, index: usize) -> bool {
        match *self {
            ZoomMask::Full => true,
            ZoomMask::Window { start, end } => (start..end).contains(&index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_zoom_ignores_parameters() {
        let mut cfg = RssiStreamConfig::full(DataType::Rssi2_4Ghz);
        cfg.start_index = 0xF_FFFF;
        cfg.width = 255;
        assert_eq!(ZoomMask::validate(&cfg).unwrap(), ZoomMask::Full);
    }

    #[test]
    fn window_at_the_edge_is_accepted() {
        let cfg = RssiStreamConfig::zoomed(DataType::Rssi2_4Ghz, 745, 255);
        assert_eq!(
            ZoomMask::validate(&cfg).unwrap(),
            ZoomMask::Window {
                start: 745,
                end: 1000
            }
        );
    }

    #[test]
    fn window_past_resolution_is_rejected() {
        let cfg = RssiStreamConfig::zoomed(DataType::Rssi2_4Ghz, 746, 255);
        assert!(matches!(
            ZoomMask::validate(&cfg),
            Err(WipryError::ZoomOutOfRange { .. })
        ));
        let cfg = RssiStreamConfig::zoomed(DataType::Rssi6E, MAX_ZOOM_START_INDEX + 1, 0);
        assert!(ZoomMask::validate(&cfg).is_err());
    }

    #[test]
    fn reserved_type_is_rejected_even_without_zoom() {
        let cfg = RssiStreamConfig::full(DataType::RssiDual25);
        assert!(matches!(
            ZoomMask::validate(&cfg),
            Err(WipryError::UnstreamableDataType(DataType::RssiDual25))
        ));
    }

    #[test]
    fn apply_masks_outside_window_only() {
        let mask = ZoomMask::validate(&RssiStreamConfig::zoomed(DataType::Rssi2_4Ghz, 100, 200))
            .unwrap();
        let mut samples = vec![-50.0f32; 1000];
        mask.apply(&mut samples);

        assert_eq!(samples.len(), 1000);
        assert!(samples[..100].iter().all(|s| s.is_nan()));
        assert!(samples[100..300].iter().all(|&s| s == -50.0));
        assert!(samples[300..].iter().all(|s| s.is_nan()));
        assert!(mask.contains(299));
        assert!(!mask.contains(300));
        assert_eq!(mask.as_request(), Some((100, 200)));
    }

    #[test]
    fn full_mask_leaves_frame_alone() {
        let mut samples = vec![-42.0f32; 8];
        ZoomMask::Full.apply(&mut samples);
        assert!(samples.iter().all(|&s| s == -42.0));
        assert_eq!(ZoomMask::Full.as_request(), None);
    }
}

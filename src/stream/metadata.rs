//! Helpers a presentation layer uses to render frames and CV annotations.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::stream::proto::CvMetadataMsg;

/// MIME prefix for rendering a frame inline.
pub const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Latest frame image, or the "no frame" sentinel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum FramePayload {
    #[default]
    NoFrame,
    /// Base64-encoded JPEG exactly as the backend sent it.
    Jpeg(String),
}

impl FramePayload {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::NoFrame)
    }

    /// Returns the base64 payload when a frame is present.
    pub fn as_base64(&self) -> Option<&str> {
        match self {
            Self::NoFrame => None,
            Self::Jpeg(image) => Some(image),
        }
    }

    /// Renders the frame as `data:image/jpeg;base64,<payload>`.
    pub fn data_uri(&self) -> Option<String> {
        self.as_base64()
            .map(|image| format!("{JPEG_DATA_URI_PREFIX}{image}"))
    }

    /// Decodes the base64 payload into raw JPEG bytes.
    ///
    /// Returns `Ok(None)` for the "no frame" sentinel.
    pub fn decode_jpeg(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        self.as_base64()
            .map(|image| STANDARD.decode(image.trim()))
            .transpose()
    }
}

/// Overall crowd classification shown next to the person count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrowdLevel {
    Normal,
    Crowded,
    HighDensity,
}

impl CrowdLevel {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Crowded => "CROWDED",
            Self::HighDensity => "HIGH DENSITY",
        }
    }

    /// Zone count above which a cell is rendered as a hotspot.
    pub fn hotspot_threshold(self) -> u32 {
        match self {
            Self::Normal => 0,
            Self::Crowded => 3,
            Self::HighDensity => 8,
        }
    }
}

/// Rendering class of a single density zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoneSeverity {
    Empty,
    Occupied,
    Hotspot,
}

impl CvMetadataMsg {
    /// High density wins over crowded.
    pub fn crowd_level(&self) -> CrowdLevel {
        if self.is_high_density {
            CrowdLevel::HighDensity
        } else if self.is_crowd {
            CrowdLevel::Crowded
        } else {
            CrowdLevel::Normal
        }
    }

    pub fn zone_severity(&self, count: u32) -> ZoneSeverity {
        if count > self.crowd_level().hotspot_threshold() {
            ZoneSeverity::Hotspot
        } else if count > 0 {
            ZoneSeverity::Occupied
        } else {
            ZoneSeverity::Empty
        }
    }

    /// Width of the widest zone row.
    pub fn zone_columns(&self) -> usize {
        self.density_zones.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Count at `(row, col)`, or `None` when that row is shorter.
    pub fn zone(&self, row: usize, col: usize) -> Option<u32> {
        self.density_zones.get(row)?.get(col).copied()
    }

    /// Severity grid with the same (possibly ragged) shape as `density_zones`.
    pub fn zone_severities(&self) -> Vec<Vec<ZoneSeverity>> {
        self.density_zones
            .iter()
            .map(|row| row.iter().map(|count| self.zone_severity(*count)).collect())
            .collect()
    }

    /// Sum of all zone counts, saturating.
    pub fn total_zone_count(&self) -> u32 {
        self.density_zones
            .iter()
            .flatten()
            .fold(0u32, |total, count| total.saturating_add(*count))
    }

    pub fn has_density_zones(&self) -> bool {
        self.density_zones.iter().any(|row| !row.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::proto::RecognizedFaceMsg;

    fn metadata(is_crowd: bool, is_high_density: bool, zones: Vec<Vec<u32>>) -> CvMetadataMsg {
        CvMetadataMsg {
            person_count: 3,
            density_zones: zones,
            is_crowd,
            is_high_density,
            recognized_faces: vec![RecognizedFaceMsg {
                name: "alice".to_string(),
                confidence: 0.9,
            }],
        }
    }

    #[test]
    fn no_frame_has_no_data_uri() {
        let payload = FramePayload::default();
        assert!(payload.is_empty());
        assert_eq!(payload.data_uri(), None);
        assert_eq!(payload.decode_jpeg().expect("decode"), None);
    }

    #[test]
    fn jpeg_payload_renders_data_uri_and_decodes() {
        let payload = FramePayload::Jpeg("/9j/4A==".to_string());
        assert_eq!(
            payload.data_uri().as_deref(),
            Some("data:image/jpeg;base64,/9j/4A==")
        );
        assert_eq!(
            payload.decode_jpeg().expect("decode"),
            Some(vec![0xFF, 0xD8, 0xFF, 0xE0])
        );
    }

    #[test]
    fn corrupt_payload_fails_to_decode() {
        let payload = FramePayload::Jpeg("not base64!".to_string());
        assert!(payload.decode_jpeg().is_err());
    }

    #[test]
    fn high_density_takes_precedence_over_crowd() {
        assert_eq!(
            metadata(true, true, vec![]).crowd_level(),
            CrowdLevel::HighDensity
        );
        assert_eq!(metadata(true, false, vec![]).crowd_level(), CrowdLevel::Crowded);
        assert_eq!(metadata(false, false, vec![]).crowd_level(), CrowdLevel::Normal);
        assert_eq!(CrowdLevel::HighDensity.label(), "HIGH DENSITY");
    }

    #[test]
    fn zone_severity_follows_crowd_threshold() {
        let crowded = metadata(true, false, vec![]);
        assert_eq!(crowded.zone_severity(0), ZoneSeverity::Empty);
        assert_eq!(crowded.zone_severity(3), ZoneSeverity::Occupied);
        assert_eq!(crowded.zone_severity(4), ZoneSeverity::Hotspot);

        let normal = metadata(false, false, vec![]);
        assert_eq!(normal.zone_severity(1), ZoneSeverity::Hotspot);
    }

    #[test]
    fn ragged_zone_grid_is_handled_without_padding() {
        let meta = metadata(false, true, vec![vec![0, 9, 2], vec![1], vec![]]);
        assert_eq!(meta.zone_columns(), 3);
        assert_eq!(meta.zone(0, 1), Some(9));
        assert_eq!(meta.zone(1, 2), None);
        assert_eq!(meta.zone(5, 0), None);
        assert_eq!(meta.total_zone_count(), 12);
        assert!(meta.has_density_zones());
        assert_eq!(
            meta.zone_severities(),
            vec![
                vec![
                    ZoneSeverity::Empty,
                    ZoneSeverity::Hotspot,
                    ZoneSeverity::Occupied
                ],
                vec![ZoneSeverity::Occupied],
                vec![],
            ]
        );
    }

    #[test]
    fn empty_rows_do_not_count_as_zones() {
        let meta = metadata(false, false, vec![vec![], vec![]]);
        assert!(!meta.has_density_zones());
        assert_eq!(meta.zone_columns(), 0);
    }
}

//! Session parameters negotiated with the processing backend.
//!
//! A [`SessionConfig`] is an immutable snapshot: callers replace it wholesale
//! and hand the new value to `StreamSession::reconfigure`.

use url::form_urlencoded;

use crate::stream::proto::ClientMessage;
use crate::stream::session::SessionError;

/// Frame rates the backend accepts.
pub const ALLOWED_TARGET_FPS: [u32; 5] = [10, 15, 20, 25, 30];
/// JPEG quality levels the backend accepts.
pub const ALLOWED_JPEG_QUALITY: [u32; 4] = [30, 50, 70, 90];
/// Resize factors accepted for both the output image and CV processing.
pub const ALLOWED_RESIZE_FACTORS: [f64; 4] = [0.25, 0.5, 0.75, 1.0];

/// Query parameter carrying the source URL on the dashboard route.
pub const SOURCE_URL_QUERY_KEY: &str = "url";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamDefaults;

impl StreamDefaults {
    pub const TARGET_FPS: u32 = 20;
    pub const JPEG_QUALITY: u32 = 50;
    pub const OUTPUT_RESIZE_FACTOR: f64 = 0.5;
    pub const CV_RESIZE_FACTOR: f64 = 0.5;
}

/// Stream parameters sent with `start_stream`.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    /// Camera or video source the backend should pull from.
    pub source_url: String,
    /// Output frame rate requested from the backend.
    pub target_fps: u32,
    /// JPEG quality of the returned frames.
    pub jpeg_quality: u32,
    /// Scale applied to the returned image.
    pub output_resize_factor: f64,
    /// Scale applied to frames before CV processing.
    pub cv_resize_factor: f64,
}

impl SessionConfig {
    /// Creates a config for `source_url` with the dashboard's default options.
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            target_fps: StreamDefaults::TARGET_FPS,
            jpeg_quality: StreamDefaults::JPEG_QUALITY,
            output_resize_factor: StreamDefaults::OUTPUT_RESIZE_FACTOR,
            cv_resize_factor: StreamDefaults::CV_RESIZE_FACTOR,
        }
    }

    pub fn with_target_fps(mut self, target_fps: u32) -> Self {
        self.target_fps = target_fps;
        self
    }

    pub fn with_jpeg_quality(mut self, jpeg_quality: u32) -> Self {
        self.jpeg_quality = jpeg_quality;
        self
    }

    pub fn with_output_resize_factor(mut self, factor: f64) -> Self {
        self.output_resize_factor = factor;
        self
    }

    pub fn with_cv_resize_factor(mut self, factor: f64) -> Self {
        self.cv_resize_factor = factor;
        self
    }

    /// Returns `true` when the source URL is empty or whitespace.
    pub fn is_missing_source(&self) -> bool {
        self.source_url.trim().is_empty()
    }

    /// Checks every field against the values the backend accepts.
    ///
    /// A missing source is reported before any option error.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.is_missing_source() {
            return Err(SessionError::MissingSource);
        }
        if !ALLOWED_TARGET_FPS.contains(&self.target_fps) {
            return Err(SessionError::InvalidConfig(format!(
                "target_fps must be one of {ALLOWED_TARGET_FPS:?}, got {}",
                self.target_fps
            )));
        }
        if !ALLOWED_JPEG_QUALITY.contains(&self.jpeg_quality) {
            return Err(SessionError::InvalidConfig(format!(
                "jpeg_quality must be one of {ALLOWED_JPEG_QUALITY:?}, got {}",
                self.jpeg_quality
            )));
        }
        validate_resize_factor(self.output_resize_factor, "output_resize_factor")?;
        validate_resize_factor(self.cv_resize_factor, "cv_resize_factor")?;
        Ok(())
    }

    /// Builds the `start_stream` command carrying this config.
    pub fn start_message(&self) -> ClientMessage {
        ClientMessage::StartStream {
            url: self.source_url.clone(),
            fps: self.target_fps,
            quality: self.jpeg_quality,
            resize_factor: self.output_resize_factor,
            cv_processing_resize: self.cv_resize_factor,
        }
    }
}

fn validate_resize_factor(value: f64, field: &str) -> Result<(), SessionError> {
    if ALLOWED_RESIZE_FACTORS
        .iter()
        .any(|allowed| (allowed - value).abs() < f64::EPSILON)
    {
        return Ok(());
    }
    Err(SessionError::InvalidConfig(format!(
        "{field} must be one of {ALLOWED_RESIZE_FACTORS:?}, got {value}"
    )))
}

/// Extracts the source URL from a dashboard query string.
///
/// Accepts the query with or without its leading `?`. Values are
/// percent-decoded; a missing or blank `url` parameter yields `None`, which
/// the routing layer treats as "redirect back to the landing form".
pub fn source_url_from_query(query: &str) -> Option<String> {
    let query = query.strip_prefix('?').unwrap_or(query);
    form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == SOURCE_URL_QUERY_KEY)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

//! Photo metadata extraction interface (EXIF time/GPS/camera fields).
//!
//! Extraction happens on the shard right after ingestion; the merged record
//! travels back to the leader in the upload reply.

/// Auxiliary metadata pulled from a photo file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhotoMeta {
    /// Capture time, unix seconds.
    pub timestamp: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub camera_make: Option<String>,
    pub camera_model: Option<String>,
}

/// EXIF/GPS extractor seam.
pub trait PhotoMetaExtractor: Send + Sync {
    /// Extract metadata from raw photo bytes. Missing fields stay `None`;
    /// extraction failures are not errors, just an empty result.
    fn extract(&self, bytes: &[u8], format: &str) -> PhotoMeta;
}

/// Extractor that finds nothing. Used when no EXIF backend is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPhotoMetaExtractor;

impl PhotoMetaExtractor for NoopPhotoMetaExtractor {
    fn extract(&self, _bytes: &[u8], _format: &str) -> PhotoMeta {
        PhotoMeta::default()
    }
}

//! Well-known facts and how to compute them.
//!
//! Units may define their own fact names; these are the ones the scanner and
//! the built-in units share.

use std::path::Path;

use super::{CacheError, MetadataCache};
use crate::models::{Dimensions, Sample};

pub const DIMENSIONS: &str = "dimensions";
pub const INTEGRITY: &str = "integrity";
pub const PERCEPTUAL_HASH: &str = "perceptual_hash";
pub const ANNOTATION: &str = "annotation";

/// Image dimensions from the file header, without a full decode.
pub fn read_dimensions(path: &Path) -> Result<Dimensions, String> {
    image::image_dimensions(path)
        .map(|(width, height)| Dimensions::new(width, height))
        .map_err(|e| e.to_string())
}

/// Fully decode the image. Truncated or corrupt files fail here even when
/// their header is intact.
pub fn verify_decodes(path: &Path) -> Result<bool, String> {
    image::open(path).map(|_| true).map_err(|e| e.to_string())
}

/// Perceptual hash, base64 encoded so it can live in the fact store.
/// DoubleGradient at 16x16 (256 bits), decoded through img_hash's own image crate.
pub fn compute_perceptual_hash(path: &Path) -> Result<String, String> {
    let img = img_hash::image::open(path).map_err(|e| e.to_string())?;

    let hasher = img_hash::HasherConfig::new()
        .hash_alg(img_hash::HashAlg::DoubleGradient)
        .hash_size(16, 16)
        .to_hasher();

    Ok(hasher.hash_image(&img).to_base64())
}

pub type PerceptualHash = img_hash::ImageHash<Vec<u8>>;

pub fn decode_perceptual_hash(encoded: &str) -> Option<PerceptualHash> {
    PerceptualHash::from_base64(encoded).ok()
}

/// Hamming distance between two hashes, `None` when their lengths differ.
pub fn hash_distance(a: &PerceptualHash, b: &PerceptualHash) -> Option<u32> {
    (a.as_bytes().len() == b.as_bytes().len()).then(|| a.dist(b))
}

impl MetadataCache {
    pub fn dimensions(&self, sample: &Sample) -> Result<Dimensions, CacheError> {
        self.get_or_compute_as(&sample.id, DIMENSIONS, || read_dimensions(&sample.image_path))
    }

    /// `Ok(())` when the image decodes; `Err(Unavailable)` carries the decoder error.
    pub fn integrity(&self, sample: &Sample) -> Result<(), CacheError> {
        self.get_or_compute_as::<bool, _, _>(&sample.id, INTEGRITY, || {
            verify_decodes(&sample.image_path)
        })
        .map(|_| ())
    }

    pub fn perceptual_hash(&self, sample: &Sample) -> Result<String, CacheError> {
        self.get_or_compute_as(&sample.id, PERCEPTUAL_HASH, || {
            compute_perceptual_hash(&sample.image_path)
        })
    }
}

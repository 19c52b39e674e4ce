//! Frame geometry detection and caching
//!
//! Geometry detection is expensive (at least linear in the pixel count), so
//! the arrival path only runs it when the frame's validity mask changes. The
//! mask is the last channel of the raw frame: 255 marks pixels that carry
//! ultrasound data, anything else is blanked.
//!
//! Change detection uses [`mask_hash`], a cheap rolling hash that depends only
//! on *where* the 255 values sit. It is a change detector, not an identity:
//! structurally different masks can collide, which at worst reuses a stale
//! geometry until the dimensions or the hash change again.

use serde::{Deserialize, Serialize};

use crate::types::PixelBuffer;

/// Mask value marking a valid ultrasound pixel
pub const VALID_PIXEL: u8 = 255;

const HASH_MULTIPLIER: u32 = 33;
const HASH_MODULUS: usize = 701;

/// Rolling hash over the validity mask.
///
/// `acc = acc * 33 + ((byte == 255 ? index : 0) % 701)` with wrapping 32-bit
/// arithmetic, starting from zero.
pub fn mask_hash(mask: &[u8]) -> u32 {
    mask.iter().enumerate().fold(0u32, |acc, (index, &value)| {
        let term = if value == VALID_PIXEL {
            (index % HASH_MODULUS) as u32
        } else {
            0
        };
        acc.wrapping_mul(HASH_MULTIPLIER).wrapping_add(term)
    })
}

/// Single-channel mask of valid pixels
#[derive(Debug, Clone, PartialEq)]
pub struct ValidityMask {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ValidityMask {
    /// Build a mask from raw bytes; `data` must hold `width * height` values
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// Extract the last channel of an interleaved image
    pub fn from_image(image: &PixelBuffer) -> Self {
        let channels = image.channels() as usize;
        let data = image
            .as_bytes()
            .chunks_exact(channels)
            .map(|pixel| pixel[channels - 1])
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn hash(&self) -> u32 {
        mask_hash(&self.data)
    }

    /// Value at pixel (x, y)
    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

/// Geometry of the imaged region inside a frame, in pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameGeometry {
    /// Rectangular field of view of a linear probe
    Linear {
        left: f64,
        right: f64,
        top: f64,
        bottom: f64,
    },
}

impl FrameGeometry {
    /// Imaged depth in pixels
    pub fn depth_px(&self) -> f64 {
        match self {
            FrameGeometry::Linear { top, bottom, .. } => bottom - top,
        }
    }
}

/// Detects the frame geometry from a validity mask
///
/// Returning `None` means detection failed for this mask.
pub trait GeometryDetector: Send + Sync {
    fn detect(&self, mask: &ValidityMask) -> Option<FrameGeometry>;
}

impl<F> GeometryDetector for F
where
    F: Fn(&ValidityMask) -> Option<FrameGeometry> + Send + Sync,
{
    fn detect(&self, mask: &ValidityMask) -> Option<FrameGeometry> {
        self(mask)
    }
}

/// Linear geometry spanning the bounding box of all valid pixels
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtentDetector;

impl GeometryDetector for ExtentDetector {
    fn detect(&self, mask: &ValidityMask) -> Option<FrameGeometry> {
        let width = mask.width() as usize;
        if width == 0 {
            return None;
        }
        let mut bounds: Option<(usize, usize, usize, usize)> = None;

        for (row_index, row) in mask.as_bytes().chunks_exact(width).enumerate() {
            let first = row.iter().position(|&v| v == VALID_PIXEL);
            let last = row.iter().rposition(|&v| v == VALID_PIXEL);
            if let (Some(first), Some(last)) = (first, last) {
                bounds = Some(match bounds {
                    None => (first, last, row_index, row_index),
                    Some((l, r, t, _)) => (l.min(first), r.max(last), t, row_index),
                });
            }
        }

        bounds.map(|(left, right, top, bottom)| FrameGeometry::Linear {
            left: left as f64,
            right: (right + 1) as f64,
            top: top as f64,
            bottom: (bottom + 1) as f64,
        })
    }
}

/// Key the cached geometry was computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskKey {
    pub width: u32,
    pub height: u32,
    pub hash: u32,
}

/// What [`GeometryCache::update`] did for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Cached geometry is still valid
    Hit,
    /// Detection ran and succeeded
    Detected,
    /// Detection ran and failed
    Failed,
    /// Detection already failed for this hash; not retried
    KnownFailure,
}

impl CacheOutcome {
    pub fn ran_detection(&self) -> bool {
        matches!(self, CacheOutcome::Detected | CacheOutcome::Failed)
    }
}

/// Memoized geometry for the most recent validity mask
#[derive(Debug, Default)]
pub struct GeometryCache {
    key: Option<MaskKey>,
    geometry: Option<FrameGeometry>,
    last_failed_hash: Option<u32>,
    detections: u64,
}

impl GeometryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the cache up to date for a new mask, running detection at most once
    pub fn update(&mut self, mask: &ValidityMask, detector: &dyn GeometryDetector) -> CacheOutcome {
        let key = MaskKey {
            width: mask.width(),
            height: mask.height(),
            hash: mask.hash(),
        };

        if self.key != Some(key) {
            if self.geometry.take().is_some() {
                tracing::debug!(
                    "Validity mask changed ({}x{}, hash {:#010x}), geometry invalidated",
                    key.width,
                    key.height,
                    key.hash
                );
            }
            self.key = Some(key);
        }

        if self.geometry.is_some() {
            return CacheOutcome::Hit;
        }

        if self.last_failed_hash == Some(key.hash) {
            return CacheOutcome::KnownFailure;
        }

        self.detections += 1;
        match detector.detect(mask) {
            Some(geometry) => {
                tracing::debug!("Detected frame geometry: {:?}", geometry);
                self.geometry = Some(geometry);
                CacheOutcome::Detected
            }
            None => {
                tracing::warn!(
                    "Geometry detection failed for mask hash {:#010x}, not retrying until it changes",
                    key.hash
                );
                self.last_failed_hash = Some(key.hash);
                CacheOutcome::Failed
            }
        }
    }

    /// Geometry valid for the current key, if any
    pub fn geometry(&self) -> Option<&FrameGeometry> {
        self.geometry.as_ref()
    }

    pub fn key(&self) -> Option<MaskKey> {
        self.key
    }

    pub fn last_failed_hash(&self) -> Option<u32> {
        self.last_failed_hash
    }

    /// Number of times detection has run
    pub fn detections(&self) -> u64 {
        self.detections
    }
}

//! Per-frame conversion applied on the processing thread

use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::types::{FrameRecord, PixelBuffer};

/// Conversion applied to a frame before it is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameConversion {
    #[default]
    PassThrough,
    /// Collapse colour channels into a single intensity channel
    Grayscale,
}

impl FrameConversion {
    pub fn from_config(config: &StreamConfig) -> Self {
        if config.convert_to_gray {
            FrameConversion::Grayscale
        } else {
            FrameConversion::PassThrough
        }
    }

    /// Apply the conversion in place, replacing the record's active image
    pub fn apply(self, record: &mut FrameRecord) -> Result<()> {
        match self {
            FrameConversion::PassThrough => Ok(()),
            FrameConversion::Grayscale => {
                record.image = to_grayscale(&record.image)?;
                Ok(())
            }
        }
    }
}

/// Average the first three channels of each pixel.
///
/// Single-channel images are returned unchanged; the alpha channel of
/// four-channel images is ignored.
pub fn to_grayscale(image: &PixelBuffer) -> Result<PixelBuffer> {
    let channels = image.channels() as usize;
    match channels {
        1 => Ok(image.clone()),
        3 | 4 => {
            let gray = image
                .as_bytes()
                .chunks_exact(channels)
                .map(|px| ((px[0] as u16 + px[1] as u16 + px[2] as u16) / 3) as u8)
                .collect();
            PixelBuffer::new(image.width(), image.height(), 1, gray, image.spacing())
        }
        n => Err(StreamError::Conversion(format!(
            "cannot convert {}-channel image to grayscale",
            n
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Spacing;
    use std::time::Duration;

    #[test]
    fn test_grayscale_from_four_channels() {
        let data = vec![
            30, 60, 90, 255, //
            255, 255, 255, 0, //
            0, 0, 1, 255, //
            10, 20, 30, 255,
        ];
        let image = PixelBuffer::new(2, 2, 4, data, Spacing::new(0.3, 0.3)).unwrap();
        let gray = to_grayscale(&image).unwrap();

        assert_eq!(gray.channels(), 1);
        assert_eq!(gray.as_bytes(), &[60, 255, 0, 20]);
        assert_eq!(gray.spacing(), image.spacing());
    }

    #[test]
    fn test_grayscale_passes_single_channel_through() {
        let image = PixelBuffer::new(2, 1, 1, vec![5, 9], Spacing::default()).unwrap();
        assert_eq!(to_grayscale(&image).unwrap(), image);
    }

    #[test]
    fn test_grayscale_rejects_two_channels() {
        let image = PixelBuffer::new(1, 1, 2, vec![5, 9], Spacing::default()).unwrap();
        assert!(matches!(
            to_grayscale(&image),
            Err(StreamError::Conversion(_))
        ));
    }

    #[test]
    fn test_apply_replaces_active_image() {
        let image = PixelBuffer::new(1, 1, 4, vec![3, 6, 9, 255], Spacing::default()).unwrap();
        let mut record = FrameRecord::new(image, Duration::from_millis(1));

        FrameConversion::PassThrough.apply(&mut record).unwrap();
        assert_eq!(record.image.channels(), 4);

        FrameConversion::Grayscale.apply(&mut record).unwrap();
        assert_eq!(record.image.channels(), 1);
        assert_eq!(record.image.as_bytes(), &[6]);
    }

    #[test]
    fn test_from_config() {
        let mut config = StreamConfig::default();
        assert_eq!(FrameConversion::from_config(&config), FrameConversion::PassThrough);
        config.convert_to_gray = true;
        assert_eq!(FrameConversion::from_config(&config), FrameConversion::Grayscale);
    }
}

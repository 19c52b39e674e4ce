//! Test data builders for creating raw device frames

use ultrasound_stream::{InertialSample, RawImage};

/// A raw frame owned by the test, lent to the stream as a [`RawImage`]
#[derive(Debug, Clone)]
pub struct TestFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
    pub microns_per_pixel: f64,
}

impl TestFrame {
    pub fn raw(&self) -> RawImage<'_> {
        RawImage::new(
            self.width,
            self.height,
            self.channels,
            &self.data,
            self.microns_per_pixel,
        )
    }
}

/// Builder for four-channel frames whose last channel is the validity mask
pub struct FrameBuilder {
    width: u32,
    height: u32,
    value: u8,
    valid: Option<(u32, u32, u32, u32)>,
    microns_per_pixel: f64,
}

impl FrameBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            value: 128,
            valid: Some((0, 0, width, height)),
            microns_per_pixel: 250.0,
        }
    }

    /// B-mode value written to every valid pixel
    pub fn value(mut self, value: u8) -> Self {
        self.value = value;
        self
    }

    /// Only pixels with `left <= x < right` and `top <= y < bottom` are valid
    pub fn valid_rect(mut self, left: u32, top: u32, right: u32, bottom: u32) -> Self {
        self.valid = Some((left, top, right, bottom));
        self
    }

    /// No valid pixels at all
    pub fn no_valid_pixels(mut self) -> Self {
        self.valid = None;
        self
    }

    pub fn microns_per_pixel(mut self, microns: f64) -> Self {
        self.microns_per_pixel = microns;
        self
    }

    pub fn build(self) -> TestFrame {
        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let valid = self
                    .valid
                    .map(|(l, t, r, b)| x >= l && x < r && y >= t && y < b)
                    .unwrap_or(false);
                let v = if valid { self.value } else { 0 };
                data.extend_from_slice(&[v, v, v, if valid { 255 } else { 0 }]);
            }
        }
        TestFrame {
            width: self.width,
            height: self.height,
            channels: 4,
            data,
            microns_per_pixel: self.microns_per_pixel,
        }
    }
}

/// Inertial samples with strictly increasing timestamps
pub fn inertial_batch(first_timestamp: u64, count: usize) -> Vec<InertialSample> {
    (0..count)
        .map(|i| InertialSample {
            gyro: [i as f64, 0.0, 0.0],
            linear_acceleration: [0.0, 0.0, 9.81],
            magnetic: [0.0; 3],
            timestamp: first_timestamp + i as u64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_builder() {
        let frame = FrameBuilder::new(4, 2).valid_rect(1, 0, 3, 2).value(9).build();
        assert_eq!(frame.data.len(), 32);
        assert_eq!(&frame.data[0..4], &[0, 0, 0, 0]);
        assert_eq!(&frame.data[4..8], &[9, 9, 9, 255]);
    }
}

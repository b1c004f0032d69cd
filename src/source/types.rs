//! Frame types handed from the source to the inference stack.
//!
//! Frames are 8-bit luma only. Crops are transient and never outlive the tick
//! that created them.

use crate::error::CaptureError;
use chrono::{DateTime, Utc};

/// A single grayscale frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic frame counter assigned by the source
    pub sequence: u64,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// Row-major luma, `width * height` bytes
    pub luma: Vec<u8>,
}

impl Frame {
    /// Build a frame, checking the buffer matches the stated dimensions.
    pub fn new(
        sequence: u64,
        timestamp: DateTime<Utc>,
        width: u32,
        height: u32,
        luma: Vec<u8>,
    ) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || luma.len() != expected {
            return Err(CaptureError::Read(format!(
                "frame {sequence}: {}x{} frame carries {} bytes",
                width,
                height,
                luma.len()
            )));
        }
        Ok(Self {
            sequence,
            timestamp,
            width,
            height,
            luma,
        })
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.luma[y as usize * self.width as usize + x as usize]
    }

    /// Mean luma over the whole frame.
    pub fn mean_luma(&self) -> f64 {
        if self.luma.is_empty() {
            return 0.0;
        }
        self.luma.iter().map(|&v| v as f64).sum::<f64>() / self.luma.len() as f64
    }

    /// Copy out a rectangle given in normalized `[0,1]` coordinates.
    ///
    /// Returns `None` if the rectangle is empty after clipping to the frame.
    pub fn crop(&self, x: f64, y: f64, w: f64, h: f64) -> Option<FrameCrop> {
        let fw = self.width as f64;
        let fh = self.height as f64;
        let x0 = (x.clamp(0.0, 1.0) * fw).floor() as u32;
        let y0 = (y.clamp(0.0, 1.0) * fh).floor() as u32;
        let x1 = ((x + w).clamp(0.0, 1.0) * fw).ceil() as u32;
        let y1 = ((y + h).clamp(0.0, 1.0) * fh).ceil() as u32;
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let cw = x1 - x0;
        let ch = y1 - y0;
        let mut luma = Vec::with_capacity(cw as usize * ch as usize);
        for row in y0..y1 {
            let start = row as usize * self.width as usize + x0 as usize;
            luma.extend_from_slice(&self.luma[start..start + cw as usize]);
        }

        Some(FrameCrop {
            width: cw,
            height: ch,
            luma,
        })
    }
}

/// A rectangular copy of part of a frame.
#[derive(Debug, Clone)]
pub struct FrameCrop {
    pub width: u32,
    pub height: u32,
    pub luma: Vec<u8>,
}

impl FrameCrop {
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        self.luma[y as usize * self.width as usize + x as usize]
    }

    /// Row range covering the fractional band `[from, to)` of the crop height.
    pub fn band_rows(&self, from: f64, to: f64) -> std::ops::Range<u32> {
        let h = self.height as f64;
        let start = (from.clamp(0.0, 1.0) * h).floor() as u32;
        let end = ((to.clamp(0.0, 1.0) * h).ceil() as u32).min(self.height);
        start..end.max(start)
    }

    /// Mean luma over a horizontal band.
    pub fn band_mean(&self, from: f64, to: f64) -> f64 {
        let rows = self.band_rows(from, to);
        let mut sum = 0.0;
        let mut count = 0usize;
        for y in rows {
            for x in 0..self.width {
                sum += self.pixel(x, y) as f64;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// Mean absolute vertical gradient over a band, normalized to `[0,1]`.
    pub fn band_gradient_energy(&self, from: f64, to: f64) -> f64 {
        let rows = self.band_rows(from, to);
        let mut sum = 0.0;
        let mut count = 0usize;
        for y in rows {
            if y + 1 >= self.height {
                continue;
            }
            for x in 0..self.width {
                let a = self.pixel(x, y) as f64;
                let b = self.pixel(x, y + 1) as f64;
                sum += (a - b).abs();
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            (sum / count as f64 / 255.0).clamp(0.0, 1.0)
        }
    }
}

// src/preprocessing.rs

use anyhow::{bail, Context, Result};
use opencv::{
    core::{self, Mat, Scalar},
    imgproc,
    prelude::*,
};

/// Gray used by Ultralytics for letterbox padding
const PAD_VALUE: u8 = 114;

/// Letterboxed, normalised CHW model input plus the transform needed to map
/// model coordinates back onto the source frame.
#[derive(Debug, Clone)]
pub struct Letterbox {
    pub input: Vec<f32>,
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Model-space point -> source-frame point.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Fit an RGB frame into a `target`x`target` square keeping aspect ratio,
/// normalise to [0, 1] and convert HWC -> CHW.
pub fn letterbox(src: &[u8], src_w: usize, src_h: usize, target: usize) -> Result<Letterbox> {
    if src_w == 0 || src_h == 0 || src.len() < src_w * src_h * 3 {
        bail!(
            "Invalid frame buffer: {}x{} with {} bytes",
            src_w,
            src_h,
            src.len()
        );
    }

    let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
    let scaled_w = ((src_w as f32 * scale) as usize).clamp(1, target);
    let scaled_h = ((src_h as f32 * scale) as usize).clamp(1, target);
    let pad_x = (target - scaled_w) as f32 / 2.0;
    let pad_y = (target - scaled_h) as f32 / 2.0;

    let src_mat = Mat::from_slice(&src[..src_w * src_h * 3])?;
    let src_mat = src_mat.reshape(3, src_h as i32)?;

    let mut resized = Mat::default();
    imgproc::resize(
        &src_mat,
        &mut resized,
        core::Size::new(scaled_w as i32, scaled_h as i32),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )?;

    let top = pad_y as i32;
    let left = pad_x as i32;
    let mut padded = Mat::default();
    core::copy_make_border(
        &resized,
        &mut padded,
        top,
        (target - scaled_h) as i32 - top,
        left,
        (target - scaled_w) as i32 - left,
        core::BORDER_CONSTANT,
        Scalar::all(PAD_VALUE as f64),
    )?;
    let canvas = padded.data_bytes().context("Letterboxed frame is not contiguous")?;

    let mut input = vec![0.0f32; 3 * target * target];
    for c in 0..3 {
        for h in 0..target {
            for w in 0..target {
                let hwc_idx = (h * target + w) * 3 + c;
                let chw_idx = c * target * target + h * target + w;
                input[chw_idx] = canvas[hwc_idx] as f32 / 255.0;
            }
        }
    }

    Ok(Letterbox {
        input,
        scale,
        pad_x,
        pad_y,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letterbox_wide_frame() {
        let src = vec![128u8; 1280 * 720 * 3];
        let lb = letterbox(&src, 1280, 720, 640).unwrap();
        assert_eq!(lb.input.len(), 3 * 640 * 640);
        assert!((lb.scale - 0.5).abs() < 1e-6);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);
        // Top padding row keeps the pad colour
        assert!((lb.input[0] - PAD_VALUE as f32 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_unmap_inverts_letterbox() {
        let src = vec![0u8; 1280 * 720 * 3];
        let lb = letterbox(&src, 1280, 720, 640).unwrap();
        let (x, y) = lb.unmap(320.0, 140.0 + 180.0);
        assert!((x - 640.0).abs() < 1e-3);
        assert!((y - 360.0).abs() < 1e-3);
    }

    #[test]
    fn test_letterbox_rejects_short_buffer() {
        assert!(letterbox(&[0u8; 10], 100, 100, 640).is_err());
    }

    #[test]
    fn test_letterbox_tall_frame_keeps_content_centred() {
        let src = vec![200u8; 100 * 200 * 3];
        let lb = letterbox(&src, 100, 200, 64).unwrap();
        assert_eq!(lb.pad_x, 16.0);
        assert_eq!(lb.pad_y, 0.0);

        let plane = 64 * 64;
        let pad = PAD_VALUE as f32 / 255.0;
        let content = 200.0 / 255.0;
        // Row 10: left border, image, right border, in every channel
        for c in 0..3 {
            let row = &lb.input[c * plane + 10 * 64..c * plane + 11 * 64];
            assert!((row[0] - pad).abs() < 1e-6);
            assert!((row[32] - content).abs() < 1e-6);
            assert!((row[63] - pad).abs() < 1e-6);
        }
    }
}

//! Letterbox geometry: aspect-preserving resize with symmetric padding, and its inverse
//! applied to model output masks.

use crate::config::InputSize;
use crate::error::{Result, VisionError};
use crate::utils::{apply_imagenet_normalization, array_to_mat, hwc_to_chw, mat_to_array, mat_to_hwc, rgb_to_mat};
use image::RgbImage;
use ndarray::{s, Array2, Array4, ArrayView2, Axis};
use opencv::core::{copy_make_border, DataType, Mat, Scalar, Size, BORDER_CONSTANT};
use opencv::imgproc;
use tracing::debug;

/// Scale and padding that place a source image inside a fixed canvas.
///
/// The remainder pixel of an odd padding residue is dropped rather than given to the
/// bottom/right edge, so the padded canvas can be one pixel smaller than the target on
/// that axis. Masks are mapped back with the same arithmetic, which keeps both
/// directions consistent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f64,
    pub new_width: usize,
    pub new_height: usize,
    pub pad_width: usize,
    pub pad_height: usize,
}

impl Letterbox {
    /// Compute the letterbox for fitting `src` into `dst` (both height, width).
    pub fn compute(src_height: usize, src_width: usize, dst_height: usize, dst_width: usize) -> Result<Self> {
        if src_height == 0 || src_width == 0 {
            return Err(VisionError::Processing("Source dimensions cannot be zero".to_string()));
        }
        if dst_height == 0 || dst_width == 0 {
            return Err(VisionError::Processing("Target dimensions cannot be zero".to_string()));
        }

        let scale = (dst_width as f64 / src_width as f64).min(dst_height as f64 / src_height as f64);
        // Truncation toward zero, matching an integer cast of a positive float
        let new_width = (src_width as f64 * scale) as usize;
        let new_height = (src_height as f64 * scale) as usize;

        if new_width == 0 || new_height == 0 {
            return Err(VisionError::Processing(format!(
                "Image {}x{} collapses to zero size when fitted into {}x{}",
                src_width, src_height, dst_width, dst_height
            )));
        }

        let pad_width = dst_width.saturating_sub(new_width) / 2;
        let pad_height = dst_height.saturating_sub(new_height) / 2;

        Ok(Self {
            scale,
            new_width,
            new_height,
            pad_width,
            pad_height,
        })
    }

    /// Height of the padded canvas actually produced
    pub fn padded_height(&self) -> usize {
        self.new_height + 2 * self.pad_height
    }

    /// Width of the padded canvas actually produced
    pub fn padded_width(&self) -> usize {
        self.new_width + 2 * self.pad_width
    }

    /// Map a point from source coordinates into canvas coordinates
    pub fn to_canvas(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale + self.pad_width as f64, y * self.scale + self.pad_height as f64)
    }

    /// Map a point from canvas coordinates back into source coordinates
    pub fn to_source(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.pad_width as f64) / self.scale,
            (y - self.pad_height as f64) / self.scale,
        )
    }
}

/// Turn an RGB image into a normalized `(1, 3, H, W)` batch for a model with the given input size.
///
/// Pixels are scaled to [0, 1], letterboxed (bilinear resize, zero border), standardized
/// with ImageNet statistics and laid out channel-first. The input image is only borrowed.
pub fn preprocess_image(image: &RgbImage, target: InputSize) -> Result<Array4<f32>> {
    let (width, height) = image.dimensions();
    let letterbox = Letterbox::compute(
        height as usize,
        width as usize,
        target.height as usize,
        target.width as usize,
    )?;

    debug!(
        "Letterbox {}x{} -> {}x{} (pad {}x{})",
        width, height, letterbox.new_width, letterbox.new_height, letterbox.pad_width, letterbox.pad_height
    );

    let source = rgb_to_mat(image)?;
    let resized = resize(&source, letterbox.new_height, letterbox.new_width, imgproc::INTER_LINEAR)?;

    let mut padded = Mat::default();
    let (pad_height, pad_width) = (letterbox.pad_height as i32, letterbox.pad_width as i32);
    copy_make_border(
        &resized,
        &mut padded,
        pad_height,
        pad_height,
        pad_width,
        pad_width,
        BORDER_CONSTANT,
        Scalar::all(0.0),
    )?;

    let mut chw = hwc_to_chw(mat_to_hwc(&padded)?);
    apply_imagenet_normalization(&mut chw);

    Ok(chw.insert_axis(Axis(0)))
}

/// Undo the letterbox on a model output mask.
///
/// The padding is recomputed from the mask's own size, cropped away, and the remaining
/// region is resized to the original image size with nearest-neighbour sampling so label
/// values are never blended.
pub fn resize_mask_back_to_original<T: DataType>(
    mask: ArrayView2<'_, T>,
    original_height: usize,
    original_width: usize,
) -> Result<Array2<T>> {
    let (mask_height, mask_width) = mask.dim();
    let letterbox = Letterbox::compute(original_height, original_width, mask_height, mask_width)?;

    let cropped = mask.slice(s![
        letterbox.pad_height..letterbox.pad_height + letterbox.new_height,
        letterbox.pad_width..letterbox.pad_width + letterbox.new_width
    ]);

    let restored = resize(
        &array_to_mat(cropped)?,
        original_height,
        original_width,
        imgproc::INTER_NEAREST,
    )?;
    mat_to_array(&restored)
}

fn resize(src: &Mat, height: usize, width: usize, interpolation: i32) -> Result<Mat> {
    let mut dst = Mat::default();
    imgproc::resize(
        src,
        &mut dst,
        Size::new(width as i32, height as i32),
        0.0,
        0.0,
        interpolation,
    )?;
    Ok(dst)
}

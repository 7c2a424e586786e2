//! Utility functions for image tensors

use crate::error::{Result, VisionError};
use crate::processing::MinMaxBox;
use image::RgbImage;
use ndarray::{Array2, Array3, ArrayView2, ArrayViewMut2, Axis};
use opencv::core::{DataType, Mat, Scalar, Vec3f};
use opencv::prelude::*;

/// ImageNet per-channel mean (RGB)
pub const IMAGENET_MEAN: [f64; 3] = [0.485, 0.456, 0.406];
/// ImageNet per-channel standard deviation (RGB)
pub const IMAGENET_STD: [f64; 3] = [0.229, 0.224, 0.225];

/// Convert an RGB image to a `CV_32FC3` Mat scaled to [0, 1], channels kept in RGB order
pub fn rgb_to_mat(image: &RgbImage) -> Result<Mat> {
    let (width, height) = image.dimensions();
    let mut mat = Mat::new_rows_cols_with_default(
        height as i32,
        width as i32,
        Vec3f::opencv_type(),
        Scalar::all(0.0),
    )?;

    for (dst, px) in mat.data_typed_mut::<Vec3f>()?.iter_mut().zip(image.pixels()) {
        *dst = Vec3f::from([px[0] as f32 / 255.0, px[1] as f32 / 255.0, px[2] as f32 / 255.0]);
    }
    Ok(mat)
}

/// Copy a continuous `CV_32FC3` Mat into an `(H, W, 3)` array
pub fn mat_to_hwc(mat: &Mat) -> Result<Array3<f32>> {
    let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
    let data: Vec<f32> = mat
        .data_typed::<Vec3f>()?
        .iter()
        .flat_map(|v| [v[0], v[1], v[2]])
        .collect();
    Ok(Array3::from_shape_vec((rows, cols, 3), data)?)
}

/// Copy a 2-D array into a single-channel Mat of the matching element type
pub fn array_to_mat<T: DataType>(array: ArrayView2<'_, T>) -> Result<Mat> {
    let (rows, cols) = array.dim();
    let mut mat = Mat::new_rows_cols_with_default(rows as i32, cols as i32, T::opencv_type(), Scalar::all(0.0))?;
    for (dst, src) in mat.data_typed_mut::<T>()?.iter_mut().zip(array.iter()) {
        *dst = *src;
    }
    Ok(mat)
}

/// Copy a continuous single-channel Mat into a 2-D array
pub fn mat_to_array<T: DataType>(mat: &Mat) -> Result<Array2<T>> {
    let (rows, cols) = (mat.rows() as usize, mat.cols() as usize);
    let data = mat.data_typed::<T>()?.to_vec();
    Ok(Array2::from_shape_vec((rows, cols), data)?)
}

/// Reorder an `(H, W, C)` array into a contiguous `(C, H, W)` array
pub fn hwc_to_chw(hwc: Array3<f32>) -> Array3<f32> {
    hwc.permuted_axes([2, 0, 1]).as_standard_layout().into_owned()
}

/// Standardize a `(3, H, W)` array in place with ImageNet statistics.
///
/// Each step is evaluated in double precision and stored back as f32.
pub fn apply_imagenet_normalization(chw: &mut Array3<f32>) {
    for (c, mut plane) in chw.axis_iter_mut(Axis(0)).enumerate().take(3) {
        normalize_plane(&mut plane, IMAGENET_MEAN[c], IMAGENET_STD[c]);
    }
}

fn normalize_plane(plane: &mut ArrayViewMut2<'_, f32>, mean: f64, std: f64) {
    plane.mapv_inplace(|v| {
        let centered = (v as f64 - mean) as f32;
        (centered as f64 / std) as f32
    });
}

/// Logistic function
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Crop `bbox` out of `image`, clamping the rectangle to the image bounds.
///
/// Bounds are half-open (`x_min..x_max`, `y_min..y_max`); a rectangle that is empty
/// after clamping is an error.
pub fn crop_rgb(image: &RgbImage, bbox: &MinMaxBox) -> Result<RgbImage> {
    let (width, height) = image.dimensions();
    let x_min = bbox.x_min.min(width);
    let x_max = bbox.x_max.min(width);
    let y_min = bbox.y_min.min(height);
    let y_max = bbox.y_max.min(height);

    if x_max <= x_min || y_max <= y_min {
        return Err(VisionError::Processing(format!(
            "Empty crop for box x {}..{}, y {}..{} in {}x{} image",
            bbox.x_min, bbox.x_max, bbox.y_min, bbox.y_max, width, height
        )));
    }

    Ok(image::imageops::crop_imm(image, x_min, y_min, x_max - x_min, y_max - y_min).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_rgb_to_mat_scales_to_unit_range() {
        let image = RgbImage::from_fn(3, 2, |x, y| Rgb([255, (x * 50) as u8, (y * 100) as u8]));
        let mat = rgb_to_mat(&image).unwrap();
        assert_eq!((mat.rows(), mat.cols(), mat.channels()), (2, 3, 3));
        let hwc = mat_to_hwc(&mat).unwrap();
        assert_eq!(hwc.dim(), (2, 3, 3));
        assert_eq!(hwc[[0, 0, 0]], 1.0);
        assert!((hwc[[1, 2, 1]] - 100.0 / 255.0).abs() < 1e-7);
        assert!((hwc[[1, 2, 2]] - 100.0 / 255.0).abs() < 1e-7);
    }

    #[test]
    fn test_array_mat_roundtrip_keeps_row_major_order() {
        let array = Array2::from_shape_fn((3, 4), |(y, x)| (y * 10 + x) as u8);
        let mat = array_to_mat(array.view()).unwrap();
        assert_eq!(*mat.at_2d::<u8>(2, 1).unwrap(), 21);
        assert_eq!(mat_to_array::<u8>(&mat).unwrap(), array);

        // Transposed views are copied in logical order
        let transposed = array.t();
        let mat = array_to_mat(transposed).unwrap();
        assert_eq!(mat_to_array::<u8>(&mat).unwrap(), transposed.to_owned());
    }

    #[test]
    fn test_mat_element_type_is_checked() {
        let array = Array2::<f32>::zeros((2, 2));
        let mat = array_to_mat(array.view()).unwrap();
        assert!(mat_to_array::<u8>(&mat).is_err());
    }

    #[test]
    fn test_hwc_to_chw_layout() {
        let hwc = Array3::from_shape_fn((2, 2, 3), |(y, x, c)| (c * 100 + y * 10 + x) as f32);
        let chw = hwc_to_chw(hwc);
        assert_eq!(chw.dim(), (3, 2, 2));
        assert_eq!(chw[[2, 1, 0]], 210.0);
        assert!(chw.is_standard_layout());
    }

    #[test]
    fn test_apply_imagenet_normalization() {
        let mut data = Array3::<f32>::from_elem((3, 2, 2), 0.5);
        apply_imagenet_normalization(&mut data);
        for c in 0..3 {
            let expected = (0.5 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
            assert!((data[[c, 1, 1]] as f64 - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_apply_imagenet_normalization_empty() {
        let mut data = Array3::<f32>::zeros((3, 0, 0));
        apply_imagenet_normalization(&mut data);
        assert_eq!(data.len(), 0);
    }

    #[test]
    fn test_sigmoid() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(10.0) > 0.99);
        assert!(sigmoid(-10.0) < 0.01);
    }

    #[test]
    fn test_crop_rgb_clamps_to_image() {
        let image = RgbImage::from_fn(10, 8, |x, y| Rgb([x as u8, y as u8, 0]));
        let bbox = MinMaxBox {
            x_min: 6,
            x_max: 50,
            y_min: 2,
            y_max: 4,
        };
        let crop = crop_rgb(&image, &bbox).unwrap();
        assert_eq!(crop.dimensions(), (4, 2));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([6, 2, 0]));
    }

    #[test]
    fn test_crop_rgb_empty_is_error() {
        let image = RgbImage::new(10, 8);
        let bbox = MinMaxBox {
            x_min: 12,
            x_max: 20,
            y_min: 0,
            y_max: 4,
        };
        assert!(crop_rgb(&image, &bbox).is_err());
    }
}

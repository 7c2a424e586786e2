//! Connected-component labeling of binary masks

use super::bbox::CocoBox;
use crate::error::Result;
use crate::utils::{array_to_mat, mat_to_array};
use ndarray::{Array2, ArrayView2};
use opencv::core::{Mat, CV_32S};
use opencv::imgproc;
use opencv::prelude::*;

const CONNECTIVITY: i32 = 4;

/// Label the 4-connected foreground regions of `mask`.
///
/// Any nonzero value is foreground. Labels start at 1 and are assigned in raster
/// order of each component's first pixel; background stays 0.
/// Returns the label image and the number of components.
pub fn label_components(mask: ArrayView2<'_, u8>) -> Result<(Array2<u32>, usize)> {
    if mask.is_empty() {
        return Ok((Array2::zeros(mask.dim()), 0));
    }

    let src = array_to_mat(mask)?;
    let mut labels = Mat::default();
    let count = imgproc::connected_components(&src, &mut labels, CONNECTIVITY, CV_32S)?;
    let labels = mat_to_array::<i32>(&labels)?.mapv(|v| v as u32);

    // OpenCV counts the background as label 0
    Ok((labels, (count as usize).saturating_sub(1)))
}

/// Tight bounding box of every connected foreground component, in label order.
pub fn masks_to_bboxes(mask: ArrayView2<'_, u8>) -> Result<Vec<CocoBox>> {
    if mask.is_empty() {
        return Ok(Vec::new());
    }

    let src = array_to_mat(mask)?;
    let mut labels = Mat::default();
    let mut stats = Mat::default();
    let mut centroids = Mat::default();
    let count = imgproc::connected_components_with_stats(
        &src,
        &mut labels,
        &mut stats,
        &mut centroids,
        CONNECTIVITY,
        CV_32S,
    )?;

    (1..count)
        .map(|label| {
            let stat = |field: i32| -> Result<u32> { Ok(*stats.at_2d::<i32>(label, field)? as u32) };
            Ok(CocoBox::new(
                stat(imgproc::CC_STAT_LEFT)?,
                stat(imgproc::CC_STAT_TOP)?,
                stat(imgproc::CC_STAT_WIDTH)?,
                stat(imgproc::CC_STAT_HEIGHT)?,
            ))
        })
        .collect()
}

//! Bounding box representations

use serde::{Deserialize, Serialize};

/// Axis-aligned box as `[x, y, width, height]` (COCO layout).
///
/// `width` and `height` count pixels inclusively, so a single-pixel component is 1x1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "[u32; 4]", from = "[u32; 4]")]
pub struct CocoBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CocoBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

impl From<CocoBox> for [u32; 4] {
    fn from(b: CocoBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

impl From<[u32; 4]> for CocoBox {
    fn from([x, y, width, height]: [u32; 4]) -> Self {
        Self { x, y, width, height }
    }
}

/// Box as explicit min/max corners, used to slice the source image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinMaxBox {
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

/// Convert a COCO box into min/max corners.
///
/// NOTE: `y_max` is derived from the box width, not its height. Existing clients rely on
/// the crops this produces, so non-square boxes keep that behaviour.
pub fn prepare_bbox(bbox: &CocoBox) -> MinMaxBox {
    MinMaxBox {
        x_min: bbox.x,
        x_max: bbox.x + bbox.width,
        y_min: bbox.y,
        y_max: bbox.y + bbox.width,
    }
}

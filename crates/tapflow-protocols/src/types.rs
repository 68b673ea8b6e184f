//! Shared value types: rectangles, recognition targets, raster images.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;

/// An axis-aligned rectangle in screen coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    /// Center point of the rectangle.
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.w / 2, self.y + self.h / 2)
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    /// Translate by another rect interpreted as an offset (x/y shift plus
    /// w/h growth).
    pub fn offset_by(&self, delta: Rect) -> Rect {
        Rect {
            x: self.x + delta.x,
            y: self.y + delta.y,
            w: self.w + delta.w,
            h: self.h + delta.h,
        }
    }

    /// Serialize as the wire form `[x, y, w, h]`.
    pub fn to_array(&self) -> [i32; 4] {
        [self.x, self.y, self.w, self.h]
    }

    pub fn from_array(a: [i32; 4]) -> Self {
        Self {
            x: a[0],
            y: a[1],
            w: a[2],
            h: a[3],
        }
    }
}

/// Where a recognition or action should aim.
///
/// Resolved by the engine at execution time: `Node` looks up the last
/// recognition box cached for the named node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Target {
    /// The whole screen (recognition) or the current node's own box (action).
    #[default]
    Anywhere,
    /// A fixed region.
    Region(Rect),
    /// The last hit box of a previously executed node.
    Node(String),
}

/// An opaque raster image.
///
/// The core never inspects pixels beyond byte equality; decoding and vision
/// algorithms live behind the capability traits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    pub rows: i32,
    pub cols: i32,
    /// Pixel format tag, opaque to the core (matches the producer's encoding).
    pub pixel_type: i32,
    pub data: Bytes,
}

impl Image {
    pub fn new(rows: i32, cols: i32, pixel_type: i32, data: impl Into<Bytes>) -> Self {
        Self {
            rows,
            cols,
            pixel_type,
            data: data.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

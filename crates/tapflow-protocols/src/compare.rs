//! Frame-similarity comparison for the wait-for-freeze gate.

use crate::types::{Image, Rect};

/// Compares two consecutive captures of a region for visual stability.
pub trait FrameComparator: Send + Sync {
    /// True when the two frames are "the same" under the given threshold.
    ///
    /// `method` is an algorithm-specific tag carried through from the
    /// pipeline definition; implementations may ignore it.
    fn same(&self, prev: &Image, curr: &Image, roi: Rect, threshold: f64, method: i32) -> bool;
}

/// Byte-difference comparator.
///
/// Counts equal bytes over the full frame and compares the ratio against the
/// threshold. Deliberately not a vision algorithm: real CV comparators plug
/// in through the trait.
#[derive(Debug, Default)]
pub struct DiffComparator;

impl FrameComparator for DiffComparator {
    fn same(&self, prev: &Image, curr: &Image, _roi: Rect, threshold: f64, _method: i32) -> bool {
        if prev.data.len() != curr.data.len() || prev.data.is_empty() {
            return false;
        }
        let equal = prev
            .data
            .iter()
            .zip(curr.data.iter())
            .filter(|(a, b)| a == b)
            .count();
        equal as f64 / prev.data.len() as f64 >= threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img(bytes: &[u8]) -> Image {
        Image::new(1, bytes.len() as i32, 0, bytes.to_vec())
    }

    #[test]
    fn identical_frames_match() {
        let a = img(&[1, 2, 3, 4]);
        assert!(DiffComparator.same(&a, &a.clone(), Rect::default(), 0.95, 0));
    }

    #[test]
    fn different_frames_do_not_match() {
        let a = img(&[1, 2, 3, 4]);
        let b = img(&[9, 9, 9, 9]);
        assert!(!DiffComparator.same(&a, &b, Rect::default(), 0.95, 0));
    }

    #[test]
    fn size_mismatch_is_not_same() {
        let a = img(&[1, 2, 3, 4]);
        let b = img(&[1, 2, 3]);
        assert!(!DiffComparator.same(&a, &b, Rect::default(), 0.0, 0));
    }

    #[test]
    fn threshold_is_a_ratio() {
        let a = img(&[1, 2, 3, 4]);
        let b = img(&[1, 2, 3, 9]);
        assert!(DiffComparator.same(&a, &b, Rect::default(), 0.75, 0));
        assert!(!DiffComparator.same(&a, &b, Rect::default(), 0.8, 0));
    }
}

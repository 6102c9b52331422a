//! Preview size negotiation.
//!
//! Drivers report the sizes they can stream in arbitrary order. The list is
//! sorted with [`compare_sizes`] and the first entry that covers the request
//! in both dimensions wins.

use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;

/// A frame resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Size { width, height }
    }

    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether this size is at least `other` in both width and height.
    pub const fn covers(&self, other: Size) -> bool {
        self.width >= other.width && self.height >= other.height
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Orders sizes by component-wise dominance, falling back to pixel area when
/// neither size dominates the other.
///
/// Distinct sizes with the same area are ordered by width so the ordering is
/// total and sorting stays deterministic.
pub fn compare_sizes(a: &Size, b: &Size) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }
    if a.width > b.width && a.height > b.height {
        return Ordering::Greater;
    }
    if a.width < b.width && a.height < b.height {
        return Ordering::Less;
    }
    a.area()
        .cmp(&b.area())
        .then_with(|| a.width.cmp(&b.width))
}

/// Sort a size list in place using [`compare_sizes`].
pub fn sort_sizes(sizes: &mut [Size]) {
    sizes.sort_by(compare_sizes);
}

/// Pick the smallest supported size that covers `requested`.
///
/// Returns `None` when no supported size is large enough; callers fall back
/// to the driver's default preview size in that case.
pub fn select_preview_size(supported: &[Size], requested: Size) -> Option<Size> {
    tracing::debug!("origin size list: {:?}", supported);

    let mut sorted = supported.to_vec();
    sort_sizes(&mut sorted);
    tracing::debug!("sorted size list: {:?}", sorted);

    sorted.into_iter().find(|size| size.covers(requested))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn common_sizes() -> Vec<Size> {
        vec![
            Size::new(1280, 720),
            Size::new(176, 144),
            Size::new(640, 480),
            Size::new(320, 240),
        ]
    }

    #[test]
    fn test_exact_match_is_selected() {
        let chosen = select_preview_size(&common_sizes(), Size::new(640, 480));
        assert_eq!(chosen, Some(Size::new(640, 480)));
    }

    #[test]
    fn test_next_larger_size_is_selected() {
        let chosen = select_preview_size(&common_sizes(), Size::new(800, 600));
        assert_eq!(chosen, Some(Size::new(1280, 720)));
    }

    #[test]
    fn test_request_larger_than_all_sizes() {
        assert_eq!(select_preview_size(&common_sizes(), Size::new(1920, 1080)), None);
        assert_eq!(select_preview_size(&[], Size::new(320, 240)), None);
    }

    #[test]
    fn test_sort_orders_by_dominance_then_area() {
        let mut sizes = vec![
            Size::new(640, 480),
            Size::new(1280, 720),
            Size::new(800, 448),
            Size::new(176, 144),
            Size::new(960, 240),
        ];
        sort_sizes(&mut sizes);
        assert_eq!(
            sizes,
            vec![
                Size::new(176, 144),
                Size::new(960, 240),
                Size::new(640, 480),
                Size::new(800, 448),
                Size::new(1280, 720),
            ]
        );
    }

    #[test]
    fn test_equal_area_sizes_sort_deterministically() {
        let mut a = vec![Size::new(480, 640), Size::new(640, 480)];
        let mut b = vec![Size::new(640, 480), Size::new(480, 640)];
        sort_sizes(&mut a);
        sort_sizes(&mut b);
        assert_eq!(a, b);
        assert_eq!(a[0], Size::new(480, 640));
    }

    #[test]
    fn test_partially_larger_size_is_skipped() {
        // 960x240 sorts before 640x480 but is too short for the request.
        let sizes = vec![Size::new(960, 240), Size::new(640, 480)];
        assert_eq!(
            select_preview_size(&sizes, Size::new(600, 400)),
            Some(Size::new(640, 480))
        );
    }

    #[test]
    fn test_compare_is_antisymmetric() {
        let sizes = common_sizes();
        for a in &sizes {
            for b in &sizes {
                assert_eq!(compare_sizes(a, b), compare_sizes(b, a).reverse());
            }
        }
    }
}

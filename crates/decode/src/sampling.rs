//! Power-of-two sub-sampling
//!
//! A variant is decoded at `natural / factor` so that memory stays bounded by
//! the displayed size rather than by the source resolution.

/// Pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Bounds {
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Dimensions after sub-sampling by `factor`, rounded up
    pub fn scaled(&self, factor: u32) -> Bounds {
        let factor = factor.max(1);
        Bounds {
            width: self.width.div_ceil(factor),
            height: self.height.div_ceil(factor),
        }
    }
}

/// Requested display box
///
/// A zero in either dimension asks for the natural size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DecodeRequest {
    pub width: u32,
    pub height: u32,
}

impl DecodeRequest {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Request for the natural size
    pub const fn full() -> Self {
        Self::new(0, 0)
    }

    /// Sub-sampling factor to use for a source of the given natural size
    pub fn factor_for(&self, natural: Bounds) -> u32 {
        size_factor(natural.width, natural.height, self.width, self.height)
    }
}

/// Largest power of two that keeps the decoded image no smaller than the
/// requested box in both dimensions
///
/// Returns 1 when either requested dimension is zero.
pub fn size_factor(in_width: u32, in_height: u32, out_width: u32, out_height: u32) -> u32 {
    if out_width == 0 || out_height == 0 {
        return 1;
    }

    let mut factor = 1u32;
    while in_height / 2 / factor > out_height && in_width / 2 / factor > out_width {
        factor *= 2;
    }
    factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_target_means_natural_size() {
        assert_eq!(size_factor(4000, 3000, 0, 100), 1);
        assert_eq!(size_factor(4000, 3000, 100, 0), 1);
        assert_eq!(size_factor(4000, 3000, 0, 0), 1);
    }

    #[test]
    fn test_known_factors() {
        assert_eq!(size_factor(1000, 1000, 1000, 1000), 1);
        assert_eq!(size_factor(1000, 1000, 500, 500), 1);
        assert_eq!(size_factor(1000, 1000, 300, 300), 2);
        assert_eq!(size_factor(1000, 1000, 249, 249), 4);
        assert_eq!(size_factor(4000, 3000, 100, 100), 16);
        assert_eq!(size_factor(4096, 4096, 1, 1), 2048);
    }

    #[test]
    fn test_both_dimensions_must_allow_halving() {
        // Tall, narrow source: width blocks sub-sampling
        assert_eq!(size_factor(200, 4000, 150, 100), 1);
    }

    #[test]
    fn test_scaled_rounds_up() {
        let natural = Bounds::new(101, 50);
        assert_eq!(natural.scaled(1), natural);
        assert_eq!(natural.scaled(2), Bounds::new(51, 25));
        assert_eq!(natural.scaled(4), Bounds::new(26, 13));
        assert_eq!(natural.scaled(0), natural);
    }

    #[test]
    fn test_request_factor_for() {
        let request = DecodeRequest::new(100, 100);
        assert_eq!(request.factor_for(Bounds::new(800, 800)), 4);
        assert_eq!(DecodeRequest::full().factor_for(Bounds::new(800, 800)), 1);
    }

    proptest! {
        #[test]
        fn prop_factor_is_largest_valid_power_of_two(
            in_w in 0u32..20_000,
            in_h in 0u32..20_000,
            out_w in 1u32..5_000,
            out_h in 1u32..5_000,
        ) {
            let factor = size_factor(in_w, in_h, out_w, out_h);
            let halvable = |f: u32| in_h / 2 / f > out_h && in_w / 2 / f > out_w;

            prop_assert!(factor >= 1);
            prop_assert!(factor.is_power_of_two());
            prop_assert!(!halvable(factor));
            if factor > 1 {
                prop_assert!(halvable(factor / 2));
            }
        }
    }
}

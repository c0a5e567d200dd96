//! Input-size-dependent group normalization.

use burn::{
    nn::{GroupNorm, GroupNormConfig},
    prelude::*,
};

use crate::config::GROUP_NORM_EPSILON;

/// Number of group-norm groups for a feature map with `channels` channels.
///
/// Maps with at most 16 channels use `channels / 4` groups (integer
/// division, truncating), wider maps are fixed at 16 groups.
pub const fn group_count(channels: usize) -> usize {
    if channels <= 16 {
        channels / 4
    } else {
        16
    }
}

/// Builds the standard group normalization for a `channels`-wide feature map.
///
/// A map narrower than 4 channels would get zero groups; floor at one so
/// RGB stem inputs still normalize over a single group.
pub fn normalize<B: Backend>(channels: usize, device: &Device<B>) -> GroupNorm<B> {
    GroupNormConfig::new(group_count(channels).max(1), channels)
        .with_epsilon(GROUP_NORM_EPSILON)
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_count_small_maps() {
        assert_eq!(group_count(4), 1);
        assert_eq!(group_count(8), 2);
        assert_eq!(group_count(16), 4);
        // Integer division truncates for widths that are not multiples of 4.
        assert_eq!(group_count(6), 1);
        assert_eq!(group_count(15), 3);
    }

    #[test]
    fn group_count_wide_maps() {
        assert_eq!(group_count(17), 16);
        assert_eq!(group_count(32), 16);
        assert_eq!(group_count(256), 16);
    }
}

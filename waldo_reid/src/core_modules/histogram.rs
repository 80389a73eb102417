// THEORY:
// The `histogram` module turns a patch of pixels into the engine's appearance
// signature: a joint hue × saturation histogram. Hue and saturation describe *what
// colour* a person is wearing while ignoring *how bright* the scene is, which is what
// makes the signature usable across lighting changes. Binning throws away the spatial
// layout, so the signature also survives scale changes and most pose changes.
//
// Key architectural principles:
// 1.  **Pure function**: `FeatureExtractor::extract` has no hidden state. The same
//     pixels always produce the same vector.
// 2.  **Min-max normalization**: bins are rescaled so the fullest bin is 1.0 and an
//     empty bin is 0.0. A large crop and a small crop of the same shirt produce the
//     same shape. The sum of the vector is not meaningful.
// 3.  **Immutable output**: a `FeatureVector` cannot be modified once built. It is
//     owned by whichever collection keeps it (base set or adaptive cache) and cloned
//     when it moves between them.

use crate::core_modules::pixel::pixel::Pixel;
use crate::core_modules::region::Region;
use serde::{Deserialize, Serialize};

/// A normalized hue × saturation histogram, stored row-major by hue bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFeatureVector")]
pub struct FeatureVector {
    hue_bins: usize,
    saturation_bins: usize,
    bins: Vec<f32>,
}

/// Wire form of a `FeatureVector`, checked against its declared shape on the way in.
#[derive(Deserialize)]
struct RawFeatureVector {
    hue_bins: usize,
    saturation_bins: usize,
    bins: Vec<f32>,
}

impl TryFrom<RawFeatureVector> for FeatureVector {
    type Error = String;

    fn try_from(raw: RawFeatureVector) -> Result<Self, Self::Error> {
        let (h, s, len) = (raw.hue_bins, raw.saturation_bins, raw.bins.len());
        Self::from_bins(h, s, raw.bins)
            .ok_or_else(|| format!("{len} bins do not fill a {h}x{s} histogram"))
    }
}

impl FeatureVector {
    /// Builds a vector from raw bin values. Returns `None` if the length does not
    /// match the declared shape.
    pub fn from_bins(hue_bins: usize, saturation_bins: usize, bins: Vec<f32>) -> Option<Self> {
        if hue_bins == 0 || saturation_bins == 0 || bins.len() != hue_bins * saturation_bins {
            return None;
        }
        Some(Self { hue_bins, saturation_bins, bins })
    }

    pub fn hue_bins(&self) -> usize {
        self.hue_bins
    }

    pub fn saturation_bins(&self) -> usize {
        self.saturation_bins
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Value of a single (hue, saturation) bin.
    pub fn bin(&self, hue_bin: usize, saturation_bin: usize) -> Option<f32> {
        if hue_bin >= self.hue_bins || saturation_bin >= self.saturation_bins {
            return None;
        }
        self.bins.get(hue_bin * self.saturation_bins + saturation_bin).copied()
    }

    pub fn same_shape(&self, other: &FeatureVector) -> bool {
        self.hue_bins == other.hue_bins && self.saturation_bins == other.saturation_bins
    }
}

/// Computes `FeatureVector`s at a fixed bin resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureExtractor {
    hue_bins: usize,
    saturation_bins: usize,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_HUE_BINS, crate::config::DEFAULT_SATURATION_BINS)
    }
}

impl FeatureExtractor {
    /// Bin counts of zero are bumped to one so the extractor is always usable;
    /// configuration validation rejects them before they get here.
    pub fn new(hue_bins: usize, saturation_bins: usize) -> Self {
        Self {
            hue_bins: hue_bins.max(1),
            saturation_bins: saturation_bins.max(1),
        }
    }

    pub fn hue_bins(&self) -> usize {
        self.hue_bins
    }

    pub fn saturation_bins(&self) -> usize {
        self.saturation_bins
    }

    /// Builds the normalized hue × saturation histogram of `region`.
    pub fn extract(&self, region: &Region) -> FeatureVector {
        let mut counts = vec![0u32; self.hue_bins * self.saturation_bins];

        for rgb in region.pixels().pixels() {
            let pixel = Pixel::from(*rgb);
            let hue_bin = Self::bin_index(pixel.hue() / 360.0, self.hue_bins);
            let saturation_bin = Self::bin_index(pixel.saturation_hsv(), self.saturation_bins);
            counts[hue_bin * self.saturation_bins + saturation_bin] += 1;
        }

        FeatureVector {
            hue_bins: self.hue_bins,
            saturation_bins: self.saturation_bins,
            bins: Self::min_max_normalize(&counts),
        }
    }

    /// Maps a value in [0, 1] onto `0..bins`, with 1.0 landing in the last bin.
    #[inline]
    fn bin_index(fraction: f32, bins: usize) -> usize {
        let index = (fraction.clamp(0.0, 1.0) * bins as f32) as usize;
        index.min(bins - 1)
    }

    fn min_max_normalize(counts: &[u32]) -> Vec<f32> {
        let min = counts.iter().copied().min().unwrap_or(0);
        let max = counts.iter().copied().max().unwrap_or(0);
        if max == min {
            return vec![0.0; counts.len()];
        }
        let range = (max - min) as f32;
        counts.iter().map(|&c| (c - min) as f32 / range).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn region_from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> Rgb<u8>) -> Region {
        Region::new(RgbImage::from_fn(width, height, f)).expect("non-empty region")
    }

    #[test]
    fn shape_follows_extractor_resolution() {
        let extractor = FeatureExtractor::default();
        let region = region_from_fn(8, 8, |_, _| Rgb([200, 30, 30]));
        let feature = extractor.extract(&region);
        assert_eq!(feature.len(), 50 * 60);
        assert_eq!((feature.hue_bins(), feature.saturation_bins()), (50, 60));
    }

    #[test]
    fn values_are_min_max_normalized() {
        let extractor = FeatureExtractor::default();
        let region = region_from_fn(10, 10, |x, _| {
            if x < 7 { Rgb([255, 0, 0]) } else { Rgb([0, 0, 255]) }
        });
        let feature = extractor.extract(&region);
        let max = feature.as_slice().iter().cloned().fold(f32::MIN, f32::max);
        let min = feature.as_slice().iter().cloned().fold(f32::MAX, f32::min);
        assert_eq!(max, 1.0);
        assert_eq!(min, 0.0);
        // Pure red: hue 0, saturation 1 -> first hue bin, last saturation bin.
        assert_eq!(feature.bin(0, 59), Some(1.0));
        // Pure blue: hue 240 -> bin 33, holding 30/70 of the pixels relative to red.
        let blue = feature.bin(33, 59).expect("bin in range");
        assert!((blue - 30.0 / 70.0).abs() < 1e-6, "blue bin was {blue}");
    }

    #[test]
    fn extraction_is_deterministic() {
        let extractor = FeatureExtractor::default();
        let region = region_from_fn(31, 17, |x, y| {
            Rgb([(x * 8) as u8, (y * 15) as u8, ((x + y) * 3) as u8])
        });
        assert_eq!(extractor.extract(&region), extractor.extract(&region));
    }

    #[test]
    fn scale_does_not_change_the_signature() {
        let extractor = FeatureExtractor::default();
        let pattern = |x: u32, _y: u32| {
            if x % 2 == 0 { Rgb([20, 200, 40]) } else { Rgb([240, 220, 10]) }
        };
        let small = extractor.extract(&region_from_fn(4, 4, pattern));
        let large = extractor.extract(&region_from_fn(40, 40, pattern));
        assert_eq!(small, large);
    }

    #[test]
    fn brightness_does_not_change_the_signature() {
        let extractor = FeatureExtractor::new(18, 8);
        let bright = extractor.extract(&region_from_fn(6, 6, |_, _| Rgb([200, 100, 0])));
        let dim = extractor.extract(&region_from_fn(6, 6, |_, _| Rgb([100, 50, 0])));
        assert_eq!(bright, dim);
    }

    #[test]
    fn from_bins_checks_shape() {
        assert!(FeatureVector::from_bins(2, 3, vec![0.0; 6]).is_some());
        assert!(FeatureVector::from_bins(2, 3, vec![0.0; 5]).is_none());
        assert!(FeatureVector::from_bins(0, 3, vec![]).is_none());
    }

    #[test]
    fn deserializing_checks_the_shape() {
        let ok = r#"{"hue_bins":2,"saturation_bins":2,"bins":[0.0,1.0,0.5,0.25]}"#;
        let feature: FeatureVector = serde_json::from_str(ok).expect("well-formed histogram");
        assert_eq!(feature.len(), 4);
        assert_eq!(serde_json::to_string(&feature).expect("serialize"), ok);

        let short = r#"{"hue_bins":2,"saturation_bins":2,"bins":[0.0,1.0,0.5]}"#;
        let err = serde_json::from_str::<FeatureVector>(short).expect_err("three bins for 2x2");
        assert!(err.to_string().contains("2x2"), "{err}");
        let empty = r#"{"hue_bins":0,"saturation_bins":4,"bins":[]}"#;
        assert!(serde_json::from_str::<FeatureVector>(empty).is_err());
    }
}

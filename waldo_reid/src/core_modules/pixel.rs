// THEORY (per-pixel color):
// `Pixel` is the smallest unit of the appearance descriptor. It is a plain container
// for a single RGB pixel plus the two single-pixel quantities the descriptor is built
// from: hue and HSV saturation. Anything that needs more than one pixel (histograms,
// comparisons) belongs in higher-level modules.
//
// Channel forms kept per pixel:
//   • raw (0..255 bytes)
//   • normalized (0..1 sRGB): divide by 255.0, still gamma-encoded
//
// Optimal vs Accurate (feature-selected):
// - optimal (default): uses normalized sRGB directly, fastest, fine for realtime
// - accurate: uses an sRGB→linear LUT for colorimetrically correct hue/saturation
// Enable accurate with `--features accurate`. The LUT is a 256-entry `OnceLock`
// table, so the hot path is a lookup, never a `powf` per pixel.
//
// Hue is reported in degrees [0, 360). Saturation (HSV) is chroma / value in [0, 1].
// Achromatic pixels (chroma ~ 0) report hue 0, black reports saturation 0.

pub mod pixel {
    use std::sync::OnceLock;
    pub type Channel = u8;
    pub type NormalizedChannel = f32;
    pub type Hue = f32;
    pub type SaturationHSV = f32;
    pub type ValueHSV = f32;
    pub type Chroma = f32;

    const ACHROMATIC_EPSILON: f32 = 1e-6;

    static SRGB_TO_LINEAR_LUT: OnceLock<[NormalizedChannel; 256]> = OnceLock::new();

    /// One RGB sample with its normalized channels precomputed.
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct Pixel {
        pub red: Channel,
        pub green: Channel,
        pub blue: Channel,
        /// The red channel value (0.0-1.0).
        pub red_normalized: NormalizedChannel,
        /// The green channel value (0.0-1.0).
        pub green_normalized: NormalizedChannel,
        /// The blue channel value (0.0-1.0).
        pub blue_normalized: NormalizedChannel,
    }

    impl Pixel {
        pub fn new(red: Channel, green: Channel, blue: Channel) -> Self {
            Pixel {
                red,
                green,
                blue,
                red_normalized: red as NormalizedChannel / 255.0,
                green_normalized: green as NormalizedChannel / 255.0,
                blue_normalized: blue as NormalizedChannel / 255.0,
            }
        }

        #[inline]
        fn srgb_to_linear_normalized_from_byte(srgb_value: Channel) -> NormalizedChannel {
            let table = SRGB_TO_LINEAR_LUT.get_or_init(|| {
                let mut table = [0.0f32; 256];
                for (i, slot) in table.iter_mut().enumerate() {
                    let srgb_normalized = i as NormalizedChannel / 255.0;
                    *slot = if srgb_normalized <= 0.04045 {
                        srgb_normalized / 12.92
                    } else {
                        ((srgb_normalized + 0.055) / 1.055).powf(2.4)
                    };
                }
                table
            });
            table[srgb_value as usize]
        }

        fn linear_channels(&self) -> (f32, f32, f32) {
            (
                Self::srgb_to_linear_normalized_from_byte(self.red),
                Self::srgb_to_linear_normalized_from_byte(self.green),
                Self::srgb_to_linear_normalized_from_byte(self.blue),
            )
        }

        /// Shared hue formula over any (r, g, b) in [0, 1].
        fn hue_from(r: f32, g: f32, b: f32) -> Hue {
            let maximum_channel = r.max(g.max(b));
            let minimum_channel = r.min(g.min(b));
            let chroma = maximum_channel - minimum_channel;

            if chroma <= ACHROMATIC_EPSILON {
                return 0.0;
            }

            let inverse_chroma = 1.0 / chroma;
            let (base_difference, sector_offset) = if maximum_channel == r {
                (g - b, 0.0)
            } else if maximum_channel == g {
                (b - r, 2.0)
            } else {
                (r - g, 4.0)
            };

            let mut hue_degrees = (base_difference * inverse_chroma + sector_offset) * 60.0;
            if hue_degrees < 0.0 {
                hue_degrees += 360.0;
            }
            // Guard against 360.0 from rounding so callers can bin with `< 360`.
            if hue_degrees >= 360.0 {
                hue_degrees -= 360.0;
            }
            hue_degrees
        }

        fn saturation_from(r: f32, g: f32, b: f32) -> SaturationHSV {
            let maximum_channel = r.max(g.max(b));
            if maximum_channel <= ACHROMATIC_EPSILON {
                return 0.0;
            }
            (maximum_channel - r.min(g.min(b))) / maximum_channel
        }

        /// Hue angle in degrees [0, 360) over gamma-encoded sRGB. Fastest path.
        pub fn hue_optimal(&self) -> Hue {
            Self::hue_from(self.red_normalized, self.green_normalized, self.blue_normalized)
        }

        /// Hue angle in degrees [0, 360) over LUT-linearized channels.
        pub fn hue_accurate(&self) -> Hue {
            let (r, g, b) = self.linear_channels();
            Self::hue_from(r, g, b)
        }

        #[cfg(feature = "accurate")]
        pub fn hue(&self) -> Hue {
            self.hue_accurate()
        }

        #[cfg(not(feature = "accurate"))]
        pub fn hue(&self) -> Hue {
            self.hue_optimal()
        }

        /// Saturation (HSV): S = chroma / value, gamma-encoded sRGB.
        pub fn saturation_hsv_optimal(&self) -> SaturationHSV {
            Self::saturation_from(self.red_normalized, self.green_normalized, self.blue_normalized)
        }

        /// Saturation (HSV): S = chroma / value, LUT-linearized channels.
        pub fn saturation_hsv_accurate(&self) -> SaturationHSV {
            let (r, g, b) = self.linear_channels();
            Self::saturation_from(r, g, b)
        }

        #[cfg(feature = "accurate")]
        pub fn saturation_hsv(&self) -> SaturationHSV {
            self.saturation_hsv_accurate()
        }

        #[cfg(not(feature = "accurate"))]
        pub fn saturation_hsv(&self) -> SaturationHSV {
            self.saturation_hsv_optimal()
        }

        /// HSV Value (V): max(R, G, B) over normalized sRGB.
        pub fn value_hsv(&self) -> ValueHSV {
            self.red_normalized.max(self.green_normalized.max(self.blue_normalized))
        }

        /// Chroma: max - min over normalized sRGB.
        pub fn chroma(&self) -> Chroma {
            let min = self.red_normalized.min(self.green_normalized.min(self.blue_normalized));
            self.value_hsv() - min
        }
    }

    impl From<image::Rgb<u8>> for Pixel {
        fn from(rgb: image::Rgb<u8>) -> Self {
            let [r, g, b] = rgb.0;
            Pixel::new(r, g, b)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pixel::Pixel;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn primary_hues() {
        assert!(close(Pixel::new(255, 0, 0).hue_optimal(), 0.0));
        assert!(close(Pixel::new(0, 255, 0).hue_optimal(), 120.0));
        assert!(close(Pixel::new(0, 0, 255).hue_optimal(), 240.0));
        assert!(close(Pixel::new(255, 0, 255).hue_optimal(), 300.0));
    }

    #[test]
    fn gray_is_achromatic() {
        let gray = Pixel::new(128, 128, 128);
        assert_eq!(gray.hue(), 0.0);
        assert_eq!(gray.saturation_hsv(), 0.0);
        assert_eq!(Pixel::new(0, 0, 0).saturation_hsv(), 0.0);
    }

    #[test]
    fn saturation_of_pure_and_pastel_colors() {
        assert!(close(Pixel::new(255, 0, 0).saturation_hsv_optimal(), 1.0));
        let pastel = Pixel::new(255, 128, 128).saturation_hsv_optimal();
        assert!(pastel > 0.4 && pastel < 0.6, "pastel saturation was {pastel}");
    }

    #[test]
    fn accurate_and_optimal_agree_on_primaries() {
        let red = Pixel::new(255, 0, 0);
        assert!(close(red.hue_accurate(), red.hue_optimal()));
        assert!(close(red.saturation_hsv_accurate(), 1.0));
    }

    #[test]
    fn hue_stays_below_full_turn() {
        for r in (0..=255u8).step_by(17) {
            for b in (0..=255u8).step_by(17) {
                let hue = Pixel::new(r, 0, b).hue();
                assert!((0.0..360.0).contains(&hue), "hue {hue} out of range");
            }
        }
    }
}

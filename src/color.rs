//! Color representation and the distance metric.
//!
//! All quantization math runs on premultiplied-alpha colors linearized to a
//! fixed internal gamma. Source images with arbitrary gammas share one code
//! path through a per-image lookup table, and the internal exponent is mildly
//! perceptual so equal distances look roughly equally wrong.

pub use rgb::RGBA8 as RGBA;

/// Exponent colors are stored at internally, regardless of source gamma.
pub(crate) const INTERNAL_GAMMA: f64 = 0.5499;

/// Assumed gamma of images that do not declare one.
pub(crate) const DEFAULT_GAMMA: f64 = 0.45455;

/// Alpha below 1/256 rounds to nothing in 8-bit output, so such pixels are
/// treated as fully transparent throughout.
pub(crate) const MIN_VISIBLE_ALPHA: f32 = 1.0 / 256.0;

/// Sentinel for "no error limit"; larger than any reachable MSE.
pub(crate) const MAX_DIFF: f64 = 1e20;

/// Premultiplied linear color. Alpha comes first to mirror the metric, which
/// folds alpha into every channel term.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct FPixel {
    pub a: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl FPixel {
    pub(crate) const TRANSPARENT: FPixel = FPixel {
        a: 0.0,
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    /// R/G/B by index, for code that iterates over spatial axes.
    pub(crate) fn channel(self, axis: usize) -> f32 {
        match axis {
            0 => self.r,
            1 => self.g,
            _ => self.b,
        }
    }
}

/// Table linearizing 8-bit channel values from one source gamma.
#[derive(Debug, Clone)]
pub(crate) struct GammaLut {
    lut: [f32; 256],
}

impl GammaLut {
    pub(crate) fn new(gamma: f64) -> Self {
        let mut lut = [0.0f32; 256];
        for (i, v) in lut.iter_mut().enumerate() {
            *v = (i as f64 / 255.0).powf(INTERNAL_GAMMA / gamma) as f32;
        }
        GammaLut { lut }
    }

    /// 8-bit straight-alpha RGBA to premultiplied linear.
    pub(crate) fn to_linear(&self, px: RGBA) -> FPixel {
        let a = f32::from(px.a) / 255.0;
        FPixel {
            a,
            r: self.lut[px.r as usize] * a,
            g: self.lut[px.g as usize] * a,
            b: self.lut[px.b as usize] * a,
        }
    }
}

/// Premultiplied linear back to 8-bit straight alpha at `gamma`.
pub(crate) fn to_rgba(gamma: f64, px: FPixel) -> RGBA {
    if px.a < MIN_VISIBLE_ALPHA {
        return RGBA {
            r: 0,
            g: 0,
            b: 0,
            a: 0,
        };
    }
    let exp = (gamma / INTERNAL_GAMMA) as f32;
    // Unpremultiplied channels are in 0..=1, so scaling by 256 and flooring
    // rounds each 1/256-wide bucket down to its 8-bit value.
    let clamp = |v: f32| {
        let v = v * 256.0;
        if v >= 255.0 {
            255
        } else if v > 0.0 {
            v as u8
        } else {
            0
        }
    };
    RGBA {
        r: clamp((px.r / px.a).powf(exp)),
        g: clamp((px.g / px.a).powf(exp)),
        b: clamp((px.b / px.a).powf(exp)),
        a: clamp(px.a),
    }
}

#[inline]
fn channel_difference(x: f32, y: f32, alphas: f32) -> f32 {
    // How the channel differs when composited on black vs on white; the
    // worse of the two counts. Alpha mismatch only shows on white.
    let on_black = x - y;
    let on_white = on_black + alphas;
    (on_black * on_black).max(on_white * on_white)
}

/// Squared distance between two premultiplied linear colors.
///
/// Not Euclidean: each channel contributes `max(on_black^2, on_white^2)`,
/// which is always at least the plain squared channel difference. Nearest
/// neighbor search relies on that lower bound.
#[inline]
pub(crate) fn color_difference(px: FPixel, py: FPixel) -> f32 {
    let alphas = py.a - px.a;
    channel_difference(px.r, py.r, alphas)
        + channel_difference(px.g, py.g, alphas)
        + channel_difference(px.b, py.b, alphas)
}

/// Maps 0..=100 quality to the mean squared error it tolerates. The curve is
/// steep near 100 so the top grades stay meaningful.
pub(crate) fn quality_to_mse(quality: u8) -> f64 {
    if quality == 0 {
        return MAX_DIFF;
    }
    let q = f64::from(quality);
    2.5 / (210.0 + q).powf(1.2) * (100.1 - q) / 100.0
}

/// Inverse of [`quality_to_mse`]: highest quality grade whose tolerance the
/// given error fits under.
pub(crate) fn mse_to_quality(mse: f64) -> u8 {
    for q in (1..=100u8).rev() {
        // rounding slack so a palette produced at quality q grades as q
        if mse <= quality_to_mse(q) + 0.000_001 {
            return q;
        }
    }
    0
}

/// Internal MSE is per unit-scale channel; callers expect the 8-bit scale
/// averaged over three channels.
pub(crate) fn mse_to_standard_mse(mse: f64) -> f64 {
    mse * 65536.0 / 6.0
}

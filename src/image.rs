//! Source image wrapper: pixel storage, linearized copy, importance map,
//! fixed colors, and the cached histogram.

use std::borrow::Cow;
use std::sync::OnceLock;

use crate::attr::Attributes;
use crate::color::{FPixel, GammaLut, DEFAULT_GAMMA, RGBA};
use crate::error::Error;
use crate::histogram::Histogram;
use crate::masking;

/// Who keeps the pixel buffer alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOwnership {
    /// The image holds its own copy of the pixels.
    EngineCopies,
    /// The image borrows the caller's buffer for its whole lifetime.
    CallerRetains,
}

/// An image prepared for quantization.
///
/// Construction linearizes the pixels into the internal working space and,
/// unless the speed setting skips it, computes the contrast-based importance
/// map. The histogram is built lazily on first use and cached, so one image
/// can be quantized under several [`Attributes`] without rescanning pixels.
pub struct Image<'pixels> {
    pixels: Cow<'pixels, [RGBA]>,
    width: usize,
    height: usize,
    gamma: f64,
    lut: GammaLut,
    f_pixels: Vec<FPixel>,
    importance: Option<Vec<u8>>,
    fixed_colors: Vec<RGBA>,
    histogram: OnceLock<Histogram>,
}

impl<'pixels> Image<'pixels> {
    /// Wraps a borrowed pixel buffer, `width * height` pixels in row-major
    /// order. `gamma` is the source transfer exponent, `0.0` for the sRGB-ish
    /// default. The buffer must stay untouched while the image is alive.
    pub fn new(
        attr: &Attributes,
        pixels: &'pixels [RGBA],
        width: usize,
        height: usize,
        gamma: f64,
    ) -> Result<Self, Error> {
        Image::from_cow(attr, Cow::Borrowed(pixels), width, height, gamma)
    }

    /// Like [`new`](Self::new) but takes ownership of the buffer, so the
    /// image is free of borrowed lifetimes.
    pub fn new_owned(
        attr: &Attributes,
        pixels: Vec<RGBA>,
        width: usize,
        height: usize,
        gamma: f64,
    ) -> Result<Image<'static>, Error> {
        Image::from_cow(attr, Cow::Owned(pixels), width, height, gamma)
    }

    fn from_cow(
        attr: &Attributes,
        mut pixels: Cow<'pixels, [RGBA]>,
        width: usize,
        height: usize,
        gamma: f64,
    ) -> Result<Self, Error> {
        if width == 0 || height == 0 {
            return Err(Error::ValueOutOfRange);
        }
        if !(0.0..=1.0).contains(&gamma) {
            return Err(Error::ValueOutOfRange);
        }
        let expected = width
            .checked_mul(height)
            .ok_or(Error::ValueOutOfRange)?;
        if pixels.len() != expected {
            return Err(Error::ValueOutOfRange);
        }

        let min_opaque = attr.min_opaque_val();
        if min_opaque <= 254.0 / 255.0 {
            snap_almost_opaque(pixels.to_mut(), min_opaque);
        }

        let gamma = if gamma > 0.0 { gamma } else { DEFAULT_GAMMA };
        let lut = GammaLut::new(gamma);
        let f_pixels: Vec<FPixel> = pixels.iter().map(|&px| lut.to_linear(px)).collect();

        // contrast needs a few pixels in each direction to mean anything
        let importance = if attr.use_contrast_maps() && width >= 4 && height >= 4 {
            Some(masking::importance_map(&f_pixels, width, height))
        } else {
            None
        };

        Ok(Image {
            pixels,
            width,
            height,
            gamma,
            lut,
            f_pixels,
            importance,
            fixed_colors: Vec::new(),
            histogram: OnceLock::new(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn gamma(&self) -> f64 {
        self.gamma
    }

    /// Reserves a palette entry for this exact color. Refinement will not
    /// move it. At most 256 fixed colors, and none can be added once the
    /// histogram has been built.
    pub fn add_fixed_color(&mut self, color: RGBA) -> Result<(), Error> {
        if self.fixed_colors.len() >= 256 || self.histogram.get().is_some() {
            return Err(Error::ValueOutOfRange);
        }
        self.fixed_colors.push(color);
        Ok(())
    }

    /// Switches who owns the pixel buffer. `EngineCopies` clones a borrowed
    /// buffer so the caller may free theirs; `CallerRetains` is only valid
    /// while the buffer is still borrowed. Rejected once the histogram has
    /// been built, as the buffer may already have been read.
    pub fn set_memory_ownership(&mut self, ownership: MemoryOwnership) -> Result<(), Error> {
        if self.histogram.get().is_some() {
            return Err(Error::ValueOutOfRange);
        }
        match ownership {
            MemoryOwnership::EngineCopies => {
                self.pixels.to_mut();
                Ok(())
            }
            MemoryOwnership::CallerRetains => match self.pixels {
                Cow::Borrowed(_) => Ok(()),
                Cow::Owned(_) => Err(Error::ValueOutOfRange),
            },
        }
    }

    pub fn memory_ownership(&self) -> MemoryOwnership {
        match self.pixels {
            Cow::Borrowed(_) => MemoryOwnership::CallerRetains,
            Cow::Owned(_) => MemoryOwnership::EngineCopies,
        }
    }

    pub(crate) fn fixed_colors(&self) -> &[RGBA] {
        &self.fixed_colors
    }

    pub(crate) fn lut(&self) -> &GammaLut {
        &self.lut
    }

    pub(crate) fn row_rgba(&self, row: usize) -> &[RGBA] {
        &self.pixels[row * self.width..(row + 1) * self.width]
    }

    pub(crate) fn row_f(&self, row: usize) -> &[FPixel] {
        &self.f_pixels[row * self.width..(row + 1) * self.width]
    }

    pub(crate) fn importance(&self) -> Option<&[u8]> {
        self.importance.as_deref()
    }

    pub(crate) fn histogram(&self, attr: &Attributes) -> Result<&Histogram, Error> {
        if let Some(hist) = self.histogram.get() {
            return Ok(hist);
        }
        let built = Histogram::build(self, attr)?;
        Ok(self.histogram.get_or_init(|| built))
    }
}

/// Workaround for renderers that treat any transparency as fully invisible:
/// stretches alpha in `[169/256 * min_opaque, min_opaque]` up to 255 so
/// nearly-opaque pixels survive as opaque.
fn snap_almost_opaque(pixels: &mut [RGBA], min_opaque: f32) {
    let almost_opaque = min_opaque * 169.0 / 256.0;
    let almost_opaque_int = (almost_opaque * 255.0) as u8;

    for px in pixels {
        if px.a >= almost_opaque_int {
            let al = f32::from(px.a) / 255.0;
            let al = almost_opaque
                + (al - almost_opaque) * (1.0 - almost_opaque) / (min_opaque - almost_opaque);
            px.a = if al >= 255.0 / 256.0 {
                255
            } else {
                (al * 256.0) as u8
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPAQUE_RED: RGBA = RGBA {
        r: 255,
        g: 0,
        b: 0,
        a: 255,
    };

    #[test]
    fn rejects_bad_dimensions() {
        let attr = Attributes::new();
        let pixels = [OPAQUE_RED; 4];
        assert!(matches!(
            Image::new(&attr, &pixels, 0, 4, 0.0),
            Err(Error::ValueOutOfRange)
        ));
        assert!(matches!(
            Image::new(&attr, &pixels, 4, 0, 0.0),
            Err(Error::ValueOutOfRange)
        ));
        assert!(matches!(
            Image::new(&attr, &pixels, 3, 2, 0.0),
            Err(Error::ValueOutOfRange)
        ));
        assert!(matches!(
            Image::new(&attr, &pixels, 2, 2, 1.5),
            Err(Error::ValueOutOfRange)
        ));
        assert!(Image::new(&attr, &pixels, 2, 2, 0.0).is_ok());
    }

    #[test]
    fn ownership_transitions() {
        let attr = Attributes::new();
        let pixels = vec![OPAQUE_RED; 4];

        let mut borrowed = Image::new(&attr, &pixels, 2, 2, 0.0).unwrap();
        assert_eq!(borrowed.memory_ownership(), MemoryOwnership::CallerRetains);
        borrowed
            .set_memory_ownership(MemoryOwnership::EngineCopies)
            .unwrap();
        assert_eq!(borrowed.memory_ownership(), MemoryOwnership::EngineCopies);
        // cannot go back to borrowing
        assert!(borrowed
            .set_memory_ownership(MemoryOwnership::CallerRetains)
            .is_err());

        let owned = Image::new_owned(&attr, pixels.clone(), 2, 2, 0.0).unwrap();
        assert_eq!(owned.memory_ownership(), MemoryOwnership::EngineCopies);

        // frozen once the histogram exists
        let img = Image::new(&attr, &pixels, 2, 2, 0.0).unwrap();
        let _ = img.histogram(&attr).unwrap();
        let mut img = img;
        assert!(img
            .set_memory_ownership(MemoryOwnership::EngineCopies)
            .is_err());
        assert!(img.add_fixed_color(OPAQUE_RED).is_err());
    }

    #[test]
    fn fixed_colors_capped_at_256() {
        let attr = Attributes::new();
        let pixels = [OPAQUE_RED; 1];
        let mut img = Image::new(&attr, &pixels, 1, 1, 0.0).unwrap();
        for i in 0..256u16 {
            img.add_fixed_color(RGBA {
                r: i as u8,
                g: (i >> 1) as u8,
                b: 0,
                a: 255,
            })
            .unwrap();
        }
        assert!(img.add_fixed_color(OPAQUE_RED).is_err());
    }

    #[test]
    fn min_opacity_snaps_nearly_opaque_alpha() {
        let mut attr = Attributes::new();
        attr.set_min_opacity(238);
        let pixels = [
            RGBA {
                r: 10,
                g: 20,
                b: 30,
                a: 250,
            },
            RGBA {
                r: 10,
                g: 20,
                b: 30,
                a: 40,
            },
        ];
        let img = Image::new(&attr, &pixels, 2, 1, 0.0).unwrap();
        let row = img.row_rgba(0);
        assert_eq!(row[0].a, 255, "alpha near min_opacity snaps to opaque");
        assert_eq!(row[1].a, 40, "low alpha stays put");
    }
}

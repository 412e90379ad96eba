//! Outcome of quantization: the palette plus remapping state.

use crate::attr::{AbortFlag, Attributes};
use crate::color::{
    mse_to_quality, mse_to_standard_mse, to_rgba, DEFAULT_GAMMA, RGBA,
};
use crate::error::Error;
use crate::image::Image;
use crate::palette::PaletteMap;
use crate::remap;

/// A palette produced by [`quantize`](crate::quantize), ready to remap
/// images.
///
/// The palette visible through [`palette`](Self::palette) is the final 8-bit
/// one; remapping matches pixels against these rounded colors rather than the
/// internal high-precision ones, so the quality measured in the output is the
/// quality the viewer gets.
pub struct QuantizationResult {
    map: PaletteMap,
    int_palette: Vec<RGBA>,
    gamma: f64,
    dither_level: f32,
    min_opaque: f32,
    quantization_error: Option<f64>,
    remapping_error: Option<f64>,
    remapped: bool,
    abort: Option<AbortFlag>,
}

impl QuantizationResult {
    pub(crate) fn new(map: PaletteMap, palette_error: Option<f64>, attr: &Attributes) -> Self {
        let mut result = QuantizationResult {
            map,
            int_palette: Vec::new(),
            gamma: DEFAULT_GAMMA,
            dither_level: 1.0,
            min_opaque: attr.min_opaque_val(),
            quantization_error: palette_error,
            remapping_error: None,
            remapped: false,
            abort: attr.abort_flag().cloned(),
        };
        result.round_palette();
        result
    }

    /// Strength of error diffusion applied by
    /// [`write_remapped`](Self::write_remapped), 0.0 (none) to 1.0 (full).
    /// Must be set before the first remap.
    pub fn set_dithering_level(&mut self, level: f32) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&level) {
            return Err(Error::ValueOutOfRange);
        }
        if self.remapped {
            return Err(Error::ValueOutOfRange);
        }
        self.dither_level = level;
        Ok(())
    }

    pub fn dithering_level(&self) -> f32 {
        self.dither_level
    }

    /// Gamma the output palette is encoded at; `0 < gamma < 1`. Changing it
    /// re-rounds the palette.
    pub fn set_output_gamma(&mut self, gamma: f64) -> Result<(), Error> {
        if !(gamma > 0.0 && gamma < 1.0) {
            return Err(Error::ValueOutOfRange);
        }
        self.gamma = gamma;
        self.round_palette();
        Ok(())
    }

    pub fn output_gamma(&self) -> f64 {
        self.gamma
    }

    /// The output palette. Stable across calls once remapping has happened.
    pub fn palette(&self) -> &[RGBA] {
        &self.int_palette
    }

    /// Mean squared error of the palette against the histogram, in the same
    /// 0..=65535-ish scale conventional for 8-bit channels. `None` when the
    /// chosen speed skipped measuring it.
    pub fn quantization_error(&self) -> Option<f64> {
        self.quantization_error.map(mse_to_standard_mse)
    }

    /// [`quantization_error`](Self::quantization_error) graded 0..=100.
    pub fn quantization_quality(&self) -> Option<u8> {
        self.quantization_error.map(mse_to_quality)
    }

    /// Mean squared error actually realized by the last
    /// [`write_remapped`](Self::write_remapped), including dithering.
    pub fn remapping_error(&self) -> Option<f64> {
        self.remapping_error.map(mse_to_standard_mse)
    }

    pub fn remapping_quality(&self) -> Option<u8> {
        self.remapping_error.map(mse_to_quality)
    }

    /// Remaps `image` onto this palette, writing one palette index per pixel
    /// into `buffer` (row-major). `buffer` may be larger than needed; only
    /// the first `width * height` bytes are written.
    pub fn write_remapped(&mut self, image: &Image<'_>, buffer: &mut [u8]) -> Result<(), Error> {
        let required = image.width() * image.height();
        if buffer.len() < required {
            return Err(Error::BufferTooSmall);
        }
        let output = &mut buffer[..required];

        let error = if self.dither_level == 0.0 {
            remap::remap_to_palette(image, &self.map, self.min_opaque, self.abort.as_ref(), output)?
        } else {
            // ignore stray error from colors the palette can't represent;
            // dithering them harder only adds noise
            let floor = 16.0 / 256.0;
            let max_dither_error = self
                .quantization_error
                .map_or(floor, |e| (e * 2.4).max(floor)) as f32;
            remap::remap_floyd(
                image,
                &self.map,
                self.min_opaque,
                max_dither_error,
                self.dither_level,
                self.abort.as_ref(),
                output,
            )?
        };
        self.remapping_error = Some(error);
        self.remapped = true;
        Ok(())
    }

    /// Rounds the internal palette to 8 bits and writes the rounded colors
    /// back, so remapping measures distances to the colors that will really
    /// be displayed.
    fn round_palette(&mut self) {
        let lut = crate::color::GammaLut::new(self.gamma);
        self.int_palette.clear();
        for item in &mut self.map.items {
            let px = to_rgba(self.gamma, item.color);
            self.int_palette.push(px);
            item.color = lut.to_linear(px);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::FPixel;

    fn result_of(colors: &[FPixel]) -> QuantizationResult {
        let mut map = PaletteMap::default();
        for &c in colors {
            map.push(c, 1.0, false);
        }
        QuantizationResult::new(map, Some(0.0), &Attributes::new())
    }

    #[test]
    fn palette_is_idempotent() {
        let result = result_of(&[
            FPixel {
                a: 1.0,
                r: 0.3,
                g: 0.6,
                b: 0.9,
            },
            FPixel::TRANSPARENT,
        ]);
        let first = result.palette().to_vec();
        let second = result.palette().to_vec();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].a, 0);
    }

    #[test]
    fn dithering_level_validated_and_frozen_after_remap() {
        let mut result = result_of(&[FPixel {
            a: 1.0,
            r: 0.5,
            g: 0.5,
            b: 0.5,
        }]);
        assert_eq!(result.set_dithering_level(1.5), Err(Error::ValueOutOfRange));
        assert_eq!(result.set_dithering_level(-0.1), Err(Error::ValueOutOfRange));
        result.set_dithering_level(0.5).unwrap();
        assert_eq!(result.dithering_level(), 0.5);

        let attr = Attributes::new();
        let pixels = [RGBA {
            r: 128,
            g: 128,
            b: 128,
            a: 255,
        }];
        let image = Image::new(&attr, &pixels, 1, 1, 0.0).unwrap();
        let mut out = [0u8; 1];
        result.write_remapped(&image, &mut out).unwrap();
        assert_eq!(result.set_dithering_level(0.0), Err(Error::ValueOutOfRange));
    }

    #[test]
    fn output_gamma_rejects_nonsense() {
        let mut result = result_of(&[FPixel {
            a: 1.0,
            r: 0.5,
            g: 0.5,
            b: 0.5,
        }]);
        assert_eq!(result.set_output_gamma(0.0), Err(Error::ValueOutOfRange));
        assert_eq!(result.set_output_gamma(1.0), Err(Error::ValueOutOfRange));
        result.set_output_gamma(0.5).unwrap();
        assert_eq!(result.output_gamma(), 0.5);
    }

    #[test]
    fn small_buffer_is_rejected_before_any_write() {
        let mut result = result_of(&[FPixel {
            a: 1.0,
            r: 0.5,
            g: 0.5,
            b: 0.5,
        }]);
        let attr = Attributes::new();
        let pixels = [RGBA {
            r: 10,
            g: 20,
            b: 30,
            a: 255,
        }; 4];
        let image = Image::new(&attr, &pixels, 2, 2, 0.0).unwrap();
        let mut out = [7u8; 3];
        assert_eq!(
            result.write_remapped(&image, &mut out),
            Err(Error::BufferTooSmall)
        );
        assert_eq!(out, [7, 7, 7], "no partial writes on failure");
        assert!(result.remapping_error().is_none());
    }
}

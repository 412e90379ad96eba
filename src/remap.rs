//! Pixel-to-palette-index remapping, plain and error-diffused.

use crate::attr::AbortFlag;
use crate::color::{color_difference, FPixel, MIN_VISIBLE_ALPHA};
use crate::error::Error;
use crate::image::Image;
use crate::nearest::Nearest;
use crate::palette::PaletteMap;

fn check_abort(abort: Option<&AbortFlag>) -> Result<(), Error> {
    match abort {
        Some(flag) if flag.is_aborted() => Err(Error::Aborted),
        _ => Ok(()),
    }
}

/// Maps every pixel to its nearest palette entry, one index byte per pixel.
/// Returns the mean squared error between source and output.
///
/// Pixels below the visibility threshold all take the index nearest to fully
/// transparent, keeping runs of transparency byte-identical for encoders.
pub(crate) fn remap_to_palette(
    image: &Image<'_>,
    map: &PaletteMap,
    min_opaque: f32,
    abort: Option<&AbortFlag>,
    output: &mut [u8],
) -> Result<f64, Error> {
    let cols = image.width();
    let rows = image.height();
    let nearest = Nearest::new(map, min_opaque);
    let (transparent_index, _) = nearest.search(FPixel::TRANSPARENT, 0);
    let transparent_color = map.items[usize::from(transparent_index)].color;

    let mut total_diff = 0.0f64;
    for row in 0..rows {
        check_abort(abort)?;
        let mut last_match = transparent_index;
        for (col, &px) in image.row_f(row).iter().enumerate() {
            let (index, diff) = if px.a < MIN_VISIBLE_ALPHA {
                (
                    transparent_index,
                    color_difference(px, transparent_color),
                )
            } else {
                // neighboring pixels usually match the same entry
                let found = nearest.search(px, last_match);
                last_match = found.0;
                found
            };
            output[row * cols + col] = index;
            total_diff += f64::from(diff);
        }
    }
    Ok(total_diff / (cols * rows) as f64)
}

/// Floyd-Steinberg remap with a serpentine scan.
///
/// Error carried into a pixel is scaled by the dither level (itself modulated
/// by the importance map, so noisy areas get less dithering and compress
/// better) and clamped so accumulated error cannot push a pixel far outside
/// the representable range. Returns the mean squared error against the
/// original, undithered source pixels.
pub(crate) fn remap_floyd(
    image: &Image<'_>,
    map: &PaletteMap,
    min_opaque: f32,
    max_dither_error: f32,
    base_dither_level: f32,
    abort: Option<&AbortFlag>,
    output: &mut [u8],
) -> Result<f64, Error> {
    let cols = image.width();
    let rows = image.height();
    let nearest = Nearest::new(map, min_opaque);
    let (transparent_index, _) = nearest.search(FPixel::TRANSPARENT, 0);
    let importance = image.importance();

    let mut thiserr = vec![FPixel::default(); cols + 2];
    let mut nexterr = vec![FPixel::default(); cols + 2];
    let mut forward = true;
    let mut total_diff = 0.0f64;

    for row in 0..rows {
        check_abort(abort)?;
        for e in nexterr.iter_mut() {
            *e = FPixel::default();
        }
        let row_pixels = image.row_f(row);
        let mut last_match = transparent_index;

        let mut col: isize = if forward { 0 } else { cols as isize - 1 };
        while (0..cols as isize).contains(&col) {
            let c = col as usize;
            let idx = row * cols + c;
            let px = row_pixels[c];

            let level = base_dither_level
                * match importance {
                    Some(m) => f32::from(m[idx]) / 255.0,
                    // without a map, back off slightly to limit noise
                    None => 15.0 / 16.0,
                };
            let spx = get_dithered_pixel(level, max_dither_error, thiserr[c + 1], px);

            let (index, chosen) = if spx.a < MIN_VISIBLE_ALPHA {
                (
                    transparent_index,
                    map.items[usize::from(transparent_index)].color,
                )
            } else {
                let (i, _) = nearest.search(spx, last_match);
                last_match = i;
                (i, map.items[usize::from(i)].color)
            };
            output[idx] = index;
            total_diff += f64::from(color_difference(px, chosen));

            let mut err = FPixel {
                a: spx.a - chosen.a,
                r: spx.r - chosen.r,
                g: spx.g - chosen.g,
                b: spx.b - chosen.b,
            };
            // an unrepresentable color would otherwise ring forever
            let err_mag = err.a * err.a + err.r * err.r + err.g * err.g + err.b * err.b;
            if err_mag > max_dither_error {
                err = scale(err, 0.75);
            }
            // color error behind transparency is invisible, damp it
            let colorimp = (3.0 + chosen.a) / 4.0;
            err.r *= colorimp;
            err.g *= colorimp;
            err.b *= colorimp;

            if forward {
                add_scaled(&mut thiserr[c + 2], err, 7.0 / 16.0);
                add_scaled(&mut nexterr[c], err, 3.0 / 16.0);
                add_scaled(&mut nexterr[c + 1], err, 5.0 / 16.0);
                add_scaled(&mut nexterr[c + 2], err, 1.0 / 16.0);
                col += 1;
            } else {
                add_scaled(&mut thiserr[c], err, 7.0 / 16.0);
                add_scaled(&mut nexterr[c + 2], err, 3.0 / 16.0);
                add_scaled(&mut nexterr[c + 1], err, 5.0 / 16.0);
                add_scaled(&mut nexterr[c], err, 1.0 / 16.0);
                col -= 1;
            }
        }

        std::mem::swap(&mut thiserr, &mut nexterr);
        forward = !forward;
    }
    Ok(total_diff / (cols * rows) as f64)
}

fn scale(px: FPixel, k: f32) -> FPixel {
    FPixel {
        a: px.a * k,
        r: px.r * k,
        g: px.g * k,
        b: px.b * k,
    }
}

fn add_scaled(dst: &mut FPixel, err: FPixel, k: f32) {
    dst.a += err.a * k;
    dst.r += err.r * k;
    dst.g += err.g * k;
    dst.b += err.b * k;
}

/// Applies carried error to a pixel at the given strength.
///
/// Error too small to see is dropped entirely (smaller files), and the
/// strength ratio shrinks whenever a channel would land far outside 0..=1.
/// Slight overshoot is allowed on purpose; clamping exactly at the range
/// edge produces visible undithered bands next to saturated areas.
fn get_dithered_pixel(level: f32, max_dither_error: f32, err: FPixel, px: FPixel) -> FPixel {
    let err_mag = err.a * err.a + err.r * err.r + err.g * err.g + err.b * err.b;
    if err_mag < 2.0 / 256.0 / 256.0 {
        return px;
    }

    let mut level = level;
    if err_mag > max_dither_error {
        level *= 0.75;
    }

    const MAX_OVERFLOW: f32 = 1.03;
    const MAX_UNDERFLOW: f32 = -0.03;
    let mut ratio = 1.0f32;
    for (p, e) in [
        (px.a, err.a),
        (px.r, err.r),
        (px.g, err.g),
        (px.b, err.b),
    ] {
        let shifted = p + e * level;
        if shifted > MAX_OVERFLOW {
            ratio = ratio.min((MAX_OVERFLOW - p) / (e * level));
        } else if shifted < MAX_UNDERFLOW {
            ratio = ratio.min((MAX_UNDERFLOW - p) / (e * level));
        }
    }

    let k = level * ratio;
    FPixel {
        a: px.a + err.a * k,
        r: px.r + err.r * k,
        g: px.g + err.g * k,
        b: px.b + err.b * k,
    }
}

#![forbid(unsafe_code)]

//! Palette quantization for RGBA images.
//!
//! Reduces an image to at most 256 colors while keeping it looking as close
//! to the original as practical: a weighted histogram feeds an error-driven
//! median cut, the resulting palette is polished with k-means passes, and
//! pixels are remapped with optional Floyd-Steinberg dithering. Alpha is a
//! first-class channel throughout.
//!
//! ```
//! use palquant::{Attributes, Image, RGBA};
//!
//! let pixels = vec![RGBA { r: 40, g: 40, b: 200, a: 255 }; 64];
//! let mut attr = Attributes::new();
//! attr.set_quality(50, 90)?;
//! let image = Image::new(&attr, &pixels, 8, 8, 0.0)?;
//! let mut result = palquant::quantize(&attr, &image)?;
//! let mut indexed = vec![0u8; 64];
//! result.write_remapped(&image, &mut indexed)?;
//! let palette = result.palette();
//! assert!(!palette.is_empty());
//! # Ok::<(), palquant::Error>(())
//! ```

mod attr;
mod color;
mod error;
mod histogram;
mod image;
mod kmeans;
mod masking;
mod median_cut;
mod nearest;
mod palette;
mod remap;
mod result;

pub use attr::{AbortFlag, Attributes};
pub use color::RGBA;
pub use error::Error;
pub use image::{Image, MemoryOwnership};
pub use result::QuantizationResult;

use color::MAX_DIFF;
use histogram::HistItem;
use palette::PaletteMap;

/// Library version as a single integer, `major * 10000 + minor * 100 + patch`.
pub const VERSION: u32 = 100;

pub fn version() -> u32 {
    VERSION
}

/// Chooses a palette for `image` under the constraints in `attr`.
///
/// Fails with [`Error::QualityTooLow`] if no palette within the color budget
/// reaches the configured minimum quality, and [`Error::Aborted`] if an abort
/// flag fires mid-run. The image's histogram is computed on first use and
/// reused by later calls.
pub fn quantize(attr: &Attributes, image: &Image<'_>) -> Result<QuantizationResult, Error> {
    attr.check_abort()?;
    let hist = image.histogram(attr)?;
    let mut items = hist.items.clone();
    let total_weight = hist.total_weight;
    let max_mse = attr.max_mse();
    let min_opaque = attr.min_opaque_val();

    let mut fixed = PaletteMap::default();
    for &color in image
        .fixed_colors()
        .iter()
        .take(attr.max_colors() as usize)
    {
        fixed.push(image.lut().to_linear(color), 0.0, true);
    }
    let budget = attr.max_colors() as usize - fixed.len();

    let exact_fit = budget > 0 && items.len() <= budget && attr.target_mse() == 0.0;
    let (mut map, mut palette_error) = if budget == 0 {
        (fixed, None)
    } else if exact_fit {
        // every source color fits, no cutting needed
        log::debug!("image has only {} colors, using them all", items.len());
        let mut map = fixed;
        for item in &items {
            map.push(item.color, item.perceptual_weight, false);
        }
        (map, Some(0.0))
    } else {
        find_best_palette(&mut items, total_weight, budget, &fixed, attr)?
    };

    // polish with k-means; when the error is unknown but a floor must be
    // enforced, run at least one pass to measure it
    let mut iterations = if exact_fit { 0 } else { attr.kmeans_iterations() };
    if iterations == 0 && palette_error.is_none() && max_mse < MAX_DIFF {
        iterations = 1;
    }
    if iterations > 0 && !items.is_empty() {
        log::debug!("moving palette towards local minimum");
        let limit = attr.kmeans_iteration_limit();
        let mut previous_error = MAX_DIFF;
        let mut i = 0;
        while i < iterations {
            attr.check_abort()?;
            let error =
                kmeans::refine_iteration(&mut items, total_weight, &mut map, min_opaque, false);
            palette_error = Some(error);
            if (previous_error - error).abs() < limit {
                break;
            }
            if error > max_mse * 1.5 {
                // hopelessly bad, but allow a bit more work before giving up
                if error > max_mse * 3.0 {
                    break;
                }
                iterations += 1;
            }
            previous_error = error;
            i += 1;
        }
    }

    if let Some(error) = palette_error {
        if error > max_mse {
            log::debug!(
                "palette MSE {:.4} exceeds the limit {:.4}",
                color::mse_to_standard_mse(error),
                color::mse_to_standard_mse(max_mse)
            );
            return Err(Error::QualityTooLow);
        }
    }

    map.sort_for_output(attr.last_index_transparent());
    log::debug!("palette has {} entries", map.len());
    Ok(QuantizationResult::new(map, palette_error, attr))
}

/// Repeats median cut with feedback: after each trial, histogram weights are
/// skewed towards the colors the palette served worst, so the next cut
/// spends its boxes where they are needed. Keeps the best palette seen. Once
/// the target error is reached the color budget is squeezed instead, trading
/// surplus entries for smaller palettes.
fn find_best_palette(
    items: &mut [HistItem],
    total_weight: f64,
    budget: usize,
    fixed: &PaletteMap,
    attr: &Attributes,
) -> Result<(PaletteMap, Option<f64>), Error> {
    let target_mse = attr.target_mse();
    let min_opaque = attr.min_opaque_val();
    let mut max_colors = budget;
    let mut trials = attr.feedback_loop_trials() as i32;
    let mut overshoot = if trials > 0 { 1.05 } else { 1.0 };

    let cut_max_mse = |least_error: f64| {
        (90.0_f64 / 65536.0)
            .max(target_mse)
            .max(least_error.min(MAX_DIFF))
            * 1.2
    };

    attr.check_abort()?;
    let mut best = median_cut::median_cut(
        items,
        total_weight,
        max_colors,
        fixed.clone(),
        target_mse * overshoot,
        cut_max_mse(MAX_DIFF),
        min_opaque,
    );
    if trials <= 0 {
        return Ok((best, None));
    }

    // the very first measurement must not skew weights when aiming for a
    // target, or an easily-reached target distorts the histogram for nothing
    let adjust_first = target_mse == 0.0;
    let mut least_error =
        kmeans::refine_iteration(items, total_weight, &mut best, min_opaque, adjust_first);
    accept(&mut max_colors, &mut overshoot, best.len() - fixed.len(), target_mse, least_error);
    trials -= 1;

    while trials > 0 {
        attr.check_abort()?;
        let mut candidate = median_cut::median_cut(
            items,
            total_weight,
            max_colors,
            fixed.clone(),
            target_mse * overshoot,
            cut_max_mse(least_error),
            min_opaque,
        );
        let total_error =
            kmeans::refine_iteration(items, total_weight, &mut candidate, min_opaque, true);

        if total_error < least_error
            || (total_error <= target_mse && candidate.len() - fixed.len() < max_colors)
        {
            accept(
                &mut max_colors,
                &mut overshoot,
                candidate.len() - fixed.len(),
                target_mse,
                total_error,
            );
            least_error = total_error;
            best = candidate;
            trials -= 1;
        } else {
            // a dead end; cool the feedback down and back off faster
            for item in items.iter_mut() {
                item.adjusted_weight = (item.perceptual_weight + item.adjusted_weight) / 2.0;
            }
            overshoot = 1.0;
            trials -= 6;
            if total_error > least_error * 4.0 {
                trials -= 3;
            }
        }
    }
    Ok((best, Some(least_error)))
}

fn accept(
    max_colors: &mut usize,
    overshoot: &mut f64,
    used_colors: usize,
    target_mse: f64,
    total_error: f64,
) {
    if total_error < target_mse && total_error > 0.0 {
        // undershot the target: aim further next time, palette can shrink
        *overshoot = (*overshoot * 1.25).min(target_mse / total_error);
    }
    *max_colors = (*max_colors).min(used_colors + 1);
}

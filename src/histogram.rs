//! Weighted histogram of source colors.
//!
//! Colors are bucketed on their 8-bit values (optionally posterized), with
//! each bucket's weight scaled by the importance map. Iteration order is the
//! bucket key order via `BTreeMap`, so identical inputs always produce the
//! histogram in the same order and quantization stays deterministic.

use std::collections::BTreeMap;

use crate::attr::Attributes;
use crate::color::{FPixel, RGBA};
use crate::error::Error;
use crate::image::Image;

#[derive(Debug, Clone)]
pub(crate) struct HistItem {
    pub color: FPixel,
    /// Occurrence count scaled by the importance map.
    pub perceptual_weight: f32,
    /// Weight as tweaked by the palette feedback loop; starts equal to
    /// `perceptual_weight`.
    pub adjusted_weight: f32,
    /// Palette entry this color last mapped to, seeds nearest-neighbor search.
    pub likely_index: u8,
}

#[derive(Debug, Clone)]
pub(crate) struct Histogram {
    pub items: Vec<HistItem>,
    pub total_weight: f64,
}

impl Histogram {
    pub(crate) fn build(image: &Image<'_>, attr: &Attributes) -> Result<Histogram, Error> {
        let mut bits = attr.effective_posterization();
        let max_entries = attr.max_histogram_entries();
        let row_stride = attr.histogram_row_stride();

        loop {
            attr.check_abort()?;
            if let Some(buckets) = accumulate(image, bits, max_entries, row_stride) {
                let mut items = Vec::with_capacity(buckets.len());
                let mut total_weight = 0.0f64;
                for (key, weight) in buckets {
                    total_weight += f64::from(weight);
                    items.push(HistItem {
                        color: image.lut().to_linear(key_to_rgba(key)),
                        perceptual_weight: weight,
                        adjusted_weight: weight,
                        likely_index: 0,
                    });
                }
                log::debug!(
                    "histogram has {} colors at {} ignored bits",
                    items.len(),
                    bits
                );
                return Ok(Histogram {
                    items,
                    total_weight,
                });
            }
            bits += 1;
            log::debug!("too many colors, reducing precision to {bits} ignored bits");
        }
    }
}

/// One pass over the image. Returns `None` if the bucket count exceeds
/// `max_entries`, asking the caller to retry with more posterization. At 4
/// ignored bits there are at most 2^16 possible buckets, which is below every
/// configurable entry limit, so the retry loop always terminates.
fn accumulate(
    image: &Image<'_>,
    bits: u32,
    max_entries: usize,
    row_stride: usize,
) -> Option<BTreeMap<u32, f32>> {
    let mut buckets: BTreeMap<u32, f32> = BTreeMap::new();
    let importance = image.importance();

    let mut row = 0;
    while row < image.height() {
        let row_start = row * image.width();
        for (col, px) in image.row_rgba(row).iter().enumerate() {
            let boost = match importance {
                Some(map) => 0.5 + f32::from(map[row_start + col]) / 255.0,
                None => 1.0,
            };
            *buckets.entry(bucket_key(*px, bits)).or_insert(0.0) += boost;
        }
        if buckets.len() > max_entries {
            return None;
        }
        row += row_stride;
    }
    Some(buckets)
}

/// Packs a posterized RGBA into the bucket key. Alpha 0 collapses to a single
/// bucket regardless of the (invisible) color channels underneath.
fn bucket_key(px: RGBA, bits: u32) -> u32 {
    if px.a == 0 {
        return 0;
    }
    let p = |c: u8| u32::from(posterize_channel(c, bits));
    (p(px.r) << 24) | (p(px.g) << 16) | (p(px.b) << 8) | p(px.a)
}

/// Clears the low `bits` of a channel and replicates the top bits into the
/// cleared space, so 0 and 255 stay exact.
fn posterize_channel(c: u8, bits: u32) -> u8 {
    if bits == 0 {
        return c;
    }
    let mask = 0xFFu8 << bits;
    (c & mask) | ((c & !(0xFF >> bits)) >> (8 - bits))
}

fn key_to_rgba(key: u32) -> RGBA {
    RGBA {
        r: (key >> 24) as u8,
        g: (key >> 16) as u8,
        b: (key >> 8) as u8,
        a: key as u8,
    }
}

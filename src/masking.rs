//! Importance map from local contrast.
//!
//! Smooth regions show quantization error and banding; busy regions hide it.
//! The map rates each pixel 0 (noisy, error is masked) to 255 (flat, protect
//! it), and feeds both histogram weighting and dither strength.

use crate::color::FPixel;

pub(crate) fn importance_map(pixels: &[FPixel], width: usize, height: usize) -> Vec<u8> {
    let luminance: Vec<f32> = pixels.iter().map(luma).collect();
    let contrast = local_contrast(&luminance, width, height);
    let block_w = width.div_ceil(4);
    let block_h = height.div_ceil(4);
    let blocks = erode_to_blocks(&contrast, width, height, block_w, block_h);
    let per_pixel = upscale_bilinear(&blocks, block_w, block_h, width, height);
    per_pixel
        .iter()
        .map(|&m| {
            let w = 1.0 / (1.0 + 6.0 * m.sqrt());
            (w * 255.0) as u8
        })
        .collect()
}

/// Rec. 709 luma over premultiplied channels; transparency reads as dark, so
/// alpha edges register as contrast too.
fn luma(px: &FPixel) -> f32 {
    0.2126 * px.r + 0.7152 * px.g + 0.0722 * px.b
}

/// Squared deviation from the 4-neighbor average, clamped so a single hard
/// edge cannot dominate a block. Borders replicate their edge pixel.
fn local_contrast(luminance: &[f32], width: usize, height: usize) -> Vec<f32> {
    const CONTRAST_CEILING: f32 = 0.25;

    let at = |x: usize, y: usize| luminance[y * width + x];
    let mut contrast = Vec::with_capacity(luminance.len());

    for y in 0..height {
        let up = y.saturating_sub(1);
        let down = (y + 1).min(height - 1);
        for x in 0..width {
            let left = x.saturating_sub(1);
            let right = (x + 1).min(width - 1);
            let surround = (at(left, y) + at(right, y) + at(x, up) + at(x, down)) * 0.25;
            let diff = at(x, y) - surround;
            contrast.push((diff * diff).min(CONTRAST_CEILING));
        }
    }

    contrast
}

/// Min-biased 4x4 block reduction: blend of the block's 4 smallest contrast
/// values with halving weights. A mostly-smooth block with a few noisy pixels
/// still counts as smooth, which protects gradients.
fn erode_to_blocks(
    contrast: &[f32],
    width: usize,
    height: usize,
    block_w: usize,
    block_h: usize,
) -> Vec<f32> {
    let mut blocks = vec![0.0f32; block_w * block_h];

    for by in 0..block_h {
        for bx in 0..block_w {
            let mut low = [f32::INFINITY; 4];
            let mut count = 0usize;
            for y in (by * 4)..(by * 4 + 4).min(height) {
                for x in (bx * 4)..(bx * 4 + 4).min(width) {
                    let v = contrast[y * width + x];
                    count += 1;
                    if v < low[3] {
                        low[3] = v;
                        let mut i = 3;
                        while i > 0 && low[i] < low[i - 1] {
                            low.swap(i, i - 1);
                            i -= 1;
                        }
                    }
                }
            }

            let n = count.min(4);
            if n == 0 {
                continue;
            }
            let mut acc = 0.0f32;
            let mut norm = 0.0f32;
            let mut w = 1.0f32;
            for &v in &low[..n] {
                acc += v * w;
                norm += w;
                w *= 0.5;
            }
            blocks[by * block_w + bx] = acc / norm;
        }
    }

    blocks
}

/// Bilinear upscale from the block grid back to pixel resolution. Block
/// centers sit at (4bx+2, 4by+2).
fn upscale_bilinear(
    blocks: &[f32],
    block_w: usize,
    block_h: usize,
    width: usize,
    height: usize,
) -> Vec<f32> {
    // (lower cell, upper cell, blend fraction) for one pixel coordinate
    fn axis(len: usize, cells: usize) -> Vec<(usize, usize, f32)> {
        (0..len)
            .map(|p| {
                let pos = (p as f32 - 2.0) / 4.0;
                let lo = pos.floor().max(0.0);
                let i0 = lo as usize;
                let i1 = (i0 + 1).min(cells - 1);
                (i0, i1, (pos - lo).clamp(0.0, 1.0))
            })
            .collect()
    }
    let cols = axis(width, block_w);
    let rows = axis(height, block_h);

    let mut output = Vec::with_capacity(width * height);
    for &(y0, y1, fy) in &rows {
        let top = &blocks[y0 * block_w..(y0 + 1) * block_w];
        let bot = &blocks[y1 * block_w..(y1 + 1) * block_w];
        for &(x0, x1, fx) in &cols {
            let a = top[x0] + (top[x1] - top[x0]) * fx;
            let b = bot[x0] + (bot[x1] - bot[x0]) * fx;
            output.push(a + (b - a) * fy);
        }
    }

    output
}

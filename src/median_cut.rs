//! Weighted median cut over the histogram.
//!
//! Boxes are (begin, end) ranges into one shared histogram slice; splitting a
//! box sorts its subrange along the most varied channel and cuts at the
//! weighted median, so no entry is ever copied. Variance is error-weighted so
//! boxes whose worst color is far from the box average split first.

use crate::color::{color_difference, FPixel};
use crate::histogram::HistItem;
use crate::palette::PaletteMap;

#[derive(Debug, Clone, Copy)]
struct CutBox {
    begin: usize,
    end: usize,
    /// Weighted average of the range.
    color: FPixel,
    /// Per-channel weighted variance around `color`.
    variance: FPixel,
    /// Sum of adjusted weights in the range.
    sum: f64,
    /// Largest distance from `color` to any member.
    max_error: f64,
    /// Weighted total distance, lazily computed; negative means unknown.
    total_error: f64,
}

impl CutBox {
    fn new(items: &[HistItem], begin: usize, end: usize, min_opaque: f32) -> CutBox {
        let range = &items[begin..end];
        let color = averaged_color(range, min_opaque, GRAY_CENTER);
        CutBox {
            begin,
            end,
            color,
            variance: box_variance(range, color),
            sum: range.iter().map(|it| f64::from(it.adjusted_weight)).sum(),
            max_error: box_max_error(range, color),
            total_error: -1.0,
        }
    }

    fn colors(&self) -> usize {
        self.end - self.begin
    }
}

const GRAY_CENTER: FPixel = FPixel {
    a: 0.5,
    r: 0.5,
    g: 0.5,
    b: 0.5,
};

/// Splits `items` into at most `max_colors` boxes and appends one palette
/// entry per box to `base` (fixed colors the caller has already placed).
///
/// `target_mse` stops splitting early once the boxes are collectively good
/// enough; `max_mse` prioritizes splitting boxes that are individually worse
/// than it. As a side effect, every histogram item gets its `likely_index`
/// pointed at its box's palette entry and its `adjusted_weight` raised in
/// proportion to how badly the box average represents it, which is what the
/// feedback loop in [`quantize`](crate::quantize) iterates on.
pub(crate) fn median_cut(
    items: &mut [HistItem],
    total_weight: f64,
    max_colors: usize,
    base: PaletteMap,
    target_mse: f64,
    max_mse: f64,
    min_opaque: f32,
) -> PaletteMap {
    let mut boxes = vec![CutBox::new(items, 0, items.len(), min_opaque)];

    while boxes.len() < max_colors {
        // Early boxes fix the worst outliers; later the limit is relaxed so
        // large smooth areas get palette entries too.
        let current_max_mse =
            max_mse + (boxes.len() as f64 / max_colors as f64) * 16.0 * max_mse;
        let Some(bi) = best_splittable_box(&boxes, current_max_mse) else {
            break;
        };

        let CutBox { begin, end, .. } = boxes[bi];
        let axis = dominant_channel(boxes[bi].variance);
        let range = &mut items[begin..end];
        range.sort_unstable_by(|x, y| {
            channel4(x.color, axis)
                .partial_cmp(&channel4(y.color, axis))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let median = range_median(range, min_opaque);

        // cut where both sides carry the same amount of distance-weighted mass
        let halfvar: f64 = range.iter().map(|it| color_weight(median, it)).sum::<f64>() / 2.0;
        let mut lowervar = 0.0;
        let mut break_at = 0;
        while break_at < range.len() - 1 {
            if lowervar >= halfvar {
                break;
            }
            lowervar += color_weight(median, &range[break_at]);
            break_at += 1;
        }
        let cut = begin + break_at.max(1);

        boxes[bi] = CutBox::new(items, begin, cut, min_opaque);
        boxes.push(CutBox::new(items, cut, end, min_opaque));

        if target_mse > 0.0 && total_error_below_target(items, &mut boxes, target_mse, total_weight)
        {
            break;
        }
    }

    let mut map = base;
    let base_len = map.len();
    for (bi, bx) in boxes.iter().enumerate() {
        let popularity: f32 = items[bx.begin..bx.end]
            .iter()
            .map(|it| it.perceptual_weight)
            .sum();
        map.push(bx.color, popularity, false);
        for item in &mut items[bx.begin..bx.end] {
            item.adjusted_weight *=
                (1.0 + color_difference(bx.color, item.color) / 4.0).sqrt();
            item.likely_index = (base_len + bi) as u8;
        }
    }
    map
}

fn channel4(px: FPixel, axis: usize) -> f32 {
    match axis {
        0 => px.a,
        1 => px.r,
        2 => px.g,
        _ => px.b,
    }
}

fn dominant_channel(variance: FPixel) -> usize {
    let mut axis = 0;
    let mut best = variance.a;
    for (i, v) in [variance.r, variance.g, variance.b].into_iter().enumerate() {
        if v > best {
            best = v;
            axis = i + 1;
        }
    }
    axis
}

fn variance_diff(val: f32, good_enough: f32) -> f64 {
    let sq = f64::from(val) * f64::from(val);
    if sq < f64::from(good_enough) * f64::from(good_enough) {
        sq * 0.25
    } else {
        sq
    }
}

/// Weighted variance per channel, with sub-visible deviations discounted and
/// channels weighted by how much the eye cares about each.
fn box_variance(range: &[HistItem], mean: FPixel) -> FPixel {
    let mut va = 0.0f64;
    let mut vr = 0.0f64;
    let mut vg = 0.0f64;
    let mut vb = 0.0f64;
    for it in range {
        let w = f64::from(it.adjusted_weight);
        va += variance_diff(mean.a - it.color.a, 2.0 / 256.0) * w;
        vr += variance_diff(mean.r - it.color.r, 1.0 / 256.0) * w;
        vg += variance_diff(mean.g - it.color.g, 1.0 / 256.0) * w;
        vb += variance_diff(mean.b - it.color.b, 1.0 / 256.0) * w;
    }
    FPixel {
        a: (va * (4.0 / 16.0)) as f32,
        r: (vr * (7.0 / 16.0)) as f32,
        g: (vg * (9.0 / 16.0)) as f32,
        b: (vb * (5.0 / 16.0)) as f32,
    }
}

fn box_max_error(range: &[HistItem], mean: FPixel) -> f64 {
    range
        .iter()
        .map(|it| f64::from(color_difference(mean, it.color)))
        .fold(0.0, f64::max)
}

/// Splitting only happens along the dominant channel, so only that variance
/// counts. Boxes already worse than the quality limit get a boost.
fn best_splittable_box(boxes: &[CutBox], max_mse: f64) -> Option<usize> {
    let mut best = None;
    let mut max_sum = 0.0f64;
    for (i, bx) in boxes.iter().enumerate() {
        if bx.colors() < 2 {
            continue;
        }
        let cv = f64::from(bx.variance.r.max(bx.variance.g).max(bx.variance.b));
        let mut this_sum = bx.sum * cv.max(f64::from(bx.variance.a));
        if bx.max_error > max_mse {
            this_sum = this_sum * bx.max_error / max_mse;
        }
        if this_sum > max_sum {
            max_sum = this_sum;
            best = Some(i);
        }
    }
    best
}

/// Median of a range already sorted along its dominant channel. Even-sized
/// ranges blend the two middle colors.
fn range_median(range: &[HistItem], min_opaque: f32) -> FPixel {
    let median_start = (range.len() - 1) / 2;
    if range.len() % 2 == 1 {
        range[median_start].color
    } else {
        averaged_color(
            &range[median_start..median_start + 2],
            min_opaque,
            GRAY_CENTER,
        )
    }
}

/// How much an entry pulls the cut point: distance to the median times a
/// dampened weight. Sub-visible distances count half.
fn color_weight(median: FPixel, item: &HistItem) -> f64 {
    let mut diff = color_difference(median, item.color);
    if diff < 2.0 / 256.0 / 256.0 {
        diff /= 2.0;
    }
    f64::from(diff).sqrt() * ((1.0 + f64::from(item.adjusted_weight)).sqrt() - 1.0)
}

/// Weighted average of a range. Colors far from `center` get extra weight,
/// which counteracts desaturation and fading of whites when a box spans a
/// wide color range. Premultiplied storage keeps mixed opacities blendable.
pub(crate) fn averaged_color(range: &[HistItem], min_opaque: f32, center: FPixel) -> FPixel {
    let mut r = 0.0f64;
    let mut g = 0.0f64;
    let mut b = 0.0f64;
    let mut a = 0.0f64;
    let mut sum = 0.0f64;
    let mut max_alpha = 0.0f32;

    for it in range {
        let px = it.color;
        let mut weight = 1.0f64;
        let dr = f64::from(center.r - px.r);
        let dg = f64::from(center.g - px.g);
        let db = f64::from(center.b - px.b);
        weight += dr * dr + dg * dg + db * db;
        weight *= f64::from(it.adjusted_weight);
        sum += weight;

        r += f64::from(px.r) * weight;
        g += f64::from(px.g) * weight;
        b += f64::from(px.b) * weight;
        a += f64::from(px.a) * weight;
        max_alpha = max_alpha.max(px.a);
    }

    if sum == 0.0 {
        sum = 1.0;
    }
    let mut avg = FPixel {
        a: (a / sum) as f32,
        r: (r / sum) as f32,
        g: (g / sum) as f32,
        b: (b / sum) as f32,
    };
    // a box containing a fully opaque color must stay usable as opaque
    if avg.a >= min_opaque && max_alpha >= 255.0 / 256.0 {
        avg.a = 1.0;
    }
    avg
}

/// True once the boxes' combined weighted error drops under the target.
/// Per-box errors are cached across calls; a split resets its halves.
fn total_error_below_target(
    items: &[HistItem],
    boxes: &mut [CutBox],
    target_mse: f64,
    total_weight: f64,
) -> bool {
    let target = target_mse * total_weight;
    let mut total: f64 = boxes
        .iter()
        .filter(|bx| bx.total_error >= 0.0)
        .map(|bx| bx.total_error)
        .sum();
    if total > target {
        return false;
    }
    for bx in boxes.iter_mut() {
        if bx.total_error < 0.0 {
            let err: f64 = items[bx.begin..bx.end]
                .iter()
                .map(|it| {
                    f64::from(color_difference(bx.color, it.color))
                        * f64::from(it.perceptual_weight)
                })
                .sum();
            bx.total_error = err;
            total += err;
        }
        if total > target {
            return false;
        }
    }
    true
}

//! K-means style palette refinement (Voronoi iteration).
//!
//! Each pass assigns every histogram item to its nearest palette entry, then
//! moves each non-fixed entry to the weighted average of the items it
//! attracted. The returned mean error lets the caller decide when the palette
//! has stopped improving.

use crate::color::FPixel;
use crate::histogram::HistItem;
use crate::nearest::Nearest;
use crate::palette::PaletteMap;

#[derive(Clone, Copy, Default)]
struct ColorAcc {
    a: f64,
    r: f64,
    g: f64,
    b: f64,
    total: f64,
}

impl ColorAcc {
    fn add(&mut self, px: FPixel, weight: f32) {
        let w = f64::from(weight);
        self.a += f64::from(px.a) * w;
        self.r += f64::from(px.r) * w;
        self.g += f64::from(px.g) * w;
        self.b += f64::from(px.b) * w;
        self.total += w;
    }

    fn average(&self) -> FPixel {
        FPixel {
            a: (self.a / self.total) as f32,
            r: (self.r / self.total) as f32,
            g: (self.g / self.total) as f32,
            b: (self.b / self.total) as f32,
        }
    }
}

/// One refinement pass. Returns the weighted mean squared error of the
/// assignment that was used to move the entries.
///
/// With `adjust_weights` set, each item's `adjusted_weight` is also pulled
/// towards emphasizing poorly represented colors, which the feedback loop in
/// [`quantize`](crate::quantize) feeds back into the next median cut.
pub(crate) fn refine_iteration(
    items: &mut [HistItem],
    total_weight: f64,
    map: &mut PaletteMap,
    min_opaque: f32,
    adjust_weights: bool,
) -> f64 {
    let mut acc = vec![ColorAcc::default(); map.len()];
    let mut total_diff = 0.0f64;

    {
        let nearest = Nearest::new(map, min_opaque);
        for item in items.iter_mut() {
            let (index, diff) = nearest.search(item.color, item.likely_index);
            item.likely_index = index;
            total_diff += f64::from(diff) * f64::from(item.perceptual_weight);
            acc[usize::from(index)].add(item.color, item.perceptual_weight);

            if adjust_weights {
                item.adjusted_weight = (item.perceptual_weight + item.adjusted_weight)
                    * (1.0 + diff).sqrt();
            }
        }
    }

    for (entry, acc) in map.items.iter_mut().zip(&acc) {
        if acc.total > 0.0 && !entry.fixed {
            entry.color = acc.average();
        }
        entry.popularity = acc.total as f32;
    }

    total_diff / total_weight
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(r: f32, g: f32, b: f32, weight: f32) -> HistItem {
        HistItem {
            color: FPixel { a: 1.0, r, g, b },
            perceptual_weight: weight,
            adjusted_weight: weight,
            likely_index: 0,
        }
    }

    #[test]
    fn moves_entries_to_cluster_centers() {
        let mut items = vec![
            item(0.1, 0.1, 0.1, 1.0),
            item(0.2, 0.2, 0.2, 1.0),
            item(0.8, 0.8, 0.8, 1.0),
            item(0.9, 0.9, 0.9, 1.0),
        ];
        let mut map = PaletteMap::default();
        map.push(
            FPixel {
                a: 1.0,
                r: 0.3,
                g: 0.3,
                b: 0.3,
            },
            0.0,
            false,
        );
        map.push(
            FPixel {
                a: 1.0,
                r: 0.7,
                g: 0.7,
                b: 0.7,
            },
            0.0,
            false,
        );

        let err1 = refine_iteration(&mut items, 4.0, &mut map, 1.0, false);
        assert!((map.items[0].color.r - 0.15).abs() < 1e-5);
        assert!((map.items[1].color.r - 0.85).abs() < 1e-5);

        let err2 = refine_iteration(&mut items, 4.0, &mut map, 1.0, false);
        assert!(err2 <= err1, "second pass cannot be worse: {err2} vs {err1}");
        assert_eq!(map.items[0].popularity, 2.0);
    }

    #[test]
    fn fixed_entries_do_not_move() {
        let mut items = vec![item(0.4, 0.4, 0.4, 5.0)];
        let mut map = PaletteMap::default();
        let pinned = FPixel {
            a: 1.0,
            r: 0.5,
            g: 0.5,
            b: 0.5,
        };
        map.push(pinned, 0.0, true);

        refine_iteration(&mut items, 5.0, &mut map, 1.0, false);
        assert_eq!(map.items[0].color, pinned);
        assert_eq!(map.items[0].popularity, 5.0);
    }

    #[test]
    fn weight_adjustment_emphasizes_badly_mapped_colors() {
        let mut items = vec![item(0.5, 0.5, 0.5, 1.0), item(0.95, 0.95, 0.95, 1.0)];
        let mut map = PaletteMap::default();
        map.push(
            FPixel {
                a: 1.0,
                r: 0.5,
                g: 0.5,
                b: 0.5,
            },
            0.0,
            false,
        );
        map.push(
            FPixel {
                a: 1.0,
                r: 0.6,
                g: 0.6,
                b: 0.6,
            },
            0.0,
            false,
        );
        refine_iteration(&mut items, 2.0, &mut map, 1.0, true);
        // exact match roughly doubles, badly mapped grows beyond that
        assert!(items[0].adjusted_weight < items[1].adjusted_weight);
    }
}

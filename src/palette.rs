//! Internal palette shared by median cut, k-means refinement, and remapping.

use std::cmp::Ordering;

use crate::color::{FPixel, MIN_VISIBLE_ALPHA};

/// Alpha at or above this counts as fully opaque for palette ordering.
const ALMOST_OPAQUE: f32 = 255.0 / 256.0;

#[derive(Debug, Clone, Copy)]
pub(crate) struct PalItem {
    pub color: FPixel,
    /// Total histogram weight mapped onto this entry.
    pub popularity: f32,
    /// Caller-pinned color; refinement must not move it.
    pub fixed: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PaletteMap {
    pub items: Vec<PalItem>,
}

impl PaletteMap {
    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn push(&mut self, color: FPixel, popularity: f32, fixed: bool) {
        self.items.push(PalItem {
            color,
            popularity,
            fixed,
        });
    }

    /// Orders entries for output.
    ///
    /// By default entries with any transparency come first, so encoders that
    /// store alpha in a prefix table (PNG tRNS) can truncate it; within each
    /// group less popular entries come first. With `last_index_transparent`
    /// a fully transparent entry is instead swapped into the final slot and
    /// only the rest is sorted, which suits GIF-style single-index
    /// transparency.
    pub(crate) fn sort_for_output(&mut self, last_index_transparent: bool) {
        if last_index_transparent {
            if let Some(pos) = self
                .items
                .iter()
                .position(|it| it.color.a < MIN_VISIBLE_ALPHA)
            {
                let last = self.items.len() - 1;
                self.items.swap(pos, last);
                self.items[..last].sort_by(compare_popularity);
                return;
            }
        }
        self.items.sort_by(|x, y| {
            let gx = u8::from(x.color.a >= ALMOST_OPAQUE);
            let gy = u8::from(y.color.a >= ALMOST_OPAQUE);
            gx.cmp(&gy).then_with(|| compare_popularity(x, y))
        });
    }
}

fn compare_popularity(x: &PalItem, y: &PalItem) -> Ordering {
    x.popularity
        .partial_cmp(&y.popularity)
        .unwrap_or(Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opaque(v: f32, pop: f32) -> PalItem {
        PalItem {
            color: FPixel {
                a: 1.0,
                r: v,
                g: v,
                b: v,
            },
            popularity: pop,
            fixed: false,
        }
    }

    fn translucent(alpha: f32, pop: f32) -> PalItem {
        PalItem {
            color: FPixel {
                a: alpha,
                r: 0.1 * alpha,
                g: 0.1 * alpha,
                b: 0.1 * alpha,
            },
            popularity: pop,
            fixed: false,
        }
    }

    #[test]
    fn transparent_entries_sort_first() {
        let mut map = PaletteMap::default();
        map.items = vec![
            opaque(0.9, 5.0),
            translucent(0.5, 1.0),
            opaque(0.1, 2.0),
            translucent(0.0, 3.0),
        ];
        map.sort_for_output(false);
        assert!(map.items[0].color.a < ALMOST_OPAQUE);
        assert!(map.items[1].color.a < ALMOST_OPAQUE);
        assert!(map.items[2].color.a >= ALMOST_OPAQUE);
        // ascending popularity within each group
        assert!(map.items[0].popularity <= map.items[1].popularity);
        assert!(map.items[2].popularity <= map.items[3].popularity);
    }

    #[test]
    fn transparent_entry_can_go_last() {
        let mut map = PaletteMap::default();
        map.items = vec![opaque(0.9, 5.0), translucent(0.0, 9.0), opaque(0.1, 2.0)];
        map.sort_for_output(true);
        assert_eq!(map.items.len(), 3);
        assert!(map.items[2].color.a < MIN_VISIBLE_ALPHA);
        assert!(map.items[0].popularity <= map.items[1].popularity);
    }

    #[test]
    fn no_transparent_entry_falls_back_to_default_order() {
        let mut map = PaletteMap::default();
        map.items = vec![opaque(0.9, 5.0), opaque(0.1, 2.0)];
        map.sort_for_output(true);
        assert!(map.items[0].popularity <= map.items[1].popularity);
    }
}

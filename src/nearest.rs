//! Nearest palette entry lookup.
//!
//! A small k-d tree over the r/g/b channels of the palette. The distance
//! metric is not Euclidean, but it never undershoots the plain squared
//! per-channel difference (see [`color_difference`]), so pruning on the
//! splitting plane's squared axis distance keeps the search exact. Ties go to
//! the lowest palette index, which keeps remapping deterministic.

use crate::color::{color_difference, FPixel};
use crate::palette::PaletteMap;

const NO_CHILD: i16 = -1;

/// Extra distance charged to entries with any transparency when the query
/// pixel must stay opaque (the min-opacity workaround). Added on top of the
/// real distance, so the lower bound used for pruning still holds.
const TRANSPARENCY_PENALTY: f32 = 1.0 / 1024.0;

struct Node {
    color: FPixel,
    palette_index: u8,
    axis: u8,
    left: i16,
    right: i16,
}

pub(crate) struct Nearest {
    nodes: Vec<Node>,
    root: i16,
    colors: Vec<FPixel>,
    /// Quarter of each entry's squared distance to its closest sibling; a
    /// guess closer than this cannot be beaten by any other entry.
    stable_radius: Vec<f32>,
    min_opaque: f32,
}

impl Nearest {
    pub(crate) fn new(map: &PaletteMap, min_opaque: f32) -> Nearest {
        let colors: Vec<FPixel> = map.items.iter().map(|it| it.color).collect();

        let stable_radius = colors
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let nearest_other = colors
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .map(|(_, &o)| color_difference(c, o))
                    .fold(f32::MAX, f32::min);
                nearest_other / 4.0
            })
            .collect();

        let mut entries: Vec<(FPixel, u8)> = colors
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i as u8))
            .collect();
        let mut nodes = Vec::with_capacity(entries.len());
        let root = build(&mut nodes, &mut entries);

        Nearest {
            nodes,
            root,
            colors,
            stable_radius,
            min_opaque,
        }
    }

    /// Index of the entry closest to `px`, and the (unpenalized) distance to
    /// it. `likely` seeds the search; when it is already within its stable
    /// radius the tree is not touched at all, which is the common case for
    /// histogram items revisited across k-means passes.
    pub(crate) fn search(&self, px: FPixel, likely: u8) -> (u8, f32) {
        // the seed may come from an earlier, larger palette
        let likely = if usize::from(likely) < self.colors.len() {
            likely
        } else {
            0
        };
        let keep_opaque = px.a > self.min_opaque;
        let guess = self.colors[usize::from(likely)];
        let guess_diff = color_difference(px, guess);
        // a penalized seed can lose to a farther opaque entry, so the
        // shortcut only holds when the seed carries no penalty
        if guess_diff < self.stable_radius[usize::from(likely)]
            && !(keep_opaque && guess.a < 1.0)
        {
            return (likely, guess_diff);
        }

        let mut best = (self.penalized(guess_diff, guess, keep_opaque), likely);
        self.descend(self.root, px, keep_opaque, &mut best);
        let index = best.1;
        (index, color_difference(px, self.colors[usize::from(index)]))
    }

    fn penalized(&self, diff: f32, entry: FPixel, keep_opaque: bool) -> f32 {
        if keep_opaque && entry.a < 1.0 {
            diff + TRANSPARENCY_PENALTY
        } else {
            diff
        }
    }

    fn descend(&self, node: i16, px: FPixel, keep_opaque: bool, best: &mut (f32, u8)) {
        if node == NO_CHILD {
            return;
        }
        let n = &self.nodes[node as usize];
        let d = self.penalized(color_difference(px, n.color), n.color, keep_opaque);
        if d < best.0 || (d == best.0 && n.palette_index < best.1) {
            *best = (d, n.palette_index);
        }

        let delta = px.channel(usize::from(n.axis)) - n.color.channel(usize::from(n.axis));
        let (near, far) = if delta < 0.0 {
            (n.left, n.right)
        } else {
            (n.right, n.left)
        };
        self.descend(near, px, keep_opaque, best);
        // an equal-distance entry may hide exactly on the plane
        if delta * delta <= best.0 {
            self.descend(far, px, keep_opaque, best);
        }
    }
}

fn build(nodes: &mut Vec<Node>, entries: &mut [(FPixel, u8)]) -> i16 {
    if entries.is_empty() {
        return NO_CHILD;
    }
    let axis = widest_axis(entries);
    entries.sort_unstable_by(|x, y| {
        x.0.channel(axis)
            .partial_cmp(&y.0.channel(axis))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(x.1.cmp(&y.1))
    });
    let mid = entries.len() / 2;
    let (color, palette_index) = entries[mid];
    let (lower, rest) = entries.split_at_mut(mid);
    let left = build(nodes, lower);
    let right = build(nodes, &mut rest[1..]);
    nodes.push(Node {
        color,
        palette_index,
        axis: axis as u8,
        left,
        right,
    });
    (nodes.len() - 1) as i16
}

fn widest_axis(entries: &[(FPixel, u8)]) -> usize {
    let mut best_axis = 0;
    let mut best_spread = -1.0f32;
    for axis in 0..3 {
        let mut lo = f32::MAX;
        let mut hi = f32::MIN;
        for (c, _) in entries {
            let v = c.channel(axis);
            lo = lo.min(v);
            hi = hi.max(v);
        }
        let spread = hi - lo;
        if spread > best_spread {
            best_spread = spread;
            best_axis = axis;
        }
    }
    best_axis
}

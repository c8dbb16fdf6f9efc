//! Bounding-volume hierarchy for nearest-triangle queries.
//!
//! A median-split binary tree: each node splits its triangles at the median
//! centroid along the longest axis of its bounds. This favours balanced depth
//! over query cost, which is fine because leaves stay small and uniform.
//!
//! Queries are branch-and-bound: a subtree is skipped when the distance to
//! its box is already no better than the best triangle found so far.

use glam::Vec3;

use crate::distance::point_triangle_distance;
use crate::mesh::{Aabb, Triangle};

/// Default maximum tree depth.
pub const DEFAULT_MAX_DEPTH: u32 = 24;
/// Default leaf size below which nodes stop splitting.
pub const DEFAULT_MIN_LEAF_SIZE: usize = 4;

enum BvhNode {
    Leaf {
        bounds: Aabb,
        triangles: Vec<Triangle>,
    },
    Branch {
        bounds: Aabb,
        left: Box<BvhNode>,
        right: Box<BvhNode>,
    },
}

impl BvhNode {
    fn bounds(&self) -> &Aabb {
        match self {
            BvhNode::Leaf { bounds, .. } | BvhNode::Branch { bounds, .. } => bounds,
        }
    }

    fn build(mut triangles: Vec<Triangle>, depth: u32, max_depth: u32, min_leaf_size: usize) -> Self {
        let bounds = Aabb::from_triangles(&triangles);
        if triangles.len() <= min_leaf_size || depth >= max_depth {
            return BvhNode::Leaf { bounds, triangles };
        }

        let axis = bounds.longest_axis();
        triangles.sort_unstable_by(|a, b| a.centroid()[axis].total_cmp(&b.centroid()[axis]));
        let right = triangles.split_off(triangles.len() / 2);

        BvhNode::Branch {
            bounds,
            left: Box::new(Self::build(triangles, depth + 1, max_depth, min_leaf_size)),
            right: Box::new(Self::build(right, depth + 1, max_depth, min_leaf_size)),
        }
    }

    fn nearest(&self, p: Vec3, mut best: f32) -> f32 {
        if self.bounds().distance_to_point(p) >= best {
            return best;
        }
        match self {
            BvhNode::Leaf { triangles, .. } => {
                for tri in triangles {
                    best = best.min(point_triangle_distance(p, tri));
                }
                best
            }
            BvhNode::Branch { left, right, .. } => {
                let dl = left.bounds().distance_to_point(p);
                let dr = right.bounds().distance_to_point(p);
                let (near, far) = if dl <= dr { (left, right) } else { (right, left) };
                best = near.nearest(p, best);
                far.nearest(p, best)
            }
        }
    }

    fn stats(&self, depth: u32, stats: &mut BvhStats) {
        stats.depth = stats.depth.max(depth);
        match self {
            BvhNode::Leaf { triangles, .. } => {
                stats.leaves += 1;
                stats.triangles += triangles.len();
                stats.largest_leaf = stats.largest_leaf.max(triangles.len());
            }
            BvhNode::Branch { left, right, .. } => {
                left.stats(depth + 1, stats);
                right.stats(depth + 1, stats);
            }
        }
    }
}

/// Shape summary of a built tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BvhStats {
    pub depth: u32,
    pub leaves: usize,
    pub triangles: usize,
    pub largest_leaf: usize,
}

/// Bounding-volume hierarchy over an owned copy of a triangle set.
pub struct Bvh {
    root: BvhNode,
}

impl Bvh {
    /// Build with the default depth and leaf limits.
    pub fn new(triangles: &[Triangle]) -> Self {
        Self::build(triangles.to_vec(), DEFAULT_MAX_DEPTH, DEFAULT_MIN_LEAF_SIZE)
    }

    pub fn build(triangles: Vec<Triangle>, max_depth: u32, min_leaf_size: usize) -> Self {
        Self {
            root: BvhNode::build(triangles, 0, max_depth, min_leaf_size.max(1)),
        }
    }

    /// Bounds of every triangle in the tree.
    pub fn bounds(&self) -> &Aabb {
        self.root.bounds()
    }

    /// Minimum distance from `p` to any triangle.
    pub fn nearest_distance(&self, p: Vec3) -> f32 {
        self.root.nearest(p, f32::INFINITY)
    }

    pub fn stats(&self) -> BvhStats {
        let mut stats = BvhStats::default();
        self.root.stats(0, &mut stats);
        stats
    }
}

/// Minimum distance from `p` to any triangle without acceleration.
pub fn brute_force_distance(p: Vec3, triangles: &[Triangle]) -> f32 {
    triangles
        .iter()
        .map(|t| point_triangle_distance(p, t))
        .fold(f32::INFINITY, f32::min)
}

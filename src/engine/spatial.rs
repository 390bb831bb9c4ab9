//! Region quadtree over the square world for causal-horizon neighbor queries
//!
//! Leaves hold up to `capacity` points. A full leaf splits into four equal
//! quadrants (NW, NE, SW, SE) and pushes its points down, so an internal node
//! never holds points directly. Subdivision stops at `max_depth`: leaves at
//! that depth absorb any overflow instead of splitting again, which keeps
//! clustered input (many participants on one coordinate) from recursing
//! forever.
//!
//! Coordinates are screen-oriented (y grows downward) and every region is
//! half-open: `[min.x, max.x) x [min.y, max.y)`.

use smallvec::SmallVec;

use crate::engine::participant::ParticipantId;
use crate::util::vec2::Vec2;

/// Inline point storage per leaf; matches the default node capacity
const LEAF_INLINE_POINTS: usize = 4;

/// Initial capacity for query result buffers
const QUERY_RESULT_INITIAL_CAPACITY: usize = 32;

// ============================================================================
// Geometry
// ============================================================================

/// Axis-aligned half-open rectangle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Rectangle from an origin and its extent
    pub fn from_origin(origin: Vec2, width: f64, height: f64) -> Self {
        Self {
            min: origin,
            max: Vec2::new(origin.x + width, origin.y + height),
        }
    }

    /// The square `[0, side) x [0, side)`
    pub fn square(side: f64) -> Self {
        Self::new(Vec2::ZERO, Vec2::new(side, side))
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// Inclusive-low, exclusive-high containment. NaN is never contained.
    #[inline]
    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x < self.max.x && point.y >= self.min.y && point.y < self.max.y
    }

    /// Split into NW, NE, SW, SE.
    ///
    /// Siblings share the exact split coordinate, so the four children tile the
    /// parent with no gap or overlap under half-open containment.
    pub fn quadrants(&self) -> [Rect; 4] {
        let mid = Vec2::new(
            self.min.x + self.width() / 2.0,
            self.min.y + self.height() / 2.0,
        );
        [
            Rect::new(self.min, mid),
            Rect::new(Vec2::new(mid.x, self.min.y), Vec2::new(self.max.x, mid.y)),
            Rect::new(Vec2::new(self.min.x, mid.y), Vec2::new(mid.x, self.max.y)),
            Rect::new(mid, self.max),
        ]
    }

    /// Squared distance from `point` to the closest point of this rectangle
    ///
    /// Zero when the point lies inside.
    #[inline]
    pub fn distance_sq_to(&self, point: Vec2) -> f64 {
        let closest = point.clamp(self.min, self.max);
        point.distance_sq_to(closest)
    }
}

/// Entry stored in the index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedPoint {
    pub id: ParticipantId,
    pub position: Vec2,
}

/// Inclusive range test shared by the tree and anything checking it
#[inline]
pub fn within_radius(center: Vec2, point: Vec2, radius: f64) -> bool {
    center.distance_sq_to(point) <= radius * radius
}

// ============================================================================
// Nodes
// ============================================================================

/// Subdivision limits, copied down the recursion
#[derive(Debug, Clone, Copy)]
struct Limits {
    capacity: usize,
    max_depth: u8,
}

/// One region of the tree: either a leaf with points or an internal node with four children
#[derive(Debug, Clone)]
pub struct QuadNode {
    bounds: Rect,
    depth: u8,
    points: SmallVec<[IndexedPoint; LEAF_INLINE_POINTS]>,
    /// NW, NE, SW, SE once subdivided
    children: Option<Box<[QuadNode; 4]>>,
}

impl QuadNode {
    fn new(bounds: Rect, depth: u8) -> Self {
        Self {
            bounds,
            depth,
            points: SmallVec::new(),
            children: None,
        }
    }

    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Points held directly by this node (always empty for internal nodes)
    pub fn points(&self) -> &[IndexedPoint] {
        &self.points
    }

    pub fn children(&self) -> Option<&[QuadNode; 4]> {
        self.children.as_deref()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    fn insert(&mut self, point: IndexedPoint, limits: Limits) -> bool {
        if !self.bounds.contains(point.position) {
            return false;
        }

        if self.is_leaf() {
            if self.points.len() < limits.capacity || self.depth >= limits.max_depth {
                self.points.push(point);
                return true;
            }
            self.subdivide(limits);
        }

        // First child to accept wins; the quadrants tile the parent so exactly one will
        match self.children.as_deref_mut() {
            Some(children) => children.iter_mut().any(|child| child.insert(point, limits)),
            None => false,
        }
    }

    /// Split into four quadrants and push held points down
    fn subdivide(&mut self, limits: Limits) {
        let [nw, ne, sw, se] = self.bounds.quadrants();
        let child_depth = self.depth + 1;
        let mut children = Box::new([
            QuadNode::new(nw, child_depth),
            QuadNode::new(ne, child_depth),
            QuadNode::new(sw, child_depth),
            QuadNode::new(se, child_depth),
        ]);

        for point in self.points.drain(..) {
            let placed = children.iter_mut().any(|child| child.insert(point, limits));
            debug_assert!(placed, "quadrants must tile their parent");
        }

        self.children = Some(children);
    }

    fn query_into(&self, center: Vec2, radius: f64, out: &mut Vec<IndexedPoint>) {
        // Closest-point test: the circle may touch a node whose bounding box
        // corner is outside it
        if self.bounds.distance_sq_to(center) > radius * radius {
            return;
        }

        out.extend(
            self.points
                .iter()
                .filter(|p| within_radius(center, p.position, radius))
                .copied(),
        );

        if let Some(children) = self.children.as_deref() {
            for child in children {
                child.query_into(center, radius, out);
            }
        }
    }

    fn remove(&mut self, id: ParticipantId, position: Vec2) -> bool {
        if !self.bounds.contains(position) {
            return false;
        }

        match self.children.as_deref_mut() {
            Some(children) => children.iter_mut().any(|child| child.remove(id, position)),
            None => match self.points.iter().position(|p| p.id == id) {
                Some(idx) => {
                    // Keep insertion order of the remaining points
                    self.points.remove(idx);
                    true
                }
                None => false,
            },
        }
    }

    fn collect_stats(&self, stats: &mut QuadTreeStats) {
        stats.max_depth = stats.max_depth.max(self.depth);
        match self.children.as_deref() {
            Some(children) => {
                stats.internal_nodes += 1;
                for child in children {
                    child.collect_stats(stats);
                }
            }
            None => {
                stats.leaf_nodes += 1;
                stats.total_points += self.points.len();
                stats.max_points_per_leaf = stats.max_points_per_leaf.max(self.points.len());
            }
        }
    }
}

// ============================================================================
// Tree
// ============================================================================

/// Quadtree index owned by the selection engine
#[derive(Debug, Clone)]
pub struct QuadTree {
    root: QuadNode,
    limits: Limits,
    len: usize,
}

impl QuadTree {
    /// Create an empty tree over `bounds`
    pub fn new(bounds: Rect, capacity: usize, max_depth: u8) -> Self {
        Self {
            root: QuadNode::new(bounds, 0),
            limits: Limits {
                capacity: capacity.max(1),
                max_depth,
            },
            len: 0,
        }
    }

    /// Create an empty tree over the world square `[0, world_size)^2`
    pub fn for_world(world_size: f64, capacity: usize, max_depth: u8) -> Self {
        Self::new(Rect::square(world_size), capacity, max_depth)
    }

    /// Insert a point. Returns false, leaving the tree untouched, when the
    /// position is outside the tree's region.
    pub fn insert(&mut self, id: ParticipantId, position: Vec2) -> bool {
        let inserted = self.root.insert(IndexedPoint { id, position }, self.limits);
        if inserted {
            self.len += 1;
        }
        inserted
    }

    /// Every point within `radius` of `center` (inclusive). Order follows tree shape.
    pub fn query(&self, center: Vec2, radius: f64) -> Vec<IndexedPoint> {
        let mut out = Vec::with_capacity(QUERY_RESULT_INITIAL_CAPACITY);
        self.query_into(center, radius, &mut out);
        out
    }

    /// Like `query`, appending into a caller-owned buffer
    pub fn query_into(&self, center: Vec2, radius: f64, out: &mut Vec<IndexedPoint>) {
        if radius.is_nan() || radius < 0.0 || !center.is_finite() {
            return;
        }
        self.root.query_into(center, radius, out);
    }

    /// Remove the entry for `id` stored at `position`
    ///
    /// `position` must be the one the entry was inserted with; it routes the
    /// search to a single leaf. Emptied nodes are not merged.
    pub fn remove(&mut self, id: ParticipantId, position: Vec2) -> bool {
        let removed = self.root.remove(id, position);
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Drop every node and start again from an empty root
    pub fn clear(&mut self) {
        self.root = QuadNode::new(self.root.bounds, 0);
        self.len = 0;
    }

    /// Clear and insert every `(id, position)`. Returns how many were rejected as out of region.
    pub fn rebuild(&mut self, points: impl IntoIterator<Item = (ParticipantId, Vec2)>) -> usize {
        self.clear();
        points
            .into_iter()
            .filter(|&(id, position)| !self.insert(id, position))
            .count()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bounds(&self) -> Rect {
        self.root.bounds
    }

    pub fn root(&self) -> &QuadNode {
        &self.root
    }

    /// Get statistics about the tree shape
    pub fn stats(&self) -> QuadTreeStats {
        let mut stats = QuadTreeStats::default();
        self.root.collect_stats(&mut stats);
        stats
    }
}

/// Statistics about the quadtree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuadTreeStats {
    pub total_points: usize,
    pub leaf_nodes: usize,
    pub internal_nodes: usize,
    pub max_depth: u8,
    pub max_points_per_leaf: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn world_tree() -> QuadTree {
        QuadTree::for_world(800.0, 4, 5)
    }

    fn sorted_ids(points: &[IndexedPoint]) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = points.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids
    }

    /// Walk every node, checking the leaf/internal invariant and exact tiling
    fn assert_partition_exact(node: &QuadNode) {
        let Some(children) = node.children() else {
            return;
        };
        assert!(node.points().is_empty(), "internal node holds points directly");

        let parent = node.bounds();
        let [nw, ne, sw, se] = [
            children[0].bounds(),
            children[1].bounds(),
            children[2].bounds(),
            children[3].bounds(),
        ];

        // Outer edges coincide with the parent
        assert_eq!(nw.min, parent.min);
        assert_eq!(se.max, parent.max);
        assert_eq!(ne.min.y, parent.min.y);
        assert_eq!(ne.max.x, parent.max.x);
        assert_eq!(sw.min.x, parent.min.x);
        assert_eq!(sw.max.y, parent.max.y);

        // Shared split lines: no gap, no overlap under half-open bounds
        assert_eq!(nw.max.x, ne.min.x);
        assert_eq!(sw.max.x, se.min.x);
        assert_eq!(nw.max.x, sw.max.x);
        assert_eq!(nw.max.y, sw.min.y);
        assert_eq!(ne.max.y, se.min.y);
        assert_eq!(nw.max.y, ne.max.y);

        for child in children {
            assert_eq!(child.depth(), node.depth() + 1);
            assert_partition_exact(child);
        }
    }

    #[test]
    fn test_rect_contains_half_open() {
        let rect = Rect::square(800.0);
        assert!(rect.contains(Vec2::new(0.0, 0.0)));
        assert!(rect.contains(Vec2::new(799.999, 799.999)));
        assert!(!rect.contains(Vec2::new(800.0, 10.0)));
        assert!(!rect.contains(Vec2::new(10.0, 800.0)));
        assert!(!rect.contains(Vec2::new(-0.001, 10.0)));
        assert!(!rect.contains(Vec2::new(f64::NAN, 10.0)));
    }

    #[test]
    fn test_rect_from_origin() {
        let rect = Rect::from_origin(Vec2::new(100.0, 200.0), 50.0, 25.0);
        assert_eq!(rect.width(), 50.0);
        assert_eq!(rect.height(), 25.0);
        assert_eq!(rect.max, Vec2::new(150.0, 225.0));
    }

    #[test]
    fn test_quadrants_orientation() {
        let [nw, ne, sw, se] = Rect::square(800.0).quadrants();
        assert_eq!(nw, Rect::new(Vec2::new(0.0, 0.0), Vec2::new(400.0, 400.0)));
        assert_eq!(ne, Rect::new(Vec2::new(400.0, 0.0), Vec2::new(800.0, 400.0)));
        assert_eq!(sw, Rect::new(Vec2::new(0.0, 400.0), Vec2::new(400.0, 800.0)));
        assert_eq!(se, Rect::new(Vec2::new(400.0, 400.0), Vec2::new(800.0, 800.0)));
    }

    #[test]
    fn test_quadrants_odd_bounds_tile_exactly() {
        let rect = Rect::from_origin(Vec2::new(0.1, 0.7), 0.3, 13.0 / 3.0);
        let [nw, ne, sw, se] = rect.quadrants();
        assert_eq!(nw.max.x, ne.min.x);
        assert_eq!(sw.max.y, rect.max.y);
        assert_eq!(se.max, rect.max);
        assert_eq!(nw.max.y, se.min.y);
    }

    #[test]
    fn test_rect_distance_sq() {
        let rect = Rect::from_origin(Vec2::new(100.0, 100.0), 100.0, 100.0);
        assert_eq!(rect.distance_sq_to(Vec2::new(150.0, 150.0)), 0.0);
        assert_eq!(rect.distance_sq_to(Vec2::new(50.0, 150.0)), 2500.0);
        // Corner: closest point is (100, 100)
        assert_eq!(rect.distance_sq_to(Vec2::new(97.0, 96.0)), 25.0);
    }

    #[test]
    fn test_insert_within_capacity_stays_leaf() {
        let mut tree = world_tree();
        for i in 0..4 {
            assert!(tree.insert(i, Vec2::new(10.0 + i as f64, 10.0)));
        }
        assert!(tree.root().is_leaf());
        assert_eq!(tree.root().points().len(), 4);
        // Insertion order preserved within a leaf
        let ids: Vec<_> = tree.root().points().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_overflow_subdivides() {
        let mut tree = world_tree();
        tree.insert(0, Vec2::new(100.0, 100.0));
        tree.insert(1, Vec2::new(500.0, 100.0));
        tree.insert(2, Vec2::new(100.0, 500.0));
        tree.insert(3, Vec2::new(500.0, 500.0));
        tree.insert(4, Vec2::new(600.0, 600.0));

        let root = tree.root();
        assert!(!root.is_leaf());
        assert!(root.points().is_empty());

        let children = root.children().unwrap();
        let counts: Vec<_> = children.iter().map(|c| c.points().len()).collect();
        assert_eq!(counts, vec![1, 1, 1, 2]);
        assert_eq!(tree.len(), 5);
        assert_partition_exact(root);
    }

    #[test]
    fn test_split_line_belongs_to_lower_bound_quadrant() {
        let mut tree = world_tree();
        for i in 0..4 {
            tree.insert(i, Vec2::new(1.0, 1.0));
        }
        tree.insert(99, Vec2::new(400.0, 400.0));

        let se = &tree.root().children().unwrap()[3];
        assert!(se.points().iter().any(|p| p.id == 99));
    }

    #[test]
    fn test_out_of_region_rejected() {
        let mut tree = world_tree();
        assert!(!tree.insert(1, Vec2::new(800.0, 0.0)));
        assert!(!tree.insert(2, Vec2::new(-1.0, 0.0)));
        assert!(!tree.insert(3, Vec2::new(f64::NAN, 5.0)));
        assert!(!tree.insert(4, Vec2::new(f64::INFINITY, 5.0)));
        assert!(tree.is_empty());
        assert!(tree.root().is_leaf());
    }

    #[test]
    fn test_query_boundary_inclusive() {
        let mut tree = world_tree();
        tree.insert(1, Vec2::new(150.0, 100.0));
        tree.insert(2, Vec2::new(100.0, 200.0));

        let results = tree.query(Vec2::new(100.0, 100.0), 50.0);
        assert_eq!(sorted_ids(&results), vec![1]);

        let results = tree.query(Vec2::new(100.0, 100.0), 100.0);
        assert_eq!(sorted_ids(&results), vec![1, 2]);
    }

    #[test]
    fn test_query_zero_radius_and_empty() {
        let mut tree = world_tree();
        assert!(tree.query(Vec2::new(10.0, 10.0), 100.0).is_empty());

        tree.insert(7, Vec2::new(10.0, 10.0));
        tree.insert(8, Vec2::new(10.0, 10.5));
        assert_eq!(sorted_ids(&tree.query(Vec2::new(10.0, 10.0), 0.0)), vec![7]);
        assert!(tree.query(Vec2::new(10.0, 10.0), -1.0).is_empty());
        assert!(tree.query(Vec2::new(f64::NAN, 10.0), 10.0).is_empty());
    }

    #[test]
    fn test_query_center_outside_world() {
        let mut tree = world_tree();
        tree.insert(1, Vec2::new(0.0, 0.0));
        let results = tree.query(Vec2::new(-30.0, -40.0), 50.0);
        assert_eq!(sorted_ids(&results), vec![1]);
    }

    #[test]
    fn test_remove() {
        let mut tree = world_tree();
        for i in 0..10 {
            tree.insert(i, Vec2::new(50.0 * i as f64 + 5.0, 300.0));
        }
        assert!(tree.remove(3, Vec2::new(155.0, 300.0)));
        assert!(!tree.remove(3, Vec2::new(155.0, 300.0)));
        // Wrong position routes to the wrong leaf
        assert!(!tree.remove(4, Vec2::new(700.0, 700.0)));
        assert_eq!(tree.len(), 9);

        let all = tree.query(Vec2::new(400.0, 400.0), 2000.0);
        assert!(!sorted_ids(&all).contains(&3));
        assert_eq!(all.len(), 9);
    }

    #[test]
    fn test_rebuild_replaces_contents() {
        let mut tree = world_tree();
        tree.insert(1, Vec2::new(10.0, 10.0));
        let rejected = tree.rebuild(vec![
            (10, Vec2::new(20.0, 20.0)),
            (11, Vec2::new(30.0, 30.0)),
            (12, Vec2::new(900.0, 30.0)),
        ]);
        assert_eq!(rejected, 1);
        assert_eq!(tree.len(), 2);
        let ids = sorted_ids(&tree.query(Vec2::new(0.0, 0.0), 1000.0));
        assert_eq!(ids, vec![10, 11]);
    }

    #[test]
    fn test_clustered_points_respect_depth_cap() {
        let mut tree = world_tree();
        for i in 0..1000 {
            assert!(tree.insert(i, Vec2::new(123.0, 456.0)));
        }

        let stats = tree.stats();
        assert_eq!(stats.max_depth, 5);
        assert_eq!(stats.total_points, 1000);
        assert_eq!(stats.max_points_per_leaf, 1000);
        assert_eq!(tree.query(Vec2::new(123.0, 456.0), 0.0).len(), 1000);
        assert_partition_exact(tree.root());
    }

    #[test]
    fn test_stats() {
        let mut tree = world_tree();
        for i in 0..5 {
            tree.insert(i, Vec2::new(100.0 + i as f64 * 150.0, 100.0 + i as f64 * 150.0));
        }
        let stats = tree.stats();
        assert_eq!(stats.total_points, 5);
        assert_eq!(stats.internal_nodes, 1);
        assert_eq!(stats.leaf_nodes, 4);
        assert_eq!(stats.max_depth, 1);
    }

    fn point_strategy() -> impl Strategy<Value = (f64, f64)> {
        (0.0..800.0f64, 0.0..800.0f64)
    }

    proptest! {
        #[test]
        fn prop_query_matches_brute_force(
            points in prop::collection::vec(point_strategy(), 0..300),
            center in (-100.0..900.0f64, -100.0..900.0f64),
            radius in 0.0..500.0f64,
        ) {
            let mut tree = world_tree();
            for (i, &(x, y)) in points.iter().enumerate() {
                prop_assert!(tree.insert(i as ParticipantId, Vec2::new(x, y)));
            }

            let center = Vec2::new(center.0, center.1);
            let expected: Vec<ParticipantId> = points
                .iter()
                .enumerate()
                .filter(|(_, p)| within_radius(center, Vec2::new(p.0, p.1), radius))
                .map(|(i, _)| i as ParticipantId)
                .collect();

            prop_assert_eq!(sorted_ids(&tree.query(center, radius)), expected);
        }

        #[test]
        fn prop_insertion_never_loses_points(
            points in prop::collection::vec(point_strategy(), 0..300),
        ) {
            let mut tree = world_tree();
            for (i, &(x, y)) in points.iter().enumerate() {
                tree.insert(i as ParticipantId, Vec2::new(x, y));
            }
            prop_assert_eq!(tree.len(), points.len());
            prop_assert_eq!(tree.stats().total_points, points.len());
            // Diagonal of the world covers every corner from the center
            prop_assert_eq!(tree.query(Vec2::new(400.0, 400.0), 800.0).len(), points.len());
            assert_partition_exact(tree.root());
        }
    }
}

//! Cuts the link graph into track segments.

use std::collections::HashMap;

use crate::integration::{Edge, Spot, SpotId, SpotsRead};

/// Track segments of a link graph: its connected components with at least
/// two spots, each sorted by (frame, id).
///
/// Segments are ordered by their first spot.
#[derive(Debug)]
pub struct SegmentSplitter<'a> {
    segment_starts: Vec<&'a Spot>,
    segment_ends: Vec<&'a Spot>,
    segment_middles: Vec<Vec<&'a Spot>>,
}

impl<'a> SegmentSplitter<'a> {
    /// Splits `edges` into segments. Interior points are only collected
    /// when `find_middle_points` is set. Edges naming spots absent from
    /// `spots` are ignored.
    pub fn new(edges: &[Edge], spots: &'a SpotsRead<'_>, find_middle_points: bool) -> Self {
        let mut components = DisjointSets::default();
        for edge in edges {
            if spots.get(edge.source).is_some() && spots.get(edge.target).is_some() {
                components.union(edge.source, edge.target);
            }
        }

        let mut segments: Vec<Vec<&'a Spot>> = components
            .groups()
            .into_iter()
            .filter(|group| group.len() >= 2)
            .map(|group| {
                let mut segment: Vec<&'a Spot> =
                    group.into_iter().filter_map(|id| spots.get(id)).collect();
                segment.sort_by_key(|s| (s.frame, s.id));
                segment
            })
            .collect();
        segments.sort_by_key(|segment| segment.first().map(|s| (s.frame, s.id)));

        let mut splitter = Self {
            segment_starts: Vec::with_capacity(segments.len()),
            segment_ends: Vec::with_capacity(segments.len()),
            segment_middles: Vec::new(),
        };
        for segment in segments {
            let (Some(&start), Some(&end)) = (segment.first(), segment.last()) else {
                continue;
            };
            splitter.segment_starts.push(start);
            splitter.segment_ends.push(end);
            if find_middle_points {
                let middles = segment[1..segment.len() - 1].to_vec();
                splitter.segment_middles.push(middles);
            }
        }
        splitter
    }

    /// First spot of each segment.
    pub fn segment_starts(&self) -> &[&'a Spot] {
        &self.segment_starts
    }

    /// Last spot of each segment.
    pub fn segment_ends(&self) -> &[&'a Spot] {
        &self.segment_ends
    }

    /// Interior spots of each segment, empty when middle points were not
    /// requested.
    pub fn segment_middles(&self) -> &[Vec<&'a Spot>] {
        &self.segment_middles
    }

    pub fn len(&self) -> usize {
        self.segment_starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segment_starts.is_empty()
    }
}

/// Union-find over spot ids, with path halving.
#[derive(Debug, Default)]
struct DisjointSets {
    index: HashMap<SpotId, usize>,
    ids: Vec<SpotId>,
    parent: Vec<usize>,
}

impl DisjointSets {
    fn slot(&mut self, id: SpotId) -> usize {
        if let Some(&i) = self.index.get(&id) {
            return i;
        }
        let i = self.ids.len();
        self.index.insert(id, i);
        self.ids.push(id);
        self.parent.push(i);
        i
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: SpotId, b: SpotId) {
        let (a, b) = (self.slot(a), self.slot(b));
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }

    fn groups(mut self) -> Vec<Vec<SpotId>> {
        let mut by_root: HashMap<usize, Vec<SpotId>> = HashMap::new();
        for i in 0..self.ids.len() {
            let root = self.find(i);
            by_root.entry(root).or_default().push(self.ids[i]);
        }
        by_root.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::SpotCollection;

    fn edge(a: u64, b: u64) -> Edge {
        Edge {
            source: SpotId(a),
            target: SpotId(b),
            weight: 1.0,
        }
    }

    fn spots() -> SpotCollection {
        // Track 1: ids 1..=4 over frames 0..=3. Track 2: ids 10, 11 over frames 5, 6.
        let mut all = Vec::new();
        for (k, id) in (1..=4).enumerate() {
            all.push(Spot::new(id, k as i32, [k as f64, 0.0, 0.0]));
        }
        all.push(Spot::new(10, 5, [0.0, 9.0, 0.0]));
        all.push(Spot::new(11, 6, [0.0, 9.0, 0.0]));
        all.push(Spot::new(20, 2, [5.0, 5.0, 0.0]));
        all.into_iter().collect()
    }

    #[test]
    fn test_segments_with_middles() {
        let spots = spots();
        let read = spots.read();
        let edges = [edge(3, 4), edge(1, 2), edge(11, 10), edge(2, 3)];
        let splitter = SegmentSplitter::new(&edges, &read, true);

        assert_eq!(splitter.len(), 2);
        let starts: Vec<SpotId> = splitter.segment_starts().iter().map(|s| s.id).collect();
        let ends: Vec<SpotId> = splitter.segment_ends().iter().map(|s| s.id).collect();
        assert_eq!(starts, vec![SpotId(1), SpotId(10)]);
        assert_eq!(ends, vec![SpotId(4), SpotId(11)]);
        let middles: Vec<Vec<SpotId>> = splitter
            .segment_middles()
            .iter()
            .map(|m| m.iter().map(|s| s.id).collect())
            .collect();
        assert_eq!(middles, vec![vec![SpotId(2), SpotId(3)], vec![]]);
    }

    #[test]
    fn test_no_middles_unless_requested() {
        let spots = spots();
        let read = spots.read();
        let edges = [edge(1, 2), edge(2, 3)];
        let splitter = SegmentSplitter::new(&edges, &read, false);
        assert_eq!(splitter.len(), 1);
        assert!(splitter.segment_middles().is_empty());
    }

    #[test]
    fn test_unknown_spots_and_empty_graph() {
        let spots = spots();
        let read = spots.read();
        let splitter = SegmentSplitter::new(&[edge(1, 99)], &read, true);
        assert!(splitter.is_empty());
        assert!(SegmentSplitter::new(&[], &read, true).is_empty());
    }
}

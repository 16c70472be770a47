//! Detected objects and the per-frame collection the linkers read from.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::ops::RangeInclusive;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use crate::linking::{Featured, Positioned};

/// Stable identity of a spot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpotId(pub u64);

/// A detection at one frame.
///
/// Equality, ordering and hashing only look at the id.
#[derive(Debug, Clone)]
pub struct Spot {
    pub id: SpotId,
    pub frame: i32,
    pub position: [f64; 3],
    pub radius: f64,
    pub features: BTreeMap<String, f64>,
}

impl Spot {
    pub fn new(id: u64, frame: i32, position: [f64; 3]) -> Self {
        Self {
            id: SpotId(id),
            frame,
            position,
            radius: 0.5,
            features: BTreeMap::new(),
        }
    }
}

impl PartialEq for Spot {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Spot {}

impl PartialOrd for Spot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Spot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Hash for Spot {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Positioned for Spot {
    fn position(&self) -> [f64; 3] {
        self.position
    }
}

impl Featured for Spot {
    fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied().filter(|v| !v.is_nan())
    }
}

#[derive(Debug, Default)]
struct Frames {
    frames: BTreeMap<i32, Vec<Spot>>,
    index: HashMap<SpotId, (i32, usize)>,
}

/// Spots grouped by frame, behind a read/write lock.
///
/// Linkers hold the read side for the whole candidate enumeration.
#[derive(Debug, Default)]
pub struct SpotCollection {
    inner: RwLock<Frames>,
}

impl SpotCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a spot under the write lock. A spot whose id is already present
    /// replaces the previous one.
    pub fn add(&self, spot: Spot) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some((frame, idx)) = inner.index.remove(&spot.id) {
            let removed = inner
                .frames
                .get_mut(&frame)
                .map(|spots| spots.remove(idx));
            if removed.is_some() {
                reindex(&mut inner, frame);
            }
        }
        let frame = spot.frame;
        let spots = inner.frames.entry(frame).or_default();
        let idx = spots.len();
        let id = spot.id;
        spots.push(spot);
        inner.index.insert(id, (frame, idx));
    }

    /// Read access to the spots. The guard keeps writers out until dropped.
    pub fn read(&self) -> SpotsRead<'_> {
        SpotsRead {
            guard: self.inner.read().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<Spot> for SpotCollection {
    fn from_iter<I: IntoIterator<Item = Spot>>(iter: I) -> Self {
        let collection = Self::new();
        for spot in iter {
            collection.add(spot);
        }
        collection
    }
}

fn reindex(inner: &mut Frames, frame: i32) {
    let Frames { frames, index } = inner;
    if let Some(spots) = frames.get(&frame) {
        for (idx, spot) in spots.iter().enumerate() {
            index.insert(spot.id, (frame, idx));
        }
        if spots.is_empty() {
            frames.remove(&frame);
        }
    }
}

/// Read guard over a [`SpotCollection`].
pub struct SpotsRead<'a> {
    guard: RwLockReadGuard<'a, Frames>,
}

impl SpotsRead<'_> {
    /// Non-empty frames in ascending order.
    pub fn frames(&self) -> impl Iterator<Item = (i32, &[Spot])> {
        self.guard
            .frames
            .iter()
            .filter(|(_, spots)| !spots.is_empty())
            .map(|(&t, spots)| (t, spots.as_slice()))
    }

    /// Non-empty frames whose number lies in `range`.
    pub fn frames_in(&self, range: RangeInclusive<i32>) -> impl Iterator<Item = (i32, &[Spot])> {
        self.guard
            .frames
            .range(range)
            .filter(|(_, spots)| !spots.is_empty())
            .map(|(&t, spots)| (t, spots.as_slice()))
    }

    /// Spots of frame `t`; empty if the frame holds none.
    pub fn frame(&self, t: i32) -> &[Spot] {
        self.guard.frames.get(&t).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, id: SpotId) -> Option<&Spot> {
        let &(frame, idx) = self.guard.index.get(&id)?;
        self.guard.frames.get(&frame)?.get(idx)
    }

    pub fn len(&self) -> usize {
        self.guard.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First and last non-empty frames.
    pub fn frame_range(&self) -> Option<(i32, i32)> {
        let mut frames = self.frames().map(|(t, _)| t);
        let first = frames.next()?;
        Some((first, frames.last().unwrap_or(first)))
    }

    /// Mean radius of the spots within `range`, `None` without spots.
    pub fn mean_radius(&self, range: RangeInclusive<i32>) -> Option<f64> {
        let (sum, n) = self
            .frames_in(range)
            .flat_map(|(_, spots)| spots.iter())
            .fold((0.0, 0usize), |(sum, n), s| (sum + s.radius, n + 1));
        (n > 0).then(|| sum / n as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_ignores_values() {
        let a = Spot::new(1, 0, [0.0, 0.0, 0.0]);
        let b = Spot::new(1, 4, [9.0, 9.0, 9.0]);
        let c = Spot::new(2, 0, [0.0, 0.0, 0.0]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a < c);
    }

    #[test]
    fn test_nan_feature_is_undefined() {
        let mut s = Spot::new(1, 0, [0.0, 0.0, 0.0]);
        s.features.insert("Q".to_string(), f64::NAN);
        s.features.insert("R".to_string(), 2.0);
        assert_eq!(s.feature("Q"), None);
        assert_eq!(s.feature("R"), Some(2.0));
        assert_eq!(s.feature("S"), None);
    }

    #[test]
    fn test_collection_frames_and_lookup() {
        let spots: SpotCollection = vec![
            Spot::new(1, 2, [0.0, 0.0, 0.0]),
            Spot::new(2, 0, [1.0, 0.0, 0.0]),
            Spot::new(3, 2, [2.0, 0.0, 0.0]),
        ]
        .into_iter()
        .collect();

        let read = spots.read();
        assert_eq!(read.len(), 3);
        let frames: Vec<i32> = read.frames().map(|(t, _)| t).collect();
        assert_eq!(frames, vec![0, 2]);
        assert_eq!(read.frame(2).len(), 2);
        assert!(read.frame(1).is_empty());
        assert_eq!(read.get(SpotId(3)).map(|s| s.position[0]), Some(2.0));
        assert_eq!(read.frame_range(), Some((0, 2)));
        assert_eq!(read.frames_in(1..=5).count(), 1);
    }

    #[test]
    fn test_replacing_a_spot_moves_it() {
        let spots = SpotCollection::new();
        spots.add(Spot::new(1, 0, [0.0, 0.0, 0.0]));
        spots.add(Spot::new(2, 0, [1.0, 0.0, 0.0]));
        spots.add(Spot::new(1, 3, [5.0, 0.0, 0.0]));

        let read = spots.read();
        assert_eq!(read.len(), 2);
        assert_eq!(read.frame(0).len(), 1);
        assert_eq!(read.get(SpotId(2)).map(|s| s.frame), Some(0));
        assert_eq!(read.get(SpotId(1)).map(|s| s.frame), Some(3));
    }

    #[test]
    fn test_mean_radius() {
        let mut a = Spot::new(1, 0, [0.0, 0.0, 0.0]);
        a.radius = 1.0;
        let mut b = Spot::new(2, 1, [0.0, 0.0, 0.0]);
        b.radius = 3.0;
        let spots: SpotCollection = vec![a, b].into_iter().collect();
        assert_eq!(spots.read().mean_radius(0..=1), Some(2.0));
        assert_eq!(spots.read().mean_radius(5..=6), None);
    }
}

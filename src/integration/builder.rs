//! Builder for creating Spot objects.

use std::collections::BTreeMap;

use crate::integration::spot::{Spot, SpotId};

/// Builder for creating `Spot` objects.
#[derive(Debug, Clone)]
pub struct SpotBuilder {
    id: u64,
    frame: i32,
    position: [f64; 3],
    radius: f64,
    features: BTreeMap<String, f64>,
}

impl Default for SpotBuilder {
    fn default() -> Self {
        Self {
            id: 0,
            frame: 0,
            position: [0.0; 3],
            radius: 0.5,
            features: BTreeMap::new(),
        }
    }
}

impl SpotBuilder {
    /// Create a new spot builder.
    pub fn new(id: u64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Set the frame the spot was detected in.
    pub fn frame(mut self, frame: i32) -> Self {
        self.frame = frame;
        self
    }

    /// Set a 3-D position.
    pub fn xyz(mut self, x: f64, y: f64, z: f64) -> Self {
        self.position = [x, y, z];
        self
    }

    /// Set a planar position, z = 0.
    pub fn xy(self, x: f64, y: f64) -> Self {
        self.xyz(x, y, 0.0)
    }

    pub fn radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    /// Add a named feature. NaN is stored but reads as undefined.
    pub fn feature(mut self, name: impl Into<String>, value: f64) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    /// Build the final `Spot`.
    pub fn build(self) -> Spot {
        Spot {
            id: SpotId(self.id),
            frame: self.frame,
            position: self.position,
            radius: self.radius,
            features: self.features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linking::Featured;

    #[test]
    fn test_spot_builder() {
        let spot = SpotBuilder::new(7)
            .frame(3)
            .xy(1.0, 2.0)
            .radius(4.0)
            .feature("QUALITY", 0.9)
            .build();

        assert_eq!(spot.id, SpotId(7));
        assert_eq!(spot.frame, 3);
        assert_eq!(spot.position, [1.0, 2.0, 0.0]);
        assert_eq!(spot.radius, 4.0);
        assert_eq!(spot.feature("QUALITY"), Some(0.9));
    }
}

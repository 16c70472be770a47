//! Pairwise linking costs.

use std::collections::BTreeMap;

/// Anything with a position in 3-D space.
pub trait Positioned {
    fn position(&self) -> [f64; 3];
}

/// Objects exposing named numeric features. Undefined features are `None`.
pub trait Featured {
    fn feature(&self, name: &str) -> Option<f64>;
}

impl<P: Positioned + ?Sized> Positioned for &P {
    fn position(&self) -> [f64; 3] {
        (**self).position()
    }
}

impl<F: Featured + ?Sized> Featured for &F {
    fn feature(&self, name: &str) -> Option<f64> {
        (**self).feature(name)
    }
}

impl Positioned for [f64; 3] {
    fn position(&self) -> [f64; 3] {
        *self
    }
}

/// Squared euclidean distance between two positions.
#[inline]
pub fn square_distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (y - x) * (y - x)).sum()
}

/// Cost of linking a source to a target. Must be pure: it is evaluated
/// many times per pair, possibly from several threads.
pub trait CostFunction<S, T>: Send + Sync {
    fn linking_cost(&self, source: &S, target: &T) -> f64;
}

/// `|target - source|²`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquareDistanceCostFunction;

impl<S: Positioned, T: Positioned> CostFunction<S, T> for SquareDistanceCostFunction {
    fn linking_cost(&self, source: &S, target: &T) -> f64 {
        square_distance(&source.position(), &target.position())
    }
}

/// Squared distance inflated by feature differences.
///
/// The cost is `d² · P²` with `P = 1 + Σ w · 1.5 · |f1 - f2| / |f1 + f2|`
/// over the configured `(feature, w)` pairs. A feature undefined on either
/// side does not contribute.
#[derive(Debug, Clone, Default)]
pub struct FeaturePenaltyCostFunction {
    penalties: BTreeMap<String, f64>,
}

impl FeaturePenaltyCostFunction {
    pub fn new(penalties: BTreeMap<String, f64>) -> Self {
        Self { penalties }
    }

    fn penalty<S: Featured, T: Featured>(&self, source: &S, target: &T) -> f64 {
        let mut penalty = 1.0;
        for (feature, weight) in &self.penalties {
            let ndiff = match (source.feature(feature), target.feature(feature)) {
                (Some(f1), Some(f2)) => normalized_diff(f1, f2),
                _ => continue,
            };
            if ndiff.is_nan() {
                continue;
            }
            penalty += weight * 1.5 * ndiff;
        }
        penalty
    }
}

fn normalized_diff(f1: f64, f2: f64) -> f64 {
    if f1 == -f2 {
        return 0.0;
    }
    (f1 - f2).abs() / (f1 + f2).abs()
}

impl<S, T> CostFunction<S, T> for FeaturePenaltyCostFunction
where
    S: Positioned + Featured,
    T: Positioned + Featured,
{
    fn linking_cost(&self, source: &S, target: &T) -> f64 {
        let d2 = square_distance(&source.position(), &target.position());
        let p = self.penalty(source, target);
        d2 * p * p
    }
}

/// Cost function picked from a feature-penalty map: plain squared distance
/// when the map is empty, penalized otherwise.
#[derive(Debug, Clone)]
pub enum SpotCostFunction {
    SquareDistance(SquareDistanceCostFunction),
    FeaturePenalty(FeaturePenaltyCostFunction),
}

impl SpotCostFunction {
    pub fn from_penalties(penalties: &BTreeMap<String, f64>) -> Self {
        if penalties.is_empty() {
            Self::SquareDistance(SquareDistanceCostFunction)
        } else {
            Self::FeaturePenalty(FeaturePenaltyCostFunction::new(penalties.clone()))
        }
    }
}

impl<S, T> CostFunction<S, T> for SpotCostFunction
where
    S: Positioned + Featured,
    T: Positioned + Featured,
{
    fn linking_cost(&self, source: &S, target: &T) -> f64 {
        match self {
            Self::SquareDistance(f) => f.linking_cost(source, target),
            Self::FeaturePenalty(f) => f.linking_cost(source, target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe {
        pos: [f64; 3],
        features: BTreeMap<String, f64>,
    }

    impl Probe {
        fn new(pos: [f64; 3], features: &[(&str, f64)]) -> Self {
            Self {
                pos,
                features: features
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
            }
        }
    }

    impl Positioned for Probe {
        fn position(&self) -> [f64; 3] {
            self.pos
        }
    }

    impl Featured for Probe {
        fn feature(&self, name: &str) -> Option<f64> {
            self.features.get(name).copied()
        }
    }

    fn weights(w: &[(&str, f64)]) -> BTreeMap<String, f64> {
        w.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_square_distance() {
        let a = [0.0, 0.0, 0.0];
        let b = [1.0, 2.0, 2.0];
        assert_eq!(SquareDistanceCostFunction.linking_cost(&a, &b), 9.0);
        assert_eq!(SquareDistanceCostFunction.linking_cost(&b, &a), 9.0);
        assert_eq!(SquareDistanceCostFunction.linking_cost(&a, &a), 0.0);
    }

    #[test]
    fn test_penalty_doubled_feature() {
        let a = Probe::new([0.0, 0.0, 0.0], &[("MEAN_INTENSITY", 10.0)]);
        let b = Probe::new([3.0, 4.0, 0.0], &[("MEAN_INTENSITY", 20.0)]);
        let f = FeaturePenaltyCostFunction::new(weights(&[("MEAN_INTENSITY", 1.0)]));
        // ndiff = 10 / 30, P = 1 + 1.5 / 3
        let expected = 25.0 * 1.5 * 1.5;
        assert!((f.linking_cost(&a, &b) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_penalty_against_zero_feature() {
        let a = Probe::new([0.0, 0.0, 0.0], &[("QUALITY", 4.0)]);
        let b = Probe::new([1.0, 0.0, 0.0], &[("QUALITY", 0.0)]);
        let f = FeaturePenaltyCostFunction::new(weights(&[("QUALITY", 1.0)]));
        let expected = (1.0f64 + 1.5).powi(2);
        assert!((f.linking_cost(&a, &b) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_penalty_skips_undefined_and_nan() {
        let a = Probe::new([0.0, 0.0, 0.0], &[("A", f64::NAN), ("B", 1.0)]);
        let b = Probe::new([2.0, 0.0, 0.0], &[("A", 3.0)]);
        let f = FeaturePenaltyCostFunction::new(weights(&[("A", 1.0), ("B", 5.0), ("C", 2.0)]));
        assert_eq!(f.linking_cost(&a, &b), 4.0);
    }

    #[test]
    fn test_opposite_features_do_not_penalize() {
        let a = Probe::new([0.0, 0.0, 0.0], &[("A", -2.0)]);
        let b = Probe::new([2.0, 0.0, 0.0], &[("A", 2.0)]);
        let f = FeaturePenaltyCostFunction::new(weights(&[("A", 1.0)]));
        assert_eq!(f.linking_cost(&a, &b), 4.0);
    }

    #[test]
    fn test_spot_cost_function_selection() {
        let a = Probe::new([0.0, 0.0, 0.0], &[("A", 1.0)]);
        let b = Probe::new([1.0, 1.0, 0.0], &[("A", 3.0)]);
        let plain = SpotCostFunction::from_penalties(&BTreeMap::new());
        assert!(matches!(plain, SpotCostFunction::SquareDistance(_)));
        assert_eq!(plain.linking_cost(&a, &b), 2.0);

        let penalized = SpotCostFunction::from_penalties(&weights(&[("A", 2.0)]));
        // ndiff = 2 / 4, P = 1 + 2 * 1.5 * 0.5 = 2.5
        assert!((penalized.linking_cost(&a, &b) - 2.0 * 6.25).abs() < 1e-9);
    }
}

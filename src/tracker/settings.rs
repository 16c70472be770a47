//! Tracker configuration: typed settings per tracker, and the flat key/value
//! map they are parsed from.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use crate::error::{Result, TrackingError};

/// Keys of the flat settings map.
pub mod keys {
    pub const TRACKER: &str = "TRACKER";
    pub const MIN_FRAME: &str = "MIN_FRAME";
    pub const MAX_FRAME: &str = "MAX_FRAME";
    pub const LINKING_MAX_DISTANCE: &str = "LINKING_MAX_DISTANCE";
    pub const LINKING_FEATURE_PENALTIES: &str = "LINKING_FEATURE_PENALTIES";
    pub const ALLOW_GAP_CLOSING: &str = "ALLOW_GAP_CLOSING";
    pub const GAP_CLOSING_MAX_DISTANCE: &str = "GAP_CLOSING_MAX_DISTANCE";
    pub const MAX_FRAME_GAP: &str = "MAX_FRAME_GAP";
    pub const GAP_CLOSING_FEATURE_PENALTIES: &str = "GAP_CLOSING_FEATURE_PENALTIES";
    pub const ALLOW_TRACK_SPLITTING: &str = "ALLOW_TRACK_SPLITTING";
    pub const SPLITTING_MAX_DISTANCE: &str = "SPLITTING_MAX_DISTANCE";
    pub const SPLITTING_FEATURE_PENALTIES: &str = "SPLITTING_FEATURE_PENALTIES";
    pub const ALLOW_TRACK_MERGING: &str = "ALLOW_TRACK_MERGING";
    pub const MERGING_MAX_DISTANCE: &str = "MERGING_MAX_DISTANCE";
    pub const MERGING_FEATURE_PENALTIES: &str = "MERGING_FEATURE_PENALTIES";
    pub const ALTERNATIVE_LINKING_COST_FACTOR: &str = "ALTERNATIVE_LINKING_COST_FACTOR";
    pub const CUTOFF_PERCENTILE: &str = "CUTOFF_PERCENTILE";
    pub const BLOCKING_VALUE: &str = "BLOCKING_VALUE";
    pub const KALMAN_SEARCH_RADIUS: &str = "KALMAN_SEARCH_RADIUS";
    pub const POSITION_SIGMA: &str = "POSITION_SIGMA";
    pub const NUM_THREADS: &str = "NUM_THREADS";

    pub const SPARSE_LAP_TRACKER: &str = "SPARSE_LAP_TRACKER";
    pub const KALMAN_TRACKER: &str = "KALMAN_TRACKER";
}

fn config_error(msg: impl Into<String>) -> TrackingError {
    TrackingError::Config(msg.into())
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(config_error(format!(
            "{} must be strictly positive and finite, got {}",
            name, value
        )))
    }
}

fn check_penalties(name: &str, penalties: &BTreeMap<String, f64>) -> Result<()> {
    for (feature, weight) in penalties {
        if !(weight.is_finite() && *weight >= 0.0) {
            return Err(config_error(format!(
                "{}: weight of {} must be finite and non-negative, got {}",
                name, feature, weight
            )));
        }
    }
    Ok(())
}

/// Optional bounds on the frames to process. Unset bounds default to the
/// first and last frame holding spots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameRange {
    pub min: Option<i32>,
    pub max: Option<i32>,
}

impl FrameRange {
    pub fn new(min: i32, max: i32) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(min), Some(max)) = (self.min, self.max) {
            if max <= min {
                return Err(config_error(format!(
                    "max frame ({}) must be greater than min frame ({})",
                    max, min
                )));
            }
        }
        Ok(())
    }

    /// Concrete range given the frames holding data, `None` when there is
    /// nothing to process.
    pub fn resolve(&self, data: Option<(i32, i32)>) -> Option<RangeInclusive<i32>> {
        let (first, last) = data?;
        let min = self.min.unwrap_or(first).max(first);
        let max = self.max.unwrap_or(last).min(last);
        (min <= max).then_some(min..=max)
    }
}

/// Frame-to-frame linking parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLinkingSettings {
    pub linking_max_distance: f64,
    pub feature_penalties: BTreeMap<String, f64>,
    pub alternative_cost_factor: f64,
    pub cutoff_percentile: f64,
    pub frame_range: FrameRange,
    /// Size of a dedicated thread pool. `None` uses the global rayon pool.
    pub num_threads: Option<usize>,
}

impl Default for FrameLinkingSettings {
    fn default() -> Self {
        Self {
            linking_max_distance: 15.0,
            feature_penalties: BTreeMap::new(),
            alternative_cost_factor: 1.05,
            cutoff_percentile: 0.9,
            frame_range: FrameRange::default(),
            num_threads: None,
        }
    }
}

impl FrameLinkingSettings {
    pub fn validate(&self) -> Result<()> {
        check_positive("linking max distance", self.linking_max_distance)?;
        check_positive("alternative cost factor", self.alternative_cost_factor)?;
        if !(self.cutoff_percentile > 0.0 && self.cutoff_percentile <= 1.0) {
            return Err(config_error(format!(
                "cutoff percentile must be in ]0, 1], got {}",
                self.cutoff_percentile
            )));
        }
        check_penalties("linking feature penalties", &self.feature_penalties)?;
        if self.num_threads == Some(0) {
            return Err(config_error("number of threads must be at least 1"));
        }
        self.frame_range.validate()
    }

    /// Squared-distance threshold of a candidate link.
    pub fn cost_threshold(&self) -> f64 {
        self.linking_max_distance * self.linking_max_distance
    }
}

/// Gap closing: linking a segment end to a segment start a few frames later.
#[derive(Debug, Clone, PartialEq)]
pub enum GapClosing {
    Disabled,
    Enabled {
        max_distance: f64,
        /// Largest frame difference bridged, at least 1.
        max_frame_gap: i32,
        feature_penalties: BTreeMap<String, f64>,
    },
}

impl Default for GapClosing {
    fn default() -> Self {
        GapClosing::Enabled {
            max_distance: 15.0,
            max_frame_gap: 2,
            feature_penalties: BTreeMap::new(),
        }
    }
}

impl GapClosing {
    pub fn is_enabled(&self) -> bool {
        matches!(self, GapClosing::Enabled { .. })
    }

    pub fn cost_threshold(&self) -> Option<f64> {
        match self {
            GapClosing::Disabled => None,
            GapClosing::Enabled { max_distance, .. } => Some(max_distance * max_distance),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let GapClosing::Enabled {
            max_distance,
            max_frame_gap,
            feature_penalties,
        } = self
        {
            check_positive("gap closing max distance", *max_distance)?;
            if *max_frame_gap < 1 {
                return Err(config_error(format!(
                    "max frame gap must be at least 1, got {}",
                    max_frame_gap
                )));
            }
            check_penalties("gap closing feature penalties", feature_penalties)?;
        }
        Ok(())
    }
}

/// Splitting or merging: linking a segment end point to an interior point
/// of another segment one frame apart.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EventLinking {
    #[default]
    Disabled,
    Enabled {
        max_distance: f64,
        feature_penalties: BTreeMap<String, f64>,
    },
}

impl EventLinking {
    pub fn enabled(max_distance: f64) -> Self {
        EventLinking::Enabled {
            max_distance,
            feature_penalties: BTreeMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, EventLinking::Enabled { .. })
    }

    pub fn cost_threshold(&self) -> Option<f64> {
        match self {
            EventLinking::Disabled => None,
            EventLinking::Enabled { max_distance, .. } => Some(max_distance * max_distance),
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        if let EventLinking::Enabled {
            max_distance,
            feature_penalties,
        } = self
        {
            check_positive(&format!("{} max distance", name), *max_distance)?;
            check_penalties(&format!("{} feature penalties", name), feature_penalties)?;
        }
        Ok(())
    }
}

/// Second-pass linking of track segments.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentLinkingSettings {
    pub gap_closing: GapClosing,
    pub splitting: EventLinking,
    pub merging: EventLinking,
    pub alternative_cost_factor: f64,
    /// Alternative cost of every row and column. Defaults to
    /// `alternative_cost_factor` times the largest enabled threshold.
    pub blocking_value: Option<f64>,
}

impl Default for SegmentLinkingSettings {
    fn default() -> Self {
        Self {
            gap_closing: GapClosing::default(),
            splitting: EventLinking::Disabled,
            merging: EventLinking::Disabled,
            alternative_cost_factor: 1.05,
            blocking_value: None,
        }
    }
}

impl SegmentLinkingSettings {
    pub fn validate(&self) -> Result<()> {
        self.gap_closing.validate()?;
        self.splitting.validate("splitting")?;
        self.merging.validate("merging")?;
        check_positive("alternative cost factor", self.alternative_cost_factor)?;
        if let Some(blocking) = self.blocking_value {
            check_positive("blocking value", blocking)?;
        }
        Ok(())
    }

    pub fn any_enabled(&self) -> bool {
        self.gap_closing.is_enabled() || self.splitting.is_enabled() || self.merging.is_enabled()
    }

    /// Alternative cost used for every segment, `None` when no event family
    /// is enabled.
    pub fn alternative_cost(&self) -> Option<f64> {
        let max_threshold = [
            self.gap_closing.cost_threshold(),
            self.splitting.cost_threshold(),
            self.merging.cost_threshold(),
        ]
        .into_iter()
        .flatten()
        .reduce(f64::max)?;
        Some(
            self.blocking_value
                .unwrap_or(self.alternative_cost_factor * max_threshold),
        )
    }
}

/// Settings of the two-stage sparse LAP tracker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LapTrackerSettings {
    pub linking: FrameLinkingSettings,
    pub segments: SegmentLinkingSettings,
}

impl LapTrackerSettings {
    pub fn validate(&self) -> Result<()> {
        self.linking.validate()?;
        self.segments.validate()
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let defaults = FrameLinkingSettings::default();
        let alternative_cost_factor = settings
            .get_double(keys::ALTERNATIVE_LINKING_COST_FACTOR)?
            .unwrap_or(defaults.alternative_cost_factor);

        let linking = FrameLinkingSettings {
            linking_max_distance: settings.require_double(keys::LINKING_MAX_DISTANCE)?,
            feature_penalties: settings
                .get_map(keys::LINKING_FEATURE_PENALTIES)?
                .unwrap_or_default(),
            alternative_cost_factor,
            cutoff_percentile: settings
                .get_double(keys::CUTOFF_PERCENTILE)?
                .unwrap_or(defaults.cutoff_percentile),
            frame_range: settings.frame_range()?,
            num_threads: settings
                .get_int(keys::NUM_THREADS)?
                .map(|n| {
                    usize::try_from(n).map_err(|_| {
                        config_error(format!("number of threads must be positive, got {}", n))
                    })
                })
                .transpose()?,
        };

        let gap_closing = if settings.require_bool(keys::ALLOW_GAP_CLOSING)? {
            GapClosing::Enabled {
                max_distance: settings.require_double(keys::GAP_CLOSING_MAX_DISTANCE)?,
                max_frame_gap: settings.require_i32(keys::MAX_FRAME_GAP)?,
                feature_penalties: settings
                    .get_map(keys::GAP_CLOSING_FEATURE_PENALTIES)?
                    .unwrap_or_default(),
            }
        } else {
            GapClosing::Disabled
        };
        let splitting = settings.event_linking(
            keys::ALLOW_TRACK_SPLITTING,
            keys::SPLITTING_MAX_DISTANCE,
            keys::SPLITTING_FEATURE_PENALTIES,
        )?;
        let merging = settings.event_linking(
            keys::ALLOW_TRACK_MERGING,
            keys::MERGING_MAX_DISTANCE,
            keys::MERGING_FEATURE_PENALTIES,
        )?;

        let parsed = Self {
            linking,
            segments: SegmentLinkingSettings {
                gap_closing,
                splitting,
                merging,
                alternative_cost_factor,
                blocking_value: settings.get_double(keys::BLOCKING_VALUE)?,
            },
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Flat map holding every key `from_settings` reads.
    pub fn to_settings(&self) -> Settings {
        let linking = &self.linking;
        let segments = &self.segments;
        let mut settings = Settings::new()
            .with(keys::TRACKER, keys::SPARSE_LAP_TRACKER)
            .with(keys::LINKING_MAX_DISTANCE, linking.linking_max_distance)
            .with(
                keys::LINKING_FEATURE_PENALTIES,
                linking.feature_penalties.clone(),
            )
            .with(
                keys::ALTERNATIVE_LINKING_COST_FACTOR,
                linking.alternative_cost_factor,
            )
            .with(keys::CUTOFF_PERCENTILE, linking.cutoff_percentile)
            .with(keys::ALLOW_GAP_CLOSING, segments.gap_closing.is_enabled())
            .with(keys::ALLOW_TRACK_SPLITTING, segments.splitting.is_enabled())
            .with(keys::ALLOW_TRACK_MERGING, segments.merging.is_enabled());
        settings.put_frame_range(&linking.frame_range);
        if let Some(n) = linking.num_threads {
            settings.insert(keys::NUM_THREADS, n as i64);
        }
        if let Some(blocking) = segments.blocking_value {
            settings.insert(keys::BLOCKING_VALUE, blocking);
        }
        if let GapClosing::Enabled {
            max_distance,
            max_frame_gap,
            feature_penalties,
        } = &segments.gap_closing
        {
            settings.insert(keys::GAP_CLOSING_MAX_DISTANCE, *max_distance);
            settings.insert(keys::MAX_FRAME_GAP, i64::from(*max_frame_gap));
            settings.insert(
                keys::GAP_CLOSING_FEATURE_PENALTIES,
                feature_penalties.clone(),
            );
        }
        for (event, distance_key, penalties_key) in [
            (
                &segments.splitting,
                keys::SPLITTING_MAX_DISTANCE,
                keys::SPLITTING_FEATURE_PENALTIES,
            ),
            (
                &segments.merging,
                keys::MERGING_MAX_DISTANCE,
                keys::MERGING_FEATURE_PENALTIES,
            ),
        ] {
            if let EventLinking::Enabled {
                max_distance,
                feature_penalties,
            } = event
            {
                settings.insert(distance_key, *max_distance);
                settings.insert(penalties_key, feature_penalties.clone());
            }
        }
        settings
    }
}

/// Settings of the Kalman tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct KalmanTrackerSettings {
    /// Search radius used to pair orphan spots into new tracks.
    pub initial_search_radius: f64,
    /// Search radius around a prediction.
    pub max_search_radius: f64,
    /// Number of consecutive missed frames a track survives.
    pub max_frame_gap: usize,
    /// Measurement noise. Defaults to a tenth of the mean spot radius.
    pub position_sigma: Option<f64>,
    pub frame_range: FrameRange,
}

impl Default for KalmanTrackerSettings {
    fn default() -> Self {
        Self {
            initial_search_radius: 15.0,
            max_search_radius: 15.0,
            max_frame_gap: 2,
            position_sigma: None,
            frame_range: FrameRange::default(),
        }
    }
}

impl KalmanTrackerSettings {
    pub fn validate(&self) -> Result<()> {
        check_positive("initial search radius", self.initial_search_radius)?;
        check_positive("max search radius", self.max_search_radius)?;
        if let Some(sigma) = self.position_sigma {
            check_positive("position sigma", sigma)?;
        }
        self.frame_range.validate()
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let max_frame_gap = settings.require_int(keys::MAX_FRAME_GAP)?;
        let parsed = Self {
            initial_search_radius: settings.require_double(keys::LINKING_MAX_DISTANCE)?,
            max_search_radius: settings.require_double(keys::KALMAN_SEARCH_RADIUS)?,
            max_frame_gap: usize::try_from(max_frame_gap).map_err(|_| {
                config_error(format!(
                    "max frame gap must be non-negative, got {}",
                    max_frame_gap
                ))
            })?,
            position_sigma: settings.get_double(keys::POSITION_SIGMA)?,
            frame_range: settings.frame_range()?,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Flat map holding every key `from_settings` reads.
    pub fn to_settings(&self) -> Settings {
        let mut settings = Settings::new()
            .with(keys::TRACKER, keys::KALMAN_TRACKER)
            .with(keys::LINKING_MAX_DISTANCE, self.initial_search_radius)
            .with(keys::KALMAN_SEARCH_RADIUS, self.max_search_radius)
            .with(keys::MAX_FRAME_GAP, self.max_frame_gap as i64);
        if let Some(sigma) = self.position_sigma {
            settings.insert(keys::POSITION_SIGMA, sigma);
        }
        settings.put_frame_range(&self.frame_range);
        settings
    }
}

/// Tracker selected by the `TRACKER` key.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerSettings {
    SparseLap(LapTrackerSettings),
    Kalman(KalmanTrackerSettings),
}

impl TrackerSettings {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        match settings.require_str(keys::TRACKER)? {
            keys::SPARSE_LAP_TRACKER => {
                LapTrackerSettings::from_settings(settings).map(TrackerSettings::SparseLap)
            }
            keys::KALMAN_TRACKER => {
                KalmanTrackerSettings::from_settings(settings).map(TrackerSettings::Kalman)
            }
            other => Err(config_error(format!("unknown tracker: {}", other))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            TrackerSettings::SparseLap(s) => s.validate(),
            TrackerSettings::Kalman(s) => s.validate(),
        }
    }
}

/// A value of the flat settings map.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Map(BTreeMap<String, f64>),
}

impl SettingValue {
    fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "boolean",
            SettingValue::Int(_) => "integer",
            SettingValue::Double(_) => "double",
            SettingValue::Str(_) => "string",
            SettingValue::Map(_) => "feature map",
        }
    }
}

impl From<bool> for SettingValue {
    fn from(v: bool) -> Self {
        SettingValue::Bool(v)
    }
}

impl From<i64> for SettingValue {
    fn from(v: i64) -> Self {
        SettingValue::Int(v)
    }
}

impl From<i32> for SettingValue {
    fn from(v: i32) -> Self {
        SettingValue::Int(i64::from(v))
    }
}

impl From<f64> for SettingValue {
    fn from(v: f64) -> Self {
        SettingValue::Double(v)
    }
}

impl From<&str> for SettingValue {
    fn from(v: &str) -> Self {
        SettingValue::Str(v.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(v: String) -> Self {
        SettingValue::Str(v)
    }
}

impl From<BTreeMap<String, f64>> for SettingValue {
    fn from(v: BTreeMap<String, f64>) -> Self {
        SettingValue::Map(v)
    }
}

/// Flat key/value configuration, parsed into typed settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: BTreeMap<String, SettingValue>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<SettingValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<SettingValue>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<SettingValue> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    fn wrong_type(key: &str, expected: &str, found: &SettingValue) -> TrackingError {
        config_error(format!(
            "{} must be a {}, found a {}",
            key,
            expected,
            found.type_name()
        ))
    }

    fn missing(key: &str) -> TrackingError {
        config_error(format!("missing mandatory setting {}", key))
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(SettingValue::Bool(v)) => Ok(Some(*v)),
            Some(other) => Err(Self::wrong_type(key, "boolean", other)),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(SettingValue::Int(v)) => Ok(Some(*v)),
            Some(other) => Err(Self::wrong_type(key, "integer", other)),
        }
    }

    /// Integers are accepted where a double is expected.
    pub fn get_double(&self, key: &str) -> Result<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(SettingValue::Double(v)) => Ok(Some(*v)),
            Some(SettingValue::Int(v)) => Ok(Some(*v as f64)),
            Some(other) => Err(Self::wrong_type(key, "double", other)),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<Option<&str>> {
        match self.get(key) {
            None => Ok(None),
            Some(SettingValue::Str(v)) => Ok(Some(v.as_str())),
            Some(other) => Err(Self::wrong_type(key, "string", other)),
        }
    }

    pub fn get_map(&self, key: &str) -> Result<Option<BTreeMap<String, f64>>> {
        match self.get(key) {
            None => Ok(None),
            Some(SettingValue::Map(v)) => Ok(Some(v.clone())),
            Some(other) => Err(Self::wrong_type(key, "feature map", other)),
        }
    }

    fn require_bool(&self, key: &str) -> Result<bool> {
        self.get_bool(key)?.ok_or_else(|| Self::missing(key))
    }

    fn require_int(&self, key: &str) -> Result<i64> {
        self.get_int(key)?.ok_or_else(|| Self::missing(key))
    }

    fn require_i32(&self, key: &str) -> Result<i32> {
        let v = self.require_int(key)?;
        i32::try_from(v).map_err(|_| config_error(format!("{} is out of range: {}", key, v)))
    }

    fn require_double(&self, key: &str) -> Result<f64> {
        self.get_double(key)?.ok_or_else(|| Self::missing(key))
    }

    fn require_str(&self, key: &str) -> Result<&str> {
        self.get_str(key)?.ok_or_else(|| Self::missing(key))
    }

    fn frame_range(&self) -> Result<FrameRange> {
        let bound = |key: &str| -> Result<Option<i32>> {
            self.get_int(key)?
                .map(|v| {
                    i32::try_from(v)
                        .map_err(|_| config_error(format!("{} is out of range: {}", key, v)))
                })
                .transpose()
        };
        Ok(FrameRange {
            min: bound(keys::MIN_FRAME)?,
            max: bound(keys::MAX_FRAME)?,
        })
    }

    fn put_frame_range(&mut self, range: &FrameRange) {
        if let Some(min) = range.min {
            self.insert(keys::MIN_FRAME, min);
        }
        if let Some(max) = range.max {
            self.insert(keys::MAX_FRAME, max);
        }
    }

    fn event_linking(
        &self,
        allow_key: &str,
        distance_key: &str,
        penalties_key: &str,
    ) -> Result<EventLinking> {
        if !self.require_bool(allow_key)? {
            return Ok(EventLinking::Disabled);
        }
        Ok(EventLinking::Enabled {
            max_distance: self.require_double(distance_key)?,
            feature_penalties: self.get_map(penalties_key)?.unwrap_or_default(),
        })
    }
}

//! Lateral regions and region-indexed pairs.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

/// One of the two lateral halves the acquisition channels are partitioned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Left,
    Right,
}

impl Region {
    /// Both regions, in evaluation order.
    pub const ALL: [Region; 2] = [Region::Left, Region::Right];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Left => "left",
            Region::Right => "right",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A value held once per region.
///
/// Used for metrics, baselines, EMA state, key bindings and the channel map, so
/// both halves are always read and swapped together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionMap<T> {
    #[serde(default)]
    pub left: T,
    #[serde(default)]
    pub right: T,
}

impl<T> RegionMap<T> {
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    pub fn map<U>(self, mut f: impl FnMut(Region, T) -> U) -> RegionMap<U> {
        RegionMap {
            left: f(Region::Left, self.left),
            right: f(Region::Right, self.right),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Region, &T)> {
        [(Region::Left, &self.left), (Region::Right, &self.right)].into_iter()
    }
}

impl<T: Clone> RegionMap<T> {
    pub fn splat(value: T) -> Self {
        Self {
            left: value.clone(),
            right: value,
        }
    }
}

impl<T> Index<Region> for RegionMap<T> {
    type Output = T;

    fn index(&self, region: Region) -> &T {
        match region {
            Region::Left => &self.left,
            Region::Right => &self.right,
        }
    }
}

impl<T> IndexMut<Region> for RegionMap<T> {
    fn index_mut(&mut self, region: Region) -> &mut T {
        match region {
            Region::Left => &mut self.left,
            Region::Right => &mut self.right,
        }
    }
}

/// Channel indices assigned to each region for the lifetime of a stream.
pub type ChannelMap = RegionMap<Vec<usize>>;

/// Per-region reference metric established by calibration.
pub type Baselines = RegionMap<f64>;

/// Baselines before any calibration has completed.
pub const DEFAULT_BASELINE: f64 = 1.0;

pub fn default_baselines() -> Baselines {
    RegionMap::splat(DEFAULT_BASELINE)
}

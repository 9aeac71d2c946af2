// THEORY:
// The `position` module decides where the single point representing a stack is
// drawn. It is a set of pure functions selected by a closed `PositionStrategy`
// value, chosen once per run and handed to every cluster.
//
// Two families exist:
// 1.  **Incremental** (`Nearest`, `Weighted`): the location is updated on every
//     member as it arrives. These recurrences depend on arrival order.
//     `Weighted` is a chained pairwise midpoint, not a running mean, so later
//     members weigh more. `Nearest` compares the raw candidate against the
//     already-averaged current location, not against the best raw point.
//     Both are reproduced exactly as described.
// 2.  **Deferred** (`Average`, `Extent`): the location is computed once over the
//     full member list after accumulation. These are order independent.

use crate::error::StackError;
use geo::Coord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Policy for a stack's representative coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PositionStrategy {
    /// Midpoint of the anchor and the member closest to it.
    #[default]
    Nearest,
    /// Chained midpoint of the running location and each new member.
    Weighted,
    /// Arithmetic mean of all members.
    Average,
    /// Center of the members' bounding box.
    Extent,
}

impl PositionStrategy {
    /// Whether the location is maintained while members are being added.
    pub fn is_incremental(self) -> bool {
        matches!(self, Self::Nearest | Self::Weighted)
    }
}

impl FromStr for PositionStrategy {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "weighted" => Ok(Self::Weighted),
            "average" => Ok(Self::Average),
            "extent" => Ok(Self::Extent),
            other => Err(StackError::InvalidConfig(format!("unknown position strategy '{other}'"))),
        }
    }
}

impl TryFrom<String> for PositionStrategy {
    type Error = StackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PositionStrategy> for String {
    fn from(strategy: PositionStrategy) -> Self {
        strategy.to_string()
    }
}

impl fmt::Display for PositionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nearest => "Nearest",
            Self::Weighted => "Weighted",
            Self::Average => "Average",
            Self::Extent => "Extent",
        };
        f.write_str(name)
    }
}

pub fn midpoint(a: Coord<f64>, b: Coord<f64>) -> Coord<f64> {
    Coord {
        x: (a.x + b.x) / 2.0,
        y: (a.y + b.y) / 2.0,
    }
}

fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    let d = a - b;
    d.x.hypot(d.y)
}

/// One step of the `Nearest` recurrence.
///
/// The first member yields the midpoint of `reference` and the member. Later
/// members replace the location only when the raw member is strictly closer
/// to `reference` than the current (already averaged) location is.
pub fn nearest_step(
    reference: Coord<f64>,
    current: Option<Coord<f64>>,
    point: Coord<f64>,
) -> Coord<f64> {
    match current {
        None => midpoint(reference, point),
        Some(location) if distance(point, reference) < distance(location, reference) => {
            midpoint(reference, point)
        }
        Some(location) => location,
    }
}

/// One step of the `Weighted` recurrence.
pub fn weighted_step(current: Option<Coord<f64>>, point: Coord<f64>) -> Coord<f64> {
    match current {
        None => point,
        Some(location) => midpoint(location, point),
    }
}

/// Arithmetic mean of `x` and of `y`; `None` for an empty slice.
pub fn average(points: &[Coord<f64>]) -> Option<Coord<f64>> {
    if points.is_empty() {
        return None;
    }
    let sum = points.iter().fold(Coord { x: 0.0, y: 0.0 }, |acc, p| acc + *p);
    let n = points.len() as f64;
    Some(Coord { x: sum.x / n, y: sum.y / n })
}

/// Midpoint of the x and y extremes; `None` for an empty slice.
pub fn extent_center(points: &[Coord<f64>]) -> Option<Coord<f64>> {
    let (first, rest) = points.split_first()?;
    let (mut min, mut max) = (*first, *first);
    for p in rest {
        min.x = min.x.min(p.x);
        min.y = min.y.min(p.y);
        max.x = max.x.max(p.x);
        max.y = max.y.max(p.y);
    }
    Some(midpoint(min, max))
}

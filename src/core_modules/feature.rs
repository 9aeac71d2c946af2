// THEORY:
// The `feature` module is the boundary between the stacker and whatever reads
// the input data. A `Feature` is a "dumb" data container: an identifier, a
// geometry and a flat map of attribute values. The stacker never needs more
// than one representative coordinate per feature, so `representative_point`
// collapses any geometry to a single coordinate.
//
// Feature readers implement `FeatureSource`. A pass consumes its source exactly
// once and closes it afterwards, whether the pass succeeded or not.

use crate::error::StackResult;
use geo::{Centroid, Coord, CoordsIter, Geometry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute name to value. Ordered so snapshots serialize deterministically.
pub type Attributes = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    pub geometry: Geometry<f64>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Feature {
    pub fn new(id: impl Into<String>, geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            id: id.into(),
            geometry: geometry.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// The string value of an attribute, `None` when absent or null.
    pub fn attribute_text(&self, name: &str) -> Option<String> {
        self.attributes.get(name).and_then(attribute_text)
    }

    /// Like `attribute_text`, but falls back to a case-insensitive name match.
    pub fn attribute_text_ignore_case(&self, name: &str) -> Option<String> {
        if let Some(value) = self.attributes.get(name) {
            return attribute_text(value);
        }
        self.attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| attribute_text(value))
    }

    /// The single coordinate of a one-coordinate geometry, otherwise the
    /// centroid. `None` for empty geometries.
    pub fn representative_point(&self) -> Option<Coord<f64>> {
        if let Geometry::Point(point) = &self.geometry {
            return Some(point.0);
        }
        if self.geometry.coords_count() == 1 {
            return self.geometry.coords_iter().next();
        }
        self.geometry.centroid().map(|point| point.0)
    }
}

/// Renders an attribute value as text. Strings are taken verbatim, null is
/// treated as absent, anything else uses its JSON rendering.
pub fn attribute_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// A readable, closable stream of features.
pub trait FeatureSource {
    fn next_feature(&mut self) -> Option<StackResult<Feature>>;

    /// Releases the source. Called once after the consuming pass finishes.
    fn close(&mut self) {}
}

/// Adapts any iterator of features into a `FeatureSource`.
pub struct IterSource<I> {
    inner: I,
    closed: bool,
}

impl<I> IterSource<I> {
    pub fn new(inner: I) -> Self {
        Self { inner, closed: false }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<I: Iterator<Item = Feature>> FeatureSource for IterSource<I> {
    fn next_feature(&mut self) -> Option<StackResult<Feature>> {
        if self.closed {
            return None;
        }
        self.inner.next().map(Ok)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Closes the wrapped source when dropped, so early returns still release it.
pub(crate) struct CloseOnDrop<'a, S: FeatureSource + ?Sized>(pub(crate) &'a mut S);

impl<S: FeatureSource + ?Sized> Drop for CloseOnDrop<'_, S> {
    fn drop(&mut self) {
        self.0.close();
    }
}

// THEORY:
// The `Cluster` is the heart of the stacker. It is a stateful accumulator for
// one group of features (one grid cell, or one attribute value) and keeps every
// running statistic the output needs while the input streams past.
//
// Key architectural principles:
// 1.  **Incremental Statistics**: Count, distinct locations, bounding box and the
//     ordered member lists are updated on every `add`. Nothing is recomputed
//     from scratch at projection time.
// 2.  **Anchored Position**: Each cluster owns a fixed `reference_point` set at
//     creation (the cell center, or the first member for attribute stacks). The
//     incremental strategies steer the location relative to this anchor.
// 3.  **Resolve Once**: Deferred strategies compute the location on the first
//     read and cache it in a `OnceCell`. After that the answer is frozen, even
//     if members keep arriving. Read the location only after accumulation.
// 4.  **Singleton Awareness**: While a cluster holds exactly one feature it
//     mirrors that feature's attributes and sort value. The second member wipes
//     the attribute snapshot and pins the sort value to the run's cluster
//     representative value; later members leave both untouched.

use crate::core_modules::feature::{Attributes, Feature};
use crate::core_modules::position::{self, PositionStrategy};
use geo::{Coord, Rect};
use std::cell::OnceCell;
use std::collections::HashSet;
use tracing::warn;

/// Per-run settings every cluster needs while absorbing a feature.
#[derive(Debug, Clone, Copy)]
pub struct MemberRules<'a> {
    /// Attributes whose values are collected from every member.
    pub requested_attributes: &'a [String],
    /// Attribute whose value orders singleton stacks.
    pub sort_field: Option<&'a str>,
    /// Sort value assigned once a cluster gets a second member.
    pub clustered_sort_value: &'a str,
}

/// Collected values of one requested attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestedValues {
    pub name: String,
    pub values: Vec<String>,
}

/// Exact-equality key for a coordinate. `-0.0` and `0.0` are the same location.
fn coord_key(point: Coord<f64>) -> (u64, u64) {
    ((point.x + 0.0).to_bits(), (point.y + 0.0).to_bits())
}

/// The aggregate state for one stacked point.
#[derive(Debug)]
pub struct Cluster<K> {
    key: K,
    reference_point: Coord<f64>,
    strategy: PositionStrategy,
    member_count: usize,
    unique_coordinates: HashSet<(u64, u64)>,
    bounding_box: Option<Rect<f64>>,
    member_coordinates: Vec<Coord<f64>>,
    member_ids: Vec<String>,
    /// Location maintained by the incremental strategies.
    running_location: Option<Coord<f64>>,
    /// Location resolved once by the deferred strategies.
    resolved_location: OnceCell<Coord<f64>>,
    singleton_attributes: Attributes,
    sort_value: Option<String>,
    requested_values: Vec<RequestedValues>,
}

impl<K> Cluster<K> {
    pub fn new(key: K, reference_point: Coord<f64>, strategy: PositionStrategy) -> Self {
        Self {
            key,
            reference_point,
            strategy,
            member_count: 0,
            unique_coordinates: HashSet::new(),
            bounding_box: None,
            member_coordinates: Vec::new(),
            member_ids: Vec::new(),
            running_location: None,
            resolved_location: OnceCell::new(),
            singleton_attributes: Attributes::new(),
            sort_value: None,
            requested_values: Vec::new(),
        }
    }

    /// Adds one feature, located at `point` in working space.
    pub fn add(&mut self, point: Coord<f64>, feature: &Feature, rules: &MemberRules<'_>) {
        self.member_count += 1;
        self.member_coordinates.push(point);
        self.member_ids.push(feature.id.clone());
        self.unique_coordinates.insert(coord_key(point));

        self.bounding_box = Some(match self.bounding_box {
            None => Rect::new(point, point),
            Some(bbox) => Rect::new(
                Coord {
                    x: bbox.min().x.min(point.x),
                    y: bbox.min().y.min(point.y),
                },
                Coord {
                    x: bbox.max().x.max(point.x),
                    y: bbox.max().y.max(point.y),
                },
            ),
        });

        match self.strategy {
            PositionStrategy::Nearest => {
                let reference = self.reference_point;
                self.running_location =
                    Some(position::nearest_step(reference, self.running_location, point));
            }
            PositionStrategy::Weighted => {
                self.running_location = Some(position::weighted_step(self.running_location, point));
            }
            PositionStrategy::Average | PositionStrategy::Extent => {}
        }

        match self.member_count {
            1 => {
                self.singleton_attributes = feature.attributes.clone();
                self.sort_value = rules.sort_field.and_then(|field| {
                    let value = feature.attribute_text(field);
                    if value.is_none() {
                        warn!(
                            feature = %feature.id,
                            field,
                            "sort field has no value for this feature"
                        );
                    }
                    value
                });
            }
            2 => {
                self.singleton_attributes.clear();
                self.sort_value = Some(rules.clustered_sort_value.to_string());
            }
            _ => {}
        }

        for name in rules.requested_attributes {
            let index = match self.requested_values.iter().position(|r| &r.name == name) {
                Some(index) => index,
                None => {
                    self.requested_values.push(RequestedValues {
                        name: name.clone(),
                        values: Vec::new(),
                    });
                    self.requested_values.len() - 1
                }
            };
            match feature.attribute_text(name) {
                Some(value) => self.requested_values[index].values.push(value),
                None => warn!(
                    feature = %feature.id,
                    attribute = %name,
                    "requested attribute missing"
                ),
            }
        }
    }

    /// The representative coordinate under the cluster's strategy, in working
    /// space. `None` while the cluster is empty.
    pub fn location(&self) -> Option<Coord<f64>> {
        if self.strategy.is_incremental() {
            return self.running_location;
        }
        if let Some(location) = self.resolved_location.get() {
            return Some(*location);
        }
        let computed = match self.strategy {
            PositionStrategy::Average => position::average(&self.member_coordinates),
            _ => position::extent_center(&self.member_coordinates),
        }?;
        Some(*self.resolved_location.get_or_init(|| computed))
    }

    /// The shared coordinate when every member sits on the same location.
    pub fn original_location(&self) -> Option<Coord<f64>> {
        if self.unique_coordinates.len() == 1 {
            self.member_coordinates.first().copied()
        } else {
            None
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn reference_point(&self) -> Coord<f64> {
        self.reference_point
    }

    pub fn strategy(&self) -> PositionStrategy {
        self.strategy
    }

    pub fn count(&self) -> usize {
        self.member_count
    }

    pub fn count_unique(&self) -> usize {
        self.unique_coordinates.len()
    }

    pub fn bounding_box(&self) -> Option<Rect<f64>> {
        self.bounding_box
    }

    pub fn member_coordinates(&self) -> &[Coord<f64>] {
        &self.member_coordinates
    }

    pub fn member_ids(&self) -> &[String] {
        &self.member_ids
    }

    /// The attributes of the only member; empty once a second member arrives.
    pub fn singleton_attributes(&self) -> &Attributes {
        &self.singleton_attributes
    }

    pub fn sort_value(&self) -> Option<&str> {
        self.sort_value.as_deref()
    }

    pub fn requested_values(&self) -> &[RequestedValues] {
        &self.requested_values
    }
}

// THEORY:
// The `cluster_pass` module is the engine of the grouping layer. It streams the
// input features exactly once and buckets each into a `Cluster`, either by the
// grid cell its location falls into or by the value of a chosen attribute.
//
// Key architectural principles & pass steps:
// 1.  **Representative Point**: Every feature is collapsed to one coordinate
//     (the point itself, or the centroid of anything larger).
// 2.  **Working Space**: That coordinate is mapped into the output window's
//     coordinate system, where grid cells correspond to output pixels. A
//     mapping failure aborts the whole pass.
// 3.  **Keying**: A `ClusterKeying` turns the feature into a cluster key plus the
//     anchor a new cluster would get. The grid keying anchors to the cell center;
//     the attribute keying anchors to the first member's own location and skips
//     features that lack the attribute.
// 4.  **Accumulation**: The keyed cluster is looked up or created and the feature
//     is added to it. Clusters are kept in first-seen order so that every
//     downstream step (projection, normalization) is deterministic.
// 5.  **Single Owner**: The `ClusterSet` is owned by the pass that builds it.
//     There is no sharing and no concurrent mutation.

use crate::core_modules::cluster::{Cluster, MemberRules};
use crate::core_modules::feature::{CloseOnDrop, Feature, FeatureSource};
use crate::core_modules::grid_index::{CellId, GridIndex};
use crate::core_modules::mapping::CoordinateMapping;
use crate::core_modules::position::PositionStrategy;
use crate::error::StackResult;
use geo::Coord;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::{debug, info, warn};

pub mod cluster_pass {
    use super::*; // Make the shared imports available.

    /// Decides which cluster a feature belongs to.
    pub trait ClusterKeying {
        type Key: Eq + Hash + Clone + Debug;

        /// Returns the cluster key for a feature located at `point` (working
        /// space) and the anchor to use if that cluster does not exist yet.
        /// `None` skips the feature.
        fn key_for(&self, feature: &Feature, point: Coord<f64>) -> Option<(Self::Key, Coord<f64>)>;
    }

    /// Buckets features by grid cell.
    #[derive(Debug, Clone, Copy)]
    pub struct GridKeying {
        pub grid: GridIndex,
    }

    impl ClusterKeying for GridKeying {
        type Key = CellId;

        fn key_for(&self, _feature: &Feature, point: Coord<f64>) -> Option<(CellId, Coord<f64>)> {
            let cell = self.grid.cell_of(point);
            Some((cell, self.grid.cell_center(cell)))
        }
    }

    /// Buckets features by the string value of one attribute.
    #[derive(Debug, Clone)]
    pub struct AttributeKeying {
        /// Attribute name, matched case-insensitively.
        pub attribute: String,
    }

    impl ClusterKeying for AttributeKeying {
        type Key = String;

        fn key_for(&self, feature: &Feature, point: Coord<f64>) -> Option<(String, Coord<f64>)> {
            match feature.attribute_text_ignore_case(&self.attribute) {
                Some(value) => Some((value, point)),
                None => {
                    warn!(
                        feature = %feature.id,
                        attribute = %self.attribute,
                        "feature has no value for the cluster attribute, skipping"
                    );
                    None
                }
            }
        }
    }

    /// The clusters built by one pass, in first-seen order.
    #[derive(Debug)]
    pub struct ClusterSet<K> {
        /// Position strategy every cluster of this set is created with.
        strategy: PositionStrategy,
        clusters: Vec<Cluster<K>>,
        index: HashMap<K, usize>,
        consumed: usize,
        skipped: usize,
    }

    impl<K: Eq + Hash + Clone + Debug> ClusterSet<K> {
        pub fn new(strategy: PositionStrategy) -> Self {
            Self {
                strategy,
                clusters: Vec::new(),
                index: HashMap::new(),
                consumed: 0,
                skipped: 0,
            }
        }

        /// Routes one feature into its cluster.
        pub fn absorb<C>(
            &mut self,
            feature: Feature,
            keying: &C,
            mapping: &dyn CoordinateMapping,
            rules: &MemberRules<'_>,
        ) -> StackResult<()>
        where
            C: ClusterKeying<Key = K>,
        {
            self.consumed += 1;

            let Some(point) = feature.representative_point() else {
                warn!(feature = %feature.id, "feature has an empty geometry, skipping");
                self.skipped += 1;
                return Ok(());
            };
            let point = mapping.forward(point)?;

            let Some((key, anchor)) = keying.key_for(&feature, point) else {
                self.skipped += 1;
                return Ok(());
            };

            let slot = match self.index.get(&key) {
                Some(&slot) => slot,
                None => {
                    debug!(key = ?key, x = anchor.x, y = anchor.y, "new cluster");
                    self.clusters.push(Cluster::new(key.clone(), anchor, self.strategy));
                    self.index.insert(key, self.clusters.len() - 1);
                    self.clusters.len() - 1
                }
            };
            self.clusters[slot].add(point, &feature, rules);
            Ok(())
        }

        pub fn get(&self, key: &K) -> Option<&Cluster<K>> {
            self.index.get(key).map(|&slot| &self.clusters[slot])
        }

        pub fn clusters(&self) -> &[Cluster<K>] {
            &self.clusters
        }

        pub fn into_clusters(self) -> Vec<Cluster<K>> {
            self.clusters
        }

        pub fn len(&self) -> usize {
            self.clusters.len()
        }

        pub fn is_empty(&self) -> bool {
            self.clusters.is_empty()
        }

        /// Features read from the source.
        pub fn consumed(&self) -> usize {
            self.consumed
        }

        /// Features read but not placed in any cluster.
        pub fn skipped(&self) -> usize {
            self.skipped
        }
    }

    impl<K: Eq + Hash + Clone + Debug> Default for ClusterSet<K> {
        fn default() -> Self {
            Self::new(PositionStrategy::default())
        }
    }

    /// Drains `source` into clusters chosen by `keying`. The source is closed
    /// afterwards, also when the pass fails.
    pub fn stack_features<S, C>(
        source: &mut S,
        keying: &C,
        strategy: PositionStrategy,
        mapping: &dyn CoordinateMapping,
        rules: &MemberRules<'_>,
    ) -> StackResult<ClusterSet<C::Key>>
    where
        S: FeatureSource + ?Sized,
        C: ClusterKeying,
    {
        let mut source = CloseOnDrop(source);
        let mut set = ClusterSet::new(strategy);
        while let Some(feature) = source.0.next_feature() {
            set.absorb(feature?, keying, mapping, rules)?;
        }
        info!(
            clusters = set.len(),
            consumed = set.consumed(),
            skipped = set.skipped(),
            "clustering pass complete"
        );
        Ok(set)
    }

    pub fn stack_by_grid<S: FeatureSource + ?Sized>(
        source: &mut S,
        grid: GridIndex,
        strategy: PositionStrategy,
        mapping: &dyn CoordinateMapping,
        rules: &MemberRules<'_>,
    ) -> StackResult<ClusterSet<CellId>> {
        stack_features(source, &GridKeying { grid }, strategy, mapping, rules)
    }

    pub fn stack_by_attribute<S: FeatureSource + ?Sized>(
        source: &mut S,
        attribute: &str,
        strategy: PositionStrategy,
        mapping: &dyn CoordinateMapping,
        rules: &MemberRules<'_>,
    ) -> StackResult<ClusterSet<String>> {
        let keying = AttributeKeying {
            attribute: attribute.to_lowercase(),
        };
        stack_features(source, &keying, strategy, mapping, rules)
    }
}

#[cfg(test)]
mod tests {
    use super::cluster_pass::*;
    use super::*;
    use crate::core_modules::feature::IterSource;
    use crate::core_modules::mapping::Identity;
    use crate::core_modules::position::PositionStrategy::{Nearest, Weighted};
    use crate::error::StackError;
    use geo::{MultiPoint, Point};

    const RULES: MemberRules<'static> = MemberRules {
        requested_attributes: &[],
        sort_field: None,
        clustered_sort_value: "0",
    };

    fn sample() -> Vec<Feature> {
        [(4.0, 4.0, "I"), (6.5, 6.5, "V"), (6.5, 6.5, "II"), (8.0, 8.0, "II"), (8.3, 8.3, "I")]
            .into_iter()
            .enumerate()
            .map(|(i, (x, y, b))| {
                Feature::new(format!("f{i}"), Point::new(x, y)).with_attribute("attribute b", b)
            })
            .collect()
    }

    #[test]
    fn grid_pass_groups_by_cell_with_center_anchors() {
        let mut source = IterSource::new(sample().into_iter());
        let grid = GridIndex::new(1.0).unwrap();
        let set = stack_by_grid(&mut source, grid, Nearest, &Identity, &RULES).unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.consumed(), 5);
        let cell = set.get(&CellId { ix: 8, iy: 8 }).unwrap();
        assert_eq!(cell.count(), 2);
        assert_eq!(cell.count_unique(), 2);
        assert_eq!(cell.reference_point(), Coord { x: 8.5, y: 8.5 });
        let keys: Vec<CellId> = set.clusters().iter().map(|c| *c.key()).collect();
        let cell = |i| CellId { ix: i, iy: i };
        assert_eq!(keys, [cell(4), cell(6), cell(8)]);
        assert!(source.is_closed());
    }

    #[test]
    fn attribute_pass_anchors_to_the_first_member_and_skips_missing_values() {
        let mut features = sample();
        features.push(Feature::new("no-b", Point::new(1.0, 1.0)));
        features.push(
            Feature::new("null-b", Point::new(1.0, 1.0))
                .with_attribute("attribute b", serde_json::Value::Null),
        );
        let mut source = IterSource::new(features.into_iter());

        let set =
            stack_by_attribute(&mut source, "Attribute B", Weighted, &Identity, &RULES).unwrap();

        assert_eq!(set.len(), 3);
        assert_eq!(set.consumed(), 7);
        assert_eq!(set.skipped(), 2);
        let total: usize = set.clusters().iter().map(|c| c.count()).sum();
        assert_eq!(total, set.consumed() - set.skipped());
        let two = set.get(&"II".to_string()).unwrap();
        assert_eq!(two.reference_point(), Coord { x: 6.5, y: 6.5 });
        assert_eq!(two.member_ids(), ["f2", "f3"]);
    }

    #[test]
    fn empty_geometries_are_skipped() {
        let features = vec![
            Feature::new("empty", MultiPoint::<f64>::new(vec![])),
            Feature::new("f1", Point::new(0.5, 0.5)),
        ];
        let mut source = IterSource::new(features.into_iter());
        let grid = GridIndex::new(1.0).unwrap();
        let set = stack_by_grid(&mut source, grid, Nearest, &Identity, &RULES).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.skipped(), 1);
    }

    struct FailingSource {
        closed: bool,
    }

    impl FeatureSource for FailingSource {
        fn next_feature(&mut self) -> Option<StackResult<Feature>> {
            Some(Err(StackError::Source("disk went away".into())))
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    #[test]
    fn source_errors_abort_the_pass_and_still_close_it() {
        let mut source = FailingSource { closed: false };
        let grid = GridIndex::new(1.0).unwrap();
        let result = stack_by_grid(&mut source, grid, Nearest, &Identity, &RULES);
        assert!(matches!(result, Err(StackError::Source(_))));
        assert!(source.closed);
    }
}

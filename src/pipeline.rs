// THEORY:
// The `pipeline` module is the top-level API of the stacker. It bundles the
// whole stack (mapping, clustering pass, projection, sort) behind a single call.
// It gives callers a clean entry point: hand over a feature source and an
// output window, and get back the stacked records.
//
// Run stages:
// 1.  Validate the configuration once, up front. A grid run without a cell
//     size is rejected here instead of failing mid-pass.
// 2.  Find the mapping from the data's coordinate system to the window's. A
//     missing transform path aborts the run before any feature is read.
// 3.  Run the grid or attribute clustering pass.
// 4.  Project the clusters into records, then sort them when a sort field is set.

use crate::core_modules::cluster::{Cluster, MemberRules};
use crate::core_modules::cluster_pass::cluster_pass::{self, AttributeKeying, GridKeying};
use crate::core_modules::grid_index::GridIndex;
use crate::core_modules::mapping::{self, CoordinateMapping};
use crate::core_modules::projector::{self, Projection};
use crate::error::{StackError, StackResult};
use geo::Rect;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::info;

// Re-export key data structures for the public API.
pub use crate::core_modules::feature::{Attributes, Feature, FeatureSource, IterSource};
pub use crate::core_modules::mapping::Crs;
pub use crate::core_modules::position::PositionStrategy;
pub use crate::core_modules::projector::{
    PreserveLocation, RecordSink, StackedCollection, StackedRecord, fields,
};
pub use crate::core_modules::record_sort::SortOrder;

/// What features are grouped by.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ClusterBasis {
    /// Grid cells of the output window.
    #[default]
    Grid,
    /// The value of this (lower-cased) attribute.
    Attribute(String),
}

impl From<String> for ClusterBasis {
    fn from(value: String) -> Self {
        let value = value.trim().to_lowercase();
        if value == "grid" {
            Self::Grid
        } else {
            Self::Attribute(value)
        }
    }
}

impl From<ClusterBasis> for String {
    fn from(basis: ClusterBasis) -> Self {
        basis.to_string()
    }
}

impl FromStr for ClusterBasis {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s.to_string()))
    }
}

impl fmt::Display for ClusterBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Grid => f.write_str("grid"),
            Self::Attribute(name) => f.write_str(name),
        }
    }
}

/// Configuration for a stacking run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StackerConfig {
    pub cluster_basis: ClusterBasis,
    /// Grid cell size in output pixels. Required for the grid basis.
    pub cluster_size: Option<u32>,
    #[serde(rename = "positionClusterPt")]
    pub position: PositionStrategy,
    /// Adds `normCount` and `normCountUnique` to every record.
    pub normalize: bool,
    pub preserve_location: PreserveLocation,
    /// Comma-separated attribute names whose values are propagated.
    pub original_attributes: Option<String>,
    pub sort_field: Option<String>,
    pub sort_by: SortOrder,
    /// Sort value shown by stacks with more than one member.
    pub clustered_sort_value: String,
}

impl Default for StackerConfig {
    fn default() -> Self {
        Self {
            cluster_basis: ClusterBasis::Grid,
            cluster_size: None,
            position: PositionStrategy::Nearest,
            normalize: false,
            preserve_location: PreserveLocation::Never,
            original_attributes: None,
            sort_field: None,
            sort_by: SortOrder::Ascending,
            clustered_sort_value: "0".to_string(),
        }
    }
}

impl StackerConfig {
    /// The propagated attribute names, trimmed, empty entries dropped.
    pub fn requested_attributes(&self) -> Vec<String> {
        self.original_attributes
            .as_deref()
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn validate(&self) -> StackResult<()> {
        match &self.cluster_basis {
            ClusterBasis::Grid => match self.cluster_size {
                None => return Err(StackError::MissingClusterSize),
                Some(0) => {
                    return Err(StackError::InvalidConfig(
                        "clusterSize must be at least 1 pixel".into(),
                    ));
                }
                Some(_) => {}
            },
            ClusterBasis::Attribute(name) if name.is_empty() => {
                return Err(StackError::InvalidConfig("cluster attribute name is empty".into()));
            }
            ClusterBasis::Attribute(_) => {}
        }
        if matches!(&self.sort_field, Some(field) if field.trim().is_empty()) {
            return Err(StackError::InvalidConfig("sortField is empty".into()));
        }

        // Propagated attributes become output fields of their own.
        let requested = self.requested_attributes();
        for (i, name) in requested.iter().enumerate() {
            if fields::ALL.contains(&name.as_str()) {
                return Err(StackError::InvalidConfig(format!(
                    "originalAttributes entry '{name}' collides with an output field"
                )));
            }
            if requested[..i].contains(name) {
                return Err(StackError::InvalidConfig(format!(
                    "originalAttributes lists '{name}' more than once"
                )));
            }
        }
        Ok(())
    }
}

/// The requested output image: its extent, coordinate system and pixel size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputWindow {
    pub extent: Rect<f64>,
    pub crs: Crs,
    pub width: u32,
    pub height: u32,
}

impl OutputWindow {
    pub fn new(extent: Rect<f64>, crs: Crs, width: u32, height: u32) -> Self {
        Self {
            extent,
            crs,
            width,
            height,
        }
    }

    pub fn validate(&self) -> StackResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(StackError::InvalidConfig(
                "output window must be at least 1x1 pixels".into(),
            ));
        }
        if !(self.extent.width().is_finite() && self.extent.height().is_finite()) {
            return Err(StackError::InvalidConfig("output extent must be finite".into()));
        }
        Ok(())
    }
}

/// The keying chosen for one run.
pub(crate) enum RunKeying {
    Grid(GridKeying),
    Attribute(AttributeKeying),
}

/// The main, top-level struct for the stacker.
#[derive(Debug, Clone)]
pub struct PointStacker {
    config: StackerConfig,
    requested_attributes: Vec<String>,
}

impl PointStacker {
    pub fn new(config: StackerConfig) -> StackResult<Self> {
        config.validate()?;
        let requested_attributes = config.requested_attributes();
        Ok(Self {
            config,
            requested_attributes,
        })
    }

    pub fn config(&self) -> &StackerConfig {
        &self.config
    }

    /// Stacks every feature of `source`, whose coordinates are in `source_crs`,
    /// for display in `window`.
    pub fn execute<S>(
        &self,
        source: &mut S,
        source_crs: &Crs,
        window: &OutputWindow,
    ) -> StackResult<StackedCollection>
    where
        S: FeatureSource + ?Sized,
    {
        let (mapping, keying) = self.prepare(source_crs, window)?;
        let rules = self.member_rules();
        let strategy = self.config.position;
        let mapping = mapping.as_ref();
        match keying {
            RunKeying::Grid(keying) => {
                let set = cluster_pass::stack_features(source, &keying, strategy, mapping, &rules)?;
                self.finish(set.clusters(), mapping)
            }
            RunKeying::Attribute(keying) => {
                let set = cluster_pass::stack_features(source, &keying, strategy, mapping, &rules)?;
                self.finish(set.clusters(), mapping)
            }
        }
    }

    /// Resolves the mapping and keying for a run.
    pub(crate) fn prepare(
        &self,
        source_crs: &Crs,
        window: &OutputWindow,
    ) -> StackResult<(Box<dyn CoordinateMapping>, RunKeying)> {
        window.validate()?;
        let mapping = mapping::find_mapping(source_crs, &window.crs)?;
        let keying = match &self.config.cluster_basis {
            ClusterBasis::Grid => {
                let size = self.config.cluster_size.ok_or(StackError::MissingClusterSize)?;
                let grid = GridIndex::from_window(size, &window.extent, window.width)?;
                info!(
                    cell_size = grid.cell_size(),
                    strategy = %self.config.position,
                    "stacking by grid"
                );
                RunKeying::Grid(GridKeying { grid })
            }
            ClusterBasis::Attribute(name) => {
                info!(attribute = %name, strategy = %self.config.position, "stacking by attribute");
                RunKeying::Attribute(AttributeKeying { attribute: name.clone() })
            }
        };
        Ok((mapping, keying))
    }

    pub(crate) fn member_rules(&self) -> MemberRules<'_> {
        MemberRules {
            requested_attributes: &self.requested_attributes,
            sort_field: self.config.sort_field.as_deref(),
            clustered_sort_value: &self.config.clustered_sort_value,
        }
    }

    /// Projects finished clusters and applies the optional sort.
    pub(crate) fn finish<K>(
        &self,
        clusters: &[Cluster<K>],
        mapping: &dyn CoordinateMapping,
    ) -> StackResult<StackedCollection> {
        let projection = Projection {
            preserve_location: self.config.preserve_location,
            normalize: self.config.normalize,
            mapping,
        };
        let mut collection =
            StackedCollection::new(self.config.normalize, &self.requested_attributes);
        projector::project(clusters, &projection, &mut collection)?;

        if let Some(field) = &self.config.sort_field {
            // The sort field's values live in `sortedByField` on every record.
            collection.sort_by_field(fields::SORTED_BY_FIELD, self.config.sort_by);
            info!(field = %field, order = ?self.config.sort_by, "sorted stacked points");
        }
        info!(stacks = collection.len(), "stacking complete");
        Ok(collection)
    }
}

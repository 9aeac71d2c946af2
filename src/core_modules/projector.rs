// THEORY:
// The `projector` turns finished clusters into output records. It is the last
// step of a run and the only place where working-space results are mapped
// back into the data's own coordinate system.
//
// For every cluster it:
// 1.  Picks the displayed location, letting the preserve-location policy swap in
//     an original member coordinate before the position strategy's answer is
//     used.
// 2.  Maps the location and both bounding-box corners back to source space.
// 3.  Optionally normalizes the counts against the run-wide maxima.
// 4.  Hands a `StackedRecord` to a `RecordSink`, which keeps the records in
//     emission order.
//
// Clusters are independent of one another, so projection order only matters
// for the normalization scan, which follows the pass's first-seen order.

use crate::core_modules::cluster::Cluster;
use crate::core_modules::feature::Attributes;
use crate::core_modules::mapping::CoordinateMapping;
use crate::core_modules::record_sort::{self, SortOrder};
use crate::error::{StackError, StackResult};
use geo::{Coord, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::debug;

/// Output field names.
pub mod fields {
    pub const GEOM: &str = "geom";
    pub const COUNT: &str = "count";
    pub const COUNT_UNIQUE: &str = "countunique";
    pub const BBOX_GEOM: &str = "geomBBOX";
    pub const BBOX_TEXT: &str = "envBBOX";
    pub const NORM_COUNT: &str = "normCount";
    pub const NORM_COUNT_UNIQUE: &str = "normCountUnique";
    pub const MEMBER_IDS: &str = "listStackedPointsIDs";
    pub const MEMBER_COORDS: &str = "listStackedPtsCoos";
    pub const SINGLETON_ATTRIBUTES: &str = "singlePointOrigAttributes";
    pub const SORTED_BY_FIELD: &str = "sortedByField";

    /// Every fixed field, in schema order.
    pub const ALL: [&str; 11] = [
        GEOM,
        COUNT,
        COUNT_UNIQUE,
        BBOX_GEOM,
        BBOX_TEXT,
        NORM_COUNT,
        NORM_COUNT_UNIQUE,
        MEMBER_IDS,
        MEMBER_COORDS,
        SINGLETON_ATTRIBUTES,
        SORTED_BY_FIELD,
    ];
}

/// When to show an original member location instead of the computed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PreserveLocation {
    /// Stacks with exactly one member keep that member's location.
    Single,
    /// Stacks whose members all share one location keep it.
    Superimposed,
    #[default]
    Never,
}

impl FromStr for PreserveLocation {
    type Err = StackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single" => Ok(Self::Single),
            "superimposed" => Ok(Self::Superimposed),
            "never" => Ok(Self::Never),
            other => Err(StackError::InvalidConfig(format!(
                "unknown preserve-location mode '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for PreserveLocation {
    type Error = StackError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PreserveLocation> for String {
    fn from(mode: PreserveLocation) -> Self {
        let name = match mode {
            PreserveLocation::Single => "Single",
            PreserveLocation::Superimposed => "Superimposed",
            PreserveLocation::Never => "Never",
        };
        name.to_string()
    }
}

/// One output point, in source space.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackedRecord {
    #[serde(rename = "geom")]
    pub location: Point<f64>,
    pub count: usize,
    #[serde(rename = "countunique")]
    pub count_unique: usize,
    #[serde(rename = "geomBBOX")]
    pub bbox: Polygon<f64>,
    #[serde(rename = "envBBOX")]
    pub bbox_text: String,
    #[serde(rename = "normCount", skip_serializing_if = "Option::is_none")]
    pub norm_count: Option<f64>,
    #[serde(rename = "normCountUnique", skip_serializing_if = "Option::is_none")]
    pub norm_count_unique: Option<f64>,
    #[serde(rename = "listStackedPointsIDs")]
    pub member_ids: Vec<String>,
    /// Member locations in working space.
    #[serde(rename = "listStackedPtsCoos")]
    pub member_coordinates: Vec<Coord<f64>>,
    /// All attributes of the only member; `None` for multi-member stacks.
    #[serde(rename = "singlePointOrigAttributes")]
    pub singleton_attributes: Option<Attributes>,
    #[serde(rename = "sortedByField")]
    pub sorted_by_field: Option<String>,
    /// Propagated attribute values, one field per requested attribute.
    #[serde(flatten)]
    pub requested: BTreeMap<String, Vec<String>>,
}

fn list_text<T: AsRef<str>>(items: &[T]) -> String {
    let joined: Vec<&str> = items.iter().map(AsRef::as_ref).collect();
    format!("[{}]", joined.join(", "))
}

impl StackedRecord {
    /// The textual value of a named output field, `None` when absent.
    pub fn field_text(&self, name: &str) -> Option<String> {
        match name {
            fields::GEOM => {
                Some(format!("POINT ({:?} {:?})", self.location.x(), self.location.y()))
            }
            fields::COUNT => Some(self.count.to_string()),
            fields::COUNT_UNIQUE => Some(self.count_unique.to_string()),
            fields::BBOX_GEOM | fields::BBOX_TEXT => Some(self.bbox_text.clone()),
            fields::NORM_COUNT => self.norm_count.map(|v| format!("{v:?}")),
            fields::NORM_COUNT_UNIQUE => self.norm_count_unique.map(|v| format!("{v:?}")),
            fields::MEMBER_IDS => Some(list_text(&self.member_ids)),
            fields::MEMBER_COORDS => {
                let coords: Vec<String> = self
                    .member_coordinates
                    .iter()
                    .map(|c| format!("({:?}, {:?})", c.x, c.y))
                    .collect();
                Some(list_text(&coords))
            }
            fields::SINGLETON_ATTRIBUTES => self
                .singleton_attributes
                .as_ref()
                .and_then(|attrs| serde_json::to_string(attrs).ok()),
            fields::SORTED_BY_FIELD => self.sorted_by_field.clone(),
            other => self.requested.get(other).map(|values| list_text(values)),
        }
    }
}

/// Receives projected records in emission order.
pub trait RecordSink {
    fn accept(&mut self, record: StackedRecord);
}

impl RecordSink for Vec<StackedRecord> {
    fn accept(&mut self, record: StackedRecord) {
        self.push(record);
    }
}

/// The assembled output: the field list and the ordered records.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StackedCollection {
    schema: Vec<String>,
    records: Vec<StackedRecord>,
}

impl StackedCollection {
    pub fn new(normalize: bool, requested_attributes: &[String]) -> Self {
        let mut schema: Vec<String> = [
            fields::GEOM,
            fields::COUNT,
            fields::COUNT_UNIQUE,
            fields::BBOX_GEOM,
            fields::BBOX_TEXT,
        ]
        .into_iter()
        .map(String::from)
        .collect();
        if normalize {
            schema.push(fields::NORM_COUNT.into());
            schema.push(fields::NORM_COUNT_UNIQUE.into());
        }
        schema.extend(
            [
                fields::MEMBER_IDS,
                fields::MEMBER_COORDS,
                fields::SINGLETON_ATTRIBUTES,
                fields::SORTED_BY_FIELD,
            ]
            .into_iter()
            .map(String::from),
        );
        schema.extend(requested_attributes.iter().cloned());
        Self {
            schema,
            records: Vec::new(),
        }
    }

    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    pub fn records(&self) -> &[StackedRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<StackedRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StackedRecord> {
        self.records.iter()
    }

    /// Stable sort by the textual value of `field`.
    pub fn sort_by_field(&mut self, field: &str, order: SortOrder) {
        record_sort::sort_records(&mut self.records, field, order);
    }
}

impl RecordSink for StackedCollection {
    fn accept(&mut self, record: StackedRecord) {
        self.records.push(record);
    }
}

impl IntoIterator for StackedCollection {
    type Item = StackedRecord;
    type IntoIter = std::vec::IntoIter<StackedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// How clusters become records.
#[derive(Clone, Copy)]
pub struct Projection<'a> {
    pub preserve_location: PreserveLocation,
    pub normalize: bool,
    /// Maps working space back to source space through `inverse`.
    pub mapping: &'a dyn CoordinateMapping,
}

/// The location a cluster is drawn at, in working space.
pub fn effective_location<K>(
    preserve: PreserveLocation,
    cluster: &Cluster<K>,
) -> Option<Coord<f64>> {
    let preserved = match preserve {
        PreserveLocation::Single if cluster.count() == 1 => cluster.original_location(),
        PreserveLocation::Superimposed if cluster.count_unique() == 1 => {
            cluster.original_location()
        }
        _ => None,
    };
    preserved.or_else(|| cluster.location())
}

/// The `(max count, max unique count)` pair used for normalization.
///
/// The unique maximum is taken whenever a cluster's member count beats the
/// running unique maximum, and it takes that cluster's unique count. With
/// clusters in first-seen order the result is deterministic.
pub fn normalization_maxima<K>(clusters: &[Cluster<K>]) -> (usize, usize) {
    let mut max_count = 0;
    let mut max_count_unique = 0;
    for cluster in clusters {
        if max_count < cluster.count() {
            max_count = cluster.count();
        }
        if max_count_unique < cluster.count() {
            max_count_unique = cluster.count_unique();
        }
    }
    (max_count, max_count_unique)
}

fn env_text(bbox: &Rect<f64>) -> String {
    format!(
        "Env[{:?} : {:?}, {:?} : {:?}]",
        bbox.min().x,
        bbox.max().x,
        bbox.min().y,
        bbox.max().y
    )
}

/// Projects every cluster into `sink`.
pub fn project<K, S>(
    clusters: &[Cluster<K>],
    projection: &Projection<'_>,
    sink: &mut S,
) -> StackResult<()>
where
    S: RecordSink + ?Sized,
{
    let maxima = projection.normalize.then(|| normalization_maxima(clusters));

    for cluster in clusters {
        let (Some(location), Some(bbox)) = (
            effective_location(projection.preserve_location, cluster),
            cluster.bounding_box(),
        ) else {
            debug!("skipping empty cluster");
            continue;
        };

        let location = projection.mapping.inverse(location)?;
        let bbox = Rect::new(
            projection.mapping.inverse(bbox.min())?,
            projection.mapping.inverse(bbox.max())?,
        );

        let (norm_count, norm_count_unique) = match maxima {
            Some((max_count, max_count_unique)) => (
                Some(cluster.count() as f64 / max_count as f64),
                Some(cluster.count_unique() as f64 / max_count_unique as f64),
            ),
            None => (None, None),
        };

        let singleton_attributes =
            (cluster.count() == 1).then(|| cluster.singleton_attributes().clone());

        sink.accept(StackedRecord {
            location: Point::from(location),
            count: cluster.count(),
            count_unique: cluster.count_unique(),
            bbox: bbox.to_polygon(),
            bbox_text: env_text(&bbox),
            norm_count,
            norm_count_unique,
            member_ids: cluster.member_ids().to_vec(),
            member_coordinates: cluster.member_coordinates().to_vec(),
            singleton_attributes,
            sorted_by_field: cluster.sort_value().map(str::to_string),
            requested: cluster
                .requested_values()
                .iter()
                .map(|r| (r.name.clone(), r.values.clone()))
                .collect(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::cluster::MemberRules;
    use crate::core_modules::feature::Feature;
    use crate::core_modules::mapping::Identity;
    use crate::core_modules::position::PositionStrategy;

    fn cluster_of(
        strategy: PositionStrategy,
        anchor: (f64, f64),
        points: &[(f64, f64)],
    ) -> Cluster<u32> {
        let rules = MemberRules {
            requested_attributes: &[],
            sort_field: None,
            clustered_sort_value: "0",
        };
        let mut cluster = Cluster::new(0, Coord { x: anchor.0, y: anchor.1 }, strategy);
        for (i, &(x, y)) in points.iter().enumerate() {
            let feature =
                Feature::new(format!("f{i}"), Point::new(x, y)).with_attribute("n", i as u64);
            cluster.add(Coord { x, y }, &feature, &rules);
        }
        cluster
    }

    #[test]
    fn preserve_single_only_applies_to_one_member() {
        let single = cluster_of(PositionStrategy::Nearest, (4.5, 4.5), &[(4.0, 4.0)]);
        let stacked = cluster_of(PositionStrategy::Nearest, (6.5, 6.5), &[(6.2, 6.2), (6.2, 6.2)]);

        let at = |v| Some(Coord { x: v, y: v });
        assert_eq!(effective_location(PreserveLocation::Single, &single), at(4.0));
        assert_eq!(effective_location(PreserveLocation::Never, &single), at(4.25));
        assert_eq!(effective_location(PreserveLocation::Single, &stacked), stacked.location());
    }

    #[test]
    fn preserve_superimposed_applies_when_all_members_coincide() {
        let stacked = cluster_of(PositionStrategy::Nearest, (6.5, 6.5), &[(6.2, 6.2), (6.2, 6.2)]);
        let spread = cluster_of(PositionStrategy::Nearest, (8.5, 8.5), &[(8.0, 8.0), (8.3, 8.3)]);

        assert_eq!(
            effective_location(PreserveLocation::Superimposed, &stacked),
            Some(Coord { x: 6.2, y: 6.2 })
        );
        assert_eq!(effective_location(PreserveLocation::Superimposed, &spread), spread.location());
    }

    #[test]
    fn normalization_maxima_follow_cluster_order() {
        let wide = || cluster_of(PositionStrategy::Average, (0.0, 0.0), &[(1.0, 1.0); 5]);
        let varied = || {
            let points = [(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)];
            cluster_of(PositionStrategy::Average, (0.0, 0.0), &points)
        };

        // The unique maximum is gated on member counts, so it depends on order.
        assert_eq!(normalization_maxima(&[varied(), wide()]), (5, 1));
        assert_eq!(normalization_maxima(&[wide(), varied()]), (5, 3));
    }

    #[test]
    fn projected_records_carry_all_fields() {
        let clusters = vec![
            cluster_of(
                PositionStrategy::Weighted,
                (4.5, 4.5),
                &[(4.0, 4.0), (4.1, 4.1), (4.1, 4.1)],
            ),
            cluster_of(PositionStrategy::Weighted, (8.5, 8.5), &[(8.0, 8.0)]),
        ];
        let projection = Projection {
            preserve_location: PreserveLocation::Never,
            normalize: true,
            mapping: &Identity,
        };
        let mut collection = StackedCollection::new(true, &[]);
        project(&clusters, &projection, &mut collection).unwrap();

        let records = collection.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].count, 3);
        assert_eq!(records[0].count_unique, 2);
        assert_eq!(records[0].norm_count, Some(1.0));
        assert_eq!(records[0].norm_count_unique, Some(1.0));
        assert_eq!(records[0].singleton_attributes, None);
        assert_eq!(records[0].bbox_text, "Env[4.0 : 4.1, 4.0 : 4.1]");
        assert_eq!(records[1].norm_count, Some(1.0 / 3.0));
        assert_eq!(records[1].norm_count_unique, Some(0.5));
        assert_eq!(records[1].location, Point::new(8.0, 8.0));
        assert_eq!(records[1].singleton_attributes.as_ref().map(|a| a.len()), Some(1));
        assert_eq!(collection.schema().len(), 11);
    }

    #[test]
    fn field_text_renders_named_fields() {
        let clusters =
            vec![cluster_of(PositionStrategy::Extent, (0.0, 0.0), &[(1.0, 2.0), (3.0, 4.0)])];
        let projection = Projection {
            preserve_location: PreserveLocation::Never,
            normalize: false,
            mapping: &Identity,
        };
        let mut records: Vec<StackedRecord> = Vec::new();
        project(&clusters, &projection, &mut records).unwrap();

        let record = &records[0];
        assert_eq!(record.field_text(fields::GEOM).as_deref(), Some("POINT (2.0 3.0)"));
        assert_eq!(record.field_text(fields::COUNT).as_deref(), Some("2"));
        assert_eq!(record.field_text(fields::MEMBER_IDS).as_deref(), Some("[f0, f1]"));
        assert_eq!(record.field_text(fields::NORM_COUNT), None);
        assert_eq!(record.field_text("no such field"), None);
    }

    #[test]
    fn preserve_modes_parse() {
        assert_eq!("single".parse::<PreserveLocation>().unwrap(), PreserveLocation::Single);
        assert_eq!(
            "Superimposed".parse::<PreserveLocation>().unwrap(),
            PreserveLocation::Superimposed
        );
        assert!("always".parse::<PreserveLocation>().is_err());
    }
}

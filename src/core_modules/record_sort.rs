//! Stable ordering of projected records by the text of one field.
//!
//! Values compare as strings, so `"10"` orders before `"9"`. Records without a
//! value for the field order first when ascending and last when descending.

use crate::core_modules::projector::StackedRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl FromStr for SortOrder {
    type Err = std::convert::Infallible;

    /// Anything other than "descending" (any case) sorts ascending.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("descending") {
            Ok(Self::Descending)
        } else {
            Ok(Self::Ascending)
        }
    }
}

impl From<String> for SortOrder {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(order) => order,
            Err(never) => match never {},
        }
    }
}

impl From<SortOrder> for String {
    fn from(order: SortOrder) -> Self {
        match order {
            SortOrder::Ascending => "ASCENDING".into(),
            SortOrder::Descending => "DESCENDING".into(),
        }
    }
}

pub fn sort_records(records: &mut [StackedRecord], field: &str, order: SortOrder) {
    match order {
        SortOrder::Ascending => records.sort_by_cached_key(|r| r.field_text(field)),
        SortOrder::Descending => records.sort_by_cached_key(|r| Reverse(r.field_text(field))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::projector::fields;
    use geo::{Coord, Point, Rect};
    use std::collections::BTreeMap;

    fn record(id: &str, sort: Option<&str>) -> StackedRecord {
        let bbox = Rect::new(Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 });
        StackedRecord {
            location: Point::new(0.0, 0.0),
            count: 1,
            count_unique: 1,
            bbox: bbox.to_polygon(),
            bbox_text: String::new(),
            norm_count: None,
            norm_count_unique: None,
            member_ids: vec![id.to_string()],
            member_coordinates: vec![],
            singleton_attributes: None,
            sorted_by_field: sort.map(str::to_string),
            requested: BTreeMap::new(),
        }
    }

    fn order(records: &[StackedRecord]) -> Vec<&str> {
        records.iter().map(|r| r.member_ids[0].as_str()).collect()
    }

    #[test]
    fn descending_keeps_ties_in_emission_order() {
        let mut records = vec![
            record("a", Some("2")),
            record("b", Some("5")),
            record("c", Some("2")),
            record("d", Some("0")),
        ];
        sort_records(&mut records, fields::SORTED_BY_FIELD, SortOrder::Descending);
        assert_eq!(order(&records), ["b", "a", "c", "d"]);
    }

    #[test]
    fn ascending_compares_text_and_puts_absent_first() {
        let mut records = vec![
            record("a", Some("9")),
            record("b", Some("10")),
            record("c", None),
            record("d", Some("-999")),
        ];
        sort_records(&mut records, fields::SORTED_BY_FIELD, SortOrder::Ascending);
        assert_eq!(order(&records), ["c", "d", "b", "a"]);
    }

    #[test]
    fn order_parses_leniently() {
        assert_eq!("DESCENDING".parse::<SortOrder>(), Ok(SortOrder::Descending));
        assert_eq!("descending".parse::<SortOrder>(), Ok(SortOrder::Descending));
        assert_eq!("whatever".parse::<SortOrder>(), Ok(SortOrder::Ascending));
    }
}

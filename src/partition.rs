use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::checker::Placement;
use crate::error::{PipelineError, Result};
use crate::model::PlantRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionShape {
    State,
    #[default]
    StateDistrict,
    StateYear,
    StateDistrictYear,
}

impl PartitionShape {
    pub fn has_district(&self) -> bool {
        matches!(
            self,
            PartitionShape::StateDistrict | PartitionShape::StateDistrictYear
        )
    }

    pub fn has_year(&self) -> bool {
        matches!(
            self,
            PartitionShape::StateYear | PartitionShape::StateDistrictYear
        )
    }
}

impl fmt::Display for PartitionShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PartitionShape::State => "state",
            PartitionShape::StateDistrict => "state-district",
            PartitionShape::StateYear => "state-year",
            PartitionShape::StateDistrictYear => "state-district-year",
        };
        f.write_str(name)
    }
}

impl FromStr for PartitionShape {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "state" => Ok(PartitionShape::State),
            "state-district" => Ok(PartitionShape::StateDistrict),
            "state-year" => Ok(PartitionShape::StateYear),
            "state-district-year" => Ok(PartitionShape::StateDistrictYear),
            other => Err(PipelineError::UnknownOption {
                kind: "partition shape",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub state: String,
    pub district: Option<String>,
    pub year: Option<String>,
}

impl PartitionKey {
    pub fn components(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.state.as_str())
            .chain(self.district.as_deref())
            .chain(self.year.as_deref())
    }

    pub fn relative_dir(&self) -> PathBuf {
        self.components().map(sanitize_component).collect()
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<_> = self.components().collect();
        f.write_str(&parts.join(" / "))
    }
}

/// Makes a label safe to use as exactly one path component.
pub fn sanitize_component(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    shape: PartitionShape,
}

impl Partitioner {
    pub fn new(shape: PartitionShape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> PartitionShape {
        self.shape
    }

    /// `None` when the shape needs a label the record lacks, which for a
    /// validated configuration only happens for records without a year.
    pub fn key_for(&self, placement: &Placement, record: &PlantRecord) -> Option<PartitionKey> {
        let district = if self.shape.has_district() {
            Some(placement.district.clone()?)
        } else {
            None
        };
        let year = if self.shape.has_year() {
            Some(record.year.clone()?)
        } else {
            None
        };

        Some(PartitionKey {
            state: placement.state.clone(),
            district,
            year,
        })
    }
}

/// Accepted records of one input file grouped by partition key.
///
/// Buckets appear on the first record routed to them and keep encounter order.
#[derive(Debug, Clone, Default)]
pub struct Buckets {
    buckets: BTreeMap<PartitionKey, Vec<PlantRecord>>,
}

impl Buckets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: PartitionKey, record: PlantRecord) {
        self.buckets.entry(key).or_default().push(record);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn get(&self, key: &PartitionKey) -> Option<&[PlantRecord]> {
        self.buckets.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PartitionKey, &[PlantRecord])> {
        self.buckets.iter().map(|(k, v)| (k, v.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Properties;
    use serde_json::json;
    use std::path::Path;

    fn placement(district: Option<&str>) -> Placement {
        Placement {
            state: "Berlin".to_string(),
            district: district.map(str::to_string),
            ambiguous: false,
        }
    }

    fn record(id: u32, year: Option<&str>) -> PlantRecord {
        let mut properties = Properties::new();
        properties.insert("id".to_string(), json!(id));
        PlantRecord {
            coordinate: None,
            state_code: None,
            district_key: None,
            energy_code: None,
            installed_power: None,
            year: year.map(str::to_string),
            properties,
        }
    }

    #[test]
    fn test_key_shapes() {
        let p = placement(Some("Mitte"));
        let r = record(1, Some("2010"));

        let key = Partitioner::new(PartitionShape::State).key_for(&p, &r).unwrap();
        assert_eq!(key.relative_dir(), Path::new("Berlin"));

        let key = Partitioner::new(PartitionShape::StateYear).key_for(&p, &r).unwrap();
        assert_eq!(key.relative_dir(), Path::new("Berlin/2010"));

        let key = Partitioner::new(PartitionShape::StateDistrictYear)
            .key_for(&p, &r)
            .unwrap();
        assert_eq!(key.relative_dir(), Path::new("Berlin/Mitte/2010"));
        assert_eq!(key.to_string(), "Berlin / Mitte / 2010");
    }

    #[test]
    fn test_missing_year_excluded_only_from_year_shapes() {
        let p = placement(Some("Mitte"));
        let r = record(1, None);

        assert!(Partitioner::new(PartitionShape::StateYear).key_for(&p, &r).is_none());
        assert!(Partitioner::new(PartitionShape::StateDistrict).key_for(&p, &r).is_some());
    }

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Berlin, Mitte"), "Berlin, Mitte");
        assert_eq!(sanitize_component("a/b"), "a_b");
        assert_eq!(sanitize_component(".."), "_");
        assert_eq!(sanitize_component("  "), "_");
    }

    #[test]
    fn test_buckets_keep_encounter_order() {
        let partitioner = Partitioner::new(PartitionShape::StateYear);
        let p = placement(None);
        let mut buckets = Buckets::new();

        for (id, year) in [(1, "2010"), (2, "2011"), (3, "2010")] {
            let r = record(id, Some(year));
            let key = partitioner.key_for(&p, &r).unwrap();
            buckets.push(key, r);
        }

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets.record_count(), 3);

        let key = PartitionKey {
            state: "Berlin".to_string(),
            district: None,
            year: Some("2010".to_string()),
        };
        let ids: Vec<_> = buckets
            .get(&key)
            .unwrap()
            .iter()
            .map(|r| r.properties["id"].clone())
            .collect();
        assert_eq!(ids, vec![json!(1), json!(3)]);
    }
}

use geo::Coord;
use serde_json::{Map, Value};

/// Record fields in their original order.
pub type Properties = Map<String, Value>;

/// A generation unit after normalization.
///
/// The typed fields are derived once from `properties`; `properties` itself is
/// carried through untouched so exports reproduce the source record verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct PlantRecord {
    /// `None` when either coordinate is absent or unparsable.
    pub coordinate: Option<Coord<f64>>,
    pub state_code: Option<String>,
    pub district_key: Option<String>,
    pub energy_code: Option<String>,
    pub installed_power: Option<f64>,
    /// First four characters of the commissioning date, digits or not.
    pub year: Option<String>,
    pub properties: Properties,
}

impl PlantRecord {
    /// The two leading characters of the district key, which identify the state.
    pub fn district_prefix(&self) -> Option<&str> {
        let key = self.district_key.as_deref()?;
        let mut chars = key.char_indices();
        chars.nth(1)?;
        let end = chars.next().map_or(key.len(), |(i, _)| i);
        Some(&key[..end])
    }

    pub fn properties_value(&self) -> Value {
        Value::Object(self.properties.clone())
    }
}

/// Name of a boundary polygon: a state, or a district with its parent state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionLabel {
    pub state: String,
    pub district: Option<String>,
}

impl RegionLabel {
    pub fn state(name: impl Into<String>) -> Self {
        Self {
            state: name.into(),
            district: None,
        }
    }

    pub fn district(state: impl Into<String>, district: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            district: Some(district.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_key(key: Option<&str>) -> PlantRecord {
        PlantRecord {
            coordinate: None,
            state_code: None,
            district_key: key.map(str::to_string),
            energy_code: None,
            installed_power: None,
            year: None,
            properties: Properties::new(),
        }
    }

    #[test]
    fn test_district_prefix() {
        assert_eq!(record_with_key(Some("09162000")).district_prefix(), Some("09"));
        assert_eq!(record_with_key(Some("11")).district_prefix(), Some("11"));
        assert_eq!(record_with_key(Some("1")).district_prefix(), None);
        assert_eq!(record_with_key(None).district_prefix(), None);
    }
}

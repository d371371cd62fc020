//! Turns loosely typed export records into [`PlantRecord`]s.
//!
//! Nothing here fails: unparsable values become `None` and the checks that
//! depend on them reject the record later.

use geo::Coord;
use serde_json::Value;

use crate::config::FieldNames;
use crate::model::{PlantRecord, Properties};

/// Parses a decimal that may use a comma as separator (`"13,4"`).
pub fn parse_decimal(text: &str) -> Option<f64> {
    let value: f64 = text.trim().replace(',', ".").parse().ok()?;
    value.is_finite().then_some(value)
}

/// Numeric field from either a JSON number or a decimal string.
pub fn decimal_value(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_decimal(s),
        _ => None,
    }
}

/// Trimmed code text. Numbers are rendered as written; empty means absent.
pub fn code_value(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// First four characters of a date string. The prefix is not checked for
/// digits, so `"abcd-05-01"` yields `"abcd"`.
pub fn extract_year(date: Option<&str>) -> Option<String> {
    let date = date?;
    let year: String = date.chars().take(4).collect();
    (year.chars().count() == 4).then_some(year)
}

#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    fields: FieldNames,
}

impl RecordNormalizer {
    pub fn new(fields: FieldNames) -> Self {
        Self { fields }
    }

    pub fn normalize(&self, properties: Properties) -> PlantRecord {
        let fields = &self.fields;

        let longitude = decimal_value(properties.get(&fields.longitude));
        let latitude = decimal_value(properties.get(&fields.latitude));
        let coordinate = match (longitude, latitude) {
            (Some(x), Some(y)) => Some(Coord { x, y }),
            _ => None,
        };

        let year = match properties.get(&fields.commissioning_date) {
            Some(Value::String(date)) => extract_year(Some(date.as_str())),
            _ => None,
        };

        PlantRecord {
            coordinate,
            state_code: code_value(properties.get(&fields.state_code)),
            district_key: code_value(properties.get(&fields.district_key)),
            energy_code: code_value(properties.get(&fields.energy_code)),
            installed_power: decimal_value(properties.get(&fields.installed_power)),
            year,
            properties,
        }
    }
}

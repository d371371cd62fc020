use std::path::PathBuf;

use crate::checker::{Check, CheckSet};
use crate::error::{PipelineError, Result};
use crate::partition::PartitionShape;
use crate::polygon_index::TieBreak;
use crate::writer::OutputFormat;

/// Names of the record fields the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNames {
    pub longitude: String,
    pub latitude: String,
    pub state_code: String,
    pub district_key: String,
    pub energy_code: String,
    pub installed_power: String,
    pub commissioning_date: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            longitude: "Laengengrad".to_string(),
            latitude: "Breitengrad".to_string(),
            state_code: "Bundesland".to_string(),
            district_key: "Gemeindeschluessel".to_string(),
            energy_code: "Energietraeger".to_string(),
            installed_power: "Bruttoleistung".to_string(),
            commissioning_date: "Inbetriebnahmedatum".to_string(),
        }
    }
}

/// Property names carrying polygon labels in the boundary datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryProperties {
    pub state_name: String,
    pub district_state: String,
    pub district_name: String,
}

impl Default for BoundaryProperties {
    fn default() -> Self {
        Self {
            state_name: "name".to_string(),
            district_state: "NAME_1".to_string(),
            district_name: "NAME_2".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub states_path: Option<PathBuf>,
    pub districts_path: Option<PathBuf>,
    /// Replaces the built-in code tables when set.
    pub code_tables_path: Option<PathBuf>,
    pub fields: FieldNames,
    pub boundary_properties: BoundaryProperties,
    pub checks: CheckSet,
    pub partition: PartitionShape,
    pub format: OutputFormat,
    pub tie_break: TieBreak,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            states_path: None,
            districts_path: None,
            code_tables_path: None,
            fields: FieldNames::default(),
            boundary_properties: BoundaryProperties::default(),
            checks: CheckSet::all(),
            partition: PartitionShape::StateDistrict,
            format: OutputFormat::GeoJson,
            tie_break: TieBreak::FirstMatch,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.checks.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one check must be enabled".to_string(),
            ));
        }

        if self.checks.contains(Check::StatePolygon) && self.states_path.is_none() {
            return Err(PipelineError::InvalidConfig(format!(
                "check '{}' requires a state boundary dataset",
                Check::StatePolygon
            )));
        }

        if self.checks.contains(Check::DistrictPolygon) && self.districts_path.is_none() {
            return Err(PipelineError::InvalidConfig(format!(
                "check '{}' requires a district boundary dataset",
                Check::DistrictPolygon
            )));
        }

        if self.partition.has_district() && !self.checks.contains(Check::DistrictPolygon) {
            return Err(PipelineError::InvalidConfig(format!(
                "partition '{}' needs district labels, enable check '{}'",
                self.partition,
                Check::DistrictPolygon
            )));
        }

        Ok(())
    }
}

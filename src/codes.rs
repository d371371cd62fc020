//! Administrative code tables.
//!
//! Two independent key spaces resolve to the same 16 state names: the MaStR
//! `Bundesland` catalog code and the leading two digits of the official
//! municipality key (Gemeindeschluessel).

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// MaStR `Bundesland` catalog values.
pub const STATE_CODES: [(&str, &str); 16] = [
    ("1400", "Brandenburg"),
    ("1401", "Berlin"),
    ("1402", "Baden-Württemberg"),
    ("1403", "Bayern"),
    ("1404", "Bremen"),
    ("1405", "Hessen"),
    ("1406", "Hamburg"),
    ("1407", "Mecklenburg-Vorpommern"),
    ("1408", "Niedersachsen"),
    ("1409", "Nordrhein-Westfalen"),
    ("1410", "Rheinland-Pfalz"),
    ("1411", "Schleswig-Holstein"),
    ("1412", "Saarland"),
    ("1413", "Sachsen"),
    ("1414", "Sachsen-Anhalt"),
    ("1415", "Thüringen"),
];

/// State part of the official municipality key.
pub const DISTRICT_KEY_PREFIXES: [(&str, &str); 16] = [
    ("01", "Schleswig-Holstein"),
    ("02", "Hamburg"),
    ("03", "Niedersachsen"),
    ("04", "Bremen"),
    ("05", "Nordrhein-Westfalen"),
    ("06", "Hessen"),
    ("07", "Rheinland-Pfalz"),
    ("08", "Baden-Württemberg"),
    ("09", "Bayern"),
    ("10", "Saarland"),
    ("11", "Berlin"),
    ("12", "Brandenburg"),
    ("13", "Mecklenburg-Vorpommern"),
    ("14", "Sachsen"),
    ("15", "Sachsen-Anhalt"),
    ("16", "Thüringen"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTables {
    state_codes: HashMap<String, String>,
    district_key_prefixes: HashMap<String, String>,
}

#[derive(Deserialize)]
struct CodeTablesFile {
    state_codes: HashMap<String, String>,
    district_key_prefixes: HashMap<String, String>,
}

impl Default for CodeTables {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CodeTables {
    pub fn builtin() -> Self {
        Self::new(
            STATE_CODES
                .iter()
                .map(|(code, name)| (code.to_string(), name.to_string())),
            DISTRICT_KEY_PREFIXES
                .iter()
                .map(|(prefix, name)| (prefix.to_string(), name.to_string())),
        )
    }

    pub fn new(
        state_codes: impl IntoIterator<Item = (String, String)>,
        district_key_prefixes: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        let normalize =
            |(key, name): (String, String)| (key.trim().to_string(), name.trim().to_string());
        Self {
            state_codes: state_codes.into_iter().map(normalize).collect(),
            district_key_prefixes: district_key_prefixes
                .into_iter()
                .map(normalize)
                .collect(),
        }
    }

    /// Loads replacement tables from a JSON object with `state_codes` and
    /// `district_key_prefixes` maps.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| PipelineError::CodeTables {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let file: CodeTablesFile =
            serde_json::from_str(&text).map_err(|e| PipelineError::CodeTables {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let bad_prefix = file
            .district_key_prefixes
            .keys()
            .find(|k| k.trim().chars().count() != 2);
        if let Some(bad) = bad_prefix {
            return Err(PipelineError::CodeTables {
                path: path.to_path_buf(),
                reason: format!("district key prefix '{}' is not two characters long", bad),
            });
        }

        Ok(Self::new(file.state_codes, file.district_key_prefixes))
    }

    pub fn state_for_code(&self, code: &str) -> Option<&str> {
        self.state_codes.get(code.trim()).map(String::as_str)
    }

    pub fn state_for_district_prefix(&self, prefix: &str) -> Option<&str> {
        self.district_key_prefixes
            .get(prefix.trim())
            .map(String::as_str)
    }
}

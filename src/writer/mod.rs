use serde_json::{json, Value};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{PipelineError, Result};
use crate::model::PlantRecord;
use crate::partition::{sanitize_component, PartitionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// FeatureCollection of Point features.
    #[default]
    GeoJson,
    /// The accepted records as a plain array.
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::GeoJson => "geojson",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "geojson" => Ok(OutputFormat::GeoJson),
            "json" => Ok(OutputFormat::Json),
            other => Err(PipelineError::UnknownOption {
                kind: "output format",
                value: other.to_string(),
            }),
        }
    }
}

/// GeoJSON Feature for one record. Records without a coordinate get a null
/// geometry.
pub fn record_feature(record: &PlantRecord) -> Value {
    let geometry = match record.coordinate {
        Some(c) => json!({ "type": "Point", "coordinates": [c.x, c.y] }),
        None => Value::Null,
    };

    json!({
        "type": "Feature",
        "geometry": geometry,
        "properties": record.properties_value(),
    })
}

pub fn feature_collection(records: &[PlantRecord]) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": records.iter().map(record_feature).collect::<Vec<_>>(),
    })
}

#[derive(Debug, Default)]
pub struct PartitionWriter {
    format: OutputFormat,
}

impl PartitionWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// `<root>/<state>[/<district>][/<year>]/<source stem>.<ext>`. The same
    /// inputs always map to the same file, so re-runs overwrite.
    pub fn output_path(&self, root: &Path, key: &PartitionKey, source_stem: &str) -> PathBuf {
        let file_name = format!("{}.{}", sanitize_component(source_stem), self.format.extension());
        root.join(key.relative_dir()).join(file_name)
    }

    pub fn write(&self, records: &[PlantRecord], output_path: &Path) -> Result<()> {
        let document = match self.format {
            OutputFormat::GeoJson => feature_collection(records),
            OutputFormat::Json => Value::Array(records.iter().map(PlantRecord::properties_value).collect()),
        };
        write_json(&document, output_path)
    }
}

/// Pretty-printed JSON with a trailing newline, replacing any existing file.
pub fn write_json<T: serde::Serialize>(value: &T, output_path: &Path) -> Result<()> {
    let output_error = |source| PipelineError::Output {
        path: output_path.to_path_buf(),
        source,
    };

    // 親ディレクトリを作成
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(output_error)?;
    }

    let file = File::create(output_path).map_err(output_error)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|source| PipelineError::Serialize {
        path: output_path.to_path_buf(),
        source,
    })?;
    writer.write_all(b"\n").map_err(output_error)?; // 末尾の改行
    writer.flush().map_err(output_error)?;

    Ok(())
}

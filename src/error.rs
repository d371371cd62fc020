use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Boundary dataset not found: {path:?}")]
    BoundaryMissing { path: PathBuf },

    #[error("Failed to read boundary dataset {path:?}: {source}")]
    BoundaryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Boundary dataset {path:?} is not valid GeoJSON: {reason}")]
    BoundaryFormat { path: PathBuf, reason: String },

    #[error("Feature {index} in {path:?} lacks required property '{property}'")]
    MissingBoundaryProperty {
        path: PathBuf,
        index: usize,
        property: String,
    },

    #[error("Feature {index} in {path:?} has an unusable geometry: {reason}")]
    InvalidGeometry {
        path: PathBuf,
        index: usize,
        reason: String,
    },

    #[error("Failed to load code tables from {path:?}: {reason}")]
    CodeTables { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown {kind} '{value}'")]
    UnknownOption { kind: &'static str, value: String },

    #[error("Failed to read input {path:?}: {source}")]
    InputRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed input {path:?}: {reason}")]
    MalformedInput { path: PathBuf, reason: String },

    #[error("Failed to read ZIP archive {path:?}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("Inputs {first:?} and {second:?} would both write output files named '{name}'")]
    DuplicateOutputName {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Failed to write output {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize output {path:?}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    /// Problems confined to a single input file. The run skips the file and
    /// continues; every other variant aborts the run.
    pub fn is_file_level(&self) -> bool {
        matches!(
            self,
            PipelineError::InputRead { .. }
                | PipelineError::MalformedInput { .. }
                | PipelineError::Archive { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_level_classification() {
        let skip = PipelineError::MalformedInput {
            path: PathBuf::from("a.json"),
            reason: "expected a JSON array".to_string(),
        };
        assert!(skip.is_file_level());

        let fatal = PipelineError::BoundaryMissing {
            path: PathBuf::from("states.geojson"),
        };
        assert!(!fatal.is_file_level());

        let output = PipelineError::Output {
            path: PathBuf::from("out/Berlin/a.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(!output.is_file_level());
    }
}

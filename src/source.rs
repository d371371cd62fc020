//! Input discovery and parsing of export files.

use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::model::Properties;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Json,
    Zip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    pub file_type: FileType,
    /// Output leaf name, see [`leaf_name`].
    pub name: String,
}

/// One export file's bytes, read from disk or from an archive entry.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Shown in logs and reports, e.g. `exports.zip!EinheitenSolar_1.json`.
    pub origin: PathBuf,
    /// Leaf name of every output file derived from this document.
    pub stem: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn read(input: &InputFile) -> Result<Self> {
        let bytes = fs::read(&input.path).map_err(|source| PipelineError::InputRead {
            path: input.path.clone(),
            source,
        })?;
        Ok(Self {
            origin: input.path.clone(),
            stem: input.name.clone(),
            bytes,
        })
    }
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("records")
        .to_string()
}

/// Separator between the path components of a leaf name.
pub const LEAF_SEPARATOR: &str = "__";

/// Output leaf name of a source: its path below the input root without the
/// extension, components joined by [`LEAF_SEPARATOR`].
///
/// `units.json` stays `units`, `2023/units.json` becomes `2023__units`.
pub fn leaf_name(relative: &Path) -> String {
    let mut parts: Vec<String> = relative
        .parent()
        .into_iter()
        .flat_map(Path::components)
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    parts.push(file_stem(relative));
    parts.join(LEAF_SEPARATOR)
}

#[derive(Debug, Clone, Default)]
pub struct ParsedRecords {
    pub records: Vec<Properties>,
    /// Array elements that were not JSON objects.
    pub malformed: usize,
}

/// Parses a JSON array of record objects. Anything other than a top-level
/// array is a malformed file.
pub fn parse_records(document: &SourceDocument) -> Result<ParsedRecords> {
    let malformed_input = |reason: String| PipelineError::MalformedInput {
        path: document.origin.clone(),
        reason,
    };

    let root: Value =
        serde_json::from_slice(&document.bytes).map_err(|e| malformed_input(e.to_string()))?;
    let Value::Array(items) = root else {
        return Err(malformed_input("expected a JSON array of records".to_string()));
    };

    let mut parsed = ParsedRecords::default();
    for item in items {
        match item {
            Value::Object(properties) => parsed.records.push(properties),
            _ => parsed.malformed += 1,
        }
    }
    Ok(parsed)
}

/// Recursively collects `.json` and `.zip` files below `dir`, sorted by path.
///
/// `exclude` (the output directory) is never descended into, so earlier
/// results are not read back as inputs. It must not be `dir` itself.
pub fn collect_input_files(dir: &Path, exclude: Option<&Path>) -> Result<Vec<InputFile>> {
    let excluded = exclude.and_then(|path| fs::canonicalize(path).ok());
    if let Some(excluded) = &excluded {
        if fs::canonicalize(dir).is_ok_and(|root| &root == excluded) {
            return Err(PipelineError::InvalidConfig(format!(
                "output directory {:?} is the input directory",
                dir
            )));
        }
    }

    let mut files = Vec::new();
    collect_into(dir, dir, excluded.as_deref(), &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

fn collect_into(
    root: &Path,
    dir: &Path,
    excluded: Option<&Path>,
    files: &mut Vec<InputFile>,
) -> Result<()> {
    let read_error = |source| PipelineError::InputRead {
        path: dir.to_path_buf(),
        source,
    };

    for entry in fs::read_dir(dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();

        if path.is_dir() {
            // 出力ディレクトリは入力として扱わない
            let is_excluded = excluded
                .is_some_and(|excluded| fs::canonicalize(&path).is_ok_and(|p| p == excluded));
            if is_excluded {
                debug!("Skipping output directory {:?}", path);
                continue;
            }
            collect_into(root, &path, excluded, files)?;
            continue;
        }

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .map(str::to_ascii_lowercase);
        let file_type = match extension.as_deref() {
            Some("json") => FileType::Json,
            Some("zip") => FileType::Zip,
            _ => continue,
        };
        let name = leaf_name(path.strip_prefix(root).unwrap_or(&path));
        files.push(InputFile {
            path,
            file_type,
            name,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn document(text: &str) -> SourceDocument {
        SourceDocument {
            origin: PathBuf::from("units.json"),
            stem: "units".to_string(),
            bytes: text.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_parse_records() {
        let parsed = parse_records(&document(r#"[{"a": 1}, 7, {"b": 2}]"#)).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.malformed, 1);
    }

    #[test]
    fn test_parse_records_rejects_non_array() {
        let err = parse_records(&document(r#"{"records": []}"#)).unwrap_err();
        assert!(err.is_file_level());

        let err = parse_records(&document("[{")).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedInput { .. }));
    }

    #[test]
    fn test_collect_input_files() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("2023");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join("b.json"), "[]").unwrap();
        fs::write(temp_dir.path().join("a.ZIP"), "").unwrap();
        fs::write(temp_dir.path().join("notes.txt"), "").unwrap();
        fs::write(nested.join("c.json"), "[]").unwrap();

        let files = collect_input_files(temp_dir.path(), None).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.strip_prefix(temp_dir.path()).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            names,
            vec![
                PathBuf::from("2023/c.json"),
                PathBuf::from("a.ZIP"),
                PathBuf::from("b.json"),
            ]
        );
        assert_eq!(files[1].file_type, FileType::Zip);
        assert_eq!(files[0].name, "2023__c");
        assert_eq!(files[2].name, "b");
    }

    #[test]
    fn test_leaf_name() {
        assert_eq!(leaf_name(Path::new("units.json")), "units");
        assert_eq!(leaf_name(Path::new("2023/units.json")), "2023__units");
        assert_eq!(leaf_name(Path::new("2024/solar/units.json")), "2024__solar__units");
        assert_ne!(
            leaf_name(Path::new("2023/units.json")),
            leaf_name(Path::new("2024/units.json"))
        );
    }

    #[test]
    fn test_collect_skips_output_directory() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("out").join("Berlin");
        fs::create_dir_all(&output).unwrap();
        fs::write(temp_dir.path().join("units.json"), "[]").unwrap();
        fs::write(output.join("units.json"), "[]").unwrap();

        let files = collect_input_files(temp_dir.path(), Some(temp_dir.path().join("out").as_path())).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, temp_dir.path().join("units.json"));

        let err = collect_input_files(temp_dir.path(), Some(temp_dir.path())).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}

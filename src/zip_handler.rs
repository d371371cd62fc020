use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::ZipArchive;

use crate::error::{PipelineError, Result};
use crate::source::{leaf_name, SourceDocument, LEAF_SEPARATOR};

/// Reads the JSON export files packed in a ZIP archive.
pub struct ZipHandler {
    path: PathBuf,
    /// Leaf name of the archive itself; entry leaf names start with it.
    name: String,
}

impl ZipHandler {
    pub fn new(path: &Path, name: &str) -> Self {
        Self {
            path: path.to_path_buf(),
            name: name.to_string(),
        }
    }

    fn open(&self) -> Result<ZipArchive<BufReader<File>>> {
        let file = File::open(&self.path).map_err(|source| PipelineError::InputRead {
            path: self.path.clone(),
            source,
        })?;
        ZipArchive::new(BufReader::new(file)).map_err(|source| PipelineError::Archive {
            path: self.path.clone(),
            source,
        })
    }

    fn origin(&self, entry_name: &Path) -> PathBuf {
        PathBuf::from(format!("{}!{}", self.path.display(), entry_name.display()))
    }

    fn stem(&self, entry_name: &Path) -> String {
        format!("{}{}{}", self.name, LEAF_SEPARATOR, leaf_name(entry_name))
    }

    /// Origin and leaf name of every `.json` entry, read from the central
    /// directory only.
    pub fn entries(&self) -> Result<Vec<(PathBuf, String)>> {
        let mut archive = self.open()?;

        let mut entries = Vec::new();
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i).map_err(|source| PipelineError::Archive {
                path: self.path.clone(),
                source,
            })?;
            if let Some(entry_name) = json_entry_name(entry.name(), entry.is_dir()) {
                entries.push((self.origin(&entry_name), self.stem(&entry_name)));
            }
        }
        Ok(entries)
    }

    /// Every `.json` entry becomes its own document, in archive order.
    pub fn read_documents(&self) -> Result<Vec<SourceDocument>> {
        let archive_error = |source| PipelineError::Archive {
            path: self.path.clone(),
            source,
        };
        let mut archive = self.open()?;

        let mut documents = Vec::new();
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i).map_err(archive_error)?;
            let Some(entry_name) = json_entry_name(entry.name(), entry.is_dir()) else {
                debug!("Skipping entry {:?} in {:?}", entry.name(), self.path);
                continue;
            };

            // 宣言サイズは信用せず、読み込みに合わせて確保する
            let mut bytes = Vec::new();
            entry
                .read_to_end(&mut bytes)
                .map_err(|source| PipelineError::InputRead {
                    path: self.path.join(&entry_name),
                    source,
                })?;

            documents.push(SourceDocument {
                origin: self.origin(&entry_name),
                stem: self.stem(&entry_name),
                bytes,
            });
        }

        Ok(documents)
    }
}

fn json_entry_name(name: &str, is_dir: bool) -> Option<PathBuf> {
    if is_dir {
        return None;
    }
    let entry_name = PathBuf::from(name);
    let is_json = entry_name
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    is_json.then_some(entry_name)
}

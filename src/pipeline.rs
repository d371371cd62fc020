//! Run orchestration.
//!
//! Reference data is loaded once and shared read-only. Input files are
//! processed independently (in parallel through rayon) and each writes its own
//! partition files, so nothing is merged across files.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::checker::{Check, ConsistencyChecker, Verdict};
use crate::codes::CodeTables;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::normalize::RecordNormalizer;
use crate::partition::{sanitize_component, Buckets, Partitioner};
use crate::polygon_index::{BoundaryLevel, PolygonIndex};
use crate::source::{collect_input_files, parse_records, FileType, InputFile, SourceDocument};
use crate::writer::{write_json, PartitionWriter};
use crate::zip_handler::ZipHandler;

#[derive(Debug, Clone)]
pub struct ReferenceData {
    pub states: Option<PolygonIndex>,
    pub districts: Option<PolygonIndex>,
    pub codes: CodeTables,
}

impl ReferenceData {
    /// Loads only the boundary sets the enabled checks use.
    pub fn load(config: &PipelineConfig) -> Result<Self> {
        let load = |check: Check, path: Option<&PathBuf>, level: BoundaryLevel| -> Result<Option<PolygonIndex>> {
            match path {
                Some(path) if config.checks.contains(check) => PolygonIndex::from_path(
                    path,
                    level,
                    &config.boundary_properties,
                    config.tie_break,
                )
                .map(Some),
                _ => Ok(None),
            }
        };

        let states = load(Check::StatePolygon, config.states_path.as_ref(), BoundaryLevel::State)?;
        let districts = load(
            Check::DistrictPolygon,
            config.districts_path.as_ref(),
            BoundaryLevel::District,
        )?;
        let codes = match &config.code_tables_path {
            Some(path) => CodeTables::from_json_file(path)?,
            None => CodeTables::builtin(),
        };

        Ok(Self {
            states,
            districts,
            codes,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileReport {
    pub source: PathBuf,
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    /// Array elements that were not objects; also counted in `rejected`.
    pub malformed: usize,
    /// Accepted records left out of year partitions for lack of a year.
    pub without_year: usize,
    /// Accepted records whose polygon lookup needed a tie-break.
    pub ambiguous: usize,
    /// Sum of the installed power of accepted records.
    pub accepted_power: f64,
    pub rejections: BTreeMap<String, usize>,
    pub outputs: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Processed(FileReport),
    Skipped(SkippedFile),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub files: Vec<FileReport>,
    pub skipped: Vec<SkippedFile>,
}

impl RunSummary {
    pub fn total_records(&self) -> usize {
        self.files.iter().map(|f| f.total).sum()
    }

    pub fn accepted(&self) -> usize {
        self.files.iter().map(|f| f.accepted).sum()
    }

    pub fn rejected(&self) -> usize {
        self.files.iter().map(|f| f.rejected).sum()
    }

    pub fn outputs(&self) -> usize {
        self.files.iter().map(|f| f.outputs.len()).sum()
    }

    pub fn write_report(&self, path: &Path) -> Result<()> {
        write_json(self, path)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    reference: ReferenceData,
    normalizer: RecordNormalizer,
    partitioner: Partitioner,
    writer: PartitionWriter,
}

impl Pipeline {
    /// Validates the configuration and loads reference data. Failures here
    /// abort the run.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let reference = ReferenceData::load(&config)?;
        Self::with_reference(config, reference)
    }

    pub fn with_reference(config: PipelineConfig, reference: ReferenceData) -> Result<Self> {
        ConsistencyChecker::new(
            config.checks,
            reference.states.as_ref(),
            reference.districts.as_ref(),
            &reference.codes,
        )?;

        Ok(Self {
            normalizer: RecordNormalizer::new(config.fields.clone()),
            partitioner: Partitioner::new(config.partition),
            writer: PartitionWriter::new(config.format),
            config,
            reference,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn checker(&self) -> Result<ConsistencyChecker<'_>> {
        ConsistencyChecker::new(
            self.config.checks,
            self.reference.states.as_ref(),
            self.reference.districts.as_ref(),
            &self.reference.codes,
        )
    }

    /// Processes every input below the configured input directory.
    ///
    /// Malformed inputs are skipped and listed in the summary; reference data
    /// and output errors abort the run.
    pub fn run(&self) -> Result<RunSummary> {
        let inputs =
            collect_input_files(&self.config.input_dir, Some(self.config.output_dir.as_path()))?;
        info!(
            "Found {} input files (JSON/ZIP) in {:?}",
            inputs.len(),
            self.config.input_dir
        );

        // 書き込み前に出力ファイル名の重複を検出
        check_leaf_names(&inputs)?;

        // 並列処理でファイルを分類・出力
        let results: Vec<Result<Vec<FileOutcome>>> = inputs
            .par_iter()
            .map(|input| self.process_input(input))
            .collect();

        // エラーをチェック
        let mut summary = RunSummary::default();
        for result in results {
            for outcome in result? {
                match outcome {
                    FileOutcome::Processed(report) => summary.files.push(report),
                    FileOutcome::Skipped(skipped) => summary.skipped.push(skipped),
                }
            }
        }

        info!(
            "Accepted {} of {} records from {} files ({} skipped), wrote {} partition files",
            summary.accepted(),
            summary.total_records(),
            summary.files.len(),
            summary.skipped.len(),
            summary.outputs()
        );

        Ok(summary)
    }

    pub fn process_input(&self, input: &InputFile) -> Result<Vec<FileOutcome>> {
        let documents = match input.file_type {
            FileType::Json => SourceDocument::read(input).map(|d| vec![d]),
            FileType::Zip => {
                info!("Processing ZIP file: {:?}", input.path);
                ZipHandler::new(&input.path, &input.name).read_documents()
            }
        };

        let documents = match documents {
            Ok(documents) => documents,
            Err(e) if e.is_file_level() => return Ok(vec![skip(&input.path, e)]),
            Err(e) => return Err(e),
        };

        let mut outcomes = Vec::with_capacity(documents.len());
        for document in &documents {
            match self.process_document(document) {
                Ok(report) => outcomes.push(FileOutcome::Processed(report)),
                Err(e) if e.is_file_level() => outcomes.push(skip(&document.origin, e)),
                Err(e) => return Err(e),
            }
        }
        Ok(outcomes)
    }

    pub fn partition_document(&self, document: &SourceDocument) -> Result<(Buckets, FileReport)> {
        let parsed = parse_records(document)?;
        let checker = self.checker()?;

        let mut report = FileReport {
            source: document.origin.clone(),
            total: parsed.records.len() + parsed.malformed,
            malformed: parsed.malformed,
            rejected: parsed.malformed,
            ..FileReport::default()
        };
        if parsed.malformed > 0 {
            *report.rejections.entry("malformed".to_string()).or_default() += parsed.malformed;
        }

        let mut buckets = Buckets::new();
        for (i, properties) in parsed.records.into_iter().enumerate() {
            let record = self.normalizer.normalize(properties);

            let placement = match checker.evaluate(&record) {
                Verdict::Accept(placement) => placement,
                Verdict::Reject(reason) => {
                    debug!("{:?} record {}: rejected ({})", document.origin, i, reason);
                    report.rejected += 1;
                    *report.rejections.entry(reason.to_string()).or_default() += 1;
                    continue;
                }
            };

            report.accepted += 1;
            report.accepted_power += record.installed_power.unwrap_or(0.0);
            if placement.ambiguous {
                report.ambiguous += 1;
            }

            match self.partitioner.key_for(&placement, &record) {
                Some(key) => buckets.push(key, record),
                None => report.without_year += 1,
            }
        }

        Ok((buckets, report))
    }

    /// Classifies one document and writes one file per partition it feeds.
    pub fn process_document(&self, document: &SourceDocument) -> Result<FileReport> {
        let (buckets, mut report) = self.partition_document(document)?;

        // パーティションごとにファイルを書き出し
        for (key, records) in buckets.iter() {
            let output_path = self
                .writer
                .output_path(&self.config.output_dir, key, &document.stem);
            self.writer.write(records, &output_path)?;
            debug!("Written {} records to {:?}", records.len(), output_path);
            report.outputs.push(output_path);
        }

        info!(
            "{:?}: accepted {} of {} records ({} rejected), {} partition files",
            report.source,
            report.accepted,
            report.total,
            report.rejected,
            report.outputs.len()
        );
        if report.ambiguous > 0 {
            warn!(
                "{:?}: {} accepted records lie in overlapping polygons ({} rule applied)",
                report.source, report.ambiguous, self.config.tie_break
            );
        }
        if report.without_year > 0 {
            debug!(
                "{:?}: {} accepted records have no usable year",
                report.source, report.without_year
            );
        }

        Ok(report)
    }
}

fn skip(path: &Path, error: PipelineError) -> FileOutcome {
    warn!("Skipping {:?}: {}", path, error);
    FileOutcome::Skipped(SkippedFile {
        path: path.to_path_buf(),
        reason: error.to_string(),
    })
}

/// Every document must own its leaf name, otherwise one document's partition
/// files would replace another's. Unreadable archives are left to the run,
/// which skips them.
fn check_leaf_names(inputs: &[InputFile]) -> Result<()> {
    let mut owners: HashMap<String, PathBuf> = HashMap::new();

    for input in inputs {
        let documents = match input.file_type {
            FileType::Json => vec![(input.path.clone(), input.name.clone())],
            FileType::Zip => match ZipHandler::new(&input.path, &input.name).entries() {
                Ok(entries) => entries,
                Err(e) if e.is_file_level() => continue,
                Err(e) => return Err(e),
            },
        };

        for (origin, name) in documents {
            let name = sanitize_component(&name);
            if let Some(first) = owners.get(&name) {
                return Err(PipelineError::DuplicateOutputName {
                    name,
                    first: first.clone(),
                    second: origin,
                });
            }
            owners.insert(name, origin);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::CheckSet;
    use crate::model::RegionLabel;
    use crate::partition::PartitionShape;
    use crate::polygon_index::{PreparedPolygon, TieBreak};
    use geo::{LineString, MultiPolygon, Polygon};
    use serde_json::json;

    fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        let ring = LineString::from(vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1), (x0, y0)]);
        MultiPolygon::new(vec![Polygon::new(ring, vec![])])
    }

    fn reference() -> ReferenceData {
        let states = PolygonIndex::new(
            BoundaryLevel::State,
            TieBreak::FirstMatch,
            vec![PreparedPolygon::new(RegionLabel::state("Berlin"), square(13.0, 52.3, 13.8, 52.7)).unwrap()],
        );
        let districts = PolygonIndex::new(
            BoundaryLevel::District,
            TieBreak::FirstMatch,
            vec![
                PreparedPolygon::new(RegionLabel::district("Berlin", "Mitte"), square(13.0, 52.3, 13.4, 52.7))
                    .unwrap(),
                PreparedPolygon::new(
                    RegionLabel::district("Berlin", "Lichtenberg"),
                    square(13.4, 52.3, 13.8, 52.7),
                )
                .unwrap(),
            ],
        );
        ReferenceData {
            states: Some(states),
            districts: Some(districts),
            codes: CodeTables::builtin(),
        }
    }

    fn pipeline(partition: PartitionShape) -> Pipeline {
        let config = PipelineConfig {
            states_path: Some(PathBuf::from("states.geojson")),
            districts_path: Some(PathBuf::from("districts.geojson")),
            checks: CheckSet::all(),
            partition,
            ..PipelineConfig::default()
        };
        Pipeline::with_reference(config, reference()).unwrap()
    }

    fn document(records: serde_json::Value) -> SourceDocument {
        SourceDocument {
            origin: PathBuf::from("units.json"),
            stem: "units".to_string(),
            bytes: serde_json::to_vec(&records).unwrap(),
        }
    }

    fn unit(id: u32, lon: &str, code: &str, date: &str) -> serde_json::Value {
        json!({
            "id": id,
            "Laengengrad": lon,
            "Breitengrad": "52,5",
            "Bundesland": code,
            "Gemeindeschluessel": "11000000",
            "Bruttoleistung": "10,5",
            "Inbetriebnahmedatum": date
        })
    }

    #[test]
    fn test_partition_completeness() {
        let pipeline = pipeline(PartitionShape::StateDistrictYear);
        let doc = document(json!([
            unit(1, "13,2", "1401", "2010-01-01"),
            unit(2, "13,6", "1401", "2011-01-01"),
            unit(3, "13,2", "1403", "2010-01-01"),
            unit(4, "13,3", "1401", ""),
            unit(5, "13,3", "1401", "2010-06-30"),
            "not a record"
        ]));

        let (buckets, report) = pipeline.partition_document(&doc).unwrap();

        assert_eq!(report.total, 6);
        assert_eq!(report.accepted, 4);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.without_year, 1);
        assert_eq!(report.accepted + report.rejected, report.total);
        assert_eq!(buckets.record_count() + report.without_year, report.accepted);
        assert_eq!(buckets.len(), 2);
        assert!((report.accepted_power - 42.0).abs() < 1e-9);
        assert_eq!(report.rejections["disagreement:state-polygon/state-code"], 1);
        assert_eq!(report.rejections["malformed"], 1);

        let mut ids: Vec<_> = buckets
            .iter()
            .flat_map(|(_, records)| records.iter().map(|r| r.properties["id"].as_u64().unwrap()))
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 5]);
    }

    #[test]
    fn test_non_year_shape_keeps_records_without_year() {
        let pipeline = pipeline(PartitionShape::StateDistrict);
        let doc = document(json!([unit(4, "13,3", "1401", "")]));

        let (buckets, report) = pipeline.partition_document(&doc).unwrap();
        assert_eq!(report.without_year, 0);
        assert_eq!(buckets.record_count(), 1);
    }

    #[test]
    fn test_malformed_document_is_file_level() {
        let pipeline = pipeline(PartitionShape::State);
        let doc = SourceDocument {
            origin: PathBuf::from("broken.json"),
            stem: "broken".to_string(),
            bytes: b"{not json".to_vec(),
        };

        let err = pipeline.partition_document(&doc).unwrap_err();
        assert!(err.is_file_level());
    }
}

pub mod checker;
pub mod codes;
pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod partition;
pub mod pipeline;
pub mod polygon_index;
pub mod source;
pub mod writer;
pub mod zip_handler;

pub use checker::{Check, CheckSet, ConsistencyChecker, Placement, RejectReason, Verdict};
pub use codes::CodeTables;
pub use config::{BoundaryProperties, FieldNames, PipelineConfig};
pub use error::{PipelineError, Result};
pub use model::{PlantRecord, RegionLabel};
pub use partition::{PartitionKey, PartitionShape, Partitioner};
pub use pipeline::{FileReport, Pipeline, ReferenceData, RunSummary};
pub use polygon_index::{PolygonIndex, TieBreak};
pub use writer::{OutputFormat, PartitionWriter};
pub use zip_handler::ZipHandler;

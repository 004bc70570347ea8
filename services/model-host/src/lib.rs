//! Host runtime for uploaded model packages: load, register, train, predict.

pub mod analysis;
pub mod builtin;
pub mod datasource;
pub mod error;
pub mod host;
pub mod inference;
pub mod instance;
pub mod model;
pub mod package;
pub mod process;
pub mod registry;
pub mod rows;
pub mod training;

pub use analysis::{ColumnStatsAnalyzer, DataAnalysis, DataAnalyzer};
pub use datasource::{CsvDirSource, DataSource, DataSourceRef, MemorySource};
pub use error::{ErrorClass, LoadError, ModelFault, RuntimeError, RuntimeResult, SourceError};
pub use host::{HostBuilder, ModelHost};
pub use inference::{PredictionRecord, TargetPrediction};
pub use instance::{ModelStatus, ModelSummary};
pub use model::{Capability, Model, PredictionFrame};
pub use package::{LoadedPackage, Manifest, PackageLoader};
pub use registry::ModelRegistry;
pub use rows::{Options, Row, RowSet, Value};
pub use training::TrainResult;

pub mod commands;
pub mod config;
pub mod descriptor;
pub mod domain;
pub mod error;
pub mod fs;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod ondemand;

pub use commands::run;
pub use config::{CliArgs, DatacubeConfig};
pub use descriptor::{AggregationDescriptor, DescriptorOptions, DescriptorState};
pub use error::{DescriptorError, DescriptorResult, ParseError};
pub use fs::{Filesystem, LocalFilesystem, MemoryFilesystem};
pub use logging::{LoggingConfig, init_logging};
pub use model::{Aggregation, AggregationType, Member, NCML_NAMESPACE, NcmlDocument};

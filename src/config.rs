use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::descriptor::DescriptorOptions;
use crate::domain::{ProcessingLevel, TileId};
use crate::model::AggregationType;
use crate::ondemand::BuildSettings;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "datacube",
    about = "Manage NcML aggregation descriptors for netCDF datacubes",
    version
)]
pub struct CliArgs {
    #[arg(
        long,
        short = 'c',
        env = "DATACUBE_CONFIG",
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "DATACUBE_DIMENSION",
        value_name = "NAME",
        help = "Join dimension used when a descriptor is created",
        global = true
    )]
    pub dimension: Option<String>,

    #[arg(
        long,
        env = "DATACUBE_AGGREGATION_TYPE",
        value_name = "TYPE",
        help = "Aggregation type used when a descriptor is created (e.g. joinExisting)",
        global = true
    )]
    pub aggregation_type: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the products registered in a descriptor
    List {
        #[arg(value_name = "NCML")]
        ncml: PathBuf,
    },

    /// Register products in a descriptor, creating it if needed
    Add {
        #[arg(value_name = "NCML")]
        ncml: PathBuf,
        #[arg(value_name = "PRODUCT", required = true)]
        products: Vec<String>,
        /// Register products even if the file does not exist yet
        #[arg(long)]
        allow_missing: bool,
    },

    /// Deregister products from a descriptor
    Remove {
        #[arg(value_name = "NCML")]
        ncml: PathBuf,
        #[arg(value_name = "PRODUCT", required = true)]
        products: Vec<String>,
    },

    /// Remove every product from a descriptor
    Clear {
        #[arg(value_name = "NCML")]
        ncml: PathBuf,
    },

    /// Check that every registered product exists; exits 1 otherwise
    Validate {
        #[arg(value_name = "NCML")]
        ncml: PathBuf,
    },

    /// Sort a directory tree of products into per-tile, per-year cubes
    Ingest {
        #[arg(value_name = "NCML_BASE")]
        ncml_base: PathBuf,
        #[arg(value_name = "PRODUCT_ROOT")]
        product_root: PathBuf,
    },

    /// Build one cube for a tile, level and date range
    Build(BuildArgs),
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[arg(long, short = 's', value_name = "YYYY-MM-DD", help = "First day to search")]
    pub start_date: NaiveDate,

    #[arg(long, short = 'e', value_name = "YYYY-MM-DD", help = "Last day to search")]
    pub end_date: NaiveDate,

    #[arg(long, short = 't', value_name = "TILE", help = "Tile identifier such as T27XVH")]
    pub tile: TileId,

    #[arg(long, short = 'l', value_enum, value_name = "LEVEL")]
    pub level: ProcessingLevel,

    #[arg(long, value_name = "DIR", help = "Overrides paths.base_path")]
    pub base_path: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Overrides paths.ncml_path")]
    pub ncml: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DIR",
        help = "Write added/missing/not-found report logs into this directory"
    )]
    pub report_dir: Option<PathBuf>,
}

/// Settings resolved from CLI flags, environment and the config file.
#[derive(Debug, Clone)]
pub struct DatacubeConfig {
    pub descriptor: DescriptorOptions,
    pub base_path: Option<PathBuf>,
    pub ncml_path: Option<PathBuf>,
    pub platforms: IndexMap<String, String>,
}

impl DatacubeConfig {
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let file_config = if let Some(path) = args.config.as_ref() {
            load_config_file(path)?
        } else {
            PartialConfig::default()
        };

        let PartialConfig {
            paths,
            platforms,
            aggregation,
        } = file_config;

        let defaults = DescriptorOptions::default();
        let dimension_name = args
            .dimension
            .clone()
            .or(aggregation.dimension)
            .unwrap_or(defaults.dimension_name)
            .trim()
            .to_string();
        anyhow::ensure!(
            !dimension_name.is_empty(),
            "dimension name cannot be empty"
        );

        let aggregation_type = args
            .aggregation_type
            .as_deref()
            .map(AggregationType::from)
            .or(aggregation.aggregation_type)
            .unwrap_or(defaults.aggregation_type);
        anyhow::ensure!(
            !aggregation_type.as_str().trim().is_empty(),
            "aggregation type cannot be empty"
        );

        Ok(Self {
            descriptor: DescriptorOptions {
                dimension_name,
                aggregation_type,
            },
            base_path: paths.base_path,
            ncml_path: paths.ncml_path,
            platforms: platforms.unwrap_or_default(),
        })
    }

    /// Settings for `build`, with CLI paths taking precedence over the file.
    pub fn build_settings(&self, args: &BuildArgs) -> Result<BuildSettings> {
        let base_path = args
            .base_path
            .clone()
            .or_else(|| self.base_path.clone())
            .context("missing required configuration key: paths.base_path")?;
        let ncml_path = args
            .ncml
            .clone()
            .or_else(|| self.ncml_path.clone())
            .context("missing required configuration key: paths.ncml_path")?;

        Ok(BuildSettings {
            base_path,
            ncml_path,
            platforms: self.platforms.clone(),
            descriptor: self.descriptor.clone(),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct PartialConfig {
    #[serde(default)]
    paths: PartialPaths,
    #[serde(default)]
    platforms: Option<IndexMap<String, String>>,
    #[serde(default)]
    aggregation: PartialAggregation,
}

#[derive(Debug, Default, Deserialize)]
struct PartialPaths {
    base_path: Option<PathBuf>,
    ncml_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct PartialAggregation {
    dimension: Option<String>,
    #[serde(rename = "type")]
    aggregation_type: Option<AggregationType>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed: Option<PartialConfig> = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(parsed.unwrap_or_default())
}

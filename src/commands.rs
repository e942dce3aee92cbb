//! Command dispatch for the `datacube` binary.
//!
//! Command results go to stdout, one item per line; diagnostics go through
//! `tracing`.

use std::io::{self, Write as _};
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};

use crate::config::{BuildArgs, CliArgs, Command, DatacubeConfig};
use crate::descriptor::{AggregationDescriptor, DescriptorOptions};
use crate::ingest::ingest_directory;
use crate::ondemand::{BuildRequest, build_datacube};

pub fn run(args: CliArgs) -> Result<ExitCode> {
    let config = DatacubeConfig::from_args(&args)?;
    let options = config.descriptor.clone();

    match args.command {
        Command::List { ncml } => list(&ncml, options),
        Command::Add {
            ncml,
            products,
            allow_missing,
        } => add(&ncml, &products, allow_missing, options),
        Command::Remove { ncml, products } => remove(&ncml, &products, options),
        Command::Clear { ncml } => clear(&ncml, options),
        Command::Validate { ncml } => validate(&ncml, options),
        Command::Ingest {
            ncml_base,
            product_root,
        } => ingest(&ncml_base, &product_root, &options),
        Command::Build(build_args) => build(&config, &build_args),
    }
}

fn open_existing(ncml: &Path, options: DescriptorOptions) -> Result<AggregationDescriptor> {
    anyhow::ensure!(ncml.is_file(), "no aggregation descriptor at {}", ncml.display());
    Ok(AggregationDescriptor::open_with(ncml, options)?)
}

fn print_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

fn list(ncml: &Path, options: DescriptorOptions) -> Result<ExitCode> {
    let descriptor = open_existing(ncml, options)?;
    print_lines(descriptor.products())?;
    Ok(ExitCode::SUCCESS)
}

fn add(
    ncml: &Path,
    products: &[String],
    allow_missing: bool,
    options: DescriptorOptions,
) -> Result<ExitCode> {
    if !allow_missing {
        let missing: Vec<&str> = products
            .iter()
            .map(String::as_str)
            .filter(|product| !Path::new(product).exists())
            .collect();
        anyhow::ensure!(
            missing.is_empty(),
            "product file(s) not found: {} (use --allow-missing to register anyway)",
            missing.join(", ")
        );
    }

    let mut descriptor = AggregationDescriptor::open_with(ncml, options)?;
    for product in products {
        if descriptor.add_product(product)? {
            tracing::info!(%product, "added product");
        } else {
            tracing::info!(%product, "product already present");
        }
    }
    if descriptor.has_unsaved_changes() {
        descriptor.save()?;
    }
    Ok(ExitCode::SUCCESS)
}

fn remove(ncml: &Path, products: &[String], options: DescriptorOptions) -> Result<ExitCode> {
    let mut descriptor = open_existing(ncml, options)?;
    for product in products {
        if descriptor.remove_product(product) {
            tracing::info!(%product, "removed product");
        } else {
            tracing::warn!(%product, "product not found");
        }
    }
    if descriptor.has_unsaved_changes() {
        descriptor.save()?;
    }
    Ok(ExitCode::SUCCESS)
}

fn clear(ncml: &Path, options: DescriptorOptions) -> Result<ExitCode> {
    let mut descriptor = open_existing(ncml, options)?;
    let removed = descriptor.len();
    descriptor.clear();
    if descriptor.has_unsaved_changes() {
        descriptor.save()?;
    }
    tracing::info!(removed, cube = %ncml.display(), "cleared descriptor");
    Ok(ExitCode::SUCCESS)
}

fn validate(ncml: &Path, options: DescriptorOptions) -> Result<ExitCode> {
    let descriptor = open_existing(ncml, options)?;
    let missing = descriptor.missing_products();
    if missing.is_empty() {
        tracing::info!(products = descriptor.len(), "all products present");
        return Ok(ExitCode::SUCCESS);
    }
    tracing::warn!(
        missing = missing.len(),
        products = descriptor.len(),
        "descriptor references missing products"
    );
    print_lines(missing.iter().map(String::as_str))?;
    Ok(ExitCode::FAILURE)
}

fn ingest(ncml_base: &Path, product_root: &Path, options: &DescriptorOptions) -> Result<ExitCode> {
    anyhow::ensure!(
        product_root.is_dir(),
        "product root {} is not a directory",
        product_root.display()
    );
    let report = ingest_directory(ncml_base, product_root, options)?;
    let lines: Vec<String> = report
        .added
        .iter()
        .map(|added| format!("{}\t{}", added.cube.display(), added.product))
        .collect();
    print_lines(lines.iter().map(String::as_str))?;
    Ok(ExitCode::SUCCESS)
}

fn build(config: &DatacubeConfig, args: &BuildArgs) -> Result<ExitCode> {
    let settings = config.build_settings(args)?;
    let request = BuildRequest {
        start_date: args.start_date,
        end_date: args.end_date,
        tile: args.tile.clone(),
        level: args.level,
    };

    let report = build_datacube(&request, &settings)?;
    if let Some(dir) = &args.report_dir {
        report
            .write_logs(dir)
            .with_context(|| format!("failed to write build reports to {}", dir.display()))?;
    }

    let added: Vec<String> = report
        .added
        .iter()
        .map(|path| path.display().to_string())
        .collect();
    print_lines(added.iter().map(String::as_str))?;
    Ok(ExitCode::SUCCESS)
}

//! Sorts a tree of netCDF products into per-tile, per-year datacubes.
//!
//! Every `*.nc` file below the product root is routed to
//! `<ncml_base>/<tile>/<year>/dc_<year>_<tile>.ncml` based on the tile and
//! acquisition date in its file name.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use walkdir::WalkDir;

use crate::descriptor::{AggregationDescriptor, DescriptorOptions};
use crate::domain::ProductName;

const PRODUCT_EXTENSION: &str = "nc";

/// Product registered in a cube during an ingest run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedProduct {
    pub cube: PathBuf,
    pub product: String,
}

/// File that could not be routed to a cube.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    /// Descriptors touched, in the order they were first needed
    pub cubes: Vec<PathBuf>,
    pub added: Vec<AddedProduct>,
    /// Products that were already registered in their cube
    pub already_present: usize,
    pub skipped: Vec<SkippedFile>,
}

/// Descriptor path for a product: `<base>/<tile>/<year>/dc_<year>_<tile>.ncml`.
pub fn cube_path(ncml_base: &Path, product: &ProductName) -> PathBuf {
    let year = product.year();
    let tile = product.tile().as_str();
    ncml_base
        .join(tile)
        .join(&year)
        .join(format!("dc_{year}_{tile}.ncml"))
}

/// Walks `product_root` and registers every product in its cube.
///
/// Files are visited in file-name order so members of a cube end up in
/// acquisition order. Each descriptor is opened and saved once.
pub fn ingest_directory(
    ncml_base: &Path,
    product_root: &Path,
    options: &DescriptorOptions,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut plan: IndexMap<PathBuf, Vec<String>> = IndexMap::new();

    for entry in WalkDir::new(product_root).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("failed to walk {}", product_root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(PRODUCT_EXTENSION) {
            continue;
        }

        let (Some(file_name), Some(location)) =
            (path.file_name().and_then(|name| name.to_str()), path.to_str())
        else {
            report.skip(path, "path is not valid UTF-8");
            continue;
        };

        match ProductName::parse(file_name) {
            Ok(product) => plan
                .entry(cube_path(ncml_base, &product))
                .or_default()
                .push(location.to_string()),
            Err(err) => report.skip(path, err.to_string()),
        }
    }

    for (cube, products) in plan {
        if let Some(parent) = cube.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut descriptor = AggregationDescriptor::open_with(cube.clone(), options.clone())?;
        for product in products {
            if descriptor.add_product(&product)? {
                tracing::info!(product = %product, cube = %cube.display(), "added product");
                report.added.push(AddedProduct {
                    cube: cube.clone(),
                    product,
                });
            } else {
                report.already_present += 1;
            }
        }
        if descriptor.has_unsaved_changes() {
            descriptor.save()?;
        }
        report.cubes.push(cube);
    }

    tracing::info!(
        cubes = report.cubes.len(),
        added = report.added.len(),
        already_present = report.already_present,
        skipped = report.skipped.len(),
        "ingest finished"
    );
    Ok(report)
}

impl IngestReport {
    fn skip(&mut self, path: &Path, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(path = %path.display(), %reason, "skipping product");
        self.skipped.push(SkippedFile {
            path: path.to_path_buf(),
            reason,
        });
    }
}

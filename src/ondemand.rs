//! On-demand datacube for one tile, one processing level and a date range.
//!
//! Products are expected under `<base_path>/<platform>/<YYYY>/<MM>/<DD>/`.
//! Every platform directory is searched day by day and matching `.nc`
//! files are appended to a single descriptor.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use indexmap::IndexMap;

use crate::descriptor::{AggregationDescriptor, DescriptorOptions};
use crate::domain::{ProcessingLevel, TileId};

pub const ADDED_FILES_LOG: &str = "added_files_datacube.log";
pub const MISSING_DIRECTORIES_LOG: &str = "missing_directories.log";
pub const UNMATCHED_DIRECTORIES_LOG: &str = "tile_or_level_not_found.log";

/// Which products to collect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub tile: TileId,
    pub level: ProcessingLevel,
}

/// Where products live and where the cube goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub base_path: PathBuf,
    pub ncml_path: PathBuf,
    /// Platform name to directory below `base_path`, searched in order
    pub platforms: IndexMap<String, String>,
    pub descriptor: DescriptorOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub cube: PathBuf,
    pub added: Vec<PathBuf>,
    pub already_present: usize,
    /// Day directories that do not exist
    pub missing_directories: Vec<PathBuf>,
    /// Day directories that exist but hold no product for the tile/level
    pub unmatched_directories: Vec<PathBuf>,
}

impl BuildReport {
    /// Writes one path per line into the three report logs under `dir`.
    pub fn write_logs(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create report directory {}", dir.display()))?;
        write_lines(&dir.join(ADDED_FILES_LOG), &self.added)?;
        write_lines(&dir.join(MISSING_DIRECTORIES_LOG), &self.missing_directories)?;
        write_lines(&dir.join(UNMATCHED_DIRECTORIES_LOG), &self.unmatched_directories)?;
        Ok(())
    }
}

fn write_lines(path: &Path, entries: &[PathBuf]) -> Result<()> {
    let contents: String = entries
        .iter()
        .map(|entry| format!("{}\n", entry.display()))
        .collect();
    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

/// `<base>/<platform>/<YYYY>/<MM>/<DD>`
pub fn day_directory(base_path: &Path, platform_dir: &str, date: NaiveDate) -> PathBuf {
    base_path
        .join(platform_dir)
        .join(date.year().to_string())
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}", date.day()))
}

fn is_match(file_name: &str, request: &BuildRequest) -> bool {
    file_name.ends_with(".nc")
        && file_name.contains(request.tile.as_str())
        && file_name.contains(request.level.as_str())
}

/// Collects the requested products into `settings.ncml_path`.
///
/// An existing descriptor is extended rather than replaced.
pub fn build_datacube(request: &BuildRequest, settings: &BuildSettings) -> Result<BuildReport> {
    anyhow::ensure!(
        request.start_date <= request.end_date,
        "start date {} must be earlier than or equal to end date {}",
        request.start_date,
        request.end_date
    );
    if settings.platforms.is_empty() {
        tracing::warn!("no platforms configured, nothing to search");
    }

    tracing::info!(
        cube = %settings.ncml_path.display(),
        tile = %request.tile,
        level = %request.level,
        start = %request.start_date,
        end = %request.end_date,
        "building datacube"
    );

    let mut descriptor =
        AggregationDescriptor::open_with(settings.ncml_path.clone(), settings.descriptor.clone())?;
    let mut report = BuildReport {
        cube: settings.ncml_path.clone(),
        ..BuildReport::default()
    };

    for platform_dir in settings.platforms.values() {
        let days = request
            .start_date
            .iter_days()
            .take_while(|day| *day <= request.end_date);
        for day in days {
            let dir = day_directory(&settings.base_path, platform_dir, day);
            if !dir.is_dir() {
                report.missing_directories.push(dir);
                continue;
            }

            let mut matched = false;
            for file in matching_products(&dir, request)? {
                matched = true;
                let Some(location) = file.to_str() else {
                    tracing::warn!(path = %file.display(), "skipping product with non UTF-8 path");
                    continue;
                };
                if descriptor.add_product(location)? {
                    report.added.push(file);
                } else {
                    report.already_present += 1;
                }
            }
            if !matched {
                report.unmatched_directories.push(dir);
            }
        }
    }

    if !report.unmatched_directories.is_empty() {
        tracing::info!(
            directories = report.unmatched_directories.len(),
            "tile or level not found in some searched directories"
        );
    }

    if descriptor.has_unsaved_changes() {
        if let Some(parent) = settings.ncml_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        descriptor.save()?;
    }

    tracing::info!(
        cube = %report.cube.display(),
        added = report.added.len(),
        already_present = report.already_present,
        missing_directories = report.missing_directories.len(),
        "datacube build complete"
    );
    Ok(report)
}

/// Matching product files in `dir`, sorted by name.
fn matching_products(dir: &Path, request: &BuildRequest) -> Result<Vec<PathBuf>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        if !entry.file_type().map(|kind| kind.is_file()).unwrap_or(false) {
            continue;
        }
        let name = entry.file_name();
        if name.to_str().is_some_and(|name| is_match(name, request)) {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BuildRequest {
        BuildRequest {
            start_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            tile: TileId::new("T31UFT").unwrap(),
            level: ProcessingLevel::L2A,
        }
    }

    #[test]
    fn day_directory_is_zero_padded() {
        let dir = day_directory(
            Path::new("/data"),
            "sentinel2a",
            NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
        );
        assert_eq!(dir, PathBuf::from("/data/sentinel2a/2024/03/07"));
    }

    #[test]
    fn match_requires_extension_tile_and_level() {
        let request = request();
        assert!(is_match("S2A_MSIL2A_20240301T1_T31UFT.nc", &request));
        assert!(!is_match("S2A_MSIL1C_20240301T1_T31UFT.nc", &request));
        assert!(!is_match("S2A_MSIL2A_20240301T1_T32VNM.nc", &request));
        assert!(!is_match("S2A_MSIL2A_20240301T1_T31UFT.nc.tmp", &request));
    }

    #[test]
    fn rejects_inverted_range() {
        let mut request = request();
        std::mem::swap(&mut request.start_date, &mut request.end_date);
        let settings = BuildSettings {
            base_path: PathBuf::from("/nonexistent"),
            ncml_path: PathBuf::from("/nonexistent/dc.ncml"),
            platforms: IndexMap::new(),
            descriptor: DescriptorOptions::default(),
        };
        let err = build_datacube(&request, &settings).unwrap_err();
        assert!(err.to_string().contains("earlier than or equal"));
    }
}

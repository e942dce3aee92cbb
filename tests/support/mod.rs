#![allow(dead_code)]

use std::path::{Path, PathBuf};

use ncml_datacube::NCML_NAMESPACE;
use tempfile::{TempDir, tempdir};

pub struct TestWorkspace {
    _tempdir: TempDir,
    root: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let tempdir = tempdir().expect("tempdir");
        let root = tempdir.path().to_path_buf();
        Self {
            _tempdir: tempdir,
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Creates an empty product file (and its parents) below the workspace.
    pub fn product(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        touch_file(&path);
        path
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create dir");
        }
        std::fs::write(&path, contents).expect("write file");
        path
    }
}

pub fn touch_file(path: &Path) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create dir");
    }
    std::fs::write(path, b"test").expect("write file");
}

/// NcML text with the given aggregation settings and member locations.
pub fn ncml(dimension: &str, aggregation_type: &str, locations: &[&str]) -> String {
    let members: String = locations
        .iter()
        .map(|location| format!("    <netcdf location=\"{location}\"/>\n"))
        .collect();
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <netcdf xmlns=\"{NCML_NAMESPACE}\">\n  \
         <aggregation dimName=\"{dimension}\" type=\"{aggregation_type}\">\n\
         {members}  </aggregation>\n\
         </netcdf>\n"
    )
}

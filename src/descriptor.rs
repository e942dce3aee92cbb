//! Aggregation descriptor lifecycle: open, mutate in memory, save.

use std::path::{Path, PathBuf};

use crate::error::{DescriptorError, DescriptorResult};
use crate::fs::{Filesystem, LocalFilesystem};
use crate::model::{AggregationType, DEFAULT_DIMENSION, Member, NcmlDocument, check_location};

/// Coordinates contributed by a product added through the descriptor.
const PRODUCT_NCOORDS: u64 = 1;

/// Values used to build a fresh document, or to fill gaps in a stored one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorOptions {
    pub dimension_name: String,
    pub aggregation_type: AggregationType,
}

impl Default for DescriptorOptions {
    fn default() -> Self {
        Self {
            dimension_name: DEFAULT_DIMENSION.to_string(),
            aggregation_type: AggregationType::JoinExisting,
        }
    }
}

impl DescriptorOptions {
    pub fn with_dimension_name(mut self, dimension_name: impl Into<String>) -> Self {
        self.dimension_name = dimension_name.into();
        self
    }

    pub fn with_aggregation_type(mut self, aggregation_type: impl Into<AggregationType>) -> Self {
        self.aggregation_type = aggregation_type.into();
        self
    }
}

/// Whether the in-memory document matches what is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorState {
    /// Never saved, or mutated since the last load/save
    Unsaved,
    /// Identical to the file at `path`
    Persisted,
}

/// One NcML aggregation file and its member list.
///
/// Mutations only touch the in-memory document; nothing is written until
/// [`AggregationDescriptor::save`]. Member locations are compared verbatim,
/// without any path normalization, so callers must pass the same spelling
/// they used when adding a product.
#[derive(Debug)]
pub struct AggregationDescriptor<F: Filesystem = LocalFilesystem> {
    path: PathBuf,
    document: NcmlDocument,
    fs: F,
    on_disk: bool,
    mutated: bool,
}

impl AggregationDescriptor<LocalFilesystem> {
    /// Opens `path` on local disk with the default `time` / `joinExisting`
    /// settings.
    pub fn open(path: impl Into<PathBuf>) -> DescriptorResult<Self> {
        Self::open_with(path, DescriptorOptions::default())
    }

    pub fn open_with(path: impl Into<PathBuf>, options: DescriptorOptions) -> DescriptorResult<Self> {
        Self::open_in(LocalFilesystem, path, options)
    }
}

impl<F: Filesystem> AggregationDescriptor<F> {
    /// Loads the descriptor at `path` through `fs`, or starts an empty one
    /// in memory if the file does not exist.
    ///
    /// When the file exists, its `dimName` and `type` take precedence over
    /// `options`.
    pub fn open_in(fs: F, path: impl Into<PathBuf>, options: DescriptorOptions) -> DescriptorResult<Self> {
        let path = path.into();

        if !fs.exists(&path) {
            tracing::debug!(
                path = %path.display(),
                dimension = %options.dimension_name,
                aggregation_type = %options.aggregation_type,
                "descriptor not found, starting empty aggregation"
            );
            return Ok(Self {
                document: NcmlDocument::new(options.dimension_name, options.aggregation_type),
                path,
                fs,
                on_disk: false,
                mutated: false,
            });
        }

        let bytes = match fs.read(&path) {
            Ok(bytes) => bytes,
            Err(source) => return Err(DescriptorError::ReadFailure { path, source }),
        };
        let document = match NcmlDocument::from_bytes(
            &bytes,
            &options.dimension_name,
            &options.aggregation_type,
        ) {
            Ok(document) => document,
            Err(source) => return Err(DescriptorError::MalformedDescriptor { path, source }),
        };

        tracing::debug!(
            path = %path.display(),
            members = document.members().len(),
            dimension = %document.aggregation().dimension_name(),
            "loaded aggregation descriptor"
        );

        Ok(Self {
            path,
            document,
            fs,
            on_disk: true,
            mutated: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimension_name(&self) -> &str {
        self.document.aggregation().dimension_name()
    }

    pub fn aggregation_type(&self) -> &AggregationType {
        self.document.aggregation().aggregation_type()
    }

    /// Read-only view of the typed document.
    pub fn document(&self) -> &NcmlDocument {
        &self.document
    }

    pub fn state(&self) -> DescriptorState {
        if self.on_disk && !self.mutated {
            DescriptorState::Persisted
        } else {
            DescriptorState::Unsaved
        }
    }

    /// Whether a mutation happened since the last load or save.
    pub fn has_unsaved_changes(&self) -> bool {
        self.mutated
    }

    pub fn set_dimension_name(&mut self, dimension_name: impl Into<String>) {
        let dimension_name = dimension_name.into();
        if self.dimension_name() != dimension_name {
            self.document.aggregation_mut().set_dimension_name(dimension_name);
            self.mutated = true;
        }
    }

    pub fn set_aggregation_type(&mut self, aggregation_type: impl Into<AggregationType>) {
        let aggregation_type = aggregation_type.into();
        if *self.aggregation_type() != aggregation_type {
            self.document.aggregation_mut().set_aggregation_type(aggregation_type);
            self.mutated = true;
        }
    }

    /// Member locations in document order.
    pub fn products(&self) -> impl Iterator<Item = &str> + '_ {
        self.document.members().iter().map(Member::location)
    }

    /// Snapshot of the member locations in document order.
    pub fn list_products(&self) -> Vec<String> {
        self.products().map(str::to_string).collect()
    }

    pub fn len(&self) -> usize {
        self.document.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.document.members().is_empty()
    }

    pub fn has_product(&self, location: &str) -> bool {
        self.document.aggregation().position(location).is_some()
    }

    /// Appends `location` as the last member.
    ///
    /// Returns `Ok(false)` without touching the document when the location
    /// is already registered. Blank locations and characters XML 1.0 cannot
    /// carry are rejected with `InvalidLocation`.
    pub fn add_product(&mut self, location: &str) -> DescriptorResult<bool> {
        if let Err(reason) = check_location(location) {
            return Err(DescriptorError::InvalidLocation {
                location: location.to_string(),
                reason,
            });
        }

        if self.has_product(location) {
            tracing::debug!(%location, cube = %self.path.display(), "product already present");
            return Ok(false);
        }

        self.document
            .aggregation_mut()
            .push(Member::new(location).with_ncoords(PRODUCT_NCOORDS));
        self.mutated = true;
        tracing::debug!(%location, cube = %self.path.display(), "product added");
        Ok(true)
    }

    /// Removes the member registered under `location`.
    ///
    /// Returns `false` if there was none.
    pub fn remove_product(&mut self, location: &str) -> bool {
        match self.document.aggregation().position(location) {
            Some(index) => {
                self.document.aggregation_mut().remove(index);
                self.mutated = true;
                tracing::debug!(%location, cube = %self.path.display(), "product removed");
                true
            }
            None => {
                tracing::debug!(%location, cube = %self.path.display(), "product not found");
                false
            }
        }
    }

    /// Drops every member; `dimName` and `type` stay as they are.
    pub fn clear(&mut self) {
        if !self.is_empty() {
            self.document.aggregation_mut().clear();
            self.mutated = true;
        }
    }

    /// Member locations that do not exist on the filesystem, in document
    /// order.
    pub fn missing_products(&self) -> Vec<String> {
        self.products()
            .filter(|location| !self.fs.exists(Path::new(location)))
            .map(str::to_string)
            .collect()
    }

    /// True iff every member location exists. Missing files are logged, not
    /// raised.
    pub fn validate(&self) -> bool {
        let missing = self.missing_products();
        for location in &missing {
            tracing::warn!(%location, cube = %self.path.display(), "member file missing");
        }
        missing.is_empty()
    }

    /// Writes the document to `path`, replacing any existing file.
    pub fn save(&mut self) -> DescriptorResult<()> {
        let xml = self
            .document
            .to_xml()
            .map_err(|source| DescriptorError::WriteFailure {
                path: self.path.clone(),
                source,
            })?;

        self.fs
            .write(&self.path, xml.as_bytes())
            .map_err(|source| DescriptorError::WriteFailure {
                path: self.path.clone(),
                source,
            })?;

        self.on_disk = true;
        self.mutated = false;
        tracing::debug!(
            path = %self.path.display(),
            members = self.len(),
            "saved aggregation descriptor"
        );
        Ok(())
    }
}

impl<F: Filesystem> Drop for AggregationDescriptor<F> {
    fn drop(&mut self) {
        if self.mutated {
            tracing::warn!(
                path = %self.path.display(),
                members = self.len(),
                "aggregation descriptor dropped with unsaved changes"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFilesystem;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::io;
    use std::sync::Arc;

    fn open(fs: &MemoryFilesystem) -> AggregationDescriptor<MemoryFilesystem> {
        AggregationDescriptor::open_in(fs.clone(), "/cubes/dc.ncml", DescriptorOptions::default())
            .unwrap()
    }

    #[test]
    fn fresh_descriptor_writes_nothing_until_save() {
        let fs = MemoryFilesystem::new();
        let mut cube = open(&fs);
        assert_eq!(cube.state(), DescriptorState::Unsaved);
        cube.add_product("a.nc").unwrap();
        assert!(!fs.exists(Path::new("/cubes/dc.ncml")));

        cube.save().unwrap();
        assert_eq!(cube.state(), DescriptorState::Persisted);
        let xml = fs.contents(Path::new("/cubes/dc.ncml")).unwrap();
        assert!(xml.contains(r#"location="a.nc""#));
        assert!(xml.contains(r#"ncoords="1""#));
    }

    #[test]
    fn mutations_move_back_to_unsaved() {
        let fs = MemoryFilesystem::new();
        let mut cube = open(&fs);
        cube.save().unwrap();
        assert_eq!(cube.state(), DescriptorState::Persisted);

        assert!(!cube.remove_product("absent.nc"));
        cube.clear();
        assert_eq!(cube.state(), DescriptorState::Persisted);

        cube.add_product("a.nc").unwrap();
        assert_eq!(cube.state(), DescriptorState::Unsaved);
        cube.save().unwrap();

        assert!(!cube.add_product("a.nc").unwrap());
        assert_eq!(cube.state(), DescriptorState::Persisted);
        cube.set_dimension_name("step");
        assert!(cube.has_unsaved_changes());
        cube.save().unwrap();
    }

    #[test]
    fn rejects_empty_location() {
        let fs = MemoryFilesystem::new();
        let mut cube = open(&fs);
        assert_matches!(
            cube.add_product(""),
            Err(DescriptorError::InvalidLocation { .. })
        );
        assert_matches!(
            cube.add_product("   "),
            Err(DescriptorError::InvalidLocation { .. })
        );
        assert!(cube.is_empty());
    }

    #[test]
    fn rejects_locations_xml_cannot_carry() {
        let fs = MemoryFilesystem::new();
        let mut cube = open(&fs);
        assert_matches!(
            cube.add_product("a\u{1}b.nc"),
            Err(DescriptorError::InvalidLocation { .. })
        );
        assert!(cube.is_empty());
        assert!(!cube.has_unsaved_changes());

        assert!(cube.add_product("/data/été/a b.nc").unwrap());
        cube.save().unwrap();
        let xml = fs.contents(Path::new("/cubes/dc.ncml")).unwrap();
        assert!(!xml.contains('\u{1}'));
    }

    #[test]
    fn setters_update_aggregation_attributes() {
        let fs = MemoryFilesystem::new();
        let mut cube = open(&fs);
        cube.set_dimension_name("band");
        cube.set_aggregation_type("joinNew");
        cube.save().unwrap();

        let xml = fs.contents(Path::new("/cubes/dc.ncml")).unwrap();
        assert!(xml.contains(r#"dimName="band""#));
        assert!(xml.contains(r#"type="joinNew""#));
        assert_eq!(cube.aggregation_type(), &AggregationType::JoinNew);
    }

    #[test]
    fn missing_products_preserve_order() {
        let fs = MemoryFilesystem::new();
        fs.touch("/data/b.nc");
        let mut cube = open(&fs);
        for location in ["/data/a.nc", "/data/b.nc", "/data/c.nc"] {
            cube.add_product(location).unwrap();
        }
        assert_eq!(cube.missing_products(), ["/data/a.nc", "/data/c.nc"]);
        assert!(!cube.validate());
        cube.clear();
        assert!(cube.validate());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    fn capture_warnings(f: impl FnOnce()) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        logs.text()
    }

    #[test]
    fn dropping_unsaved_changes_warns() {
        let fs = MemoryFilesystem::new();

        let logs = capture_warnings(|| {
            let mut cube = open(&fs);
            cube.add_product("a.nc").unwrap();
        });
        assert!(logs.contains("dropped with unsaved changes"), "{logs}");
        assert!(logs.contains("/cubes/dc.ncml"), "{logs}");

        let logs = capture_warnings(|| {
            let mut cube = open(&fs);
            cube.add_product("a.nc").unwrap();
            cube.save().unwrap();
            assert!(!cube.remove_product("absent.nc"));
        });
        assert!(!logs.contains("dropped with unsaved changes"), "{logs}");
    }

    #[test]
    fn unreadable_file_is_a_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A directory exists but cannot be read as a file.
        let result = AggregationDescriptor::open(dir.path());
        assert_matches!(result, Err(DescriptorError::ReadFailure { .. }));
    }
}

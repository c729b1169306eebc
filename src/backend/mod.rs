//! The package engine this crate sits on top of.
//!
//! A [`Cache`](crate::Cache) talks to four collaborators: a read-only
//! [`Catalog`] of packages, versions and records, a mutable [`Depcache`]
//! tracking the requested state and its [`ProblemResolver`], an [`Acquire`]
//! engine for downloads, and a [`ChangelogTransport`] for changelog retrieval.
//! [`InMemoryCache`] and the HTTP implementations in this module cover all of
//! them for embedders without a system package engine.
mod http;
mod in_memory;

pub use http::{HttpAcquire, HttpTransport};
pub use in_memory::InMemoryCache;

use crate::{
    error::{Error, ResolverError, TransportError},
    types::{Checksum, DepKind, Dependency},
};
use std::{io::BufRead, path::PathBuf, time::Duration};

/// Opaque package identifier assigned by the catalog
pub type PkgId = usize;
/// Opaque identifier of one version of one package
pub type VerId = usize;
pub type FileId = usize;
pub type IndexId = usize;

/// Everything the catalog knows about one version
#[derive(Clone, Debug, Default)]
pub struct VersionData {
    pub package: PkgId,
    pub version: String,
    pub arch: String,
    pub section: String,
    pub priority: String,
    pub size: u64,
    pub installed_size: u64,
    pub downloadable: bool,
    pub relations: Vec<(DepKind, Vec<Dependency>)>,
    /// Package files this version was seen in
    pub files: Vec<FileId>,
}

impl VersionData {
    pub fn relations_of(&self, kind: DepKind) -> impl Iterator<Item = &Dependency> {
        self.relations
            .iter()
            .filter(move |(k, _)| *k == kind)
            .flat_map(|(_, deps)| deps.iter())
    }
}

/// One package list (a `Packages` file or the dpkg status file)
#[derive(Clone, Debug, Default)]
pub struct PackageFile {
    pub archive: String,
    pub component: String,
    pub origin: String,
    pub label: String,
    pub site: String,
    pub not_automatic: bool,
    pub index: Option<IndexId>,
}

/// A repository index
#[derive(Clone, Debug, Default)]
pub struct IndexFile {
    pub base_uri: String,
    pub trusted: bool,
}

impl IndexFile {
    /// Full URI of a file inside this archive
    pub fn archive_uri(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_uri.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[derive(Clone, Debug)]
pub struct SourceFile {
    pub checksum: Checksum,
    pub size: u64,
    /// File name relative to the source record's directory
    pub path: String,
    /// `dsc`, `tar` or `diff`
    pub kind: String,
}

#[derive(Clone, Debug)]
pub struct SourceRecord {
    pub package: String,
    pub version: String,
    pub section: String,
    pub directory: String,
    pub files: Vec<SourceFile>,
    pub index: Option<IndexId>,
}

/// Read-only view of the package catalog
pub trait Catalog {
    fn find_package(&self, name: &str) -> Option<PkgId>;
    fn package_name(&self, pkg: PkgId) -> Option<&str>;
    fn package_ids(&self) -> Vec<PkgId>;
    /// Version currently installed on the system
    fn current_version(&self, pkg: PkgId) -> Option<VerId>;
    /// All known versions, newest first
    fn version_list(&self, pkg: PkgId) -> Vec<VerId>;
    fn version(&self, ver: VerId) -> Option<&VersionData>;
    fn package_file(&self, file: FileId) -> Option<&PackageFile>;
    fn index(&self, index: IndexId) -> Option<&IndexFile>;
    /// Raw control stanza of a version
    fn record(&self, ver: VerId) -> Option<&str>;
    /// Raw long description in the user's language, first line included
    fn translated_description(&self, ver: VerId) -> Option<&[u8]>;
    /// Source records for a source package name, in index order
    fn source_records(&self, name: &str) -> Vec<&SourceRecord>;
}

/// Mutable view of the requested package state
pub trait Depcache {
    fn candidate_version(&self, pkg: PkgId) -> Option<VerId>;
    fn set_candidate_version(&mut self, pkg: PkgId, ver: VerId);

    fn mark_keep(&mut self, pkg: PkgId);
    fn mark_delete(&mut self, pkg: PkgId, purge: bool);
    fn mark_install(&mut self, pkg: PkgId, auto_inst: bool, from_user: bool);

    fn marked_install(&self, pkg: PkgId) -> bool;
    fn marked_upgrade(&self, pkg: PkgId) -> bool;
    fn marked_delete(&self, pkg: PkgId) -> bool;
    fn marked_keep(&self, pkg: PkgId) -> bool;
    fn marked_downgrade(&self, pkg: PkgId) -> bool;
    fn marked_reinstall(&self, pkg: PkgId) -> bool;
    fn is_upgradable(&self, pkg: PkgId) -> bool;
    /// Installed automatically and no longer needed by anything
    fn is_garbage(&self, pkg: PkgId) -> bool;

    fn broken_count(&self) -> usize;
    fn install_count(&self) -> usize;
    fn delete_count(&self) -> usize;

    fn problem_resolver(&mut self) -> Box<dyn ProblemResolver + '_>;

    /// Fetch and install everything that has been marked
    fn commit(
        &mut self,
        fetch_progress: &mut dyn FetchProgress,
        install_progress: &mut dyn InstallProgress,
    ) -> Result<(), Error>;
}

/// Adjusts pending changes to reduce the number of broken packages
pub trait ProblemResolver {
    /// Forget all hints given for `pkg`
    fn clear(&mut self, pkg: PkgId);
    /// Never touch the current request for `pkg`
    fn protect(&mut self, pkg: PkgId);
    /// `pkg` has to go
    fn remove(&mut self, pkg: PkgId);
    /// Protect everything currently marked for installation
    fn install_protect(&mut self);
    /// Run the resolver. With `broken_ok` leftover breakage is not an error.
    fn resolve(&mut self, broken_ok: bool) -> Result<(), ResolverError>;
}

/// One download request
#[derive(Clone, Debug)]
pub struct AcquireItem {
    pub uri: String,
    pub checksum: Option<Checksum>,
    pub size: u64,
    pub description: String,
    pub destination: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ItemStatus {
    Done,
    Error(String),
}

/// Download engine
pub trait Acquire {
    /// Run all items to completion, returning one status per item
    fn run(&mut self, items: &[AcquireItem], progress: &mut dyn FetchProgress) -> Vec<ItemStatus>;
}

/// Opens changelog streams
pub trait ChangelogTransport {
    fn open(&self, uri: &str, timeout: Duration) -> Result<Box<dyn BufRead>, TransportError>;
}

/// Download progress callbacks. Everything defaults to doing nothing.
pub trait FetchProgress {
    fn start(&mut self) {}
    fn item_done(&mut self, _uri: &str) {}
    fn item_failed(&mut self, _uri: &str, _reason: &str) {}
    fn stop(&mut self) {}
}

/// Installation progress callbacks. Everything defaults to doing nothing.
pub trait InstallProgress {
    fn start_update(&mut self) {}
    fn status_change(&mut self, _pkg: &str, _percent: f32, _status: &str) {}
    fn finish_update(&mut self) {}
}

/// Progress sink that reports nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct QuietProgress;

impl FetchProgress for QuietProgress {}
impl InstallProgress for QuietProgress {}

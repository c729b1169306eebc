use super::{description::decode_description, Package};
use crate::{
    backend::{AcquireItem, FetchProgress, ItemStatus, VerId, VersionData},
    cache::Cache,
    error::{Error, Result},
    types::{
        compare_versions, file_is_same, upstream_version, Checksum, DepKind, Dependency, Origin,
        Record,
    },
};

use std::{
    cmp::Ordering,
    fmt, fs,
    hash::{Hash, Hasher},
    path::{Path, PathBuf},
    process::Command,
};

/// One version of one package.
///
/// Two handles are equal only if they refer to the same catalog entry; the
/// same version string may well show up in several entries. Ordering follows
/// dpkg's version comparison, with the entry as a tie-breaker.
#[derive(Clone, Copy)]
pub struct Version<'c> {
    cache: &'c Cache,
    id: VerId,
    data: &'c VersionData,
}

impl<'c> Version<'c> {
    pub(crate) fn new(cache: &'c Cache, id: VerId) -> Option<Self> {
        let data = cache.catalog().version(id)?;
        Some(Version { cache, id, data })
    }

    pub fn id(&self) -> VerId {
        self.id
    }

    pub fn package(&self) -> Package<'c> {
        Package::new(self.cache, self.data.package)
    }

    pub fn version(&self) -> &'c str {
        &self.data.version
    }

    pub fn architecture(&self) -> &'c str {
        &self.data.arch
    }

    pub fn section(&self) -> &'c str {
        &self.data.section
    }

    pub fn priority(&self) -> &'c str {
        &self.data.priority
    }

    /// Size of the .deb in bytes
    pub fn size(&self) -> u64 {
        self.data.size
    }

    /// Size on disk once installed, in bytes
    pub fn installed_size(&self) -> u64 {
        self.data.installed_size
    }

    pub fn downloadable(&self) -> bool {
        self.data.downloadable
    }

    pub fn is_installed(&self) -> bool {
        self.cache.catalog().current_version(self.data.package) == Some(self.id)
    }

    pub fn record(&self) -> Result<Record> {
        let text = self
            .cache
            .catalog()
            .record(self.id)
            .ok_or_else(|| Error::RecordNotFound(self.to_string()))?;
        Record::parse(text)
    }

    fn field(&self, name: &str) -> Option<String> {
        self.record().ok()?.get(name).map(|s| s.to_owned())
    }

    pub fn homepage(&self) -> Option<String> {
        self.field("Homepage")
    }

    /// Path of the .deb inside the archive
    pub fn filename(&self) -> Option<String> {
        self.field("Filename")
    }

    pub fn md5(&self) -> Option<String> {
        self.field("MD5sum")
    }

    pub fn sha1(&self) -> Option<String> {
        self.field("SHA1")
    }

    pub fn sha256(&self) -> Option<String> {
        self.field("SHA256")
    }

    /// Strongest checksum the record carries
    pub fn checksum(&self) -> Option<Checksum> {
        let record = self.record().ok()?;
        if let Some(sum) = record.get("SHA512") {
            return Checksum::from_sha512_str(sum).ok();
        }
        if let Some(sum) = record.get("SHA256") {
            return Checksum::from_sha256_str(sum).ok();
        }
        record
            .get("MD5sum")
            .and_then(|sum| Checksum::from_md5_str(sum).ok())
    }

    /// Name of the source package this version was built from
    pub fn source_name(&self) -> String {
        match self.field("Source") {
            // "Source: foo (1.0-1)" when the versions differ
            Some(source) => match source.split_whitespace().next() {
                Some(name) => name.to_owned(),
                None => self.package().name().to_owned(),
            },
            None => self.package().name().to_owned(),
        }
    }

    /// Long description as stored, first line included
    pub fn raw_description(&self) -> String {
        self.cache
            .catalog()
            .translated_description(self.id)
            .map(|d| String::from_utf8_lossy(d).into_owned())
            .unwrap_or_default()
    }

    pub fn summary(&self) -> Option<String> {
        let raw = self.raw_description();
        raw.lines().next().map(|l| l.trim().to_owned())
    }

    /// The long description, formatted for display
    pub fn description(&self) -> String {
        match self.cache.catalog().translated_description(self.id) {
            Some(raw) => decode_description(self.package().name(), raw),
            None => String::new(),
        }
    }

    /// `Pre-Depends` groups followed by `Depends` groups
    pub fn dependencies(&self) -> Vec<Dependency> {
        self.get_dependencies(&[DepKind::PreDepends, DepKind::Depends])
    }

    pub fn recommends(&self) -> Vec<Dependency> {
        self.get_dependencies(&[DepKind::Recommends])
    }

    pub fn suggests(&self) -> Vec<Dependency> {
        self.get_dependencies(&[DepKind::Suggests])
    }

    /// Relationship groups of the given kinds, in the order the kinds are given
    pub fn get_dependencies(&self, kinds: &[DepKind]) -> Vec<Dependency> {
        kinds
            .iter()
            .flat_map(|kind| self.data.relations_of(*kind).cloned())
            .collect()
    }

    pub fn origins(&self) -> Vec<Origin> {
        let catalog = self.cache.catalog();
        self.data
            .files
            .iter()
            .filter_map(|f| catalog.package_file(*f))
            .map(|file| Origin::new(file, file.index.and_then(|i| catalog.index(i))))
            .collect()
    }

    /// Every location the .deb can be downloaded from
    pub fn uris(&self) -> Vec<String> {
        let filename = match self.filename() {
            Some(f) => f,
            None => return Vec::new(),
        };
        let catalog = self.cache.catalog();
        let mut res: Vec<String> = Vec::new();
        for file in self.data.files.iter().filter_map(|f| catalog.package_file(*f)) {
            if let Some(index) = file.index.and_then(|i| catalog.index(i)) {
                let uri = index.archive_uri(&filename);
                if !res.contains(&uri) {
                    res.push(uri);
                }
            }
        }
        res
    }

    pub fn uri(&self) -> Option<String> {
        self.uris().into_iter().next()
    }

    /// Download the .deb into `destdir`, returning its absolute path.
    /// Nothing is downloaded if a good copy is already there.
    pub fn fetch_binary(&self, destdir: &Path, progress: &mut dyn FetchProgress) -> Result<PathBuf> {
        let filename = self
            .filename()
            .ok_or_else(|| Error::NoUri(self.to_string()))?;
        let uri = self.uri().ok_or_else(|| Error::NoUri(self.to_string()))?;
        let basename = filename.rsplit('/').next().unwrap_or(&filename);
        let destination = destdir.join(basename);
        let checksum = self.checksum();

        if let Some(checksum) = &checksum {
            if file_is_same(&destination, self.size(), checksum) {
                info!("{} already downloaded, skipping", basename);
                return Ok(fs::canonicalize(&destination)?);
            }
        }

        let item = AcquireItem {
            uri,
            checksum,
            size: self.size(),
            description: self.to_string(),
            destination: destination.clone(),
        };
        run_acquire(self.cache, &[item], progress)?;
        Ok(fs::canonicalize(&destination)?)
    }

    /// Download the source package of this version into `destdir`.
    ///
    /// With `unpack`, `dpkg-source -x` extracts it into
    /// `<source>-<upstream version>` and that directory is returned, otherwise
    /// the path of the `.dsc` file is.
    pub fn fetch_source(
        &self,
        destdir: &Path,
        progress: &mut dyn FetchProgress,
        unpack: bool,
    ) -> Result<PathBuf> {
        let src_name = self.source_name();
        let catalog = self.cache.catalog();
        let record = catalog
            .source_records(&src_name)
            .into_iter()
            .find(|r| r.version == self.version())
            .ok_or_else(|| Error::NoSource(format!("{} {}", src_name, self.version())))?;
        let index = record
            .index
            .and_then(|i| catalog.index(i))
            .ok_or_else(|| Error::NoUri(format!("{} {}", src_name, self.version())))?;

        let mut dsc = None;
        let mut items = Vec::new();
        for file in &record.files {
            let basename = file.path.rsplit('/').next().unwrap_or(&file.path);
            let destination = destdir.join(basename);
            if file.kind == "dsc" {
                dsc = Some(destination.clone());
            }
            if file_is_same(&destination, file.size, &file.checksum) {
                debug!("{} already downloaded, skipping", basename);
                continue;
            }
            let path = if record.directory.is_empty() {
                file.path.clone()
            } else {
                format!("{}/{}", record.directory.trim_end_matches('/'), file.path)
            };
            items.push(AcquireItem {
                uri: index.archive_uri(&path),
                checksum: Some(file.checksum.clone()),
                size: file.size,
                description: format!("{} {} ({})", src_name, record.version, file.kind),
                destination,
            });
        }
        let dsc = dsc.ok_or_else(|| Error::NoSource(format!("{} {} has no .dsc", src_name, self.version())))?;

        if !items.is_empty() {
            run_acquire(self.cache, &items, progress)?;
        }

        if !unpack {
            return Ok(fs::canonicalize(&dsc)?);
        }

        let outdir = destdir.join(format!(
            "{}-{}",
            record.package,
            upstream_version(&record.version)
        ));
        if !outdir.is_dir() {
            info!("Unpacking {} into {}", dsc.display(), outdir.display());
            let status = Command::new("dpkg-source")
                .arg("-x")
                .arg(&dsc)
                .arg(&outdir)
                .status()
                .map_err(|e| Error::Unpack(format!("failed to run dpkg-source: {}", e)))?;
            if !status.success() {
                return Err(Error::Unpack(format!(
                    "dpkg-source exited with {} for {}",
                    status,
                    dsc.display()
                )));
            }
        }
        Ok(fs::canonicalize(&outdir)?)
    }
}

// Run an acquire batch, failing on the first item that did not make it
fn run_acquire(cache: &Cache, items: &[AcquireItem], progress: &mut dyn FetchProgress) -> Result<()> {
    let statuses = cache.acquire(items, progress);
    for (item, status) in items.iter().zip(statuses.iter()) {
        if let ItemStatus::Error(reason) = status {
            return Err(Error::Fetch {
                item: item.description.clone(),
                reason: reason.clone(),
            });
        }
    }
    if statuses.len() < items.len() {
        return Err(Error::Fetch {
            item: items[statuses.len()].description.clone(),
            reason: "not processed".to_owned(),
        });
    }
    Ok(())
}

impl PartialEq for Version<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Version<'_> {}

impl Hash for Version<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Ord for Version<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_versions(self.version(), other.version()).then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Version<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.package().name(), self.version())
    }
}

impl fmt::Debug for Version<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Version")
            .field("package", &self.package().name())
            .field("version", &self.version())
            .field("arch", &self.architecture())
            .field("id", &self.id)
            .finish()
    }
}

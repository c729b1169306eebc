use super::{
    Catalog, Depcache, FetchProgress, FileId, IndexFile, IndexId, InstallProgress, PackageFile,
    PkgId, ProblemResolver, SourceFile, SourceRecord, VerId, VersionData,
};
use crate::{
    cache::Cache,
    config::Config,
    error::{Error, ResolverError, Result},
    types::{compare_versions, parse_dependencies, Checksum, DepKind, Dependency, Record},
};

use std::{
    cell::RefCell,
    cmp::Ordering,
    collections::{HashMap, HashSet, VecDeque},
    fs::File,
    io::Read,
    path::Path,
    rc::Rc,
};

// Recursion limit for automatic dependency installation
const MAX_INSTALL_DEPTH: usize = 64;
// Passes over the broken set before the resolver gives up
const MAX_RESOLVER_PASSES: usize = 16;

struct PkgEntry {
    name: String,
    // Sorted newest first
    versions: Vec<VerId>,
}

#[derive(Default)]
struct CatalogData {
    packages: Vec<PkgEntry>,
    by_name: HashMap<String, PkgId>,
    versions: Vec<VersionData>,
    records: Vec<String>,
    descriptions: Vec<Option<Vec<u8>>>,
    files: Vec<PackageFile>,
    indexes: Vec<IndexFile>,
    sources: Vec<SourceRecord>,
    auto_installed: HashSet<PkgId>,
}

impl CatalogData {
    fn version_str(&self, ver: VerId) -> &str {
        self.versions
            .get(ver)
            .map(|v| v.version.as_str())
            .unwrap_or_default()
    }
}

/// A package engine kept entirely in memory, fed with the text of `Packages`,
/// `Sources` and dpkg `status` files.
///
/// Broken packages are those whose target version (candidate when marked for
/// installation, nothing when marked for removal, the installed one otherwise)
/// misses a `Depends`/`Pre-Depends` group or hits a `Conflicts`/`Breaks`
/// entry. Virtual packages are not resolved.
pub struct InMemoryCache {
    data: CatalogData,
    current: Vec<Option<VerId>>,
    status_file: Option<FileId>,
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        InMemoryCache {
            data: CatalogData::default(),
            current: Vec::new(),
            status_file: None,
        }
    }

    pub fn add_index(&mut self, index: IndexFile) -> IndexId {
        self.data.indexes.push(index);
        self.data.indexes.len() - 1
    }

    pub fn add_package_file(&mut self, file: PackageFile) -> FileId {
        self.data.files.push(file);
        self.data.files.len() - 1
    }

    /// Add every stanza of a `Packages` list as an available version
    pub fn add_packages(&mut self, text: &str, file: FileId) -> Result<()> {
        for record in Record::parse_stanzas(text)? {
            self.add_version(&record, Some(file), true)?;
        }
        Ok(())
    }

    /// Read a `Packages` list from disk, decompressing `.gz` and `.xz` files
    pub fn load_packages_file(&mut self, path: &Path, file: FileId) -> Result<()> {
        let f = File::open(path)?;
        let mut reader: Box<dyn Read> = match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Box::new(flate2::read::GzDecoder::new(f)),
            Some("xz") => Box::new(xz2::read::XzDecoder::new(f)),
            _ => Box::new(f),
        };
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        self.add_packages(&text, file)
    }

    /// Add the dpkg status database. Only fully installed packages count.
    pub fn add_status(&mut self, text: &str) -> Result<()> {
        let status_file = match self.status_file {
            Some(f) => f,
            None => {
                let f = self.add_package_file(PackageFile {
                    archive: "now".to_owned(),
                    ..Default::default()
                });
                self.status_file = Some(f);
                f
            }
        };

        for record in Record::parse_stanzas(text)? {
            let installed = record
                .get("Status")
                .and_then(|s| s.split_whitespace().nth(2))
                .map_or(false, |s| s == "installed");
            if !installed {
                continue;
            }
            let ver = self.add_version(&record, Some(status_file), false)?;
            let pkg = self.data.versions[ver].package;
            self.current[pkg] = Some(ver);
        }
        Ok(())
    }

    /// Add every stanza of a `Sources` list
    pub fn add_sources(&mut self, text: &str, index: Option<IndexId>) -> Result<()> {
        for record in Record::parse_stanzas(text)? {
            let field = |name: &str| {
                record
                    .get(name)
                    .map(|s| s.to_owned())
                    .ok_or_else(|| Error::Parse(format!("source stanza without {}", name)))
            };
            let (files, sha256) = match record.get("Checksums-Sha256") {
                Some(f) => (f, true),
                None => (
                    record
                        .get("Files")
                        .ok_or_else(|| Error::Parse("source stanza without files".to_owned()))?,
                    false,
                ),
            };

            let mut source_files = Vec::new();
            for line in files.lines().filter(|l| !l.trim().is_empty()) {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() != 3 {
                    return Err(Error::Parse(format!("malformed file entry: {:?}", line)));
                }
                let checksum = if sha256 {
                    Checksum::from_sha256_str(parts[0])
                } else {
                    Checksum::from_md5_str(parts[0])
                }
                .map_err(|e| Error::Parse(e.to_string()))?;
                let size = parts[1]
                    .parse()
                    .map_err(|_| Error::Parse(format!("malformed file size: {:?}", line)))?;
                let kind = if parts[2].ends_with(".dsc") {
                    "dsc"
                } else if parts[2].contains(".diff.") {
                    "diff"
                } else {
                    "tar"
                };
                source_files.push(SourceFile {
                    checksum,
                    size,
                    path: parts[2].to_owned(),
                    kind: kind.to_owned(),
                });
            }

            self.data.sources.push(SourceRecord {
                package: field("Package")?,
                version: field("Version")?,
                section: record.get_or("Section", "").to_owned(),
                directory: record.get_or("Directory", "").to_owned(),
                files: source_files,
                index,
            });
        }
        Ok(())
    }

    /// Replace the long description shown for a version, eg. with a translation
    pub fn set_translated_description(&mut self, name: &str, version: &str, desc: Vec<u8>) -> bool {
        let ver = self.data.by_name.get(name).and_then(|pkg| {
            self.data.packages[*pkg]
                .versions
                .iter()
                .copied()
                .find(|v| self.data.versions[*v].version == version)
        });
        match ver {
            Some(v) => {
                self.data.descriptions[v] = Some(desc);
                true
            }
            None => false,
        }
    }

    /// Record that a package was installed only to satisfy dependencies
    pub fn mark_auto_installed(&mut self, name: &str) {
        if let Some(pkg) = self.data.by_name.get(name) {
            self.data.auto_installed.insert(*pkg);
        }
    }

    fn package_entry(&mut self, name: &str) -> PkgId {
        if let Some(id) = self.data.by_name.get(name) {
            return *id;
        }
        self.data.packages.push(PkgEntry {
            name: name.to_owned(),
            versions: Vec::new(),
        });
        self.current.push(None);
        let id = self.data.packages.len() - 1;
        self.data.by_name.insert(name.to_owned(), id);
        id
    }

    fn add_version(&mut self, record: &Record, file: Option<FileId>, downloadable: bool) -> Result<VerId> {
        let name = record
            .get("Package")
            .ok_or_else(|| Error::Parse("package without name".to_owned()))?;
        let version = record
            .get("Version")
            .ok_or_else(|| Error::Parse(format!("package {} without version", name)))?;
        let arch = record.get_or("Architecture", "");
        let pkg = self.package_entry(name);

        // The same version seen in another list only adds an origin
        let existing = self.data.packages[pkg].versions.iter().copied().find(|v| {
            let data = &self.data.versions[*v];
            data.version == version && data.arch == arch
        });
        if let Some(ver) = existing {
            let data = &mut self.data.versions[ver];
            data.files.extend(file);
            data.downloadable |= downloadable;
            if downloadable {
                // Prefer the archive's record over the status file's
                self.data.records[ver] = record.to_string();
            }
            return Ok(ver);
        }

        let mut relations = Vec::new();
        for kind in DepKind::ALL {
            if let Some(value) = record.get(kind.field_name()) {
                relations.push((kind, parse_dependencies(value, kind == DepKind::PreDepends)?));
            }
        }
        let number = |field: &str| record.get(field).and_then(|s| s.trim().parse::<u64>().ok());

        self.data.versions.push(VersionData {
            package: pkg,
            version: version.to_owned(),
            arch: arch.to_owned(),
            section: record.get_or("Section", "").to_owned(),
            priority: record.get_or("Priority", "").to_owned(),
            size: number("Size").unwrap_or(0),
            // Installed-Size is in KiB
            installed_size: number("Installed-Size").unwrap_or(0) * 1024,
            downloadable,
            relations,
            files: file.into_iter().collect(),
        });
        self.data.records.push(record.to_string());
        self.data.descriptions.push(None);
        let ver = self.data.versions.len() - 1;

        let all = &self.data.versions;
        let versions = &mut self.data.packages[pkg].versions;
        versions.push(ver);
        versions.sort_by(|a, b| compare_versions(&all[*b].version, &all[*a].version));

        Ok(ver)
    }

    /// Split into the two collaborators a [`Cache`] needs
    pub fn into_parts(self) -> (Box<dyn Catalog>, Box<dyn Depcache>) {
        let data = Rc::new(self.data);
        let installed = Rc::new(RefCell::new(self.current));

        let states = data
            .packages
            .iter()
            .enumerate()
            .map(|(pkg, entry)| {
                let current = installed.borrow()[pkg];
                let candidate = entry
                    .versions
                    .iter()
                    .copied()
                    .find(|v| data.versions[*v].downloadable)
                    .or(current);
                PkgState {
                    mode: Mode::Keep,
                    candidate,
                    purge: false,
                    auto: data.auto_installed.contains(&pkg),
                }
            })
            .collect();

        let catalog = InMemoryCatalog {
            data: data.clone(),
            installed: installed.clone(),
        };
        let depcache = InMemoryDepcache {
            data,
            installed,
            states,
        };
        (Box::new(catalog), Box::new(depcache))
    }

    pub fn into_cache(self, config: Config) -> Cache {
        let (catalog, depcache) = self.into_parts();
        Cache::new(catalog, depcache, config)
    }
}

struct InMemoryCatalog {
    data: Rc<CatalogData>,
    installed: Rc<RefCell<Vec<Option<VerId>>>>,
}

impl Catalog for InMemoryCatalog {
    fn find_package(&self, name: &str) -> Option<PkgId> {
        self.data.by_name.get(name).copied()
    }

    fn package_name(&self, pkg: PkgId) -> Option<&str> {
        self.data.packages.get(pkg).map(|p| p.name.as_str())
    }

    fn package_ids(&self) -> Vec<PkgId> {
        (0..self.data.packages.len()).collect()
    }

    fn current_version(&self, pkg: PkgId) -> Option<VerId> {
        self.installed.borrow().get(pkg).copied().flatten()
    }

    fn version_list(&self, pkg: PkgId) -> Vec<VerId> {
        self.data
            .packages
            .get(pkg)
            .map(|p| p.versions.clone())
            .unwrap_or_default()
    }

    fn version(&self, ver: VerId) -> Option<&VersionData> {
        self.data.versions.get(ver)
    }

    fn package_file(&self, file: FileId) -> Option<&PackageFile> {
        self.data.files.get(file)
    }

    fn index(&self, index: IndexId) -> Option<&IndexFile> {
        self.data.indexes.get(index)
    }

    fn record(&self, ver: VerId) -> Option<&str> {
        self.data.records.get(ver).map(|r| r.as_str())
    }

    fn translated_description(&self, ver: VerId) -> Option<&[u8]> {
        match self.data.descriptions.get(ver)? {
            Some(desc) => Some(desc.as_slice()),
            None => self
                .data
                .records
                .get(ver)
                .and_then(|r| description_field(r))
                .map(|d| d.as_bytes()),
        }
    }

    fn source_records(&self, name: &str) -> Vec<&SourceRecord> {
        self.data
            .sources
            .iter()
            .filter(|s| s.package == name)
            .collect()
    }
}

// Slice of the stanza holding the Description value, without re-allocating
fn description_field(record: &str) -> Option<&str> {
    let mut start = None;
    let mut end = record.len();
    let mut pos = 0;
    for line in record.split_inclusive('\n') {
        match start {
            None => {
                let is_desc = line
                    .get(..12)
                    .map_or(false, |name| name.eq_ignore_ascii_case("description:"));
                if is_desc {
                    let value = &line[12..];
                    let indent = value.len() - value.trim_start_matches(|c| c == ' ' || c == '\t').len();
                    start = Some(pos + 12 + indent);
                }
            }
            Some(_) => {
                if !(line.starts_with(' ') || line.starts_with('\t')) {
                    end = pos;
                    break;
                }
            }
        }
        pos += line.len();
    }
    start.map(|s| record[s..end].trim_end())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Keep,
    Install,
    Delete,
}

#[derive(Clone, Debug)]
struct PkgState {
    mode: Mode,
    candidate: Option<VerId>,
    purge: bool,
    auto: bool,
}

struct InMemoryDepcache {
    data: Rc<CatalogData>,
    installed: Rc<RefCell<Vec<Option<VerId>>>>,
    states: Vec<PkgState>,
}

impl InMemoryDepcache {
    fn current(&self, pkg: PkgId) -> Option<VerId> {
        self.installed.borrow().get(pkg).copied().flatten()
    }

    /// The version this package ends up with once the changes are committed
    fn target(&self, pkg: PkgId) -> Option<VerId> {
        match self.states.get(pkg)?.mode {
            Mode::Install => self.states[pkg].candidate,
            Mode::Delete => None,
            Mode::Keep => self.current(pkg),
        }
    }

    fn cmp_candidate(&self, pkg: PkgId) -> Option<Ordering> {
        let cand = self.states.get(pkg)?.candidate?;
        let cur = self.current(pkg)?;
        Some(compare_versions(
            self.data.version_str(cand),
            self.data.version_str(cur),
        ))
    }

    // Target package of a clause, if its target version fulfills it
    fn provider(&self, name: &str, check: impl Fn(&str) -> bool) -> Option<PkgId> {
        let pkg = *self.data.by_name.get(name)?;
        let ver = self.target(pkg)?;
        if check(self.data.version_str(ver)) {
            Some(pkg)
        } else {
            None
        }
    }

    fn satisfied(&self, dep: &Dependency) -> bool {
        dep.or_dependencies
            .iter()
            .any(|d| self.provider(&d.name, |v| d.satisfied_by(v)).is_some())
    }

    fn is_broken(&self, pkg: PkgId) -> bool {
        let ver = match self.target(pkg) {
            Some(v) => &self.data.versions[v],
            None => return false,
        };
        for (kind, deps) in &ver.relations {
            if kind.is_critical() && deps.iter().any(|d| !self.satisfied(d)) {
                return true;
            }
            if kind.is_negative() {
                let hit = deps.iter().flat_map(|d| d.or_dependencies.iter()).any(|d| {
                    self.provider(&d.name, |v| d.satisfied_by(v))
                        .map_or(false, |other| other != pkg)
                });
                if hit {
                    return true;
                }
            }
        }
        false
    }

    // Packages whose target version is hit by a Conflicts/Breaks of `pkg`
    fn conflicting(&self, pkg: PkgId) -> Vec<PkgId> {
        let ver = match self.target(pkg) {
            Some(v) => &self.data.versions[v],
            None => return Vec::new(),
        };
        let mut hits = Vec::new();
        for (kind, deps) in &ver.relations {
            if !kind.is_negative() {
                continue;
            }
            for d in deps.iter().flat_map(|d| d.or_dependencies.iter()) {
                if let Some(other) = self.provider(&d.name, |v| d.satisfied_by(v)) {
                    if other != pkg && !hits.contains(&other) {
                        hits.push(other);
                    }
                }
            }
        }
        hits
    }

    fn broken_packages(&self) -> Vec<PkgId> {
        (0..self.states.len()).filter(|p| self.is_broken(*p)).collect()
    }

    fn mark_install_rec(&mut self, pkg: PkgId, auto_inst: bool, from_user: bool, depth: usize, avoid: &HashSet<PkgId>) {
        let cand = match self.states.get(pkg).and_then(|s| s.candidate) {
            Some(c) => c,
            None => return,
        };
        let current = self.current(pkg);
        if current == Some(cand) {
            // Nothing to install, drop a pending removal if any
            self.states[pkg].mode = Mode::Keep;
            return;
        }
        if self.states[pkg].mode == Mode::Install {
            if from_user {
                self.states[pkg].auto = false;
            }
            return;
        }

        let state = &mut self.states[pkg];
        state.mode = Mode::Install;
        state.purge = false;
        if from_user {
            state.auto = false;
        } else if current.is_none() {
            state.auto = true;
        }

        if auto_inst && depth < MAX_INSTALL_DEPTH {
            self.install_missing(pkg, depth, avoid);
        }
    }

    // Install one alternative of every unsatisfied dependency group of the
    // target version. Returns whether anything was marked.
    fn install_missing(&mut self, pkg: PkgId, depth: usize, avoid: &HashSet<PkgId>) -> bool {
        let ver = match self.target(pkg) {
            Some(v) => v,
            None => return false,
        };
        let data = self.data.clone();
        let mut changed = false;
        for (kind, deps) in &data.versions[ver].relations {
            if !kind.is_critical() {
                continue;
            }
            for dep in deps {
                if self.satisfied(dep) {
                    continue;
                }
                let choice = dep.or_dependencies.iter().find_map(|d| {
                    let target = *data.by_name.get(&d.name)?;
                    let cand = self.states[target].candidate?;
                    if avoid.contains(&target) || !d.satisfied_by(data.version_str(cand)) {
                        return None;
                    }
                    Some(target)
                });
                if let Some(target) = choice {
                    self.mark_install_rec(target, true, false, depth + 1, avoid);
                    changed = true;
                }
            }
        }
        changed
    }

    // Mark and sweep from everything that was explicitly requested
    fn reachable(&self) -> HashSet<PkgId> {
        let mut seen: HashSet<PkgId> = (0..self.states.len())
            .filter(|p| self.target(*p).is_some() && !self.states[*p].auto)
            .collect();
        let mut queue: VecDeque<PkgId> = seen.iter().copied().collect();

        while let Some(pkg) = queue.pop_front() {
            let ver = match self.target(pkg) {
                Some(v) => &self.data.versions[v],
                None => continue,
            };
            for (kind, deps) in &ver.relations {
                if !(kind.is_critical() || *kind == DepKind::Recommends) {
                    continue;
                }
                for d in deps.iter().flat_map(|d| d.or_dependencies.iter()) {
                    if let Some(target) = self.provider(&d.name, |v| d.satisfied_by(v)) {
                        if seen.insert(target) {
                            queue.push_back(target);
                        }
                    }
                }
            }
        }
        seen
    }
}

impl Depcache for InMemoryDepcache {
    fn candidate_version(&self, pkg: PkgId) -> Option<VerId> {
        self.states.get(pkg)?.candidate
    }

    fn set_candidate_version(&mut self, pkg: PkgId, ver: VerId) {
        let belongs = self.data.versions.get(ver).map_or(false, |v| v.package == pkg);
        if belongs {
            self.states[pkg].candidate = Some(ver);
        }
    }

    fn mark_keep(&mut self, pkg: PkgId) {
        if let Some(state) = self.states.get_mut(pkg) {
            state.mode = Mode::Keep;
            state.purge = false;
        }
    }

    fn mark_delete(&mut self, pkg: PkgId, purge: bool) {
        if pkg >= self.states.len() {
            return;
        }
        if self.current(pkg).is_none() {
            self.states[pkg].mode = Mode::Keep;
            return;
        }
        self.states[pkg].mode = Mode::Delete;
        self.states[pkg].purge = purge;
    }

    fn mark_install(&mut self, pkg: PkgId, auto_inst: bool, from_user: bool) {
        self.mark_install_rec(pkg, auto_inst, from_user, 0, &HashSet::new());
    }

    fn marked_install(&self, pkg: PkgId) -> bool {
        self.states.get(pkg).map_or(false, |s| s.mode == Mode::Install) && self.current(pkg).is_none()
    }

    fn marked_upgrade(&self, pkg: PkgId) -> bool {
        self.states.get(pkg).map_or(false, |s| s.mode == Mode::Install)
            && self.cmp_candidate(pkg) == Some(Ordering::Greater)
    }

    fn marked_delete(&self, pkg: PkgId) -> bool {
        self.states.get(pkg).map_or(false, |s| s.mode == Mode::Delete)
    }

    fn marked_keep(&self, pkg: PkgId) -> bool {
        self.states.get(pkg).map_or(false, |s| s.mode == Mode::Keep)
    }

    fn marked_downgrade(&self, pkg: PkgId) -> bool {
        self.states.get(pkg).map_or(false, |s| s.mode == Mode::Install)
            && self.cmp_candidate(pkg) == Some(Ordering::Less)
    }

    fn marked_reinstall(&self, pkg: PkgId) -> bool {
        self.states.get(pkg).map_or(false, |s| s.mode == Mode::Install)
            && self.cmp_candidate(pkg) == Some(Ordering::Equal)
    }

    fn is_upgradable(&self, pkg: PkgId) -> bool {
        self.cmp_candidate(pkg) == Some(Ordering::Greater)
    }

    fn is_garbage(&self, pkg: PkgId) -> bool {
        if self.current(pkg).is_none() || self.target(pkg).is_none() {
            return false;
        }
        self.states[pkg].auto && !self.reachable().contains(&pkg)
    }

    fn broken_count(&self) -> usize {
        self.broken_packages().len()
    }

    fn install_count(&self) -> usize {
        self.states.iter().filter(|s| s.mode == Mode::Install).count()
    }

    fn delete_count(&self) -> usize {
        self.states.iter().filter(|s| s.mode == Mode::Delete).count()
    }

    fn problem_resolver(&mut self) -> Box<dyn ProblemResolver + '_> {
        Box::new(InMemoryResolver {
            cache: self,
            protected: HashSet::new(),
            to_remove: HashSet::new(),
        })
    }

    fn commit(
        &mut self,
        fetch_progress: &mut dyn FetchProgress,
        install_progress: &mut dyn InstallProgress,
    ) -> Result<()> {
        let broken = self.broken_count();
        if broken > 0 {
            return Err(Error::Engine(format!(
                "{} package(s) have unmet dependencies",
                broken
            )));
        }

        let changes: Vec<PkgId> = (0..self.states.len())
            .filter(|p| self.states[*p].mode != Mode::Keep)
            .collect();

        fetch_progress.start();
        for pkg in &changes {
            if self.states[*pkg].mode != Mode::Install {
                continue;
            }
            let name = &self.data.packages[*pkg].name;
            let downloadable = self.states[*pkg]
                .candidate
                .map_or(false, |v| self.data.versions[v].downloadable);
            if !downloadable {
                fetch_progress.item_failed(name, "not downloadable");
                fetch_progress.stop();
                return Err(Error::Engine(format!("{} cannot be downloaded", name)));
            }
            fetch_progress.item_done(name);
        }
        fetch_progress.stop();

        install_progress.start_update();
        for (done, pkg) in changes.iter().enumerate() {
            let state = &mut self.states[*pkg];
            let status = match state.mode {
                Mode::Install => {
                    self.installed.borrow_mut()[*pkg] = state.candidate;
                    "installed"
                }
                _ => {
                    self.installed.borrow_mut()[*pkg] = None;
                    if state.purge {
                        "purged"
                    } else {
                        "removed"
                    }
                }
            };
            state.mode = Mode::Keep;
            state.purge = false;
            let percent = (done + 1) as f32 * 100.0 / changes.len() as f32;
            install_progress.status_change(&self.data.packages[*pkg].name, percent, status);
        }
        install_progress.finish_update();

        Ok(())
    }
}

struct InMemoryResolver<'a> {
    cache: &'a mut InMemoryDepcache,
    protected: HashSet<PkgId>,
    to_remove: HashSet<PkgId>,
}

impl ProblemResolver for InMemoryResolver<'_> {
    fn clear(&mut self, pkg: PkgId) {
        self.protected.remove(&pkg);
        self.to_remove.remove(&pkg);
    }

    fn protect(&mut self, pkg: PkgId) {
        self.protected.insert(pkg);
    }

    fn remove(&mut self, pkg: PkgId) {
        self.to_remove.insert(pkg);
    }

    fn install_protect(&mut self) {
        for (pkg, state) in self.cache.states.iter().enumerate() {
            if state.mode == Mode::Install {
                self.protected.insert(pkg);
            }
        }
    }

    fn resolve(&mut self, broken_ok: bool) -> std::result::Result<(), ResolverError> {
        for pkg in self.to_remove.iter().copied() {
            let installed = self.cache.current(pkg).is_some();
            // Unknown ids are skipped
            if let Some(state) = self.cache.states.get_mut(pkg) {
                state.mode = if installed { Mode::Delete } else { Mode::Keep };
            }
        }

        for _ in 0..MAX_RESOLVER_PASSES {
            let broken = self.cache.broken_packages();
            if broken.is_empty() {
                break;
            }
            let mut changed = false;
            for pkg in broken {
                // An earlier step may already have fixed it
                if !self.cache.is_broken(pkg) {
                    continue;
                }
                if self.protected.contains(&pkg) {
                    changed |= self.cache.install_missing(pkg, 0, &self.to_remove);
                    for other in self.cache.conflicting(pkg) {
                        if self.protected.contains(&other) {
                            continue;
                        }
                        let installed = self.cache.current(other).is_some();
                        self.cache.states[other].mode = if installed { Mode::Delete } else { Mode::Keep };
                        changed = true;
                    }
                } else if self.cache.states[pkg].mode == Mode::Install {
                    self.cache.states[pkg].mode = Mode::Keep;
                    changed = true;
                } else if self.cache.current(pkg).is_some() && self.cache.states[pkg].mode == Mode::Keep {
                    self.cache.states[pkg].mode = Mode::Delete;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let left = self.cache.broken_count();
        if left > 0 && !broken_ok {
            return Err(ResolverError::Unresolvable(left));
        }
        Ok(())
    }
}

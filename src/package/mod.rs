mod changelog;
mod description;
mod version;

pub use description::format_description;
pub use version::Version;

use crate::{
    backend::{FetchProgress, InstallProgress, PkgId},
    cache::Cache,
    error::{Result, TransportError},
    types::strip_epoch,
};
use changelog::{
    expand_template, is_cancelled, not_yet_available, read_changelog, source_prefix,
    source_section, CONNECTION_FAILED, NOT_AVAILABLE,
};

use std::{
    cell::RefCell,
    fmt, fs,
    hash::{Hash, Hasher},
    sync::atomic::AtomicBool,
    time::Duration,
};

/// A named package in the [`Cache`].
///
/// The handle carries no state of its own apart from a memoized changelog;
/// everything else is looked up in the cache on each call.
#[derive(Clone)]
pub struct Package<'c> {
    cache: &'c Cache,
    id: PkgId,
    changelog: RefCell<Option<String>>,
}

impl<'c> Package<'c> {
    pub(crate) fn new(cache: &'c Cache, id: PkgId) -> Self {
        Package {
            cache,
            id,
            changelog: RefCell::new(None),
        }
    }

    pub fn id(&self) -> PkgId {
        self.id
    }

    pub fn name(&self) -> &'c str {
        self.cache
            .catalog()
            .package_name(self.id)
            .unwrap_or_default()
    }

    pub fn installed(&self) -> Option<Version<'c>> {
        let ver = self.cache.catalog().current_version(self.id)?;
        Version::new(self.cache, ver)
    }

    pub fn candidate(&self) -> Option<Version<'c>> {
        let ver = self.cache.depcache().candidate_version(self.id)?;
        Version::new(self.cache, ver)
    }

    /// Make `version` the one that gets installed. Versions of other packages
    /// are ignored.
    pub fn set_candidate(&self, version: &Version) {
        if version.package().id != self.id {
            warn!(
                "Can't use {} as candidate for {}",
                version,
                self.name()
            );
            return;
        }
        let _guard = self.cache.change_guard();
        self.cache
            .depcache_mut()
            .set_candidate_version(self.id, version.id());
    }

    /// Every known version, newest first
    pub fn versions(&self) -> Vec<Version<'c>> {
        self.cache
            .catalog()
            .version_list(self.id)
            .into_iter()
            .filter_map(|v| Version::new(self.cache, v))
            .collect()
    }

    pub fn is_installed(&self) -> bool {
        self.cache.catalog().current_version(self.id).is_some()
    }

    pub fn is_upgradable(&self) -> bool {
        self.is_installed() && self.cache.depcache().is_upgradable(self.id)
    }

    /// Installed only as a dependency of something that no longer needs it
    pub fn is_auto_removable(&self) -> bool {
        self.is_installed() && self.cache.depcache().is_garbage(self.id)
    }

    pub fn marked_install(&self) -> bool {
        self.cache.depcache().marked_install(self.id)
    }

    pub fn marked_upgrade(&self) -> bool {
        self.cache.depcache().marked_upgrade(self.id)
    }

    pub fn marked_delete(&self) -> bool {
        self.cache.depcache().marked_delete(self.id)
    }

    pub fn marked_keep(&self) -> bool {
        self.cache.depcache().marked_keep(self.id)
    }

    pub fn marked_downgrade(&self) -> bool {
        self.cache.depcache().marked_downgrade(self.id)
    }

    pub fn marked_reinstall(&self) -> bool {
        self.cache.depcache().marked_reinstall(self.id)
    }

    /// Files shipped by the installed package, as recorded by dpkg
    pub fn installed_files(&self) -> Vec<String> {
        let path = self
            .cache
            .config()
            .root
            .join("var/lib/dpkg/info")
            .join(format!("{}.list", self.name()));
        match fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .filter(|l| !l.is_empty())
                .map(|l| l.to_owned())
                .collect(),
            Err(e) => {
                debug!("Can't read {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }

    /// Drop any pending change for this package
    pub fn mark_keep(&self) {
        let _guard = self.cache.change_guard();
        self.cache.depcache_mut().mark_keep(self.id);
    }

    /// Mark for removal. With `auto_fix`, the resolver then tries to fix any
    /// breakage by removing more packages; it may fail silently, so check
    /// [`Cache::broken_count`] afterwards.
    pub fn mark_delete(&self, auto_fix: bool, purge: bool) {
        let _guard = self.cache.change_guard();
        let mut depcache = self.cache.depcache_mut();
        depcache.mark_delete(self.id, purge);

        if auto_fix && depcache.broken_count() > 0 {
            let mut fixer = depcache.problem_resolver();
            fixer.clear(self.id);
            fixer.protect(self.id);
            fixer.remove(self.id);
            fixer.install_protect();
            if let Err(e) = fixer.resolve(false) {
                debug!("Failed to fix dependencies after removing {}: {}", self.name(), e);
            }
        }
    }

    /// Mark for installation.
    ///
    /// `auto_inst` pulls in missing dependencies, `from_user` records the
    /// package as manually installed. With `auto_fix`, remaining breakage is
    /// handed to the resolver in best-effort mode.
    pub fn mark_install(&self, auto_fix: bool, auto_inst: bool, from_user: bool) {
        let _guard = self.cache.change_guard();
        let mut depcache = self.cache.depcache_mut();
        depcache.mark_install(self.id, auto_inst, from_user);

        if auto_fix && depcache.broken_count() > 0 {
            let mut fixer = depcache.problem_resolver();
            fixer.clear(self.id);
            fixer.protect(self.id);
            if let Err(e) = fixer.resolve(true) {
                debug!("Failed to fix dependencies after installing {}: {}", self.name(), e);
            }
        }
    }

    pub fn mark_upgrade(&self) {
        if self.is_upgradable() {
            self.mark_install(true, true, true);
        } else {
            warn!("MarkUpgrade() called on a non-upgradable pkg: '{}'", self.name());
        }
    }

    /// Apply all pending changes of the cache, not only this package's
    pub fn commit(
        &self,
        fetch_progress: &mut dyn FetchProgress,
        install_progress: &mut dyn InstallProgress,
    ) -> Result<()> {
        self.cache.commit(fetch_progress, install_progress)
    }

    /// The changes between the installed version and the candidate.
    ///
    /// `uri` overrides the template picked from the candidate's origin; it may
    /// contain `{src_section}`, `{prefix}`, `{src_pkg}` and `{src_ver}`.
    /// Setting `cancel` aborts the download and yields an empty string. Network
    /// problems come back as a message meant for the user.
    pub fn changelog(
        &self,
        uri: Option<&str>,
        cancel: Option<&AtomicBool>,
        timeout: Option<Duration>,
    ) -> String {
        if let Some(cached) = self.changelog.borrow().as_ref() {
            return cached.clone();
        }

        let candidate = match self.candidate() {
            Some(c) => c,
            None => return NOT_AVAILABLE.to_owned(),
        };
        let config = self.cache.config();
        let template = match uri {
            Some(uri) => uri.to_owned(),
            None => {
                let origin = candidate.origins().into_iter().next().map(|o| o.origin);
                match origin.as_deref().and_then(|o| config.changelog_template(o)) {
                    Some(t) => t.to_owned(),
                    None => return NOT_AVAILABLE.to_owned(),
                }
            }
        };

        let src_pkg = candidate.source_name();
        let mut section = candidate.section().to_owned();
        let mut src_ver = candidate.version().to_owned();
        // Source and binary versions differ for some packages
        match self.cache.catalog().source_records(&src_pkg).first() {
            Some(record) => {
                if !record.version.is_empty() {
                    src_ver = record.version.clone();
                }
                section = record.section.clone();
            }
            None => debug!("No source record for {}, using binary version", src_pkg),
        }
        let src_ver = strip_epoch(&src_ver);
        let uri = expand_template(
            &template,
            source_section(&section),
            &source_prefix(&src_pkg),
            &src_pkg,
            src_ver,
        );

        if is_cancelled(cancel) {
            return String::new();
        }
        let timeout = timeout.unwrap_or_else(|| config.changelog_timeout());
        debug!("Fetching changelog of {} from {}", self.name(), uri);
        let reader = match self.cache.transport().open(&uri, timeout) {
            Ok(r) => r,
            Err(e @ TransportError::NotFound) | Err(e @ TransportError::Http(_)) => {
                debug!("Changelog of {} not available: {}", self.name(), e);
                return not_yet_available(&src_pkg, src_ver);
            }
            Err(e) => {
                debug!("Failed to download changelog of {}: {}", self.name(), e);
                return CONNECTION_FAILED.to_owned();
            }
        };

        let installed = self.installed().map(|v| v.version());
        match read_changelog(reader, &src_pkg, installed, cancel) {
            Ok(Some(text)) => {
                let text = if text.is_empty() {
                    NOT_AVAILABLE.to_owned()
                } else {
                    text
                };
                *self.changelog.borrow_mut() = Some(text.clone());
                text
            }
            Ok(None) => String::new(),
            Err(e) => {
                debug!("Failed to read changelog of {}: {}", self.name(), e);
                CONNECTION_FAILED.to_owned()
            }
        }
    }
}

impl PartialEq for Package<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Package<'_> {}

impl Hash for Package<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Package<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Package<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Package")
            .field("name", &self.name())
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod test;

use crate::{
    backend::{
        Acquire, AcquireItem, Catalog, ChangelogTransport, Depcache, FetchProgress, HttpAcquire,
        HttpTransport, InstallProgress, ItemStatus,
    },
    config::Config,
    error::Result,
    package::Package,
};

use std::{
    cell::{Cell, OnceCell, Ref, RefCell, RefMut},
    fmt,
};

/// Aggregate counters handed to change observers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheChange {
    pub broken: usize,
    pub install: usize,
    pub delete: usize,
}

type Observer = Box<dyn Fn(&CacheChange)>;

/// The package store every [`Package`] and [`Version`](crate::Version) handle
/// borrows from.
///
/// All state changes go through interior mutability, so handles only need a
/// shared borrow. Swapping the underlying catalog with [`Cache::reload`] needs
/// exclusive access, which guarantees no handle outlives the data it points
/// into.
///
/// The HTTP download engine and changelog transport are only built on first
/// use, and never when replaced beforehand.
pub struct Cache {
    catalog: Box<dyn Catalog>,
    depcache: RefCell<Box<dyn Depcache>>,
    acquire: RefCell<Option<Box<dyn Acquire>>>,
    transport: OnceCell<Box<dyn ChangelogTransport>>,
    config: Config,
    generation: u64,
    change_depth: Cell<usize>,
    observers: RefCell<Vec<Observer>>,
}

impl Cache {
    pub fn new(catalog: Box<dyn Catalog>, depcache: Box<dyn Depcache>, config: Config) -> Self {
        Cache {
            catalog,
            depcache: RefCell::new(depcache),
            acquire: RefCell::new(None),
            transport: OnceCell::new(),
            config,
            generation: 0,
            change_depth: Cell::new(0),
            observers: RefCell::new(Vec::new()),
        }
    }

    /// Use another transport for changelog downloads
    pub fn with_transport(mut self, transport: impl ChangelogTransport + 'static) -> Self {
        self.transport = OnceCell::from(Box::new(transport) as Box<dyn ChangelogTransport>);
        self
    }

    /// Use another download engine for package files
    pub fn with_acquire(mut self, acquire: impl Acquire + 'static) -> Self {
        self.acquire = RefCell::new(Some(Box::new(acquire)));
        self
    }

    pub fn get(&self, name: &str) -> Option<Package<'_>> {
        self.catalog
            .find_package(name)
            .map(|id| Package::new(self, id))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.catalog.find_package(name).is_some()
    }

    pub fn packages(&self) -> impl Iterator<Item = Package<'_>> + '_ {
        self.catalog
            .package_ids()
            .into_iter()
            .map(move |id| Package::new(self, id))
    }

    pub fn len(&self) -> usize {
        self.catalog.package_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn broken_count(&self) -> usize {
        self.depcache.borrow().broken_count()
    }

    pub fn install_count(&self) -> usize {
        self.depcache.borrow().install_count()
    }

    pub fn delete_count(&self) -> usize {
        self.depcache.borrow().delete_count()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of times the catalog has been replaced
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Swap in a freshly loaded catalog. Pending changes are lost.
    pub fn reload(&mut self, catalog: Box<dyn Catalog>, depcache: Box<dyn Depcache>) {
        self.catalog = catalog;
        self.depcache = RefCell::new(depcache);
        self.generation += 1;
        debug!("Package cache reloaded, generation {}", self.generation);
    }

    /// Call `f` after every state-changing operation, once per operation
    pub fn on_change(&self, f: impl Fn(&CacheChange) + 'static) {
        self.observers.borrow_mut().push(Box::new(f));
    }

    /// Fetch and install everything that has been marked
    pub fn commit(
        &self,
        fetch_progress: &mut dyn FetchProgress,
        install_progress: &mut dyn InstallProgress,
    ) -> Result<()> {
        let _guard = self.change_guard();
        self.depcache
            .borrow_mut()
            .commit(fetch_progress, install_progress)
    }

    pub(crate) fn catalog(&self) -> &dyn Catalog {
        &*self.catalog
    }

    pub(crate) fn depcache(&self) -> Ref<'_, Box<dyn Depcache>> {
        self.depcache.borrow()
    }

    pub(crate) fn depcache_mut(&self) -> RefMut<'_, Box<dyn Depcache>> {
        self.depcache.borrow_mut()
    }

    pub(crate) fn transport(&self) -> &dyn ChangelogTransport {
        &**self
            .transport
            .get_or_init(|| Box::new(HttpTransport::new()))
    }

    pub(crate) fn acquire(&self, items: &[AcquireItem], progress: &mut dyn FetchProgress) -> Vec<ItemStatus> {
        self.acquire
            .borrow_mut()
            .get_or_insert_with(|| Box::new(HttpAcquire::new()))
            .run(items, progress)
    }

    /// Open a pre-change/post-change bracket. Nested brackets collapse into
    /// the outermost one.
    pub(crate) fn change_guard(&self) -> ChangeGuard<'_> {
        self.change_depth.set(self.change_depth.get() + 1);
        ChangeGuard { cache: self }
    }

    fn post_change(&self) {
        // The depcache may still be borrowed when unwinding
        let change = match self.depcache.try_borrow() {
            Ok(depcache) => CacheChange {
                broken: depcache.broken_count(),
                install: depcache.install_count(),
                delete: depcache.delete_count(),
            },
            Err(_) => return,
        };
        debug!(
            "Cache changed: {} broken, {} to install, {} to remove",
            change.broken, change.install, change.delete
        );
        if let Ok(observers) = self.observers.try_borrow() {
            for f in observers.iter() {
                f(&change);
            }
        }
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Cache")
            .field("packages", &self.len())
            .field("generation", &self.generation)
            .field("config", &self.config)
            .finish()
    }
}

pub(crate) struct ChangeGuard<'c> {
    cache: &'c Cache,
}

impl Drop for ChangeGuard<'_> {
    fn drop(&mut self) {
        let depth = self.cache.change_depth.get().saturating_sub(1);
        self.cache.change_depth.set(depth);
        if depth == 0 {
            self.cache.post_change();
        }
    }
}

//! Package, version and dependency handles over a Debian-style package cache.
//!
//! ```no_run
//! use aptcache::{backend::InMemoryCache, Config};
//!
//! let mut mem = InMemoryCache::new();
//! mem.add_status(&std::fs::read_to_string("/var/lib/dpkg/status")?)?;
//! let cache = mem.into_cache(Config::default());
//! if let Some(pkg) = cache.get("bash") {
//!     pkg.mark_delete(true, false);
//!     println!("{} broken after removing {}", cache.broken_count(), pkg);
//! }
//! # Ok::<(), aptcache::Error>(())
//! ```
#[macro_use]
mod logging;

pub mod backend;
mod cache;
pub mod config;
pub mod error;
mod package;
pub mod types;

pub use cache::{Cache, CacheChange};
pub use config::Config;
pub use error::{Error, Result};
pub use logging::set_verbose;
pub use package::{format_description, Package, Version};
pub use types::{BaseDependency, DepKind, Dependency, Origin, Record, Relation};

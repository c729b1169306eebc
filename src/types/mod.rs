mod checksum;
mod dependency;
mod origin;
mod record;
mod version;

pub use checksum::{file_is_same, Checksum, ChecksumValidator};
pub use dependency::{parse_dependencies, BaseDependency, DepKind, Dependency, Relation};
pub use origin::Origin;
pub use record::Record;
pub use version::{compare_versions, parse_version, strip_epoch, upstream_version, PkgVersion};

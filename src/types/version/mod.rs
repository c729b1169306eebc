mod pkgversion;

pub use pkgversion::{compare_versions, parse_version, strip_epoch, upstream_version, PkgVersion};

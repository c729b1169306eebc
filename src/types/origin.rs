use crate::backend::{IndexFile, PackageFile};

/// Where a version came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Origin {
    /// The archive (eg. unstable)
    pub archive: String,
    /// The component (eg. main)
    pub component: String,
    /// The Label, as set in the Release file
    pub label: String,
    /// The Origin, as set in the Release file
    pub origin: String,
    /// The hostname of the site
    pub site: String,
    pub not_automatic: bool,
    /// Whether the index this version was found in is signed and verified
    pub trusted: bool,
}

impl Origin {
    pub fn new(file: &PackageFile, index: Option<&IndexFile>) -> Self {
        Origin {
            archive: file.archive.clone(),
            component: file.component.clone(),
            label: file.label.clone(),
            origin: file.origin.clone(),
            site: file.site.clone(),
            not_automatic: file.not_automatic,
            trusted: index.map_or(false, |i| i.trusted),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trust_comes_from_index() {
        let file = PackageFile {
            archive: "stable".to_owned(),
            component: "main".to_owned(),
            origin: "Debian".to_owned(),
            label: "Debian".to_owned(),
            site: "deb.debian.org".to_owned(),
            not_automatic: false,
            index: Some(0),
        };
        let signed = IndexFile {
            base_uri: "http://deb.debian.org/debian".to_owned(),
            trusted: true,
        };
        let unsigned = IndexFile {
            trusted: false,
            ..signed.clone()
        };

        assert!(Origin::new(&file, Some(&signed)).trusted);
        assert!(!Origin::new(&file, Some(&unsigned)).trusted);
        let orphan = Origin::new(&file, None);
        assert!(!orphan.trusted);
        assert_eq!(orphan.archive, "stable");
        assert_eq!(orphan.site, "deb.debian.org");
    }
}

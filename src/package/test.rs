use super::*;
use crate::{
    backend::{
        Acquire, AcquireItem, ChangelogTransport, IndexFile, InMemoryCache, ItemStatus,
        PackageFile, QuietProgress,
    },
    config::Config,
    error::Error,
    types::DepKind,
};

use std::{
    cell::Cell,
    io::{BufRead, Cursor},
    path::PathBuf,
    rc::Rc,
    sync::{atomic::Ordering, Arc},
};

const PACKAGES: &str = "Package: hello
Version: 1:2.10-3
Architecture: amd64
Source: hello-src (2.10-3)
Section: devel
Priority: optional
Size: 5
Installed-Size: 10
Pre-Depends: libc6 (>= 2.34)
Depends: libfoo (>= 1.0), libbar | libbaz
Homepage: https://www.gnu.org/software/hello/
Filename: pool/main/h/hello-src/hello_2.10-3_amd64.deb
MD5sum: 5d41402abc4b2a76b9719d911017c592
SHA256: 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
Description: example package
 Para one.
 .
  verbatim line
 More para.

Package: libc6
Version: 2.36-9
Architecture: amd64
Section: libs
Filename: pool/main/g/glibc/libc6_2.36-9_amd64.deb
Description: GNU C Library

Package: libfoo
Version: 1.2-1
Architecture: amd64
Section: libs
Filename: pool/main/libf/libfoo/libfoo_1.2-1_amd64.deb
Description: foo library

Package: libbaz
Version: 0.5
Architecture: amd64
Section: libs
Filename: pool/main/libb/libbaz/libbaz_0.5_amd64.deb
Description: baz library

Package: libxml2
Version: 2.9.14+dfsg-1
Architecture: amd64
Section: libs
Filename: pool/main/libx/libxml2/libxml2_2.9.14+dfsg-1_amd64.deb
Description: GNOME XML library

Package: rival
Version: 1.0
Architecture: amd64
Conflicts: libfoo
Filename: pool/main/r/rival/rival_1.0_amd64.deb
Description: conflicts with libfoo
";

const OTHER_PACKAGES: &str = "Package: orphan
Version: 1.0
Architecture: all
Filename: pool/main/o/orphan/orphan_1.0_all.deb
Description: from elsewhere
";

const STATUS: &str = "Package: hello
Status: install ok installed
Version: 1:2.10-1
Architecture: amd64
Depends: libfoo
Description: example package

Package: libc6
Status: install ok installed
Version: 2.36-9
Architecture: amd64
Description: GNU C Library

Package: libfoo
Status: install ok installed
Version: 1.2-1
Architecture: amd64
Description: foo library
";

const SOURCES: &str = "Package: hello-src
Version: 1:2.10-3
Section: contrib/devel
Directory: pool/contrib/h/hello-src
Files:
 5d41402abc4b2a76b9719d911017c592 5 hello-src_2.10-3.dsc
";

const CHANGELOG: &str = "hello-src (1:2.10-3) unstable; urgency=medium

  * Third upload.

 -- Jane Doe <jane@example.org>  Mon, 01 Jan 2024 00:00:00 +0000

hello-src (2.10-2) unstable; urgency=medium

  * Second upload.

hello-src (1:2.10-1) unstable; urgency=low

  * First upload.
";

const HELLO_CHANGELOG_URI: &str =
    "http://packages.debian.org/changelogs/pool/main/h/hello-src/hello-src_2.10-3/changelog";

struct FakeTransport {
    calls: Rc<RefCell<Vec<String>>>,
    response: std::result::Result<&'static str, TransportError>,
    cancel_on_open: Option<Arc<AtomicBool>>,
}

impl ChangelogTransport for FakeTransport {
    fn open(
        &self,
        uri: &str,
        _timeout: Duration,
    ) -> std::result::Result<Box<dyn BufRead>, TransportError> {
        self.calls.borrow_mut().push(uri.to_owned());
        if let Some(flag) = &self.cancel_on_open {
            flag.store(true, Ordering::SeqCst);
        }
        match self.response {
            Ok(text) => Ok(Box::new(Cursor::new(text.as_bytes()))),
            Err(ref e) => Err(e.clone()),
        }
    }
}

// Writes "hello" to every destination
struct FakeAcquire {
    runs: Rc<Cell<usize>>,
    uris: Rc<RefCell<Vec<String>>>,
    fail: bool,
}

impl Acquire for FakeAcquire {
    fn run(&mut self, items: &[AcquireItem], _progress: &mut dyn FetchProgress) -> Vec<ItemStatus> {
        self.runs.set(self.runs.get() + 1);
        items
            .iter()
            .map(|item| {
                self.uris.borrow_mut().push(item.uri.clone());
                if self.fail {
                    return ItemStatus::Error("connection reset".to_owned());
                }
                fs::create_dir_all(item.destination.parent().unwrap()).unwrap();
                fs::write(&item.destination, b"hello").unwrap();
                ItemStatus::Done
            })
            .collect()
    }
}

fn mem() -> InMemoryCache {
    let mut mem = InMemoryCache::new();
    let debian = mem.add_index(IndexFile {
        base_uri: "http://deb.debian.org/debian".to_owned(),
        trusted: true,
    });
    let devuan = mem.add_index(IndexFile {
        base_uri: "http://pkginfo.devuan.org/merged".to_owned(),
        trusted: false,
    });
    let file = mem.add_package_file(PackageFile {
        archive: "unstable".to_owned(),
        component: "main".to_owned(),
        origin: "Debian".to_owned(),
        label: "Debian".to_owned(),
        site: "deb.debian.org".to_owned(),
        not_automatic: false,
        index: Some(debian),
    });
    let other = mem.add_package_file(PackageFile {
        archive: "ceres".to_owned(),
        component: "main".to_owned(),
        origin: "Devuan".to_owned(),
        label: "Devuan".to_owned(),
        site: "pkginfo.devuan.org".to_owned(),
        not_automatic: false,
        index: Some(devuan),
    });
    mem.add_packages(PACKAGES, file).unwrap();
    mem.add_packages(OTHER_PACKAGES, other).unwrap();
    mem.add_status(STATUS).unwrap();
    mem
}

fn with_transport(
    cache: Cache,
    response: std::result::Result<&'static str, TransportError>,
) -> (Cache, Rc<RefCell<Vec<String>>>) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let cache = cache.with_transport(FakeTransport {
        calls: calls.clone(),
        response,
        cancel_on_open: None,
    });
    (cache, calls)
}

fn with_acquire(cache: Cache, fail: bool) -> (Cache, Rc<Cell<usize>>, Rc<RefCell<Vec<String>>>) {
    let runs = Rc::new(Cell::new(0));
    let uris = Rc::new(RefCell::new(Vec::new()));
    let cache = cache.with_acquire(FakeAcquire {
        runs: runs.clone(),
        uris: uris.clone(),
        fail,
    });
    (cache, runs, uris)
}

#[test]
fn versions_and_selection() {
    let cache = mem().into_cache(Config::default());
    let hello = cache.get("hello").unwrap();
    assert_eq!(hello.name(), "hello");
    assert_eq!(hello.to_string(), "hello");
    assert!(hello.is_installed());
    assert!(hello.is_upgradable());
    assert!(!cache.get("libfoo").unwrap().is_upgradable());
    assert!(!cache.get("rival").unwrap().is_installed());

    let candidate = hello.candidate().unwrap();
    let installed = hello.installed().unwrap();
    assert_eq!(candidate.version(), "1:2.10-3");
    assert_eq!(installed.version(), "1:2.10-1");
    assert!(candidate > installed);
    assert!(installed.is_installed());
    assert!(!candidate.is_installed());
    assert_eq!(candidate.package(), hello);

    let versions = hello.versions();
    assert_eq!(versions, vec![candidate, installed]);
    let mut sorted = versions.clone();
    sorted.sort();
    assert_eq!(sorted, vec![installed, candidate]);

    // Same handle, same identity
    assert_eq!(hello.candidate().unwrap(), candidate);
    assert_eq!(candidate.cmp(&candidate), std::cmp::Ordering::Equal);
}

#[test]
fn version_properties() {
    let cache = mem().into_cache(Config::default());
    let hello = cache.get("hello").unwrap();
    let v = hello.candidate().unwrap();

    assert_eq!(v.architecture(), "amd64");
    assert_eq!(v.section(), "devel");
    assert_eq!(v.priority(), "optional");
    assert_eq!(v.size(), 5);
    assert_eq!(v.installed_size(), 10 * 1024);
    assert!(v.downloadable());
    assert_eq!(v.homepage().as_deref(), Some("https://www.gnu.org/software/hello/"));
    assert_eq!(
        v.filename().as_deref(),
        Some("pool/main/h/hello-src/hello_2.10-3_amd64.deb")
    );
    assert_eq!(v.md5().as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));
    assert_eq!(v.sha1(), None);
    assert!(v.sha256().is_some());
    assert!(matches!(v.checksum(), Some(crate::types::Checksum::Sha256(_))));
    assert_eq!(v.source_name(), "hello-src");
    assert_eq!(cache.get("libfoo").unwrap().candidate().unwrap().source_name(), "libfoo");

    assert_eq!(v.summary().as_deref(), Some("example package"));
    assert_eq!(
        v.raw_description(),
        "example package\n Para one.\n .\n  verbatim line\n More para."
    );
    assert_eq!(v.description(), "Para one.\n\nverbatim line\nMore para.");

    let record = v.record().unwrap();
    assert_eq!(record.get("Package"), Some("hello"));
    assert!(record.to_string().starts_with("Package: hello\nVersion: 1:2.10-3\n"));

    assert_eq!(
        v.uris(),
        vec!["http://deb.debian.org/debian/pool/main/h/hello-src/hello_2.10-3_amd64.deb"]
    );
    assert_eq!(v.uri(), v.uris().into_iter().next());

    let origins = v.origins();
    assert_eq!(origins.len(), 1);
    assert_eq!(origins[0].origin, "Debian");
    assert_eq!(origins[0].archive, "unstable");
    assert!(origins[0].trusted);

    let installed = hello.installed().unwrap();
    assert_eq!(installed.origins()[0].archive, "now");
    assert!(installed.uris().is_empty());
    assert!(!installed.downloadable());

    let orphan = cache.get("orphan").unwrap().candidate().unwrap();
    assert!(!orphan.origins()[0].trusted);
}

#[test]
fn dependency_order() {
    let cache = mem().into_cache(Config::default());
    let v = cache.get("hello").unwrap().candidate().unwrap();

    let deps = v.dependencies();
    assert_eq!(deps.len(), 3);
    assert_eq!(deps[0].or_dependencies[0].name, "libc6");
    assert!(deps[0].or_dependencies[0].pre_depend);
    assert_eq!(deps[1].to_string(), "libfoo (>= 1.0)");
    assert!(!deps[1].or_dependencies[0].pre_depend);
    assert_eq!(deps[2].to_string(), "libbar | libbaz");

    let reversed = v.get_dependencies(&[DepKind::Depends, DepKind::PreDepends]);
    assert_eq!(reversed[0].or_dependencies[0].name, "libfoo");
    assert_eq!(reversed[2].or_dependencies[0].name, "libc6");
    assert!(v.recommends().is_empty());

    let rival = cache.get("rival").unwrap().candidate().unwrap();
    assert!(rival.dependencies().is_empty());
    assert_eq!(rival.get_dependencies(&[DepKind::Conflicts]).len(), 1);
}

#[test]
fn invalid_description() {
    let mut mem = mem();
    assert!(mem.set_translated_description("hello", "1:2.10-3", b"summary\n caf\xe9".to_vec()));
    assert!(!mem.set_translated_description("hello", "9", Vec::new()));
    let cache = mem.into_cache(Config::default());
    let v = cache.get("hello").unwrap().candidate().unwrap();
    assert!(v
        .description()
        .starts_with("Invalid unicode in description for 'hello' ("));
}

#[test]
fn delete_then_keep() {
    let cache = mem().into_cache(Config::default());
    let libfoo = cache.get("libfoo").unwrap();
    let before = cache.broken_count();
    assert_eq!(before, 0);

    libfoo.mark_delete(false, false);
    assert!(libfoo.marked_delete());
    assert_eq!(cache.broken_count(), 1);
    libfoo.mark_keep();
    assert!(libfoo.marked_keep());
    assert_eq!(cache.broken_count(), before);
}

#[test]
fn delete_with_auto_fix() {
    let cache = mem().into_cache(Config::default());
    cache.get("libfoo").unwrap().mark_delete(true, true);
    assert!(cache.get("hello").unwrap().marked_delete());
    assert_eq!(cache.broken_count(), 0);
    assert_eq!(cache.delete_count(), 2);
}

#[test]
fn install_and_upgrade() {
    let cache = mem().into_cache(Config::default());
    let hello = cache.get("hello").unwrap();
    let libbaz = cache.get("libbaz").unwrap();

    hello.mark_upgrade();
    assert!(hello.marked_upgrade());
    assert!(!hello.marked_install());
    assert!(libbaz.marked_install());
    assert_eq!(cache.install_count(), 2);
    assert_eq!(cache.broken_count(), 0);

    // Not upgradable: diagnostic only
    let libfoo = cache.get("libfoo").unwrap();
    libfoo.mark_upgrade();
    assert!(libfoo.marked_keep());

    // The conflicting libfoo goes, and hello with it
    let rival = cache.get("rival").unwrap();
    rival.mark_install(true, true, true);
    assert!(rival.marked_install());
    assert!(libfoo.marked_delete());
    assert!(hello.marked_delete());
    assert_eq!(cache.broken_count(), 0);
}

#[test]
fn candidate_override() {
    let cache = mem().into_cache(Config::default());
    let hello = cache.get("hello").unwrap();
    let installed = hello.installed().unwrap();
    let candidate = hello.candidate().unwrap();

    // The installed version can't be downloaded, so use a foreign one
    let libfoo = cache.get("libfoo").unwrap().candidate().unwrap();
    hello.set_candidate(&libfoo);
    assert_eq!(hello.candidate(), Some(candidate));

    hello.set_candidate(&installed);
    assert_eq!(hello.candidate(), Some(installed));
    hello.mark_install(false, false, true);
    assert!(hello.marked_keep());
    assert!(!hello.marked_downgrade());
    assert!(!hello.is_upgradable());
}

#[test]
fn change_notifications() {
    let cache = mem().into_cache(Config::default());
    let fired = Rc::new(Cell::new(0));
    let counter = fired.clone();
    cache.on_change(move |_| counter.set(counter.get() + 1));

    let hello = cache.get("hello").unwrap();
    hello.mark_install(true, true, true);
    assert_eq!(fired.get(), 1);
    hello.mark_keep();
    assert_eq!(fired.get(), 2);
    hello.mark_upgrade();
    assert_eq!(fired.get(), 3);
    cache.get("libfoo").unwrap().mark_upgrade();
    assert_eq!(fired.get(), 3);
    cache.get("libfoo").unwrap().mark_delete(true, false);
    assert_eq!(fired.get(), 4);
}

#[test]
fn commit() {
    let cache = mem().into_cache(Config::default());
    let hello = cache.get("hello").unwrap();
    hello.mark_upgrade();
    hello.commit(&mut QuietProgress, &mut QuietProgress).unwrap();
    assert_eq!(hello.installed().unwrap().version(), "1:2.10-3");
    assert!(cache.get("libbaz").unwrap().is_installed());
    assert!(!hello.is_upgradable());
}

#[test]
fn auto_removable() {
    let mut mem = mem();
    mem.mark_auto_installed("libc6");
    mem.mark_auto_installed("libfoo");
    let cache = mem.into_cache(Config::default());
    assert!(cache.get("libc6").unwrap().is_auto_removable());
    assert!(!cache.get("libfoo").unwrap().is_auto_removable());
    assert!(!cache.get("hello").unwrap().is_auto_removable());
    assert!(!cache.get("libbaz").unwrap().is_auto_removable());
}

#[test]
fn installed_files() {
    let root = tempfile::tempdir().unwrap();
    let info = root.path().join("var/lib/dpkg/info");
    fs::create_dir_all(&info).unwrap();
    fs::write(info.join("hello.list"), "/.\n/usr\n/usr/bin/hello\n").unwrap();

    let config = Config {
        root: root.path().to_owned(),
        ..Default::default()
    };
    let cache = mem().into_cache(config);
    assert_eq!(
        cache.get("hello").unwrap().installed_files(),
        vec!["/.", "/usr", "/usr/bin/hello"]
    );
    assert!(cache.get("libfoo").unwrap().installed_files().is_empty());
}

#[test]
fn changelog_stops_at_installed() {
    let (cache, calls) = with_transport(mem().into_cache(Config::default()), Ok(CHANGELOG));
    let hello = cache.get("hello").unwrap();

    let text = hello.changelog(None, None, None);
    assert!(text.contains("Third upload."));
    assert!(text.contains("Second upload."));
    assert!(!text.contains("First upload."));
    assert_eq!(*calls.borrow(), vec![HELLO_CHANGELOG_URI]);

    // Memoized
    assert_eq!(hello.changelog(None, None, None), text);
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn changelog_uses_source_record() {
    let mut mem = mem();
    mem.add_sources(SOURCES, Some(0)).unwrap();
    let (cache, calls) = with_transport(mem.into_cache(Config::default()), Ok(CHANGELOG));
    cache.get("hello").unwrap().changelog(None, None, None);
    assert_eq!(
        *calls.borrow(),
        vec!["http://packages.debian.org/changelogs/pool/contrib/h/hello-src/hello-src_2.10-3/changelog"]
    );
}

#[test]
fn changelog_cancelled() {
    let (cache, calls) = with_transport(mem().into_cache(Config::default()), Ok(CHANGELOG));
    let hello = cache.get("hello").unwrap();
    let flag = AtomicBool::new(true);

    assert_eq!(hello.changelog(None, Some(&flag), None), "");
    assert!(calls.borrow().is_empty());

    flag.store(false, Ordering::SeqCst);
    assert!(hello.changelog(None, Some(&flag), None).contains("Third upload."));
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn changelog_cancelled_while_reading() {
    let flag = Arc::new(AtomicBool::new(false));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let cache = mem()
        .into_cache(Config::default())
        .with_transport(FakeTransport {
            calls: calls.clone(),
            response: Ok(CHANGELOG),
            cancel_on_open: Some(flag.clone()),
        });
    let hello = cache.get("hello").unwrap();

    assert_eq!(hello.changelog(None, Some(flag.as_ref()), None), "");
    // Nothing was memoized
    assert!(!hello.changelog(None, None, None).is_empty());
    assert_eq!(calls.borrow().len(), 2);
}

#[test]
fn changelog_failures() {
    let tests = vec![
        (
            Err(TransportError::NotFound),
            "The list of changes is not available yet.\n\nPlease use https://launchpad.net/ubuntu/+source/hello-src/2.10-3/+changelog\nuntil the changes become available or try again later.",
        ),
        (
            Err(TransportError::Http(503)),
            "The list of changes is not available yet.\n\nPlease use https://launchpad.net/ubuntu/+source/hello-src/2.10-3/+changelog\nuntil the changes become available or try again later.",
        ),
        (
            Err(TransportError::Connection("timed out".to_owned())),
            "Failed to download the list of changes. \nPlease check your Internet connection.",
        ),
        (Ok(""), "The list of changes is not available"),
    ];

    for (response, expected) in tests {
        let memoized = response.is_ok();
        let (cache, calls) = with_transport(mem().into_cache(Config::default()), response);
        let hello = cache.get("hello").unwrap();
        assert_eq!(hello.changelog(None, None, None), expected);
        assert_eq!(hello.changelog(None, None, None), expected);
        assert_eq!(calls.borrow().len(), if memoized { 1 } else { 2 });
    }
}

#[test]
fn changelog_templates() {
    // No template for this origin
    let (cache, calls) = with_transport(mem().into_cache(Config::default()), Ok(CHANGELOG));
    assert_eq!(
        cache.get("orphan").unwrap().changelog(None, None, None),
        "The list of changes is not available"
    );
    assert!(calls.borrow().is_empty());

    // Caller supplied template
    cache
        .get("libxml2")
        .unwrap()
        .changelog(Some("http://x/{src_section}/{prefix}/{src_pkg}/{src_ver}"), None, None);
    assert_eq!(*calls.borrow(), vec!["http://x/main/libx/libxml2/2.9.14+dfsg-1"]);

    // Configured template
    let config = Config {
        changelog_templates: vec![(
            "Devuan".to_owned(),
            "http://pkginfo/{src_pkg}_{src_ver}".to_owned(),
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    let (cache, calls) = with_transport(mem().into_cache(config), Ok("orphan (1.0) x\n"));
    assert_eq!(
        cache.get("orphan").unwrap().changelog(None, None, None),
        "orphan (1.0) x\n"
    );
    assert_eq!(*calls.borrow(), vec!["http://pkginfo/orphan_1.0"]);
}

#[test]
fn fetch_binary() {
    let dir = tempfile::tempdir().unwrap();
    let (cache, runs, uris) = with_acquire(mem().into_cache(Config::default()), false);
    let v = cache.get("hello").unwrap().candidate().unwrap();

    let path = v.fetch_binary(dir.path(), &mut QuietProgress).unwrap();
    assert!(path.is_absolute());
    assert_eq!(path.file_name().unwrap(), "hello_2.10-3_amd64.deb");
    assert_eq!(
        *uris.borrow(),
        vec!["http://deb.debian.org/debian/pool/main/h/hello-src/hello_2.10-3_amd64.deb"]
    );
    assert_eq!(runs.get(), 1);

    // Already there with the right checksum
    assert_eq!(v.fetch_binary(dir.path(), &mut QuietProgress).unwrap(), path);
    assert_eq!(runs.get(), 1);

    let dir = tempfile::tempdir().unwrap();
    let (cache, _, _) = with_acquire(mem().into_cache(Config::default()), true);
    let v = cache.get("hello").unwrap().candidate().unwrap();
    assert!(matches!(
        v.fetch_binary(dir.path(), &mut QuietProgress),
        Err(Error::Fetch { .. })
    ));

    // The installed version comes from nowhere
    let installed = cache.get("hello").unwrap().installed().unwrap();
    assert!(matches!(
        installed.fetch_binary(dir.path(), &mut QuietProgress),
        Err(Error::NoUri(_))
    ));
}

#[test]
fn fetch_source() {
    let dir = tempfile::tempdir().unwrap();
    let mut mem = mem();
    mem.add_sources(SOURCES, Some(0)).unwrap();
    let (cache, runs, uris) = with_acquire(mem.into_cache(Config::default()), false);
    let v = cache.get("hello").unwrap().candidate().unwrap();

    let dsc = v.fetch_source(dir.path(), &mut QuietProgress, false).unwrap();
    assert_eq!(dsc, fs::canonicalize(dir.path().join("hello-src_2.10-3.dsc")).unwrap());
    assert_eq!(
        *uris.borrow(),
        vec!["http://deb.debian.org/debian/pool/contrib/h/hello-src/hello-src_2.10-3.dsc"]
    );

    // Unpacked tree already present
    let unpacked: PathBuf = dir.path().join("hello-src-2.10");
    fs::create_dir(&unpacked).unwrap();
    assert_eq!(
        v.fetch_source(dir.path(), &mut QuietProgress, true).unwrap(),
        fs::canonicalize(&unpacked).unwrap()
    );
    assert_eq!(runs.get(), 1);

    let libfoo = cache.get("libfoo").unwrap().candidate().unwrap();
    assert!(matches!(
        libfoo.fetch_source(dir.path(), &mut QuietProgress, false),
        Err(Error::NoSource(_))
    ));
}

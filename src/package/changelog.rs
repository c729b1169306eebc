use crate::types::{compare_versions, strip_epoch};

use regex::Regex;
use std::{
    cmp::Ordering,
    io::{self, BufRead},
    sync::atomic::{AtomicBool, Ordering as AtomicOrdering},
};

pub(crate) const NOT_AVAILABLE: &str = "The list of changes is not available";
pub(crate) const CONNECTION_FAILED: &str =
    "Failed to download the list of changes. \nPlease check your Internet connection.";

pub(crate) fn not_yet_available(src_pkg: &str, src_ver: &str) -> String {
    format!(
        "The list of changes is not available yet.\n\n\
         Please use https://launchpad.net/ubuntu/+source/{}/{}/+changelog\n\
         until the changes become available or try again later.",
        src_pkg, src_ver
    )
}

/// Pool directory prefix: `hello` lives under `h`, `libfoo` under `libf`
pub(crate) fn source_prefix(src_pkg: &str) -> String {
    if let Some(rest) = src_pkg.strip_prefix("lib") {
        if let Some(c) = rest.chars().next() {
            return format!("lib{}", c);
        }
    }
    src_pkg.chars().next().map(String::from).unwrap_or_default()
}

/// Archive area of a section: `contrib/net` is in `contrib`, `net` in `main`
pub(crate) fn source_section(section: &str) -> &str {
    match section.split_once('/') {
        Some((area, _)) => area,
        None => "main",
    }
}

pub(crate) fn expand_template(
    template: &str,
    src_section: &str,
    prefix: &str,
    src_pkg: &str,
    src_ver: &str,
) -> String {
    template
        .replace("{src_section}", src_section)
        .replace("{prefix}", prefix)
        .replace("{src_pkg}", src_pkg)
        .replace("{src_ver}", src_ver)
}

pub(crate) fn is_cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.map_or(false, |c| c.load(AtomicOrdering::SeqCst))
}

/// Read a Debian changelog up to (not including) the entry of the installed
/// version. Returns `None` when cancelled.
pub(crate) fn read_changelog(
    mut reader: impl BufRead,
    src_pkg: &str,
    installed: Option<&str>,
    cancel: Option<&AtomicBool>,
) -> io::Result<Option<String>> {
    let header = Regex::new(&format!(r"^{} \((.*)\)(.*)$", regex::escape(src_pkg)))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let installed = installed.map(strip_epoch);

    let mut changelog = String::new();
    let mut buf = Vec::new();
    loop {
        if is_cancelled(cancel) {
            return Ok(None);
        }
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);

        if let Some(caps) = header.captures(line.trim_end_matches(|c| c == '\n' || c == '\r')) {
            let entry = strip_epoch(&caps[1]);
            if let Some(installed) = installed {
                if compare_versions(entry, installed) != Ordering::Greater {
                    break;
                }
            }
        }
        changelog.push_str(&line);
    }

    Ok(Some(changelog))
}

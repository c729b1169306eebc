use anyhow::{bail, Result};
use nom::{
    character::complete::{char, digit1},
    combinator::map_res,
    sequence::terminated,
    IResult,
};
use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt;

/// dpkg style version: `[epoch:]upstream_version[-debian_revision]`
#[derive(Clone, Debug)]
pub struct PkgVersion {
    pub epoch: u64,
    pub upstream: String,
    pub revision: Option<String>,
}

fn epoch(i: &str) -> IResult<&str, u64> {
    map_res(terminated(digit1, char(':')), |s: &str| s.parse::<u64>())(i)
}

/// Split a version string into its components. Never fails, so that versions
/// found in the wild (changelogs, broken indices) can still be ordered.
pub fn parse_version(i: &str) -> PkgVersion {
    let (rest, epoch) = epoch(i).unwrap_or((i, 0));
    let (upstream, revision) = match rest.rfind('-') {
        Some(pos) => (&rest[..pos], Some(rest[pos + 1..].to_owned())),
        None => (rest, None),
    };

    PkgVersion {
        epoch,
        upstream: upstream.to_owned(),
        revision,
    }
}

fn is_upstream_version_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '~' | '-' | ':')
}

fn is_revision_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '~')
}

impl TryFrom<&str> for PkgVersion {
    type Error = anyhow::Error;
    fn try_from(s: &str) -> Result<Self> {
        let res = parse_version(s);
        if res.upstream.is_empty() {
            bail!("Malformed version {:?}: empty upstream version", s);
        }
        if !res.upstream.starts_with(|c: char| c.is_ascii_digit()) {
            bail!("Malformed version {:?}: must start with a digit", s);
        }
        if !res.upstream.chars().all(is_upstream_version_char) {
            bail!("Malformed version {:?}: invalid character", s);
        }
        if let Some(rev) = &res.revision {
            if rev.is_empty() || !rev.chars().all(is_revision_char) {
                bail!("Malformed version {:?}: invalid revision", s);
            }
        }
        Ok(res)
    }
}

impl fmt::Display for PkgVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}:", self.epoch)?;
        }
        f.write_str(&self.upstream)?;
        if let Some(rev) = &self.revision {
            write!(f, "-{}", rev)?;
        }
        Ok(())
    }
}

impl Ord for PkgVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| verrevcmp(&self.upstream, &other.upstream))
            .then_with(|| {
                verrevcmp(
                    self.revision.as_deref().unwrap_or(""),
                    other.revision.as_deref().unwrap_or(""),
                )
            })
    }
}

impl PartialOrd for PkgVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// "1.0-0" and "1.0" are the same version
impl PartialEq for PkgVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PkgVersion {}

/// Compare two version strings with dpkg semantics
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    parse_version(a).cmp(&parse_version(b))
}

/// Drop the epoch, if any: `2:1.0-1` becomes `1.0-1`
pub fn strip_epoch(ver: &str) -> &str {
    match ver.split_once(':') {
        Some((_, rest)) => rest,
        None => ver,
    }
}

/// Upstream part of a version, without epoch and revision
pub fn upstream_version(ver: &str) -> &str {
    let ver = strip_epoch(ver);
    match ver.rfind('-') {
        Some(pos) => &ver[..pos],
        None => ver,
    }
}

// Rank of a non-digit character. End of string and digits rank 0, letters
// sort before everything else and '~' before even the end of string.
fn order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(b'~') => -1,
        Some(c) => c as i32 + 256,
    }
}

fn is_digit_at(s: &[u8], pos: usize) -> bool {
    s.get(pos).map_or(false, |c| c.is_ascii_digit())
}

fn verrevcmp(a: &str, b: &str) -> Ordering {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        // Non-digit prefix
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit()) {
            let ac = order(a.get(i).copied());
            let bc = order(b.get(j).copied());
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }

        // Digit segment, compared numerically
        while a.get(i) == Some(&b'0') {
            i += 1;
        }
        while b.get(j) == Some(&b'0') {
            j += 1;
        }
        let mut first_diff = Ordering::Equal;
        while is_digit_at(a, i) && is_digit_at(b, j) {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if is_digit_at(a, i) {
            return Ordering::Greater;
        }
        if is_digit_at(b, j) {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }

    Ordering::Equal
}

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

const DEBIAN_CHANGELOG: &str = "http://packages.debian.org/changelogs/pool/{src_section}/{prefix}/{src_pkg}/{src_pkg}_{src_ver}/changelog";
const UBUNTU_CHANGELOG: &str = "http://changelogs.ubuntu.com/changelogs/pool/{src_section}/{prefix}/{src_pkg}/{src_pkg}_{src_ver}/changelog";

/// Library settings, usually read from a TOML file:
///
/// ```toml
/// root = "/"
/// changelog_timeout = 2
///
/// [changelog_templates]
/// Devuan = "http://pkginfo.devuan.org/{src_pkg}/{src_ver}/changelog"
/// ```
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    /// Prefix for the dpkg database
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Seconds before a changelog download is given up
    #[serde(default = "default_timeout")]
    pub changelog_timeout: u64,
    /// Changelog URI templates keyed by origin, taking precedence over the
    /// built-in Debian and Ubuntu ones
    #[serde(default)]
    pub changelog_templates: HashMap<String, String>,
}

#[inline]
fn default_root() -> PathBuf {
    PathBuf::from("/")
}

#[inline]
fn default_timeout() -> u64 {
    2
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: default_root(),
            changelog_timeout: default_timeout(),
            changelog_templates: HashMap::new(),
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file {}", path.display()))?;
        content
            .parse()
            .context(format!("Failed to load config file {}", path.display()))
    }

    pub fn check_sanity(&self) -> Result<()> {
        lazy_static! {
            static ref SLOT: Regex = Regex::new(r"\{([^{}]*)\}").unwrap();
        }

        for (origin, template) in &self.changelog_templates {
            for cap in SLOT.captures_iter(template) {
                match &cap[1] {
                    "src_section" | "prefix" | "src_pkg" | "src_ver" => (),
                    other => bail!(
                        "Unknown placeholder {{{}}} in changelog template for {}",
                        other,
                        origin
                    ),
                }
            }
            if !template.contains("{src_pkg}") {
                bail!("Changelog template for {} lacks {{src_pkg}}", origin);
            }
        }
        if self.changelog_timeout == 0 {
            bail!("changelog_timeout must be at least one second");
        }
        Ok(())
    }

    /// Changelog URI template for an origin, if one is known
    pub fn changelog_template(&self, origin: &str) -> Option<&str> {
        if let Some(t) = self.changelog_templates.get(origin) {
            return Some(t.as_str());
        }
        match origin {
            "Debian" => Some(DEBIAN_CHANGELOG),
            "Ubuntu" => Some(UBUNTU_CHANGELOG),
            _ => None,
        }
    }

    pub fn changelog_timeout(&self) -> Duration {
        Duration::from_secs(self.changelog_timeout)
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.check_sanity()?;
        Ok(config)
    }
}

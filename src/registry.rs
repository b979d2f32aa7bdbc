//! The site registry: static per-target configuration.
//!
//! The registry is a YAML file mapping site names to [Site] entries, one per deployment
//! target. Entry order is preserved but unimportant. Nothing in here mutates at runtime;
//! a [Site] is resolved once at startup and stays fixed for the whole run.
//!
//! Every task declares exactly one required [Role], and that role must resolve to exactly
//! one `login@host` principal through the site's entry. [Registry::load] validates this at
//! parse time so the workflow never has to second-guess a connection string.

use crate::error::Error;
use indexmap::IndexMap;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// The logical privilege class a task requires on a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A login that can sudo: system packages, accounts, service configuration.
    Root,
    /// The unprivileged account that owns the site's home directory and runtime.
    Site,
}

/// How the release artifact for a site is built and located.
#[derive(Clone, Debug, Deserialize)]
pub struct PackageSpec {
    /// The package's distribution name, as embedded in artifact file names.
    pub name: String,

    /// Local file the current version string is read from.
    pub version_file: PathBuf,

    /// Local command that produces the artifact in [Self::dist_dir].
    pub build: String,

    /// Directory the build writes artifacts into.
    pub dist_dir: PathBuf,

    /// Archive extension of the artifact, without the leading dot, e.g. `tar.gz`.
    pub ext: String,

    /// Name of the maintenance entry point installed into the site's venv, exposing the
    /// `createdb` and `loaddata` subcommands.
    pub manage: String,
}

/// What a site's backup snapshots and under which role.
#[derive(Clone, Debug, Deserialize)]
pub struct BackupSpec {
    /// The role the backup task connects under. Target-dependent: a root-role backup can
    /// reach service logs outside the site home.
    pub role: Role,

    /// Filename prefix for local archives, `_backups/<prefix>-<YYYY-MM-DD>.<ext>`.
    pub prefix: String,

    /// Local archive extension, without the leading dot.
    pub ext: String,

    /// Remote paths to snapshot. Absolute paths are taken as-is; anything else is
    /// resolved relative to the site home. A single entry is downloaded directly; more
    /// than one is zipped remotely first.
    pub paths: Vec<String>,
}

/// One deployment target.
#[derive(Clone, Debug, Deserialize)]
pub struct Site {
    /// The site's public hostname; also used as the SSH host for both roles and as the
    /// registration name for the uwsgi and nginx configs on the server.
    pub host: String,

    /// The unprivileged account that owns the site on the server.
    pub account: String,

    /// The account's home directory, e.g. `/sites/example.org` or `/home/example.org`.
    pub home: String,

    /// The login principal for the root role, e.g. `root` or `ubuntu`.
    pub root_login: String,

    /// Identity marker of the operator's SSH key. Lines of the root login's
    /// `authorized_keys` matching this marker are seeded into the new account's
    /// `authorized_keys` by `create_account`.
    pub operator_key: String,

    pub package: PackageSpec,

    /// Local path of the dependency manifest uploaded and installed by `install_site`.
    pub requirements: PathBuf,

    /// Local path of the environment-specific settings file uploaded by `install_site`.
    pub settings: PathBuf,

    /// Local paths of the service configs uploaded by `configure_site`.
    pub uwsgi_config: PathBuf,
    pub nginx_config: PathBuf,

    pub backup: BackupSpec,

    /// Whether the restore task is wired up for this target. Disabled targets report a
    /// structured error instead of touching the server.
    #[serde(default = "default_true")]
    pub restore: bool,
}

fn default_true() -> bool {
    true
}

impl Site {
    /// Resolves a [Role] to the one `login@host` principal the executor connects as.
    pub fn principal(&self, role: Role) -> String {
        match role {
            Role::Root => format!("{}@{}", self.root_login, self.host),
            Role::Site => format!("{}@{}", self.account, self.host),
        }
    }

    /// Resolves a remote path against the site home unless it is already absolute.
    pub fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.home, path)
        }
    }

    pub fn venv_dir(&self) -> String {
        format!("{}/venv", self.home)
    }

    pub fn db_path(&self) -> String {
        format!("{}/db.sqlite", self.home)
    }

    pub fn secret_key_path(&self) -> String {
        format!("{}/secret_key", self.home)
    }

    pub fn settings_path(&self) -> String {
        format!("{}/settings.py", self.home)
    }

    /// The sentinel file whose mtime change tells the running server to reload.
    pub fn touch_reload_path(&self) -> String {
        format!("{}/touch-reload", self.home)
    }
}

/// The parsed registry: site name → [Site], in file order.
#[derive(Clone, Debug)]
pub struct Registry {
    sites: IndexMap<String, Site>,
}

impl Registry {
    /// Loads and validates a registry file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::Registry {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::parse(&text).map_err(|detail| Error::Registry {
            path: path.to_path_buf(),
            detail,
        })
    }

    /// Parses registry YAML. Separated from [Self::load] so tests can feed strings.
    pub fn parse(text: &str) -> Result<Self, String> {
        let sites: IndexMap<String, Site> =
            serde_yaml::from_str(text).map_err(|e| e.to_string())?;
        for (name, site) in &sites {
            validate(name, site)?;
        }
        Ok(Registry { sites })
    }

    /// Looks up a site by registry name.
    pub fn get(&self, name: &str) -> Result<&Site, Error> {
        self.sites
            .get(name)
            .ok_or_else(|| Error::UnknownSite(name.to_string()))
    }

    /// Site names in file order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sites.keys().map(String::as_str)
    }
}

/// Checks the invariants that make role resolution unambiguous.
fn validate(name: &str, site: &Site) -> Result<(), String> {
    for (field, value) in [
        ("host", &site.host),
        ("account", &site.account),
        ("root_login", &site.root_login),
    ] {
        if value.is_empty() {
            return Err(format!("site {name}: {field} must not be empty"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(format!("site {name}: {field} must not contain whitespace"));
        }
    }
    // An '@' in a login would smuggle a second host into the principal.
    for (field, value) in [("account", &site.account), ("root_login", &site.root_login)] {
        if value.contains('@') {
            return Err(format!("site {name}: {field} must not contain '@'"));
        }
    }
    if !site.home.starts_with('/') {
        return Err(format!("site {name}: home must be an absolute path"));
    }
    if site.backup.paths.is_empty() {
        return Err(format!("site {name}: backup.paths must not be empty"));
    }
    Ok(())
}

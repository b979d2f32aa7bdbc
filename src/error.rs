//! The failure taxonomy for the provisioning workflow.
//!
//! Every variant here is fatal to its enclosing task: there are no automatic retries and no
//! compensation for remote steps that already succeeded. One deliberate non-error exists
//! alongside these: a confirmation-token mismatch on [destroy_account] returns `Ok(())`
//! without issuing any remote commands.
//!
//! [destroy_account]: crate::tasks::destroy_account

use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The host was unreachable or refused our credentials.
    #[error("could not connect to {principal}: {source}")]
    Connect {
        principal: String,
        #[source]
        source: openssh::Error,
    },

    /// An established session failed while running a command, before the command's exit
    /// status could be observed.
    #[error("session with {principal} failed while running `{command}`: {source}")]
    Session {
        principal: String,
        command: String,
        #[source]
        source: openssh::Error,
    },

    /// A remote command ran and exited non-zero.
    #[error("`{command}` exited with {code} on {principal}\n{stderr}")]
    Remote {
        principal: String,
        command: String,
        code: String,
        stderr: String,
    },

    /// A file transfer failed: missing local or remote file, permissions, or scp itself.
    #[error("transfer failed ({from} -> {to}): {detail}")]
    Transfer {
        from: String,
        to: String,
        detail: String,
    },

    /// The build produced no file matching `<name>-<version>` with the expected extension.
    #[error("no artifact matching {prefix}*.{ext} in {}", .dir.display())]
    MissingArtifact {
        prefix: String,
        ext: String,
        dir: PathBuf,
    },

    /// More than one file in the dist directory matches the current version.
    #[error("ambiguous artifact: {matches:?} all match {prefix}*.{ext} in {}", .dir.display())]
    AmbiguousArtifact {
        prefix: String,
        ext: String,
        dir: PathBuf,
        matches: Vec<String>,
    },

    /// The local build process could not be started or exited non-zero.
    #[error("build command failed: `{command}`: {detail}")]
    Build { command: String, detail: String },

    /// No version string could be read from the configured version file.
    #[error("could not determine package version from {}", .path.display())]
    Version { path: PathBuf },

    /// No local backup archive exists for the requested date.
    #[error("no backup for {date}: {}", .path.display())]
    NotFound { date: NaiveDate, path: PathBuf },

    /// Restore was invoked on a site whose restore path is disabled in the registry.
    #[error("restore is disabled for site {site}")]
    RestoreDisabled { site: String },

    /// The registry file could not be read or parsed, or failed validation.
    #[error("invalid site registry {}: {detail}", .path.display())]
    Registry { path: PathBuf, detail: String },

    /// The requested site name has no registry entry.
    #[error("unknown site: {0}")]
    UnknownSite(String),
}

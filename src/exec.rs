//! Remote command execution and file transfer, scoped to one resolved principal.
//!
//! Per the registry's contract, a task never reads ambient connection state: the caller
//! resolves the task's required [Role] to a principal, connects, and passes the resulting
//! executor value in explicitly. The [Executor] trait is the seam that keeps the workflow
//! testable without a live server; [SshSession] is the production implementation.
//!
//! Connection teardown is tied to the session value's lifetime: dropping an [SshSession]
//! closes the underlying transport whether the task succeeded or failed.
//!
//! [Role]: crate::registry::Role

use crate::error::Error;
use crate::registry::{Role, Site};
use async_trait::async_trait;
use openssh::KnownHosts;
use std::path::Path;
use tokio::process::Command;

/// Quotes a shell word, falling back to the raw string if quoting fails.
///
/// Config-supplied values (account names, paths) pass through here before being
/// interpolated into remote command lines.
pub fn quote(word: &str) -> String {
    match shlex::try_quote(word) {
        Ok(quoted) => quoted.into_owned(),
        Err(_) => word.to_string(),
    }
}

/// One task's window onto a remote host.
///
/// Implementations run shell commands and move files in both directions. Any failure --
/// connection loss, non-zero remote exit, missing file -- aborts the enclosing task;
/// there is no retry and no rollback of remote state already changed.
#[async_trait]
pub trait Executor: Sync {
    /// The `login@host` pair this executor is connected as.
    fn principal(&self) -> &str;

    /// Runs a shell command on the remote host, returning its captured stdout.
    async fn run(&self, command: &str) -> Result<String, Error>;

    /// Uploads a local file to a remote path.
    async fn put(&self, local: &Path, remote: &str) -> Result<(), Error>;

    /// Downloads a remote file to a local path.
    async fn get(&self, remote: &str, local: &Path) -> Result<(), Error>;

    /// Uploads into a root-owned location by staging under `/tmp` and `sudo mv`ing into
    /// place. Requires an executor whose principal can sudo.
    async fn put_elevated(&self, local: &Path, remote: &str) -> Result<(), Error> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let staged = format!("/tmp/{name}");
        self.put(local, &staged).await?;
        self.run(&format!("sudo mv {} {}", quote(&staged), quote(remote)))
            .await?;
        Ok(())
    }
}

/// Connects executors on demand, one per required role.
///
/// Single tasks get their session handed to them pre-connected, but the composite
/// `first_deploy` cannot connect everything up front: the site-owner login only exists
/// after `create_account` has run. This seam lets it connect lazily, and lets tests
/// substitute recording fakes.
#[async_trait]
pub trait Connect {
    type Exec: Executor;

    async fn connect(&self, role: Role) -> Result<Self::Exec, Error>;
}

/// An authenticated SSH session, bound to one principal for one task invocation.
pub struct SshSession {
    session: openssh::Session,
    principal: String,
}

impl SshSession {
    /// Resolves `role` against the site and connects.
    pub async fn connect(site: &Site, role: Role) -> Result<Self, Error> {
        let principal = site.principal(role);
        let session = openssh::Session::connect_mux(&principal, KnownHosts::Add)
            .await
            .map_err(|source| Error::Connect {
                principal: principal.clone(),
                source,
            })?;
        Ok(SshSession { session, principal })
    }
}

#[async_trait]
impl Executor for SshSession {
    fn principal(&self) -> &str {
        &self.principal
    }

    async fn run(&self, command: &str) -> Result<String, Error> {
        let output = self
            .session
            .shell(command)
            .output()
            .await
            .map_err(|source| Error::Session {
                principal: self.principal.clone(),
                command: command.to_string(),
                source,
            })?;

        if !output.status.success() {
            let code = match output.status.code() {
                Some(i) => format!("exit code {i}"),
                None => "error".to_string(),
            };
            return Err(Error::Remote {
                principal: self.principal.clone(),
                command: command.to_string(),
                code,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<(), Error> {
        let from = local.display().to_string();
        let to = format!("{}:{}", self.principal, remote);

        // Catch a missing local file before scp produces a less helpful message.
        if !local.is_file() {
            return Err(Error::Transfer {
                from,
                to,
                detail: "local file does not exist".to_string(),
            });
        }
        scp(&from, &to).await
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<(), Error> {
        let from = format!("{}:{}", self.principal, remote);
        let to = local.display().to_string();
        scp(&from, &to).await
    }
}

async fn scp(from: &str, to: &str) -> Result<(), Error> {
    let output = Command::new("scp")
        .arg(from)
        .arg(to)
        .output()
        .await
        .map_err(|e| Error::Transfer {
            from: from.to_string(),
            to: to.to_string(),
            detail: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::Transfer {
            from: from.to_string(),
            to: to.to_string(),
            detail: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// An [SshSession] factory for one site.
pub struct SshConnector {
    site: Site,
}

impl SshConnector {
    pub fn new(site: Site) -> Self {
        SshConnector { site }
    }
}

#[async_trait]
impl Connect for SshConnector {
    type Exec = SshSession;

    async fn connect(&self, role: Role) -> Result<SshSession, Error> {
        SshSession::connect(&self.site, role).await
    }
}

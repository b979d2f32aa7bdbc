//! The `siteup` binary: one subcommand per provisioning task.
//!
//! Packaging for install/update/first-deploy runs before any connection is opened, so a
//! missing or ambiguous artifact never touches the server. The process exit status is the
//! task outcome: zero on success (including the deliberate no-op when the destroy
//! confirmation doesn't match), one otherwise.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use siteup::error::Error;
use siteup::exec::{SshConnector, SshSession};
use siteup::output;
use siteup::package::{Packager, ReleaseArtifact};
use siteup::registry::{Registry, Role, Site};
use siteup::tasks;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Provisioning, release, and backup automation for small single-host web sites
#[derive(Parser)]
#[command(
    name = "siteup",
    version,
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    /// Path to the site registry file
    #[arg(long, default_value = "sites.yaml")]
    sites: PathBuf,

    /// Registry name of the deployment target to operate on
    #[arg(short, long)]
    site: String,

    #[command(subcommand)]
    task: Task,
}

#[derive(Subcommand)]
enum Task {
    /// Probe connectivity: print the identity the root role resolves to
    Check,

    /// Install the reverse-proxy and process-manager system packages
    InstallPrerequisites,

    /// Create the hosting account and seed its SSH access. Needs to be done once per server
    CreateAccount,

    /// Install the site for the first time (assumes the account exists)
    InstallSite,

    /// Register the site with uwsgi and nginx and start both services
    ConfigureSite,

    /// Take a fresh host all the way to a running site
    FirstDeploy,

    /// Build and install the current package version, then reload the server
    Update,

    /// Download a date-stamped snapshot of the site's persisted state
    Backup,

    /// Upload the backup for DATE (YYYY-MM-DD) over the live database, then reload
    Restore { date: NaiveDate },

    /// Remove the hosting account along with all its data. Very destructive!
    DestroyAccount,
}

impl Task {
    /// The one role this task requires on the target.
    ///
    /// [Task::FirstDeploy] is the composite exception: it resolves roles per sub-task
    /// through a [SshConnector].
    fn role(&self, site: &Site) -> Option<Role> {
        match self {
            Task::Check
            | Task::InstallPrerequisites
            | Task::CreateAccount
            | Task::ConfigureSite
            | Task::DestroyAccount => Some(Role::Root),
            Task::InstallSite | Task::Update | Task::Restore { .. } => Some(Role::Site),
            Task::Backup => Some(site.backup.role),
            Task::FirstDeploy => None,
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::error(format!("Error: {e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let registry = Registry::load(&cli.sites)?;
    let site = registry.get(&cli.site)?.clone();
    let backup_dir = Path::new(tasks::BACKUP_DIR);

    match &cli.task {
        Task::Check => {
            let exec = SshSession::connect(&site, Role::Root).await?;
            tasks::check(&exec).await?;
        }
        Task::InstallPrerequisites => {
            let exec = SshSession::connect(&site, Role::Root).await?;
            tasks::install_prerequisites(&exec).await?;
        }
        Task::CreateAccount => {
            let exec = SshSession::connect(&site, Role::Root).await?;
            tasks::create_account(&exec, &site).await?;
        }
        Task::InstallSite => {
            let artifact = build(&site)?;
            let exec = SshSession::connect(&site, Role::Site).await?;
            tasks::install_site(&exec, &site, &artifact).await?;
        }
        Task::ConfigureSite => {
            let exec = SshSession::connect(&site, Role::Root).await?;
            tasks::configure_site(&exec, &site).await?;
        }
        Task::FirstDeploy => {
            let artifact = build(&site)?;
            let conn = SshConnector::new(site.clone());
            tasks::first_deploy(&conn, &site, &artifact).await?;
        }
        Task::Update => {
            let artifact = build(&site)?;
            let exec = SshSession::connect(&site, Role::Site).await?;
            tasks::update(&exec, &site, &artifact).await?;
        }
        Task::Backup => {
            let exec = SshSession::connect(&site, site.backup.role).await?;
            let archive = tasks::backup(&exec, &site, backup_dir).await?;
            output::step(format!("Backup written to {}", archive.display()));
        }
        Task::Restore { date } => {
            // Fail the local preconditions before opening a connection.
            if !site.restore {
                return Err(Error::RestoreDisabled {
                    site: site.host.clone(),
                }
                .into());
            }
            let exec = SshSession::connect(&site, Role::Site).await?;
            tasks::restore(&exec, &site, backup_dir, *date).await?;
        }
        Task::DestroyAccount => {
            let confirmation = prompt_confirmation()?;
            // Anything but the exact token is a deliberate silent no-op: no
            // connection, no remote commands, exit zero.
            if confirmation == tasks::CONFIRM_TOKEN {
                let exec = SshSession::connect(&site, Role::Root).await?;
                tasks::destroy_account(&exec, &site, &confirmation).await?;
            }
        }
    }
    Ok(())
}

/// Builds the release artifact. Runs strictly before any remote contact.
fn build(site: &Site) -> Result<ReleaseArtifact, Error> {
    output::step("Preparing package...");
    let artifact = Packager::new(site.package.clone()).build()?;
    output::notice(format!("Built {}", artifact.file_name));
    Ok(artifact)
}

/// Asks the operator for the destroy confirmation token.
///
/// Only the line terminator is stripped; the comparison against the token is
/// byte-for-byte, so leading or trailing spaces do not confirm.
fn prompt_confirmation() -> anyhow::Result<String> {
    print!(
        "{}",
        console::style(format!(
            "Are you sure? Type {} if you are: ",
            tasks::CONFIRM_TOKEN
        ))
        .red()
        .bold(),
    );
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

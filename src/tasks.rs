//! The provisioning and release workflow.
//!
//! Each task is an ordered pipeline of result-returning steps over an [Executor] the
//! caller has already connected under the task's required role. Steps short-circuit with
//! `?`: the first failing remote command or transfer aborts the rest of the task, and
//! nothing that already ran is rolled back.
//!
//! The one composite task, [first_deploy], sequences four sub-tasks in a fixed order and
//! connects lazily through a [Connect] value, because the site-owner login it needs for
//! the third step only exists once the second step has run.

use crate::error::Error;
use crate::exec::{quote, Connect, Executor};
use crate::output;
use crate::package::ReleaseArtifact;
use crate::registry::{Role, Site};
use chrono::{Local, NaiveDate};
use std::fs;
use std::path::{Path, PathBuf};

/// The exact confirmation token [destroy_account] requires.
///
/// Comparison is byte-for-byte; any other input, including case variants, makes the task
/// a silent no-op rather than an error.
pub const CONFIRM_TOKEN: &str = "YES";

/// Directory, relative to the working directory, where backup archives land.
pub const BACKUP_DIR: &str = "_backups";

/// Connectivity probe: reports the identity the role resolves to on the server.
pub async fn check(exec: &impl Executor) -> Result<(), Error> {
    let identity = exec.run("id").await?;
    output::step(format!("{}: {}", exec.principal(), identity.trim()));
    Ok(())
}

/// Installs the reverse-proxy and process-manager system packages.
pub async fn install_prerequisites(exec: &impl Executor) -> Result<(), Error> {
    output::step("Installing prerequisites...");
    exec.run("sudo apt install -y nginx-full uwsgi uwsgi-plugin-python dos2unix zip")
        .await?;
    Ok(())
}

/// Creates the unprivileged hosting account and seeds its SSH access.
///
/// The new account's `authorized_keys` is built from the root login's keys, filtered by
/// the operator's key identity marker, so only the operator's key carries over.
pub async fn create_account(exec: &impl Executor, site: &Site) -> Result<(), Error> {
    let account = quote(&site.account);
    let home = quote(&site.home);
    let ssh_dir = quote(&format!("{}/.ssh", site.home));

    output::step("Creating a user...");
    exec.run(&format!(
        "sudo adduser --disabled-password --gecos \"\" --home {home} --force-badname {account}"
    ))
    .await?;

    output::step("Enabling PKI access...");
    exec.run(&format!("sudo -u {account} mkdir -p {ssh_dir}"))
        .await?;
    exec.run(&format!("sudo -u {account} chmod 700 {ssh_dir}"))
        .await?;
    exec.run(&format!(
        "cat ~/.ssh/authorized_keys | grep {} | sudo -u {account} tee {}",
        quote(&site.operator_key),
        quote(&format!("{}/.ssh/authorized_keys", site.home)),
    ))
    .await?;
    Ok(())
}

/// First-time installation of the site into an existing account.
///
/// Creates the venv, installs dependencies, installs the release artifact, generates the
/// secret key, uploads the environment-specific settings, and runs the package's
/// `createdb` and `loaddata` maintenance entry points.
pub async fn install_site(
    exec: &impl Executor,
    site: &Site,
    artifact: &ReleaseArtifact,
) -> Result<(), Error> {
    let venv = site.venv_dir();
    let pip = format!("{venv}/bin/pip");

    output::step("Setting up venv...");
    exec.run(&format!("virtualenv {}", quote(&venv))).await?;

    output::step("Installing requirements...");
    let requirements = site.resolve("requirements.txt");
    exec.put(&site.requirements, &requirements).await?;
    exec.run(&format!("{pip} install -r {}", quote(&requirements)))
        .await?;

    upload_artifact(exec, site, artifact).await?;
    output::step("Installing package...");
    exec.run(&format!(
        "{pip} install {}",
        quote(&site.resolve(&artifact.file_name)),
    ))
    .await?;

    output::step("Generating secret key...");
    exec.run(&format!(
        "head -c 24 /dev/urandom > {}",
        quote(&site.secret_key_path()),
    ))
    .await?;

    output::step("Initializing database...");
    let settings = site.settings_path();
    exec.put(&site.settings, &settings).await?;
    let manage = format!(
        "CONFIG={} {venv}/bin/{}",
        quote(&settings),
        site.package.manage,
    );
    exec.run(&format!("{manage} createdb")).await?;
    exec.run(&format!("{manage} loaddata")).await?;
    Ok(())
}

/// Registers the site with uwsgi and nginx and (re)starts both services.
pub async fn configure_site(exec: &impl Executor, site: &Site) -> Result<(), Error> {
    let uwsgi_conf = format!("/etc/uwsgi/apps-available/{}.ini", site.host);
    let nginx_conf = format!("/etc/nginx/sites-available/{}", site.host);

    output::step("Registering UWSGI site...");
    exec.put_elevated(&site.uwsgi_config, &uwsgi_conf).await?;
    exec.run(&format!("sudo dos2unix {uwsgi_conf}")).await?;
    exec.run(&format!("sudo ln -sf {uwsgi_conf} /etc/uwsgi/apps-enabled/"))
        .await?;
    exec.run(&format!("sudo service uwsgi restart {}", site.host))
        .await?;

    output::step("Registering NGINX site...");
    exec.put_elevated(&site.nginx_config, &nginx_conf).await?;
    exec.run(&format!("sudo dos2unix {nginx_conf}")).await?;
    exec.run(&format!("sudo ln -sf {nginx_conf} /etc/nginx/sites-enabled/"))
        .await?;
    exec.run("sudo service nginx reload").await?;
    Ok(())
}

/// Takes a fresh host to a running site: prerequisites, account, install, configure, in
/// that fixed order, aborting on the first failing sub-task.
pub async fn first_deploy(
    conn: &impl Connect,
    site: &Site,
    artifact: &ReleaseArtifact,
) -> Result<(), Error> {
    let root = conn.connect(Role::Root).await?;
    install_prerequisites(&root).await?;
    create_account(&root, site).await?;

    // The site-owner login exists only now.
    let owner = conn.connect(Role::Site).await?;
    install_site(&owner, site, artifact).await?;
    configure_site(&root, site).await?;
    Ok(())
}

/// Installs a freshly built artifact over the running site and signals a reload.
///
/// Dependencies are deliberately left untouched; only the package itself is replaced.
pub async fn update(
    exec: &impl Executor,
    site: &Site,
    artifact: &ReleaseArtifact,
) -> Result<(), Error> {
    upload_artifact(exec, site, artifact).await?;

    output::step("Installing package...");
    exec.run(&format!(
        "{}/bin/pip install --no-deps --ignore-installed {}",
        site.venv_dir(),
        quote(&site.resolve(&artifact.file_name)),
    ))
    .await?;

    signal_reload(exec, site).await
}

/// Archives the site's persisted state and downloads it under a date-stamped name.
///
/// Returns the local archive path, `<dir>/<prefix>-<YYYY-MM-DD>.<ext>`. The name is
/// stable within a calendar day, so a same-day rerun overwrites the earlier download.
pub async fn backup(
    exec: &impl Executor,
    site: &Site,
    backup_dir: &Path,
) -> Result<PathBuf, Error> {
    backup_as_of(exec, site, backup_dir, Local::now().date_naive()).await
}

/// [backup] with an explicit date, for deterministic naming.
pub async fn backup_as_of(
    exec: &impl Executor,
    site: &Site,
    backup_dir: &Path,
    date: NaiveDate,
) -> Result<PathBuf, Error> {
    let local = backup_file(site, backup_dir, date);
    fs::create_dir_all(backup_dir).map_err(|e| Error::Transfer {
        from: backup_dir.display().to_string(),
        to: local.display().to_string(),
        detail: format!("could not create backup directory: {e}"),
    })?;

    match site.backup.paths.as_slice() {
        [single] => {
            let remote = site.resolve(single);
            output::notice(format!("Downloading {} to {}...", remote, local.display()));
            exec.get(&remote, &local).await?;
        }
        paths => {
            output::step("Backing up data...");
            exec.run("rm -f /tmp/backup.zip").await?;
            let sources: Vec<String> = paths.iter().map(|p| quote(&site.resolve(p))).collect();
            exec.run(&format!("zip -r /tmp/backup.zip {}", sources.join(" ")))
                .await?;
            output::notice(format!("Downloading backup to {}...", local.display()));
            exec.get("/tmp/backup.zip", &local).await?;
        }
    }
    Ok(local)
}

/// The local archive name for a site and date.
pub fn backup_file(site: &Site, backup_dir: &Path, date: NaiveDate) -> PathBuf {
    backup_dir.join(format!(
        "{}-{}.{}",
        site.backup.prefix,
        date.format("%Y-%m-%d"),
        site.backup.ext,
    ))
}

/// Uploads the archived database for `date` over the live one and signals a reload.
///
/// Fails with [Error::NotFound] before issuing any remote command if no local archive
/// exists for the date, and with [Error::RestoreDisabled] on targets whose restore path
/// is switched off in the registry.
pub async fn restore(
    exec: &impl Executor,
    site: &Site,
    backup_dir: &Path,
    date: NaiveDate,
) -> Result<(), Error> {
    if !site.restore {
        return Err(Error::RestoreDisabled {
            site: site.host.clone(),
        });
    }

    let local = backup_file(site, backup_dir, date);
    if !local.is_file() {
        return Err(Error::NotFound { date, path: local });
    }

    output::notice(format!(
        "Uploading {} to {}...",
        local.display(),
        site.db_path(),
    ));
    exec.put(&local, &site.db_path()).await?;
    signal_reload(exec, site).await
}

/// Removes the hosting account along with all its data. Irreversible.
///
/// Proceeds only when `confirmation` equals [CONFIRM_TOKEN] exactly; anything else is a
/// silent no-op that issues zero remote commands.
pub async fn destroy_account(
    exec: &impl Executor,
    site: &Site,
    confirmation: &str,
) -> Result<(), Error> {
    if confirmation != CONFIRM_TOKEN {
        return Ok(());
    }

    let host = &site.host;
    let account = quote(&site.account);

    output::danger("Deleting site...");
    exec.run(&format!("sudo service uwsgi stop {host}")).await?;
    exec.run(&format!("sudo rm -f /etc/uwsgi/apps-available/{host}.ini"))
        .await?;
    exec.run(&format!("sudo rm -f /etc/uwsgi/apps-enabled/{host}.ini"))
        .await?;
    exec.run(&format!("sudo rm -f /etc/nginx/sites-available/{host}"))
        .await?;
    exec.run(&format!("sudo rm -f /etc/nginx/sites-enabled/{host}"))
        .await?;
    exec.run(&format!("sudo rm -rf /var/run/uwsgi/app/{host}"))
        .await?;
    exec.run(&format!("sudo deluser --remove-home {account}"))
        .await?;
    exec.run(&format!("sudo deluser --group {account} || true"))
        .await?;
    exec.run("sudo service nginx restart").await?;
    Ok(())
}

async fn upload_artifact(
    exec: &impl Executor,
    site: &Site,
    artifact: &ReleaseArtifact,
) -> Result<(), Error> {
    output::notice(format!("Uploading package file: {}", artifact.file_name));
    exec.put(&artifact.path, &site.resolve(&artifact.file_name))
        .await
}

/// Touches the reload sentinel; the running server watches its mtime and gracefully
/// reloads its workers.
async fn signal_reload(exec: &impl Executor, site: &Site) -> Result<(), Error> {
    output::step("Reloading server...");
    exec.run(&format!("touch {}", quote(&site.touch_reload_path())))
        .await?;
    Ok(())
}

#[cfg(test)]
mod test;

use super::*;
use crate::registry::{BackupSpec, PackageSpec};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Everything a fake executor was asked to do, in order.
#[derive(Clone, Debug, PartialEq)]
enum Event {
    Connect(Role),
    Run(String),
    Put { local: PathBuf, remote: String },
    Get { remote: String, local: PathBuf },
}

impl Event {
    /// True for [Event::Run] commands containing `marker`.
    fn runs(&self, marker: &str) -> bool {
        matches!(self, Event::Run(command) if command.contains(marker))
    }
}

/// A recording [Executor]. Optionally fails the first command containing `fail_on`.
#[derive(Clone, Default)]
struct FakeExec {
    principal: String,
    log: Arc<Mutex<Vec<Event>>>,
    fail_on: Option<String>,
}

impl FakeExec {
    fn new() -> Self {
        FakeExec {
            principal: "fake@example.org".to_string(),
            ..Default::default()
        }
    }

    fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for FakeExec {
    fn principal(&self) -> &str {
        &self.principal
    }

    async fn run(&self, command: &str) -> Result<String, Error> {
        self.log
            .lock()
            .unwrap()
            .push(Event::Run(command.to_string()));
        if let Some(marker) = &self.fail_on {
            if command.contains(marker) {
                return Err(Error::Remote {
                    principal: self.principal.clone(),
                    command: command.to_string(),
                    code: "exit code 1".to_string(),
                    stderr: String::new(),
                });
            }
        }
        Ok(String::new())
    }

    async fn put(&self, local: &Path, remote: &str) -> Result<(), Error> {
        self.log.lock().unwrap().push(Event::Put {
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
        Ok(())
    }

    async fn get(&self, remote: &str, local: &Path) -> Result<(), Error> {
        self.log.lock().unwrap().push(Event::Get {
            remote: remote.to_string(),
            local: local.to_path_buf(),
        });
        Ok(())
    }
}

/// A recording [Connect] whose executors all share one event log.
#[derive(Clone, Default)]
struct FakeConnect {
    log: Arc<Mutex<Vec<Event>>>,
    fail_on: Option<String>,
}

impl FakeConnect {
    fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connect for FakeConnect {
    type Exec = FakeExec;

    async fn connect(&self, role: Role) -> Result<FakeExec, Error> {
        self.log.lock().unwrap().push(Event::Connect(role));
        Ok(FakeExec {
            principal: "fake@example.org".to_string(),
            log: Arc::clone(&self.log),
            fail_on: self.fail_on.clone(),
        })
    }
}

fn site() -> Site {
    Site {
        host: "example.org".to_string(),
        account: "example.org".to_string(),
        home: "/sites/example.org".to_string(),
        root_login: "ubuntu".to_string(),
        operator_key: "op@example.org".to_string(),
        package: PackageSpec {
            name: "budgetsite".to_string(),
            version_file: "VERSION".into(),
            build: "true".to_string(),
            dist_dir: "dist".into(),
            ext: "tar.gz".to_string(),
            manage: "budgetsite-manage".to_string(),
        },
        requirements: "requirements.txt".into(),
        settings: "settings.py".into(),
        uwsgi_config: "uwsgi.ini".into(),
        nginx_config: "nginx.conf".into(),
        backup: BackupSpec {
            role: Role::Site,
            prefix: "example".to_string(),
            ext: "sqlite".to_string(),
            paths: vec!["db.sqlite".to_string()],
        },
        restore: true,
    }
}

fn artifact() -> ReleaseArtifact {
    ReleaseArtifact {
        version: "2.1.0".to_string(),
        path: "dist/budgetsite-2.1.0.tar.gz".into(),
        file_name: "budgetsite-2.1.0.tar.gz".to_string(),
    }
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2016, 5, 1).unwrap()
}

/// Index of the first event satisfying `pred`, panicking with `what` if absent.
fn position(events: &[Event], what: &str, pred: impl Fn(&Event) -> bool) -> usize {
    events
        .iter()
        .position(pred)
        .unwrap_or_else(|| panic!("no event matching {what} in {events:?}"))
}

mod destroy_account {
    use super::*;

    #[tokio::test]
    async fn proceeds_on_exact_token() {
        let exec = FakeExec::new();
        destroy_account(&exec, &site(), CONFIRM_TOKEN).await.unwrap();

        let events = exec.events();
        assert!(events[0].runs("service uwsgi stop example.org"), "{events:?}");
        assert!(
            events.last().unwrap().runs("service nginx restart"),
            "{events:?}",
        );
        assert!(events.iter().any(|e| e.runs("deluser --remove-home")));
    }

    #[tokio::test]
    async fn any_other_input_is_a_silent_no_op() {
        for input in ["", "yes", "Yes", "YE", "YES ", " YES", "Y", "NO"] {
            let exec = FakeExec::new();
            destroy_account(&exec, &site(), input).await.unwrap();
            assert!(
                exec.events().is_empty(),
                "input {input:?} issued remote commands",
            );
        }
    }
}

mod restore {
    use super::*;

    #[tokio::test]
    async fn missing_archive_is_not_found_with_zero_commands() {
        let dir = TempDir::new().unwrap();
        let exec = FakeExec::new();
        let result = restore(&exec, &site(), dir.path(), date()).await;
        assert!(matches!(result, Err(Error::NotFound { .. })), "{result:?}");
        assert!(exec.events().is_empty());
    }

    #[tokio::test]
    async fn disabled_target_is_rejected_before_any_remote_contact() {
        let dir = TempDir::new().unwrap();
        let mut site = site();
        site.restore = false;
        fs::write(backup_file(&site, dir.path(), date()), b"db").unwrap();

        let exec = FakeExec::new();
        let result = restore(&exec, &site, dir.path(), date()).await;
        assert!(matches!(result, Err(Error::RestoreDisabled { .. })));
        assert!(exec.events().is_empty());
    }

    #[tokio::test]
    async fn uploads_then_reloads() {
        let dir = TempDir::new().unwrap();
        let site = site();
        let archive = backup_file(&site, dir.path(), date());
        fs::write(&archive, b"db").unwrap();

        let exec = FakeExec::new();
        restore(&exec, &site, dir.path(), date()).await.unwrap();

        let events = exec.events();
        assert_eq!(2, events.len(), "{events:?}");
        assert_eq!(
            Event::Put {
                local: archive,
                remote: "/sites/example.org/db.sqlite".to_string(),
            },
            events[0],
        );
        assert!(events[1].runs("touch /sites/example.org/touch-reload"));
    }
}

mod backup {
    use super::*;

    #[tokio::test]
    async fn single_path_downloads_directly() {
        let dir = TempDir::new().unwrap();
        let exec = FakeExec::new();
        let local = backup_as_of(&exec, &site(), dir.path(), date()).await.unwrap();

        assert_eq!(dir.path().join("example-2016-05-01.sqlite"), local);
        assert_eq!(
            vec![Event::Get {
                remote: "/sites/example.org/db.sqlite".to_string(),
                local,
            }],
            exec.events(),
        );
    }

    #[tokio::test]
    async fn multiple_paths_are_zipped_remotely_first() {
        let dir = TempDir::new().unwrap();
        let mut site = site();
        site.backup = BackupSpec {
            role: Role::Root,
            prefix: "example".to_string(),
            ext: "zip".to_string(),
            paths: vec![
                "db.sqlite".to_string(),
                "files/".to_string(),
                "secret_key".to_string(),
                "/var/log/nginx".to_string(),
            ],
        };

        let exec = FakeExec::new();
        let local = backup_as_of(&exec, &site, dir.path(), date()).await.unwrap();
        assert_eq!(dir.path().join("example-2016-05-01.zip"), local);

        let events = exec.events();
        assert!(events[0].runs("rm -f /tmp/backup.zip"));
        assert!(events[1].runs("zip -r /tmp/backup.zip"));
        assert!(events[1].runs("/sites/example.org/db.sqlite"));
        assert!(events[1].runs("/var/log/nginx"), "absolute path kept: {events:?}");
        assert_eq!(
            Event::Get {
                remote: "/tmp/backup.zip".to_string(),
                local,
            },
            events[2],
        );
    }

    #[test]
    fn name_is_stable_within_a_day() {
        let site = site();
        let dir = Path::new("_backups");
        assert_eq!(
            backup_file(&site, dir, date()),
            backup_file(&site, dir, date()),
        );
        let next_day = date().succ_opt().unwrap();
        assert_ne!(backup_file(&site, dir, date()), backup_file(&site, dir, next_day));
    }
}

mod first_deploy {
    use super::*;

    #[tokio::test]
    async fn runs_subtasks_in_fixed_order() {
        let conn = FakeConnect::default();
        first_deploy(&conn, &site(), &artifact()).await.unwrap();

        let events = conn.events();
        assert_eq!(Event::Connect(Role::Root), events[0]);

        let prerequisites = position(&events, "apt install", |e| e.runs("apt install"));
        let account = position(&events, "adduser", |e| e.runs("adduser"));
        let owner_login = position(&events, "site connect", |e| {
            *e == Event::Connect(Role::Site)
        });
        let install = position(&events, "virtualenv", |e| e.runs("virtualenv"));
        let configure = position(&events, "nginx reload", |e| e.runs("service nginx reload"));

        assert!(prerequisites < account, "{events:?}");
        assert!(account < owner_login, "{events:?}");
        assert!(owner_login < install, "{events:?}");
        assert!(install < configure, "{events:?}");
    }

    #[tokio::test]
    async fn aborts_on_first_failing_subtask() {
        let conn = FakeConnect {
            fail_on: Some("adduser".to_string()),
            ..Default::default()
        };
        let result = first_deploy(&conn, &site(), &artifact()).await;
        assert!(matches!(result, Err(Error::Remote { .. })), "{result:?}");

        let events = conn.events();
        assert!(events.last().unwrap().runs("adduser"), "{events:?}");
        assert!(
            !events.iter().any(|e| *e == Event::Connect(Role::Site)),
            "install ran after account creation failed: {events:?}",
        );
        assert!(!events.iter().any(|e| e.runs("virtualenv")));
        assert!(!events.iter().any(|e| e.runs("service nginx")));
    }
}

mod install_site {
    use super::*;

    #[tokio::test]
    async fn initializes_database_after_install() {
        let exec = FakeExec::new();
        install_site(&exec, &site(), &artifact()).await.unwrap();

        let events = exec.events();
        let venv = position(&events, "virtualenv", |e| e.runs("virtualenv"));
        let install = position(&events, "pip install /sites", |e| {
            e.runs("install /sites/example.org/budgetsite-2.1.0.tar.gz")
        });
        let secret = position(&events, "secret key", |e| e.runs("secret_key"));
        let createdb = position(&events, "createdb", |e| e.runs("createdb"));
        let loaddata = position(&events, "loaddata", |e| e.runs("loaddata"));

        assert!(venv < install && install < secret, "{events:?}");
        assert!(secret < createdb && createdb < loaddata, "{events:?}");
        assert!(
            events.iter().any(|e| e.runs("CONFIG=/sites/example.org/settings.py")),
            "maintenance commands carry the CONFIG variable: {events:?}",
        );
    }
}

mod update {
    use super::*;

    #[tokio::test]
    async fn installs_without_dependencies_then_signals_reload() {
        let exec = FakeExec::new();
        update(&exec, &site(), &artifact()).await.unwrap();

        let events = exec.events();
        assert_eq!(3, events.len(), "{events:?}");
        assert_eq!(
            Event::Put {
                local: "dist/budgetsite-2.1.0.tar.gz".into(),
                remote: "/sites/example.org/budgetsite-2.1.0.tar.gz".to_string(),
            },
            events[0],
        );
        assert!(events[1].runs("pip install --no-deps --ignore-installed"));
        assert!(events[2].runs("touch /sites/example.org/touch-reload"));
    }
}

mod configure_site {
    use super::*;

    #[tokio::test]
    async fn stages_configs_and_restarts_services() {
        let exec = FakeExec::new();
        configure_site(&exec, &site()).await.unwrap();

        let events = exec.events();
        assert_eq!(
            Event::Put {
                local: "uwsgi.ini".into(),
                remote: "/tmp/uwsgi.ini".to_string(),
            },
            events[0],
            "elevated upload stages under /tmp first",
        );
        assert!(events[1].runs("sudo mv /tmp/uwsgi.ini /etc/uwsgi/apps-available/example.org.ini"));

        let uwsgi = position(&events, "uwsgi restart", |e| e.runs("service uwsgi restart"));
        let nginx = position(&events, "nginx reload", |e| e.runs("service nginx reload"));
        assert!(uwsgi < nginx, "{events:?}");
        assert!(events.iter().any(|e| e.runs("dos2unix")));
    }
}

mod check {
    use super::*;

    #[tokio::test]
    async fn probes_identity() {
        let exec = FakeExec::new();
        check(&exec).await.unwrap();
        assert_eq!(vec![Event::Run("id".to_string())], exec.events());
    }
}

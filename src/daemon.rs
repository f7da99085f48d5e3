use crate::api::SharedApp;
use crate::app::{App, AppPaths};
use crate::config::{
    ensure_config_dir, get_api_token_path, get_log_dir, get_pid_file_path, get_settings_file_path,
    is_daemon_running, load_or_create_api_token, Settings,
};
use crate::crypto::{KeyringStore, SecretStore};
use crate::error::{Result, TexError};
use crate::keyboard::RdevKeySource;
use crate::logging;
use crate::server::start_api_server;
use crate::storage::modified;

use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

const RELOAD_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Start the daemon process
pub fn start_daemon() -> Result<()> {
    if let Some(pid) = is_daemon_running()? {
        return Err(TexError::DaemonAlreadyRunning(pid));
    }

    ensure_config_dir()?;

    // Fork to background on Unix systems
    #[cfg(unix)]
    {
        use daemonize::Daemonize;
        println!("Starting tex daemon in the background");

        let daemonize = Daemonize::new()
            .pid_file(get_pid_file_path())
            .chown_pid_file(true)
            .working_directory("/tmp")
            .stdout(File::create("/dev/null")?)
            .stderr(File::create("/dev/null")?);

        match daemonize.start() {
            Ok(_) => run_daemon_worker(),
            Err(e) => Err(TexError::Other(format!("Error starting daemon: {}", e))),
        }
    }

    #[cfg(not(unix))]
    {
        println!("Starting tex daemon in the foreground (background not supported on this OS)");
        run_daemon_worker()
    }
}

/// The background worker: file logging, then the engine loop
pub fn run_daemon_worker() -> Result<()> {
    let _logging = logging::init_daemon(&get_log_dir());
    run_engine()
}

/// Run the engine in this process with stderr logging only
pub fn run_foreground() -> Result<()> {
    if let Some(pid) = is_daemon_running()? {
        return Err(TexError::DaemonAlreadyRunning(pid));
    }
    let _logging = logging::init();
    run_engine()
}

fn run_engine() -> Result<()> {
    ensure_config_dir()?;
    let pid_file = get_pid_file_path();
    let mut file = File::create(&pid_file)?;
    write!(file, "{}", process::id())?;

    let settings = Settings::load(&get_settings_file_path());
    let secrets: Arc<dyn SecretStore> = Arc::new(KeyringStore::default());
    let paths = AppPaths::from_config();

    let mut app = App::load(paths.clone(), secrets, settings.clone());
    let source = Arc::new(RdevKeySource::new(settings.injection_timing()));
    let expander = app.attach_engine(source);

    if settings.start_enabled {
        if let Err(e) = expander.set_enabled(true) {
            error!(error = %e, "Could not enable expansion at startup");
        }
    }

    let token = load_or_create_api_token(&get_api_token_path())?;
    let app: SharedApp = Arc::new(Mutex::new(app));
    spawn_control_api(Arc::clone(&app), settings.api_port, token)?;

    info!(pid = process::id(), "tex daemon running");
    let mut watcher = StoreWatcher::new(&paths);
    loop {
        thread::sleep(RELOAD_POLL_INTERVAL);
        let mut guard = app.lock();
        if watcher.changed(&guard) {
            info!("Store files changed on disk, reloading");
            guard.reload();
        }
    }
}

fn spawn_control_api(app: SharedApp, port: u16, token: String) -> Result<()> {
    thread::Builder::new()
        .name("tex-control-api".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = %e, "Could not start control API runtime");
                    return;
                }
            };
            if let Err(e) = runtime.block_on(start_api_server(app, port, &token)) {
                error!(error = %e, "Control API stopped");
            }
        })?;
    Ok(())
}

/// Notices edits made to the store files by other processes. The app's
/// own saves are recognized by their modification time and skipped.
struct StoreWatcher {
    files: Vec<(PathBuf, Option<SystemTime>)>,
}

impl StoreWatcher {
    fn new(paths: &AppPaths) -> Self {
        let files = [&paths.expansions, &paths.categories]
            .into_iter()
            .map(|path| (path.clone(), modified(path)))
            .collect();
        Self { files }
    }

    fn changed(&mut self, app: &App) -> bool {
        let mut changed = false;
        for (path, seen) in self.files.iter_mut() {
            let current = modified(path);
            if current == *seen {
                continue;
            }
            *seen = current;
            if app.knows_stamp(path, current) {
                debug!(path = %path.display(), "Skipping our own save");
            } else {
                debug!(path = %path.display(), "Modification time changed");
                changed = true;
            }
        }
        changed
    }
}

/// Stop the daemon if it's running
pub fn stop_daemon() -> Result<()> {
    let pid_file = get_pid_file_path();

    if !pid_file.exists() {
        return Err(TexError::DaemonNotRunning);
    }

    let pid_str = fs::read_to_string(&pid_file)?;
    let pid = pid_str
        .trim()
        .parse::<u32>()
        .map_err(|_| TexError::InvalidPid)?;

    #[cfg(unix)]
    let status = process::Command::new("kill").arg(pid.to_string()).status();

    #[cfg(windows)]
    let status = process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status();

    #[cfg(not(any(unix, windows)))]
    let status: std::io::Result<process::ExitStatus> = Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "stopping the daemon is not supported on this platform",
    ));

    match status {
        Ok(status) if status.success() => {
            println!("Stopped tex daemon with PID {}", pid);
            if let Err(e) = fs::remove_file(&pid_file) {
                warn!(error = %e, "Could not remove PID file");
            }
            Ok(())
        }
        _ => Err(TexError::Other(format!(
            "Failed to stop daemon with PID {}",
            pid
        ))),
    }
}

/// Check daemon status
pub fn daemon_status() -> Result<()> {
    match is_daemon_running()? {
        Some(pid) => println!("tex daemon is running with PID {}", pid),
        None => println!("tex daemon is not running"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::MemorySecretStore;
    use tempfile::TempDir;

    fn app_in(dir: &TempDir) -> App {
        App::load(
            AppPaths::in_dir(dir.path()),
            Arc::new(MemorySecretStore::new()),
            Settings::default(),
        )
    }

    /// Rewrite a file as another process would, with a distinct mtime
    fn edit_externally(path: &std::path::Path, contents: &str) {
        fs::write(path, contents).unwrap();
        let later = SystemTime::now() + Duration::from_secs(30);
        File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(later)
            .unwrap();
    }

    #[test]
    fn watcher_reports_new_and_rewritten_files() {
        let dir = TempDir::new().unwrap();
        let app = app_in(&dir);
        let paths = AppPaths::in_dir(dir.path());
        let mut watcher = StoreWatcher::new(&paths);
        assert!(!watcher.changed(&app));

        fs::write(&paths.expansions, "{}").unwrap();
        assert!(watcher.changed(&app));
        assert!(!watcher.changed(&app));

        fs::remove_file(&paths.expansions).unwrap();
        assert!(watcher.changed(&app));
    }

    #[test]
    fn watcher_skips_the_apps_own_saves() {
        let dir = TempDir::new().unwrap();
        let mut app = app_in(&dir);
        let paths = AppPaths::in_dir(dir.path());
        let mut watcher = StoreWatcher::new(&paths);

        app.add_or_update("brb", "be right back", "text").unwrap();
        app.add_category(crate::models::Category::new("work", "Work", "", "", ""))
            .unwrap();
        assert!(!watcher.changed(&app));

        edit_externally(&paths.expansions, r#"{ "omw": "on my way" }"#);
        assert!(watcher.changed(&app));
        app.reload();
        assert!(app.entry("omw").is_some());
        assert!(!watcher.changed(&app));
    }
}

/*!

A [`ProcessUnit`] is a resource backed by a local program, for example a build tool that starts a
server and keeps running. Its output goes to a log file; the unit is considered up once a success
marker shows up in the log.

!*/

use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use testbed_lifecycle::provider::{
    Deployable, ExtendedDeployable, Failure, IntoProviderError, ProviderError, ProviderResult,
};
use testbed_lifecycle::wait::{wait_for, PollSpec};
use testbed_lifecycle::{Context, PodSelector};
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

/// A locally started program.
///
/// `deploy` truncates the log file, starts the program with its stdout and stderr appended to the
/// log, and waits until the log contains the success marker. It fails as soon as the log
/// contains one of the failure markers or the program exits. The program is supervised by exactly
/// one background task, which `undeploy` stops and joins.
///
/// # Example
///
/// ```no_run
/// # use testbed_providers::ProcessUnit;
/// let unit = ProcessUnit::new("metastore", "mvn", "/tmp/metastore.log")
///     .args(["-q", "exec:java"])
///     .success_marker("Started metastore")
///     .failure_marker("BUILD FAILURE");
/// ```
pub struct ProcessUnit {
    name: String,
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    log_path: PathBuf,
    success_marker: String,
    failure_markers: Vec<String>,
    startup: Option<PollSpec>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    stop: oneshot::Sender<()>,
    exited: Arc<AtomicBool>,
    task: JoinHandle<std::io::Result<ExitStatus>>,
}

impl ProcessUnit {
    pub fn new<S1, S2, P>(name: S1, program: S2, log_path: P) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            log_path: log_path.into(),
            success_marker: String::from("STARTED"),
            failure_markers: Vec::new(),
            startup: None,
            worker: Mutex::new(None),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// The text whose appearance in the log means the program is up. Defaults to `STARTED`.
    pub fn success_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.success_marker = marker.into();
        self
    }

    pub fn failure_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.failure_markers.push(marker.into());
        self
    }

    /// Override the startup wait, which otherwise comes from the run's settings.
    pub fn startup(mut self, spec: PollSpec) -> Self {
        self.startup = Some(spec);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// The content of the log, with bytes that are not UTF-8 replaced. A log that does not exist
    /// yet is a transient error.
    pub async fn read_log(&self) -> ProviderResult<String> {
        match tokio::fs::read(&self.log_path).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(
                ProviderError::new_with_source_and_context(
                    Failure::Transient,
                    format!("Log file '{}' does not exist yet", self.log_path.display()),
                    e,
                ),
            ),
            Err(e) => Err(e).context(
                Failure::Permanent,
                format!("Unable to read log file '{}'", self.log_path.display()),
            ),
        }
    }

    async fn logged_success(&self) -> ProviderResult<bool> {
        Ok(self.read_log().await?.contains(&self.success_marker))
    }

    async fn logged_failure(&self, exited: &AtomicBool) -> ProviderResult<bool> {
        if exited.load(Ordering::SeqCst) {
            warn!("'{}' exited before it was up", self.name);
            return Ok(true);
        }
        let log = self.read_log().await?;
        Ok(match self.failure_markers.iter().find(|m| log.contains(m.as_str())) {
            Some(marker) => {
                warn!("'{}' logged '{}'", self.name, marker);
                true
            }
            None => false,
        })
    }

    async fn exited_flag(&self) -> Option<Arc<AtomicBool>> {
        self.worker
            .lock()
            .await
            .as_ref()
            .map(|worker| Arc::clone(&worker.exited))
    }

    async fn spawn(&self) -> ProviderResult<Worker> {
        if let Some(parent) = self.log_path.parent() {
            tokio::fs::create_dir_all(parent).await.context(
                Failure::Permanent,
                format!("Unable to create log directory '{}'", parent.display()),
            )?;
        }
        let log = tokio::fs::File::create(&self.log_path).await.context(
            Failure::Permanent,
            format!("Unable to create log file '{}'", self.log_path.display()),
        )?;
        let stderr = log
            .try_clone()
            .await
            .context(Failure::Permanent, "Unable to share the log file")?
            .into_std()
            .await;
        let stdout = log.into_std().await;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        let mut child = command
            .spawn()
            .context(Failure::Permanent, format!("Unable to start '{}'", self.program))?;

        let (stop, stopped) = oneshot::channel::<()>();
        let exited = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&exited);
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            let finished = tokio::select! {
                status = child.wait() => Some(status),
                _ = stopped => None,
            };
            let status = match finished {
                Some(status) => status,
                None => {
                    debug!("Killing '{}'", name);
                    child.kill().await?;
                    child.wait().await
                }
            };
            flag.store(true, Ordering::SeqCst);
            status
        });
        Ok(Worker { stop, exited, task })
    }

    async fn stop(&self) -> ProviderResult<()> {
        let worker = match self.worker.lock().await.take() {
            Some(worker) => worker,
            None => {
                debug!("'{}' is not running", self.name);
                return Ok(());
            }
        };
        // The receiver is gone if the program already exited.
        let _ = worker.stop.send(());
        let status = worker
            .task
            .await
            .context(
                Failure::Permanent,
                format!("The worker of '{}' panicked", self.name),
            )?
            .context(Failure::Permanent, format!("Unable to stop '{}'", self.name))?;
        info!("'{}' stopped: {}", self.name, status);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Deployable for ProcessUnit {
    async fn deploy(&self, ctx: &Context) -> ProviderResult<()> {
        let exited = {
            let mut worker = self.worker.lock().await;
            if let Some(running) = worker.as_ref() {
                if !running.exited.load(Ordering::SeqCst) {
                    debug!("'{}' is already running", self.name);
                    return Ok(());
                }
            }
            info!(
                "Starting '{}': {} {}",
                self.name,
                self.program,
                self.args.join(" ")
            );
            let started = self.spawn().await?;
            let exited = Arc::clone(&started.exited);
            *worker = Some(started);
            exited
        };

        let spec = self.startup.clone().unwrap_or_else(|| {
            ctx.poll(format!(
                "Waiting for '{}' to log '{}'",
                self.name, self.success_marker
            ))
        });
        if let Err(e) = wait_for(
            &spec,
            || self.logged_success(),
            || self.logged_failure(&exited),
        )
        .await
        {
            error!("'{}' did not start: {}", self.name, e);
            if let Err(stop_error) = self.stop().await {
                error!("{}", stop_error);
            }
            return Err(e).context(
                Failure::Permanent,
                format!(
                    "'{}' did not start, see '{}'",
                    self.name,
                    self.log_path.display()
                ),
            );
        }
        info!("'{}' is up", self.name);
        Ok(())
    }

    async fn undeploy(&self, _ctx: &Context) -> ProviderResult<()> {
        self.stop().await
    }

    async fn is_deployed(&self, _ctx: &Context) -> ProviderResult<bool> {
        Ok(match self.exited_flag().await {
            Some(exited) => !exited.load(Ordering::SeqCst),
            None => false,
        })
    }
}

#[async_trait::async_trait]
impl ExtendedDeployable for ProcessUnit {
    async fn is_ready(&self, ctx: &Context) -> ProviderResult<bool> {
        Ok(self.is_deployed(ctx).await? && self.logged_success().await?)
    }

    async fn has_failed(&self, _ctx: &Context) -> ProviderResult<bool> {
        match self.exited_flag().await {
            Some(exited) => self.logged_failure(&exited).await,
            None => Ok(true),
        }
    }

    async fn restart(&self, ctx: &Context) -> ProviderResult<()> {
        self.stop().await?;
        self.deploy(ctx).await
    }

    fn pod_selector(&self) -> Option<PodSelector> {
        None
    }
}

impl std::fmt::Debug for ProcessUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessUnit")
            .field("name", &self.name)
            .field("program", &self.program)
            .field("args", &self.args)
            .field("log_path", &self.log_path)
            .finish()
    }
}

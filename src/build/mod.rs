//! Drives the external toolchain over generated sources.
//!
//! Only one build runs at a time. Starting a build cancels whichever build
//! is in flight; the new one waits for the [`BuildLease`], which the old
//! one gives up only after its process has been killed and reaped.
pub mod events;
pub mod stage;

pub use events::BuildEvent;

use parking_lot::Mutex;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Split};
use tokio::process::{Child, Command};
use tokio::sync::{OwnedMutexGuard, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::writer::GeneratedSources;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BuildType {
    Rom,
    Web,
}

impl BuildType {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildType::Rom => "rom",
            BuildType::Web => "web",
        }
    }
}

/// Exclusive right to touch the staged tree and run the toolchain.
///
/// Only the orchestrator can hand one out.
pub struct BuildLease {
    _guard: OwnedMutexGuard<()>,
}

struct Active {
    id: u64,
    cancel: Arc<watch::Sender<bool>>,
}

struct Inner {
    cfg: BuildConfig,
    slot: Arc<tokio::sync::Mutex<()>>,
    active: Mutex<Option<Active>>,
    next_id: Mutex<u64>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(cfg: BuildConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                cfg,
                slot: Arc::new(tokio::sync::Mutex::new(())),
                active: Mutex::new(None),
                next_id: Mutex::new(0),
            }),
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.inner.cfg
    }

    /// Start a build, cancelling any build already in flight.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, sources: GeneratedSources, build_type: BuildType) -> BuildHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let cancel_tx = Arc::new(cancel_tx);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let id = {
            let mut next = self.inner.next_id.lock();
            *next += 1;
            *next
        };
        let previous = self.inner.active.lock().replace(Active {
            id,
            cancel: cancel_tx.clone(),
        });
        if let Some(prev) = previous {
            info!("build #{} supersedes build #{}", id, prev.id);
            let _ = prev.cancel.send(true);
        }

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let result = run_build(&inner, sources, build_type, cancel_rx, &events_tx).await;
            match &result {
                Ok(()) => info!("build #{id} succeeded"),
                Err(e) => warn!("build #{id}: {e}"),
            }
            let _ = events_tx.send(BuildEvent::Complete {
                error: result.as_ref().err().map(ToString::to_string),
            });

            let mut active = inner.active.lock();
            if active.as_ref().is_some_and(|a| a.id == id) {
                *active = None;
            }
            result
        });

        BuildHandle {
            events: events_rx,
            cancel: cancel_tx,
            task,
        }
    }

    /// Cancel the in-flight build, if any.
    pub fn cancel_active(&self) {
        if let Some(active) = self.inner.active.lock().as_ref() {
            let _ = active.cancel.send(true);
        }
    }
}

/// Caller's side of one build.
pub struct BuildHandle {
    events: mpsc::UnboundedReceiver<BuildEvent>,
    cancel: Arc<watch::Sender<bool>>,
    task: JoinHandle<Result<(), BuildError>>,
}

impl BuildHandle {
    /// Next event in emission order; `None` once the stream is closed.
    pub async fn next_event(&mut self) -> Option<BuildEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// Wait for the build to finish. Undelivered events are dropped.
    pub async fn wait(self) -> Result<(), BuildError> {
        self.task
            .await
            .map_err(|e| BuildError::Aborted(e.to_string()))?
    }
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|c| *c).await.is_err() {
        // Every sender is gone, so nobody can cancel any more.
        std::future::pending::<()>().await;
    }
}

async fn run_build(
    inner: &Inner,
    sources: GeneratedSources,
    build_type: BuildType,
    mut cancel: watch::Receiver<bool>,
    events: &mpsc::UnboundedSender<BuildEvent>,
) -> Result<(), BuildError> {
    let lease = tokio::select! {
        guard = inner.slot.clone().lock_owned() => BuildLease { _guard: guard },
        () = cancelled(&mut cancel) => return Err(BuildError::Cancelled),
    };
    if *cancel.borrow() {
        return Err(BuildError::Cancelled);
    }

    let cfg = inner.cfg.clone();
    let (lease, staged) = tokio::task::spawn_blocking(move || {
        let staged = stage::stage(&lease, &sources, &cfg);
        (lease, staged)
    })
    .await
    .map_err(|e| BuildError::Aborted(e.to_string()))?;
    staged?;

    // A cancel that landed while staging must not start the toolchain.
    if *cancel.borrow() {
        return Err(BuildError::Cancelled);
    }
    let mut child = spawn(&lease, &inner.cfg, build_type)?;
    let result = supervise(&mut child, &inner.cfg, &mut cancel, events).await;
    drop(lease);
    result
}

fn spawn(
    _lease: &BuildLease,
    cfg: &BuildConfig,
    build_type: BuildType,
) -> Result<Child, BuildError> {
    let spawn_err = |source| BuildError::Spawn {
        program: cfg.build_program.clone(),
        source,
    };

    let inherited = std::env::var_os("PATH").unwrap_or_default();
    let path = std::env::join_paths(
        std::iter::once(cfg.toolchain_bin.clone()).chain(std::env::split_paths(&inherited)),
    )
    .map_err(|e| spawn_err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

    info!(
        "running `{} {}` in {}",
        cfg.build_program,
        build_type.as_str(),
        cfg.src_root.display()
    );
    let mut cmd = Command::new(&cfg.build_program);
    cmd.arg(build_type.as_str())
        .current_dir(&cfg.src_root)
        .env("PATH", path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own group, so a cancel reaches the compilers make forks too.
    #[cfg(unix)]
    cmd.process_group(0);
    cmd.spawn().map_err(spawn_err)
}

/// Forward output until the process exits, or kill it on cancellation.
async fn supervise(
    child: &mut Child,
    cfg: &BuildConfig,
    cancel: &mut watch::Receiver<bool>,
    events: &mpsc::UnboundedSender<BuildEvent>,
) -> Result<(), BuildError> {
    let mut out = child.stdout.take().map(|s| BufReader::new(s).split(b'\n'));
    let mut err = child.stderr.take().map(|s| BufReader::new(s).split(b'\n'));
    let mut last_err: Option<String> = None;
    let mut last_fatal: Option<String> = None;

    while out.is_some() || err.is_some() {
        tokio::select! {
            line = next_line(&mut out, "stdout") => match line {
                Some(text) => {
                    let _ = events.send(BuildEvent::Out { text });
                }
                None => out = None,
            },
            line = next_line(&mut err, "stderr") => match line {
                Some(text) => {
                    if text.contains(&cfg.fatal_marker) {
                        last_fatal = Some(text.clone());
                    }
                    last_err = Some(text.clone());
                    let _ = events.send(BuildEvent::Err { text });
                }
                None => err = None,
            },
            () = cancelled(cancel) => return kill(child).await,
        }
    }

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| {
            BuildError::Toolchain(format!("waiting for {}: {e}", cfg.build_program))
        })?,
        () = cancelled(cancel) => return kill(child).await,
    };
    debug!("{} exited with {status}", cfg.build_program);

    outcome(status, last_fatal, last_err, &cfg.build_program)
}

/// Next line from a pipe still open; never resolves for a closed one.
///
/// Bytes that are not UTF-8 become U+FFFD; they never end the stream.
async fn next_line<R>(lines: &mut Option<Split<R>>, stream: &str) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let Some(lines) = lines else {
        return std::future::pending().await;
    };
    match lines.next_segment().await {
        Ok(Some(mut line)) => {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            Some(String::from_utf8_lossy(&line).into_owned())
        }
        Ok(None) => None,
        Err(e) => {
            warn!("reading toolchain {stream}: {e}");
            None
        }
    }
}

async fn kill(child: &mut Child) -> Result<(), BuildError> {
    info!("cancelling build, killing toolchain process group");
    kill_group(child);
    // Child::kill sends the signal and then reaps the process.
    if let Err(e) = child.kill().await {
        warn!("failed to kill toolchain process: {e}");
    }
    Err(BuildError::Cancelled)
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        warn!("failed to kill toolchain process group {pid}: {e}");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

fn outcome(
    status: ExitStatus,
    last_fatal: Option<String>,
    last_err: Option<String>,
    program: &str,
) -> Result<(), BuildError> {
    if status.success() && last_fatal.is_none() {
        return Ok(());
    }
    let reason = last_fatal
        .or(last_err)
        .unwrap_or_else(|| format!("{program} exited with {status}"));
    Err(BuildError::Toolchain(reason))
}

//! Process shell for the sticky-notes engine.
//!
//! On launch the coordinator decides whether this process becomes the
//! long-lived owner of the shared document or delegates its intent to an
//! already-running instance. The owner turns the three intent signals into
//! a stream consumed by a single control task, so the document is never
//! mutated from signal context.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use pinnote_core::{acquire, create_note_at, send_intent, Intent, NoteSet, Ownership, OwnerLock};

#[derive(Parser, Debug)]
#[command(name = "pinnote")]
#[command(version)]
#[command(about = "Sticky notes with a shared document and single-instance coordination")]
struct Cli {
    /// Use the development data file
    #[arg(short = 'd', long = "dev")]
    dev: bool,

    /// Create a note with the given body
    #[arg(short = 'n', long = "new", value_name = "BODY")]
    new: Option<String>,

    /// Create a note whose body is read from a file
    #[arg(
        short = 'F',
        long = "new-from-file",
        value_name = "PATH",
        conflicts_with = "new"
    )]
    new_from_file: Option<PathBuf>,

    /// Ask the running instance to reload the shared document
    #[arg(short = 'r', long = "refresh", conflicts_with_all = ["new", "new_from_file"])]
    refresh: bool,

    /// Terminate the running instance
    #[arg(short = 'k', long = "kill", conflicts_with_all = ["new", "new_from_file", "refresh"])]
    kill: bool,
}

/// What this invocation wants done. Without flags, "show all notes".
enum Invocation {
    Show,
    Refresh,
    Kill,
    Create(String),
}

impl Invocation {
    fn from_cli(cli: &Cli) -> Result<Self> {
        if cli.kill {
            return Ok(Invocation::Kill);
        }
        if cli.refresh {
            return Ok(Invocation::Refresh);
        }
        if let Some(body) = &cli.new {
            return Ok(Invocation::Create(body.clone()));
        }
        if let Some(path) = &cli.new_from_file {
            let body = fs::read_to_string(path)
                .with_context(|| format!("cannot read note body from {:?}", path))?;
            return Ok(Invocation::Create(body));
        }
        Ok(Invocation::Show)
    }
}

fn document_path(dev: bool) -> Result<PathBuf> {
    if dev {
        let home = dirs::home_dir().context("cannot determine home directory")?;
        return Ok(home.join(".pinnote-dev.json"));
    }
    let config = dirs::config_dir().context("cannot determine config directory")?;
    let dir = config.join("pinnote");
    fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create config directory {:?}", dir))?;
    Ok(dir.join("notes.json"))
}

fn lock_path() -> PathBuf {
    std::env::temp_dir().join("pinnote.pid")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let invocation = Invocation::from_cli(&cli)?;
    let doc_path = document_path(cli.dev)?;

    match acquire(&lock_path())? {
        Ownership::Delegated(pid) => run_delegated(pid, invocation, &doc_path),
        Ownership::Owned(lock) => match invocation {
            Invocation::Refresh | Invocation::Kill => {
                log::info!("[pinnote.app] No running instance, nothing to signal");
                Ok(())
            }
            other => run_owner(lock, other, &doc_path),
        },
    }
}

/// Another instance owns the document: translate the invocation into a
/// signal (or a direct file append followed by a reload signal) and exit.
fn run_delegated(pid: i32, invocation: Invocation, doc_path: &Path) -> Result<()> {
    match invocation {
        Invocation::Show => send_intent(pid, Intent::Show)?,
        Invocation::Refresh => send_intent(pid, Intent::Reload)?,
        Invocation::Kill => send_intent(pid, Intent::Terminate)?,
        Invocation::Create(body) => {
            let id = create_note_at(doc_path, &body)?;
            log::info!("[pinnote.app] Appended note {}, notifying pid {}", id, pid);
            // The note is already durable; if the signal is lost the owner
            // picks it up on its next reload.
            send_intent(pid, Intent::Reload)
                .context("note saved, but the running instance could not be signalled")?;
        }
    }
    Ok(())
}

/// This process is the owner: load (or recover) the document, apply any
/// local create intent, then serve intent signals until terminated. The
/// lock is held for the entire run and released by the OS on exit.
fn run_owner(_lock: OwnerLock, invocation: Invocation, doc_path: &Path) -> Result<()> {
    let mut set = NoteSet::open_or_recover(doc_path)?;

    if let Invocation::Create(body) = invocation {
        set.new_note().update(&body);
        set.save()?;
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot build signal runtime")?;
    runtime.block_on(serve_intents(&mut set))?;

    set.save()?;
    log::info!("[pinnote.app] Shut down cleanly");
    Ok(())
}

/// Wait for intent signals and act on them from this single task. Signal
/// delivery only wakes the streams; all document mutation happens here.
#[cfg(unix)]
async fn serve_intents(set: &mut NoteSet) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut show = signal(SignalKind::user_defined1()).context("install SIGUSR1 handler")?;
    let mut reload = signal(SignalKind::user_defined2()).context("install SIGUSR2 handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("install SIGINT handler")?;

    loop {
        tokio::select! {
            _ = show.recv() => {
                log::info!("[pinnote.app] Show intent received");
                set.show_all();
            }
            _ = reload.recv() => {
                match set.reload() {
                    Ok(outcome) if !outcome.is_noop() => {
                        // Persist the reconciled superset right away.
                        set.save()?;
                    }
                    Ok(_) => log::debug!("[pinnote.app] Reload intent was a no-op"),
                    Err(e) => log::warn!("[pinnote.app] Reload failed: {}", e),
                }
            }
            _ = terminate.recv() => {
                log::info!("[pinnote.app] Terminate intent received");
                break;
            }
            _ = interrupt.recv() => {
                log::info!("[pinnote.app] Interrupted");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn serve_intents(_set: &mut NoteSet) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("install Ctrl+C handler")?;
    Ok(())
}

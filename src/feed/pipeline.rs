use anyhow::{Result, anyhow};
use log::{error, info, warn};
use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use super::{FeedLine, ProfileWatcher};
use crate::config::ProfileStore;
use crate::feedback::{CueRouter, FeedbackSink, JsonLinesSink, NullSink};
use crate::plan::ExercisePlan;
use crate::reference::FsMotionSource;
use crate::session::{SessionController, SessionSummary};

#[derive(Debug, Clone, Default)]
pub struct FeedOptions {
    pub plan: PathBuf,
    /// Observation lines; stdin when `None`.
    pub frames: Option<PathBuf>,
    /// Mirror feedback events as JSON lines here.
    pub events: Option<PathBuf>,
    /// Hot-reload the active profile on edits.
    pub watch: bool,
}

fn open_frames(path: Option<&Path>) -> Result<Box<dyn BufRead>> {
    match path {
        Some(p) => {
            let f = File::open(p).map_err(|e| anyhow!("failed to open {}: {e}", p.display()))?;
            Ok(Box::new(BufReader::new(f)))
        }
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn open_events(path: Option<&Path>) -> Result<Box<dyn FeedbackSink>> {
    match path {
        Some(p) => {
            let f = File::create(p).map_err(|e| anyhow!("failed to create {}: {e}", p.display()))?;
            Ok(Box::new(JsonLinesSink::new(BufWriter::new(f))))
        }
        None => Ok(Box::new(NullSink)),
    }
}

/// Replay observation lines through a session and print one tick output per
/// line on stdout. Stops at end of input, on SIGINT/SIGTERM (checked between
/// lines) or when the session halts.
pub fn run_feed(opts: &FeedOptions, mut store: ProfileStore) -> Result<SessionSummary> {
    let plan = ExercisePlan::load(&opts.plan)?;
    let base = opts.plan.parent().unwrap_or(Path::new("."));
    let mut session =
        SessionController::new(plan, FsMotionSource::new(base), store.profile.tuning())?;
    info!("feed: active profile '{}'", store.active_name);

    let stop = Arc::new(AtomicBool::new(false));
    for sig in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        signal_hook::flag::register(sig, Arc::clone(&stop))?;
    }

    let watcher = if opts.watch {
        Some(ProfileWatcher::new(&store.active_path())?)
    } else {
        None
    };

    let mut sink = CueRouter::new(
        open_events(opts.events.as_deref())?,
        store.profile.bindings.clone(),
        store.profile.cues.cooldown_ms,
    );
    let reader = open_frames(opts.frames.as_deref())?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut last_t = f64::NEG_INFINITY;

    for (n, line) in reader.lines().enumerate() {
        if stop.load(Ordering::Relaxed) {
            info!("feed: interrupted");
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let obs = match FeedLine::parse(&line) {
            Ok(o) => o,
            Err(e) => {
                warn!("feed: skipping line {}: {e}", n + 1);
                continue;
            }
        };
        if obs.t < last_t {
            warn!("feed: line {} goes back in time ({} < {last_t}), skipped", n + 1, obs.t);
            continue;
        }
        last_t = obs.t;

        if watcher.as_ref().is_some_and(|w| w.changed()) && store.reload().is_ok() {
            session.set_tuning(store.profile.tuning());
            sink.rebind(store.profile.bindings.clone(), store.profile.cues.cooldown_ms);
            info!("feed: reloaded profile '{}'", store.active_name);
        }

        sink.set_clock(obs.t);
        let tick = session.tick(obs.t, obs.landmarks.as_ref(), &mut sink);
        writeln!(out, "{}", serde_json::to_string(&tick)?)?;

        if let Some(msg) = session.halted() {
            error!("feed: session halted: {msg}");
            break;
        }
    }
    out.flush()?;

    let summary = session.summary();
    info!(
        "feed: {} of {} exercises finished, {}/{} reps in '{}'",
        summary.exercises_finished,
        summary.exercises_total,
        summary.reps,
        summary.target_reps,
        summary.exercise
    );
    Ok(summary)
}

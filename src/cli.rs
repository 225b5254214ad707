use anyhow::{Result, anyhow};
use log::warn;
use pico_args::Arguments;
use std::{env, path::PathBuf};

use posecoach::config::{ProfileStore, Tuning};
use posecoach::feed::{FeedOptions, run_feed};
use posecoach::plan::ExercisePlan;
use posecoach::reference::{FsMotionSource, MotionSource, ReferenceMotion, load_raw};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // No args -> general help
    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    // First free arg is the subcommand
    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("run") => {
            let frames: Option<PathBuf> = pargs.opt_value_from_str("--frames")?;
            let events: Option<PathBuf> = pargs.opt_value_from_str("--events")?;
            let watch = pargs.contains("--watch");
            let plan: PathBuf = pargs.free_from_str().map_err(|_| {
                anyhow!("usage: posecoach run <plan.toml> [--frames <file>] [--events <file>] [--watch]")
            })?;
            let store = ProfileStore::load_or_install_default()?;
            let opts = FeedOptions {
                plan,
                frames,
                events,
                watch,
            };
            let summary = run_feed(&opts, store)?;
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&summary).unwrap_or_default()
            );
            Ok(())
        }

        Some("segments") => {
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: posecoach segments <reference.json>"))?;
            let tuning = active_tuning();
            let raw = load_raw(&path)?;
            let motion = ReferenceMotion::build(&raw, tuning.matching.facing())?;
            println!("{} frames", motion.frames().len());
            for (i, s) in motion.segments().iter().enumerate() {
                println!(
                    "{i:>3}  {:>5}..{:<5} {:<18} {:<10} facing {:<6} tracked joint threshold {:.2}",
                    s.start,
                    s.end,
                    s.phase,
                    s.kind,
                    s.facing,
                    s.threshold(
                        tuning.transition.tracked_joint,
                        tuning.matching.default_joint_threshold
                    )
                );
            }
            Ok(())
        }

        Some("check") => {
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: posecoach check <plan.toml>"))?;
            let tuning = active_tuning();
            let plan = ExercisePlan::load(&path)?;
            let source = FsMotionSource::new(path.parent().unwrap_or(std::path::Path::new(".")));
            let mut failed = 0;
            for ex in plan.exercises() {
                let built = source
                    .fetch(&ex.reference)
                    .and_then(|raw| ReferenceMotion::build(&raw, tuning.matching.facing()));
                match built {
                    Ok(m) => println!(
                        "ok     {}: {} segments, {} reps",
                        ex.name,
                        m.segments().len(),
                        ex.reps
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("error  {}: {e}", ex.name);
                    }
                }
            }
            if failed > 0 {
                return Err(anyhow!("{failed} exercise(s) cannot start"));
            }
            Ok(())
        }

        Some("profiles") => {
            let store = ProfileStore::load_or_install_default()?;
            for name in store.list_profiles() {
                let mark = if name == store.active_name { '*' } else { ' ' };
                println!("{mark} {name}");
            }
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: posecoach use <profile_name>"))?;
            let mut store = ProfileStore::load_or_install_default()?;
            store.set_active(&name)?;
            println!("active profile: {}", store.active_name);
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

/// Tuning of the active profile, or the built-in defaults if the profile
/// directory is unusable.
fn active_tuning() -> Tuning {
    match ProfileStore::load_or_install_default() {
        Ok(store) => store.profile.tuning(),
        Err(e) => {
            warn!("using default tuning: {e}");
            Tuning::default()
        }
    }
}

fn print_help() {
    println!(
        r#"posecoach: guided exercise sessions over pose observations

USAGE:
  posecoach help [command]                 Show general or command-specific help
  posecoach run <plan.toml> [options]      Replay observations through a session
      --frames <file>                      Read observation lines from <file> (default stdin)
      --events <file>                      Write feedback events as JSON lines
      --watch                              Reload the active profile when it changes
  posecoach segments <reference.json>      Show the segments derived from a reference
  posecoach check <plan.toml>              Verify every exercise in a plan can start
  posecoach profiles                       List tuning profiles
  posecoach use <name>                     Switch active profile

TIPS:
  - Profiles: ~/.config/posecoach/profiles
  - Active profile pointer: ~/.config/posecoach/active
  - Observation line: {{"t": 1.25, "landmarks": [{{"x":..,"y":..,"z":..,"visibility":..}}, ...]}}
  - RUST_LOG=debug for per-tick detail
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "run" => println!(
            "usage: posecoach run <plan.toml> [--frames <file>] [--events <file>] [--watch]\nPrints one tick output per observation line; a summary goes to stderr at the end."
        ),
        "segments" => println!(
            "usage: posecoach segments <reference.json>\nLists derived segments with type and facing."
        ),
        "check" => println!(
            "usage: posecoach check <plan.toml>\nLoads each exercise's reference and reports its segment count."
        ),
        "profiles" => {
            println!("usage: posecoach profiles\nLists available profiles; marks active with '*'.")
        }
        "use" => {
            println!("usage: posecoach use <name>\nSwitches active profile to <name>.")
        }
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

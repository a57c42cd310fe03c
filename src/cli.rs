use anyhow::{Result, anyhow, bail};
use log::info;
use pico_args::Arguments;
use serde::Deserialize;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    env, fs,
    path::{Path, PathBuf},
    process::Command,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use crate::actions::{CursorAction, CursorHandles, EventBus, Position, open_driver};
use crate::config::DaemonConfigState;
use crate::flow::bindings::{BindingSpec, BindingTable};
use crate::flow::{FlowContext, FlowManager, Pipeline};
use crate::input::{CommandSource, HandSource, ReplaySource};
use crate::ipc;

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    // Hidden daemon mode (spawned by `start`)
    if pargs.contains("--daemon") {
        return ipc::run_daemon();
    }

    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            match topic {
                Some(t) => print_subcmd_help(&t),
                None => print_help(),
            }
            Ok(())
        }

        Some("start") => {
            let exe = env::current_exe()?;
            let child = Command::new(exe).arg("--daemon").spawn()?;
            println!("handctl: started daemon (pid={})", child.id());
            Ok(())
        }

        Some("stop") => request(serde_json::json!({"op":"shutdown"})),
        Some("status") => request(serde_json::json!({"op":"status"})),
        Some("reload") => request(serde_json::json!({"op":"reload"})),
        Some("list") => request(serde_json::json!({"op":"list"})),
        Some("doctor") => request(serde_json::json!({"op":"doctor"})),
        Some("bindings") => request(serde_json::json!({"op":"bindings"})),

        Some("flow") => {
            let what: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl flow <start|stop>"))?;
            match what.as_str() {
                "start" | "stop" => request(serde_json::json!({"op": what})),
                other => bail!("unknown flow command: {other}"),
            }
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl use <profile_name>"))?;
            request(serde_json::json!({"op":"use","profile":name}))
        }

        Some("bind") => {
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl bind <file.toml|file.json>"))?;
            let specs = read_bindings(&path)?;
            request(serde_json::json!({"op":"bind","bindings":specs}))
        }

        Some("mouse") => {
            let speed: Option<f64> = pargs.opt_value_from_str("--speed")?;
            let accel: Option<f64> = pargs.opt_value_from_str("--accel")?;
            request(serde_json::json!({"op":"mouse","speed":speed,"accel":accel}))
        }

        Some("events") => ipc::client_stream(serde_json::json!({"op":"events"}), |v| {
            println!("{v}");
            true
        }),

        Some("run") => {
            let cfg = DaemonConfigState::load_or_install_default()?;
            let source = CommandSource::new(cfg.profile.perception.clone());
            run_foreground(&cfg, Box::new(source), cfg.profile.cursor.virtual_only)
        }

        Some("replay") => {
            let realtime = pargs.contains("--realtime");
            let uinput = pargs.contains("--uinput");
            let path: PathBuf = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl replay <file.jsonl> [--realtime] [--uinput]"))?;
            let cfg = DaemonConfigState::load_or_install_default()?;
            let source = ReplaySource::from_path(&path, realtime)?;
            run_foreground(&cfg, Box::new(source), !uinput)
        }

        Some("emit") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: handctl emit <Action> [x y]"))?;
            let action = CursorAction::from_name(&name).ok_or_else(|| {
                let known: Vec<_> = CursorAction::ALL.iter().map(|a| a.as_str()).collect();
                anyhow!("unknown action '{name}' (one of {})", known.join(", "))
            })?;
            let x: Option<i32> = pargs.opt_free_from_str()?;
            let y: Option<i32> = pargs.opt_free_from_str()?;

            let cfg = DaemonConfigState::load_or_install_default()?;
            let c = &cfg.profile.cursor;
            let driver = open_driver(c.virtual_only, c.screen_width, c.screen_height)?;
            let mut cursor = CursorHandles::new(driver, EventBus::new(), c.scroll_steps);
            let at = match (x, y) {
                (Some(x), Some(y)) => Position::new(x, y),
                _ => cursor.position(),
            };
            let pos = cursor.execute(action, at)?;
            println!("ok: {} at ({}, {})", action.as_str(), pos.x, pos.y);
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

fn request(req: serde_json::Value) -> Result<()> {
    let r = ipc::client_request(req)?;
    print_response(&r);
    Ok(())
}

#[derive(Deserialize)]
struct BindingFile {
    bindings: Vec<BindingSpec>,
}

/// `[[bindings]]` tables in TOML, or a JSON array of records.
fn read_bindings(path: &Path) -> Result<Vec<BindingSpec>> {
    let txt = fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    let specs: Vec<BindingSpec> = if path.extension().is_some_and(|e| e == "json") {
        serde_json::from_str(&txt)?
    } else {
        toml::from_str::<BindingFile>(&txt)?.bindings
    };
    // reject locally before bothering the daemon
    BindingTable::from_specs(&specs)?;
    Ok(specs)
}

/// Runs the active profile's flow on this thread until the source ends or a
/// signal arrives; executed actions are printed as JSON lines.
fn run_foreground(
    cfg: &DaemonConfigState,
    source: Box<dyn HandSource>,
    virtual_only: bool,
) -> Result<()> {
    let profile = &cfg.profile;
    let c = &profile.cursor;
    let pipeline = Pipeline::from_profile(profile, source)?;
    let driver = open_driver(virtual_only, c.screen_width, c.screen_height)?;

    let bus = EventBus::new();
    let events = bus.subscribe();
    let printer = thread::spawn(move || {
        for ev in events {
            if let Ok(line) = serde_json::to_string(&ev) {
                println!("{line}");
            }
        }
    });

    let mut flow = FlowManager::new();
    stop_on_signal(flow.stop_handle())?;
    info!("running profile '{}' in the foreground", cfg.active_name);
    let ctx = FlowContext::new(CursorHandles::new(driver, bus, c.scroll_steps));
    let res = flow.run_blocking(pipeline, ctx);
    let _ = printer.join();

    eprintln!(
        "{}",
        serde_json::to_string_pretty(&flow.status()).unwrap_or_default()
    );
    res
}

fn stop_on_signal(running: Arc<AtomicBool>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("handctl-signals".into())
        .spawn(move || {
            if signals.forever().next().is_some() {
                running.store(false, Ordering::SeqCst);
            }
        })?;
    Ok(())
}

fn print_help() {
    println!(
        r#"handctl - hand gesture cursor control

USAGE:
  handctl help [command]                 Show general or command-specific help
  handctl start                          Start the daemon
  handctl stop                           Stop the daemon
  handctl status                         Show daemon and flow state
  handctl flow <start|stop>              Start or stop the gesture flow
  handctl reload                         Reload active profile
  handctl use <name>                     Switch active profile
  handctl list                           List profiles
  handctl doctor                         Diagnose permissions and perception setup
  handctl bindings                       Show gesture bindings
  handctl bind <file>                    Replace gesture bindings (flow stopped)
  handctl mouse [--speed S] [--accel A]  Show or set cursor motion (flow stopped)
  handctl events                         Stream executed actions
  handctl run                            Run the flow in the foreground
  handctl replay <file> [--realtime] [--uinput]
                                         Run the flow over a recorded landmark file
  handctl emit <Action> [x y]            Execute one cursor action

TIPS:
  - Profiles: ~/.config/handctl/profiles
  - Active profile pointer: ~/.config/handctl/active
  - RUST_LOG=debug for more detail
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "start" => println!("usage: handctl start\nStarts the background daemon."),
        "stop" => println!("usage: handctl stop\nStops the flow and the daemon."),
        "status" => println!(
            "usage: handctl status\nShows flow state (ticks, fps, last error), active profile and listeners."
        ),
        "flow" => println!(
            "usage: handctl flow <start|stop>\nStarts the perception process and cursor flow, or stops them."
        ),
        "reload" => println!(
            "usage: handctl reload\nReloads the current profile; keeps last good on error; restarts a running flow."
        ),
        "use" => {
            println!("usage: handctl use <name>\nSwitches active profile to <name> and reloads.")
        }
        "list" => println!("usage: handctl list\nLists available profiles."),
        "doctor" => println!(
            "usage: handctl doctor\nChecks uinput access, input group membership and the perception command."
        ),
        "bindings" => println!("usage: handctl bindings\nPrints the active gesture bindings."),
        "bind" => println!(
            "usage: handctl bind <file>\nReplaces the bindings with the [[bindings]] of a TOML file or a JSON array.\nRejected while the flow runs."
        ),
        "mouse" => println!(
            "usage: handctl mouse [--speed S] [--accel A]\nWithout options prints the motion settings. Rejected while the flow runs."
        ),
        "events" => println!("usage: handctl events\nPrints one JSON line per executed action."),
        "run" => println!(
            "usage: handctl run\nRuns the active profile in the foreground without the daemon."
        ),
        "replay" => println!(
            "usage: handctl replay <file.jsonl> [--realtime] [--uinput]\nFeeds recorded frames through the active profile on a virtual cursor."
        ),
        "emit" => println!(
            "usage: handctl emit <Action> [x y]\nActions: MoveTo LeftDown LeftUp LeftClick RightClick ScrollUp ScrollDown"
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_response(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_toml_binding_files() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            f,
            "[[bindings]]\ngesture = \"Thumb_Up\"\nwindow_fn = \"AllTrue\"\naction = \"LeftClick\"\nwindow = 5\n"
        )
        .unwrap();
        let specs = read_bindings(f.path()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].window, 5);
    }

    #[test]
    fn reads_json_binding_files() {
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(
            f,
            r#"[{{"gesture":"Victory","window_fn":"AllTrue","action":"ScrollUp","guard":"MoveUp","pause_motion":true}}]"#
        )
        .unwrap();
        let specs = read_bindings(f.path()).unwrap();
        assert_eq!(specs[0].guard.as_deref(), Some("MoveUp"));
        assert_eq!(specs[0].window, 3);
    }

    #[test]
    fn bad_binding_files_fail_locally() {
        let mut f = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(
            f,
            r#"[{{"gesture":"Victory","window_fn":"AllTrue","action":"Fly"}}]"#
        )
        .unwrap();
        let err = read_bindings(f.path()).unwrap_err();
        assert_eq!(err.to_string(), "unknown action 'Fly'");
    }
}

use anyhow::Result;
use log::{debug, error, info, warn};
use notify::{EventKind, RecursiveMode, Watcher};
use serde_json::Value;
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    fs,
    io::{BufRead, BufReader, Write},
    os::unix::net::{UnixListener, UnixStream},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError, Sender},
    },
    thread,
    time::Duration,
};

use super::dispatch::{DaemonState, Request, err, ok};
use super::runtime::socket_path;
use crate::actions::EventBus;
use crate::config::DaemonConfigState;

const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

enum DaemonMsg {
    Request { req: Request, reply: Sender<Value> },
    ProfilesChanged,
    Shutdown,
}

pub fn run_daemon() -> Result<()> {
    let sock = socket_path()?;
    if sock.exists() {
        let _ = fs::remove_file(&sock);
    }
    let listener = UnixListener::bind(&sock)?;
    info!("daemon: listening on {}", sock.display());

    let bus = EventBus::new();
    let cfg = DaemonConfigState::load_or_install_default()?;
    let mut state = DaemonState::new(cfg, bus.clone());
    info!("daemon: active profile '{}'", state.cfg.active_name);

    let (tx, rx) = mpsc::channel::<DaemonMsg>();
    let stopping = Arc::new(AtomicBool::new(false));

    spawn_signal_thread(tx.clone())?;
    // dropping the watcher stops it
    let _watcher = watch_profiles(&state.cfg.profiles_dir, tx.clone())?;
    spawn_accept_thread(listener, tx.clone(), bus, stopping.clone())?;

    if state.cfg.profile.meta.autostart {
        match state.start_flow() {
            Ok(_) => info!("daemon: flow autostarted"),
            Err(e) => error!("daemon: autostart failed: {e:#}"),
        }
    }

    let mut pending: Option<DaemonMsg> = None;
    loop {
        let msg = match pending.take() {
            Some(msg) => msg,
            None => match rx.recv_timeout(Duration::from_secs(1)) {
                Ok(msg) => msg,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            },
        };
        match msg {
            DaemonMsg::Request { req, reply } => {
                let shutdown = matches!(req, Request::Shutdown);
                let _ = reply.send(state.handle(req));
                if shutdown {
                    break;
                }
            }
            DaemonMsg::ProfilesChanged => {
                // collapse the burst of events an editor save produces
                loop {
                    match rx.recv_timeout(RELOAD_DEBOUNCE) {
                        Ok(DaemonMsg::ProfilesChanged) => continue,
                        Ok(other) => pending = Some(other),
                        Err(_) => {}
                    }
                    break;
                }
                match state.reload() {
                    Ok(v) => info!("daemon: profile change picked up: {v}"),
                    Err(e) => error!("daemon: reload failed, keeping last good profile: {e:#}"),
                }
            }
            DaemonMsg::Shutdown => {
                info!("daemon: signal received");
                state.shutdown();
                break;
            }
        }
    }

    stopping.store(true, Ordering::SeqCst);
    let _ = fs::remove_file(&sock);
    info!("daemon: bye");
    Ok(())
}

fn spawn_signal_thread(tx: Sender<DaemonMsg>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("handctl-signals".into())
        .spawn(move || {
            if let Some(sig) = signals.forever().next() {
                debug!("signal {sig}");
                let _ = tx.send(DaemonMsg::Shutdown);
            }
        })?;
    Ok(())
}

fn watch_profiles(dir: &Path, tx: Sender<DaemonMsg>) -> Result<notify::RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(ev) => {
                let relevant = matches!(
                    ev.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) && ev
                    .paths
                    .iter()
                    .any(|p| p.extension().is_some_and(|e| e == "toml"));
                if relevant {
                    let _ = tx.send(DaemonMsg::ProfilesChanged);
                }
            }
            Err(e) => warn!("profile watcher: {e}"),
        }
    })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    info!("daemon: watching {}", dir.display());
    Ok(watcher)
}

fn spawn_accept_thread(
    listener: UnixListener,
    tx: Sender<DaemonMsg>,
    bus: EventBus,
    stopping: Arc<AtomicBool>,
) -> Result<()> {
    thread::Builder::new()
        .name("handctl-accept".into())
        .spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                let tx = tx.clone();
                let bus = bus.clone();
                let stopping = stopping.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, tx, bus, stopping) {
                        error!("ipc client error: {e}");
                    }
                });
            }
        })?;
    Ok(())
}

fn write_line(stream: &mut UnixStream, v: &Value) -> std::io::Result<()> {
    writeln!(stream, "{v}")
}

fn handle_client(
    mut stream: UnixStream,
    tx: Sender<DaemonMsg>,
    bus: EventBus,
    stopping: Arc<AtomicBool>,
) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }
    let req: Request = match serde_json::from_str(&line) {
        Ok(r) => r,
        Err(e) => {
            write_line(&mut stream, &err(format!("bad request: {e}")))?;
            return Ok(());
        }
    };

    if let Request::Events = req {
        return stream_events(stream, bus, stopping);
    }

    let (reply_tx, reply_rx) = mpsc::channel();
    let resp = match tx.send(DaemonMsg::Request {
        req,
        reply: reply_tx,
    }) {
        Ok(()) => reply_rx
            .recv()
            .unwrap_or_else(|_| err("daemon is shutting down")),
        Err(_) => err("daemon is shutting down"),
    };
    write_line(&mut stream, &resp)?;
    Ok(())
}

/// Writes one JSON line per executed action until the client goes away.
fn stream_events(mut stream: UnixStream, bus: EventBus, stopping: Arc<AtomicBool>) -> Result<()> {
    let events = bus.subscribe();
    write_line(&mut stream, &ok(Value::from("streaming events")))?;
    while !stopping.load(Ordering::SeqCst) {
        match events.recv_timeout(Duration::from_secs(1)) {
            Ok(ev) => {
                if write_line(&mut stream, &serde_json::to_value(&ev)?).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("event listener left");
    Ok(())
}

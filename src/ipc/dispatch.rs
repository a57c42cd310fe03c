use anyhow::{Result, bail};
use log::{info, warn};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

use crate::actions::{CursorHandles, EventBus, open_driver};
use crate::config::{DaemonConfigState, Profile};
use crate::flow::bindings::BindingSpec;
use crate::flow::{FlowContext, FlowError, FlowManager, Pipeline};
use crate::input::{CommandSource, HandSource};

pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// One request line from a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Request {
    Status,
    Start,
    Stop,
    Reload,
    Use {
        profile: String,
    },
    List,
    Doctor,
    Bindings,
    Bind {
        bindings: Vec<BindingSpec>,
    },
    Mouse {
        #[serde(default)]
        speed: Option<f64>,
        #[serde(default)]
        accel: Option<f64>,
    },
    Events,
    Shutdown,
}

pub fn ok(data: Value) -> Value {
    json!({"ok": true, "data": data})
}

pub fn err(msg: impl std::fmt::Display) -> Value {
    json!({"ok": false, "error": msg.to_string()})
}

fn reply(res: Result<Value>) -> Value {
    match res {
        Ok(data) => ok(data),
        Err(e) => err(format!("{e:#}")),
    }
}

pub type SourceFactory = Box<dyn Fn(&Profile) -> Box<dyn HandSource> + Send>;

fn command_source(profile: &Profile) -> Box<dyn HandSource> {
    Box::new(CommandSource::new(profile.perception.clone()))
}

/// Everything the daemon's main loop owns.
pub struct DaemonState {
    pub cfg: DaemonConfigState,
    pub flow: FlowManager,
    pub bus: EventBus,
    source: SourceFactory,
}

impl DaemonState {
    pub fn new(cfg: DaemonConfigState, bus: EventBus) -> Self {
        Self::with_source(cfg, bus, Box::new(command_source))
    }

    pub fn with_source(cfg: DaemonConfigState, bus: EventBus, source: SourceFactory) -> Self {
        Self {
            cfg,
            flow: FlowManager::new(),
            bus,
            source,
        }
    }

    pub fn handle(&mut self, req: Request) -> Value {
        match req {
            Request::Status => ok(self.status()),
            Request::Start => reply(self.start_flow().map(|first_frame| {
                json!({"started": true, "first_frame": first_frame})
            })),
            Request::Stop => reply(self.stop_flow().map(|_| json!("flow stopped"))),
            Request::Reload => reply(self.reload()),
            Request::Use { profile } => reply(self.use_profile(&profile)),
            Request::List => ok(json!({
                "profiles": self.cfg.list_profiles(),
                "active": self.cfg.active_name,
            })),
            Request::Doctor => ok(self.cfg.doctor_report()),
            Request::Bindings => ok(json!(self.cfg.profile.bindings)),
            Request::Bind { bindings } => reply(self.bind(bindings)),
            Request::Mouse { speed, accel } => reply(self.mouse(speed, accel)),
            Request::Events => err("events is a streaming op"),
            Request::Shutdown => {
                self.shutdown();
                ok(json!("shutting down"))
            }
        }
    }

    pub fn status(&self) -> Value {
        json!({
            "flow": self.flow.status(),
            "active_profile": self.cfg.active_name,
            "bindings": self.cfg.profile.bindings.len(),
            "virtual_cursor": self.cfg.profile.cursor.virtual_only,
            "event_listeners": self.bus.subscriber_count(),
        })
    }

    /// Starts the flow and reports whether a first frame arrived in time.
    pub fn start_flow(&mut self) -> Result<bool> {
        let profile = &self.cfg.profile;
        let cursor = &profile.cursor;
        let pipeline = Pipeline::from_profile(profile, (self.source)(profile))?;
        let source = pipeline.source;
        let driver = open_driver(cursor.virtual_only, cursor.screen_width, cursor.screen_height)?;
        let ctx = FlowContext::new(CursorHandles::new(
            driver,
            self.bus.clone(),
            cursor.scroll_steps,
        ));
        let frame_timeout = Duration::from_millis(profile.perception.frame_timeout_ms);
        self.flow.start(pipeline, ctx)?;
        match self.flow.wait_for_output(source, frame_timeout) {
            Ok(()) => Ok(true),
            Err(FlowError::OutputTimeout(..)) => {
                warn!("no landmark frame yet after {} ms", frame_timeout.as_millis());
                Ok(false)
            }
            // the run already ended; its error is in the status
            Err(_) => {
                let status = self.flow.status();
                match status.last_error {
                    Some(e) => bail!("flow ended right away: {e}"),
                    None => Ok(false),
                }
            }
        }
    }

    pub fn stop_flow(&mut self) -> Result<()> {
        self.flow.stop(STOP_TIMEOUT)
    }

    fn restart_if_running(&mut self) -> Result<bool> {
        if !self.flow.is_running() {
            return Ok(false);
        }
        if let Err(e) = self.stop_flow() {
            warn!("flow ended with error before restart: {e:#}");
        }
        self.start_flow()?;
        Ok(true)
    }

    pub fn reload(&mut self) -> Result<Value> {
        self.cfg.reload()?;
        let restarted = self.restart_if_running()?;
        Ok(json!({"active_profile": self.cfg.active_name, "restarted": restarted}))
    }

    pub fn use_profile(&mut self, name: &str) -> Result<Value> {
        self.cfg.set_active(name)?;
        let restarted = self.restart_if_running()?;
        Ok(json!({"active_profile": self.cfg.active_name, "restarted": restarted}))
    }

    fn ensure_idle(&self, what: &str) -> Result<()> {
        if self.flow.is_running() {
            bail!("stop the flow before changing {what}");
        }
        Ok(())
    }

    pub fn bind(&mut self, specs: Vec<BindingSpec>) -> Result<Value> {
        self.ensure_idle("bindings")?;
        let table = self.cfg.set_bindings(specs)?;
        info!("bindings replaced ({} entries)", table.len());
        Ok(json!(table.specs()))
    }

    pub fn mouse(&mut self, speed: Option<f64>, accel: Option<f64>) -> Result<Value> {
        if speed.is_none() && accel.is_none() {
            return Ok(json!(self.cfg.profile.motion));
        }
        self.ensure_idle("mouse settings")?;
        let motion = self.cfg.set_motion(speed, accel)?;
        info!(
            "mouse: base_speed={} acceleration={}",
            motion.base_speed, motion.acceleration
        );
        Ok(json!(motion))
    }

    pub fn shutdown(&mut self) {
        if self.flow.is_running() {
            if let Err(e) = self.stop_flow() {
                warn!("flow stop on shutdown: {e:#}");
            }
        }
    }
}

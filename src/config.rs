use anyhow::{Result, anyhow, bail};
use directories::UserDirs;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    io::Write,
    path::{Path, PathBuf},
};

use crate::flow::bindings::{BindingSpec, BindingTable};
use crate::hand::DEFAULT_TOUCH_SENSITIVITY;
use crate::motion::MotionSettings;
use crate::tracker::TrackPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    pub name: Option<String>,
    /// Start the flow as soon as the daemon is up.
    pub autostart: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tuning {
    /// Squared-scale factor in `distance * C < unit`.
    pub touch_sensitivity: f64,
    pub tracking: TrackPolicy,
    /// Anchor samples a motion guard looks back over.
    pub guard_window: usize,
    /// Pixels the anchor has to travel for a guard to pass.
    pub guard_min_distance: f64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            touch_sensitivity: DEFAULT_TOUCH_SENSITIVITY,
            tracking: TrackPolicy::Nearest,
            guard_window: 6,
            guard_min_distance: 20.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionConfig {
    pub command: String,
    pub args: Vec<String>,
    pub frame_timeout_ms: u64,
}

impl Default for PerceptionConfig {
    fn default() -> Self {
        Self {
            command: "handctl-landmarks".into(),
            args: Vec::new(),
            frame_timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CursorConfig {
    /// Track the pointer without creating a uinput device.
    #[serde(rename = "virtual")]
    pub virtual_only: bool,
    pub screen_width: u32,
    pub screen_height: u32,
    pub scroll_steps: i32,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            virtual_only: false,
            screen_width: 1920,
            screen_height: 1080,
            scroll_steps: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub meta: Meta,
    pub tuning: Tuning,
    pub motion: MotionSettings,
    pub perception: PerceptionConfig,
    pub cursor: CursorConfig,
    pub bindings: Vec<BindingSpec>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            meta: Meta::default(),
            tuning: Tuning::default(),
            motion: MotionSettings::default(),
            perception: PerceptionConfig::default(),
            cursor: CursorConfig::default(),
            bindings: BindingSpec::defaults(),
        }
    }
}

impl Profile {
    pub fn parse(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_profile(&profile)?;
        Ok(profile)
    }

    pub fn binding_table(&self) -> Result<BindingTable> {
        Ok(BindingTable::from_specs(&self.bindings)?)
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(dirs.home_dir().join(".config").join("handctl"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_from(&config_dir()?)
    }

    /// Same as [`load_or_install_default`](Self::load_or_install_default)
    /// rooted at `cfgdir`.
    pub fn load_from(cfgdir: &Path) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let mut active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        if active_name.is_empty() {
            warn!("active profile pointer is empty, using 'default'");
            active_name = "default".into();
        }
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir.to_path_buf(),
            profiles_dir: profdir,
            active_ptr,
        })
    }

    /// Re-reads the active profile; on error the current one stays.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        info!("profile '{}' reloaded", self.active_name);
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            bail!("profile not found: {}", p.display());
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        info!("active profile is now '{name}'");
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    /// Replaces the in-memory bindings; the profile file is left alone.
    pub fn set_bindings(&mut self, specs: Vec<BindingSpec>) -> Result<BindingTable> {
        let table = BindingTable::from_specs(&specs)?;
        self.profile.bindings = table.specs();
        Ok(table)
    }

    pub fn set_motion(&mut self, speed: Option<f64>, accel: Option<f64>) -> Result<MotionSettings> {
        let mut motion = self.profile.motion.clone();
        if let Some(s) = speed {
            motion.base_speed = s;
        }
        if let Some(a) = accel {
            motion.acceleration = a;
        }
        validate_motion(&motion)?;
        self.profile.motion = motion.clone();
        Ok(motion)
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let uinput_ok = Path::new("/dev/uinput").exists();
        let in_input_group = check_in_input_group();
        let perception = &self.profile.perception;
        let perception_found = find_in_path(&perception.command);
        serde_json::json!({
            "uinput_present": uinput_ok,
            "input_group_member": in_input_group,
            "virtual_cursor": self.profile.cursor.virtual_only,
            "perception_command": perception.command,
            "perception_command_found": perception_found,
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "bindings": self.profile.bindings.len(),
            "hints": {
                "udev_rule": "/etc/udev/rules.d/80-uinput.rules",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input",
                "no_uinput": "set [cursor] virtual = true to run without a device"
            }
        })
    }
}

fn load_profile(dir: &Path, name: &str) -> Result<Profile> {
    let path = dir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    Profile::parse(&txt).map_err(|e| anyhow!("invalid profile {}: {e}", path.display()))
}

fn validate_motion(m: &MotionSettings) -> Result<()> {
    if !(m.base_speed.is_finite() && m.base_speed > 0.0) {
        bail!("motion.base_speed must be positive");
    }
    if !(m.acceleration.is_finite() && m.acceleration >= 0.0) {
        bail!("motion.acceleration must be >= 0");
    }
    if m.window == 0 {
        bail!("motion.window must be at least 1");
    }
    if !(m.smoothing_alpha > 0.0 && m.smoothing_alpha <= 1.0) {
        bail!("motion.smoothing_alpha must be in (0,1]");
    }
    Ok(())
}

pub fn validate_profile(p: &Profile) -> Result<()> {
    let t = &p.tuning;
    if !(t.touch_sensitivity.is_finite() && t.touch_sensitivity > 0.0) {
        bail!("tuning.touch_sensitivity must be positive");
    }
    if t.guard_window < 2 {
        bail!("tuning.guard_window must be at least 2");
    }
    if !(t.guard_min_distance.is_finite() && t.guard_min_distance >= 0.0) {
        bail!("tuning.guard_min_distance must be >= 0");
    }
    validate_motion(&p.motion)?;

    if p.perception.command.trim().is_empty() {
        bail!("perception.command is empty");
    }
    if p.perception.frame_timeout_ms == 0 {
        bail!("perception.frame_timeout_ms must be positive");
    }
    if p.cursor.screen_width == 0 || p.cursor.screen_height == 0 {
        bail!("cursor screen size must be positive");
    }
    if i32::try_from(p.cursor.screen_width).is_err()
        || i32::try_from(p.cursor.screen_height).is_err()
    {
        bail!("cursor screen size must fit in {} pixels", i32::MAX);
    }
    if p.cursor.scroll_steps <= 0 {
        bail!("cursor.scroll_steps must be positive");
    }

    BindingTable::from_specs(&p.bindings)?;
    Ok(())
}

fn find_in_path(command: &str) -> bool {
    if command.contains('/') {
        return Path::new(command).is_file();
    }
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|dir| dir.join(command).is_file()))
        .unwrap_or(false)
}

fn check_in_input_group() -> bool {
    if let Ok(s) = fs::read_to_string("/etc/group") {
        let user = whoami::username();
        for line in s.lines() {
            if line.starts_with("input:")
                && line
                    .split(':')
                    .nth(3)
                    .unwrap_or("")
                    .split(',')
                    .any(|u| u == user)
            {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::Smoothing;

    #[test]
    fn bundled_profile_is_valid() {
        let p = Profile::parse(default_profile_text()).unwrap();
        assert_eq!(p.meta.name.as_deref(), Some("default"));
        assert_eq!(p.tuning.touch_sensitivity, DEFAULT_TOUCH_SENSITIVITY);
        assert_eq!(p.bindings.len(), 5);
        assert_eq!(p.binding_table().unwrap().len(), 5);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let p = Profile::parse("[cursor]\nvirtual = true\n").unwrap();
        assert!(p.cursor.virtual_only);
        assert_eq!(p.cursor.scroll_steps, 3);
        assert_eq!(p.motion, MotionSettings::default());
        assert_eq!(p.tuning.tracking, TrackPolicy::Nearest);
        assert_eq!(p.bindings, BindingSpec::defaults());
    }

    #[test]
    fn sections_override_defaults() {
        let txt = r#"
[tuning]
touch_sensitivity = 16.0
tracking = "first"

[motion]
base_speed = 0.2
smoothing = "exp"

[[bindings]]
gesture = "Thumb_Up"
window_fn = "AllTrue"
action = "LeftClick"
window = 4
"#;
        let p = Profile::parse(txt).unwrap();
        assert_eq!(p.tuning.touch_sensitivity, 16.0);
        assert_eq!(p.tuning.tracking, TrackPolicy::First);
        assert_eq!(p.motion.base_speed, 0.2);
        assert_eq!(p.motion.smoothing, Smoothing::Exp);
        assert_eq!(p.bindings.len(), 1);
        assert_eq!(p.bindings[0].window, 4);
    }

    #[test]
    fn invalid_profiles_are_rejected() {
        for txt in [
            "[tuning]\ntouch_sensitivity = 0.0\n",
            "[tuning]\nguard_window = 1\n",
            "[motion]\nwindow = 0\n",
            "[perception]\ncommand = \"\"\n",
            "[cursor]\nscroll_steps = 0\n",
            "[cursor]\nscreen_width = 3000000000\n",
            "[[bindings]]\ngesture = \"Wave\"\nwindow_fn = \"AllTrue\"\naction = \"LeftClick\"\n",
            "[[bindings]]\ngesture = \"Victory\"\nwindow_fn = \"Sometimes\"\naction = \"LeftClick\"\n",
        ] {
            assert!(Profile::parse(txt).is_err(), "accepted: {txt}");
        }
    }

    #[test]
    fn installs_default_and_switches_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = DaemonConfigState::load_from(dir.path()).unwrap();
        assert_eq!(st.active_name, "default");
        assert!(dir.path().join("profiles/default.toml").exists());

        fs::write(
            st.profiles_dir.join("replay.toml"),
            "[meta]\nname = \"replay\"\n[cursor]\nvirtual = true\n",
        )
        .unwrap();
        assert_eq!(st.list_profiles(), vec!["default", "replay"]);

        st.set_active("replay").unwrap();
        assert!(st.profile.cursor.virtual_only);
        assert_eq!(fs::read_to_string(&st.active_ptr).unwrap(), "replay");
        assert!(st.set_active("missing").is_err());
        assert_eq!(st.active_name, "replay");

        let again = DaemonConfigState::load_from(dir.path()).unwrap();
        assert_eq!(again.active_name, "replay");
    }

    #[test]
    fn broken_reload_keeps_the_current_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = DaemonConfigState::load_from(dir.path()).unwrap();
        fs::write(st.profiles_dir.join("default.toml"), "[motion]\nwindow = 0\n").unwrap();
        assert!(st.reload().is_err());
        assert_eq!(st.profile.bindings.len(), 5);
    }

    #[test]
    fn runtime_edits_are_validated() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = DaemonConfigState::load_from(dir.path()).unwrap();

        let m = st.set_motion(Some(0.3), None).unwrap();
        assert_eq!(m.base_speed, 0.3);
        assert_eq!(st.profile.motion.acceleration, 0.1);
        assert!(st.set_motion(Some(-1.0), None).is_err());
        assert_eq!(st.profile.motion.base_speed, 0.3);

        let mut specs = BindingSpec::defaults();
        specs.push(specs[0].clone());
        assert_eq!(st.set_bindings(specs).unwrap().len(), 5);
        assert!(
            st.set_bindings(vec![BindingSpec::new("Victory", "AllTrue", "Teleport")])
                .is_err()
        );
        assert_eq!(st.profile.bindings.len(), 5);
    }

    #[test]
    fn doctor_reports_the_perception_command() {
        let dir = tempfile::tempdir().unwrap();
        let st = DaemonConfigState::load_from(dir.path()).unwrap();
        let report = st.doctor_report();
        assert_eq!(report["active_profile"], "default");
        assert_eq!(report["config_dir"], dir.path().display().to_string());
        assert_eq!(report["perception_command"], "handctl-landmarks");
        assert!(report["perception_command_found"].is_boolean());
    }
}

//! Landmark input sources.
//!
//! The perception model runs out of process and writes one JSON object per
//! frame on stdout:
//!
//! ```text
//! {"width":1280,"height":720,"time":12.5,"hands":[{"landmarks":[[x,y],...],"gesture":"Victory"}]}
//! ```
//!
//! `time` is optional, `normalized` landmarks are scaled by the frame size,
//! and any coordinate past x/y is ignored.

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::VecDeque,
    fs,
    io::{BufRead, BufReader},
    path::Path,
    process::{Child, Command, Stdio},
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use crate::config::PerceptionConfig;
use crate::hand::{GestureLabel, HandInfo, Point};

/// Producer of per-frame hand snapshots.
pub trait HandSource: Send {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Hands in the next frame; `None` once the stream has ended.
    fn read(&mut self) -> Result<Option<Vec<HandInfo>>>;

    fn close(&mut self) {}

    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandRecord {
    pub landmarks: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gesture: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameRecord {
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
    #[serde(default)]
    pub normalized: bool,
    #[serde(default)]
    pub hands: Vec<HandRecord>,
}

impl FrameRecord {
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| anyhow!("malformed landmark frame: {e}"))
    }

    /// `fallback_time` stamps frames that carry no capture time.
    pub fn into_hands(self, fallback_time: f64) -> Vec<HandInfo> {
        let time = self.time.unwrap_or(fallback_time);
        let (sx, sy) = if self.normalized {
            (self.width as f64, self.height as f64)
        } else {
            (1.0, 1.0)
        };
        self.hands
            .into_iter()
            .map(|h| {
                let points: Vec<Point> = h
                    .landmarks
                    .iter()
                    .map(|c| {
                        Point::new(
                            c.first().copied().unwrap_or_default() * sx,
                            c.get(1).copied().unwrap_or_default() * sy,
                        )
                    })
                    .collect();
                let gesture = match h.gesture.as_deref() {
                    None => GestureLabel::None,
                    Some(name) => GestureLabel::from_name(name).unwrap_or_else(|| {
                        debug!("unknown gesture label '{name}'");
                        GestureLabel::None
                    }),
                };
                HandInfo::new(&points, (self.width, self.height), time, gesture)
            })
            .collect()
    }
}

/// Landmarks streamed from an external perception process.
pub struct CommandSource {
    cfg: PerceptionConfig,
    child: Option<Child>,
    lines: Option<Receiver<std::io::Result<String>>>,
    started: Instant,
}

impl CommandSource {
    pub fn new(cfg: PerceptionConfig) -> Self {
        Self {
            cfg,
            child: None,
            lines: None,
            started: Instant::now(),
        }
    }
}

impl HandSource for CommandSource {
    fn open(&mut self) -> Result<()> {
        let mut child = Command::new(&self.cfg.command)
            .args(&self.cfg.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to spawn landmark process '{}'", self.cfg.command))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("landmark process has no stdout"))?;
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("handctl-landmarks".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            })?;

        info!("perception: spawned '{}' (pid={})", self.cfg.command, child.id());
        self.child = Some(child);
        self.lines = Some(rx);
        self.started = Instant::now();
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Vec<HandInfo>>> {
        let rx = self
            .lines
            .as_ref()
            .ok_or_else(|| anyhow!("landmark process is not running"))?;
        let timeout = Duration::from_millis(self.cfg.frame_timeout_ms);
        loop {
            let line = match rx.recv_timeout(timeout) {
                Ok(line) => line.context("reading landmark stream")?,
                Err(RecvTimeoutError::Timeout) => {
                    bail!("no landmark frame within {} ms", self.cfg.frame_timeout_ms)
                }
                Err(RecvTimeoutError::Disconnected) => {
                    bail!("landmark process closed its output")
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let frame = FrameRecord::parse(&line)?;
            return Ok(Some(frame.into_hands(self.started.elapsed().as_secs_f64())));
        }
    }

    fn close(&mut self) {
        self.lines = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                debug!("landmark process already gone: {e}");
            }
            let _ = child.wait();
            info!("perception: stopped '{}'", self.cfg.command);
        }
    }

    fn describe(&self) -> String {
        format!("command '{}'", self.cfg.command)
    }
}

impl Drop for CommandSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Frames replayed from a recording, one JSON object per line.
#[derive(Debug)]
pub struct ReplaySource {
    label: String,
    frames: VecDeque<FrameRecord>,
    realtime: bool,
    started: Instant,
    first_time: Option<f64>,
    index: usize,
}

impl ReplaySource {
    pub fn from_path(path: &Path, realtime: bool) -> Result<Self> {
        let txt = fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
        let mut frames = VecDeque::new();
        for (n, line) in txt.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let frame = FrameRecord::parse(line)
                .with_context(|| format!("{}:{}", path.display(), n + 1))?;
            frames.push_back(frame);
        }
        if frames.is_empty() {
            warn!("replay file {} holds no frames", path.display());
        }
        let mut src = Self::from_frames(frames.into(), realtime);
        src.label = path.display().to_string();
        Ok(src)
    }

    pub fn from_frames(frames: Vec<FrameRecord>, realtime: bool) -> Self {
        Self {
            label: "in-memory".into(),
            frames: frames.into(),
            realtime,
            started: Instant::now(),
            first_time: None,
            index: 0,
        }
    }
}

// nominal spacing for recordings without timestamps
const REPLAY_FRAME_SECS: f64 = 1.0 / 30.0;

impl HandSource for ReplaySource {
    fn open(&mut self) -> Result<()> {
        self.started = Instant::now();
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Vec<HandInfo>>> {
        let Some(frame) = self.frames.pop_front() else {
            return Ok(None);
        };
        let nominal = self.index as f64 * REPLAY_FRAME_SECS;
        self.index += 1;

        if self.realtime {
            let t = frame.time.unwrap_or(nominal);
            let first = *self.first_time.get_or_insert(t);
            let due = Duration::try_from_secs_f64((t - first).max(0.0)).map_err(|e| {
                anyhow!("{}: frame {} has unusable time {t}: {e}", self.label, self.index)
            })?;
            if let Some(wait) = due.checked_sub(self.started.elapsed()) {
                thread::sleep(wait);
            }
        }
        Ok(Some(frame.into_hands(nominal)))
    }

    fn describe(&self) -> String {
        format!("replay {}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hand::LandMark;
    use std::io::Write;

    #[test]
    fn parses_a_frame_with_pixel_landmarks() {
        let line = r#"{"width":640,"height":480,"time":2.5,"hands":[{"landmarks":[[1,2,0.3],[3,4]],"gesture":"Victory"}]}"#;
        let hands = FrameRecord::parse(line).unwrap().into_hands(0.0);
        assert_eq!(hands.len(), 1);
        let h = &hands[0];
        assert_eq!(h.landmark(LandMark::Wrist), Point::new(1.0, 2.0));
        assert_eq!(h.landmark(LandMark::ThumbCmc), Point::new(3.0, 4.0));
        assert_eq!(h.gesture(), GestureLabel::Victory);
        assert_eq!(h.capture_time(), 2.5);
        assert_eq!(h.frame_size(), (640, 480));
    }

    #[test]
    fn normalized_landmarks_are_scaled_to_the_frame() {
        let line = r#"{"width":200,"height":100,"normalized":true,"hands":[{"landmarks":[[0.5,0.5]]}]}"#;
        let hands = FrameRecord::parse(line).unwrap().into_hands(7.0);
        assert_eq!(hands[0].landmark(LandMark::Wrist), Point::new(100.0, 50.0));
        assert_eq!(hands[0].capture_time(), 7.0);
    }

    #[test]
    fn unknown_labels_and_empty_frames_are_not_errors() {
        let line = r#"{"width":10,"height":10,"hands":[{"landmarks":[],"gesture":"Wave"}]}"#;
        let hands = FrameRecord::parse(line).unwrap().into_hands(0.0);
        assert_eq!(hands[0].gesture(), GestureLabel::None);

        let empty = FrameRecord::parse(r#"{"width":10,"height":10}"#).unwrap();
        assert!(empty.into_hands(0.0).is_empty());
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(FrameRecord::parse("{\"width\":10}").is_err());
        assert!(FrameRecord::parse("not json").is_err());
    }

    #[test]
    fn replay_file_yields_frames_then_ends() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"width":10,"height":10,"hands":[]}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"width":10,"height":10,"hands":[{{"landmarks":[[1,1]]}}]}}"#).unwrap();

        let mut src = ReplaySource::from_path(file.path(), false).unwrap();
        src.open().unwrap();
        assert_eq!(src.read().unwrap().unwrap().len(), 0);
        let second = src.read().unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert!((second[0].capture_time() - REPLAY_FRAME_SECS).abs() < 1e-9);
        assert!(src.read().unwrap().is_none());
    }

    #[test]
    fn replay_reports_the_offending_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"width":10,"height":10}}"#).unwrap();
        writeln!(file, "garbage").unwrap();
        let err = ReplaySource::from_path(file.path(), false).unwrap_err();
        assert!(format!("{err:#}").contains(":2"));
    }

    #[test]
    fn unpaceable_timestamp_is_an_error() {
        let frame = |t: f64| FrameRecord {
            width: 640,
            height: 480,
            time: Some(t),
            normalized: false,
            hands: Vec::new(),
        };
        let mut src = ReplaySource::from_frames(vec![frame(0.0), frame(1e300)], true);
        src.open().unwrap();
        assert!(src.read().unwrap().is_some());
        let err = src.read().unwrap_err().to_string();
        assert!(err.contains("frame 2"), "{err}");
    }

    #[test]
    fn missing_command_fails_to_open() {
        let mut src = CommandSource::new(PerceptionConfig {
            command: "/nonexistent/handctl-landmarks".into(),
            args: vec![],
            frame_timeout_ms: 100,
        });
        assert!(src.open().is_err());
        assert!(src.read().is_err());
    }
}

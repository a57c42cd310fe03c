//! Hand motion to cursor motion.
//!
//! Successive anchor positions are smoothed, turned into a speed, and pushed
//! through a power-law acceleration curve: slow hands get fine control, fast
//! hands cross the screen.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::actions::{CursorHandles, Position};
use crate::filter::{ExpStepFilter, SlidingWindowMeanFilter};
use crate::hand::{HandInfo, Point};

/// Floor for the time between two samples, in seconds.
pub const MIN_ELAPSED: f64 = 0.01;

const ZERO_MOTION: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Smoothing {
    #[default]
    Mean,
    Exp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    pub base_speed: f64,
    pub acceleration: f64,
    /// Samples in the displacement mean filter.
    pub window: usize,
    pub smoothing: Smoothing,
    /// Step size of the exponential filter.
    pub smoothing_alpha: f64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            base_speed: 0.1,
            acceleration: 0.1,
            window: 5,
            smoothing: Smoothing::Mean,
            smoothing_alpha: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
enum Smoother {
    Mean(SlidingWindowMeanFilter<Point>),
    Exp(ExpStepFilter<Point>),
}

impl Smoother {
    fn for_settings(s: &MotionSettings) -> Self {
        match s.smoothing {
            Smoothing::Mean => Self::Mean(SlidingWindowMeanFilter::new(s.window)),
            Smoothing::Exp => Self::Exp(ExpStepFilter::new(s.smoothing_alpha)),
        }
    }

    fn push(&mut self, sample: Point) -> Point {
        match self {
            Self::Mean(f) => f.push(sample),
            Self::Exp(f) => f.push(sample),
        }
    }

    fn reset(&mut self) {
        match self {
            Self::Mean(f) => f.reset(),
            Self::Exp(f) => f.reset(),
        }
    }
}

pub struct HandMotion {
    settings: MotionSettings,
    smoother: Smoother,
    last_hand: Option<HandInfo>,
}

impl HandMotion {
    pub fn new(settings: MotionSettings) -> Self {
        let smoother = Smoother::for_settings(&settings);
        Self {
            settings,
            smoother,
            last_hand: None,
        }
    }

    /// Forget the previous hand and the smoothing history; the next sample
    /// will not move the cursor.
    pub fn reset(&mut self) {
        self.last_hand = None;
        self.smoother.reset();
    }

    /// Cursor displacement for `hand`, `None` on the first sample.
    pub fn step(&mut self, hand: &HandInfo) -> Option<(i32, i32)> {
        let last = self.last_hand.replace(hand.clone())?;

        let (raw, dt) = hand.anchor_diff(&last);
        let dt = dt.max(MIN_ELAPSED);
        let d = self.smoother.push(raw);

        let len = d.length();
        if len < ZERO_MOTION {
            return Some((0, 0));
        }
        let dir = d / len;
        let speed = len / dt;
        let magnitude = speed * self.settings.base_speed * speed.powf(self.settings.acceleration);

        Some(((dir.x * magnitude) as i32, (dir.y * magnitude) as i32))
    }

    /// Moves the cursor for `hand` and returns where it ended up.
    pub fn forward(&mut self, hand: &HandInfo, cursor: &mut CursorHandles) -> Result<Position> {
        match self.step(hand) {
            None => Ok(cursor.position()),
            Some((dx, dy)) => cursor.move_by(dx, dy),
        }
    }
}

//! Per-frame hand snapshot and landmark geometry.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Sub};

/// Number of landmarks reported per hand.
pub const LANDMARK_COUNT: usize = 21;

/// Touch sensitivity on the squared-distance scale (2.5 on the plain scale).
pub const DEFAULT_TOUCH_SENSITIVITY: f64 = 6.25;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn length_sq(self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(self) -> f64 {
        self.length_sq().sqrt()
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Point {
    type Output = Point;
    fn mul(self, rhs: f64) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

impl Div<f64> for Point {
    type Output = Point;
    fn div(self, rhs: f64) -> Point {
        Point::new(self.x / rhs, self.y / rhs)
    }
}

/// Squared Euclidean distance. Every threshold compared against it is squared too.
pub fn distance(a: Point, b: Point) -> f64 {
    (b - a).length_sq()
}

/// Hand landmark indices as reported by the perception model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LandMark {
    Wrist = 0,
    ThumbCmc = 1,
    ThumbMcp = 2,
    ThumbIp = 3,
    ThumbTip = 4,
    IndexFingerMcp = 5,
    IndexFingerPip = 6,
    IndexFingerDip = 7,
    IndexFingerTip = 8,
    MiddleFingerMcp = 9,
    MiddleFingerPip = 10,
    MiddleFingerDip = 11,
    MiddleFingerTip = 12,
    RingFingerMcp = 13,
    RingFingerPip = 14,
    RingFingerDip = 15,
    RingFingerTip = 16,
    PinkyMcp = 17,
    PinkyPip = 18,
    PinkyDip = 19,
    PinkyTip = 20,
}

impl LandMark {
    /// Reference point of the whole hand.
    pub const ANCHOR: LandMark = LandMark::MiddleFingerMcp;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Gesture classification attached to a hand by the perception model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GestureLabel {
    #[default]
    #[serde(rename = "None", alias = "Unknown")]
    None,
    #[serde(rename = "Closed_Fist")]
    ClosedFist,
    #[serde(rename = "Open_Palm")]
    OpenPalm,
    #[serde(rename = "Pointing_Up")]
    PointingUp,
    #[serde(rename = "Thumb_Down")]
    ThumbDown,
    #[serde(rename = "Thumb_Up")]
    ThumbUp,
    Victory,
    #[serde(rename = "ILoveYou")]
    ILoveYou,
}

impl GestureLabel {
    pub const ALL: [GestureLabel; 8] = [
        GestureLabel::None,
        GestureLabel::ClosedFist,
        GestureLabel::OpenPalm,
        GestureLabel::PointingUp,
        GestureLabel::ThumbDown,
        GestureLabel::ThumbUp,
        GestureLabel::Victory,
        GestureLabel::ILoveYou,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::ClosedFist => "Closed_Fist",
            Self::OpenPalm => "Open_Palm",
            Self::PointingUp => "Pointing_Up",
            Self::ThumbDown => "Thumb_Down",
            Self::ThumbUp => "Thumb_Up",
            Self::Victory => "Victory",
            Self::ILoveYou => "ILoveYou",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        if name == "Unknown" {
            return Some(Self::None);
        }
        Self::ALL.into_iter().find(|g| g.as_str() == name)
    }
}

/// Immutable snapshot of one hand in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct HandInfo {
    landmarks: [Point; LANDMARK_COUNT],
    frame_size: (u32, u32),
    capture_time: f64,
    gesture: GestureLabel,
    anchor: Point,
    unit: f64,
}

impl HandInfo {
    /// Missing points stay at the origin; points past the 21st are ignored.
    pub fn new(
        points: &[Point],
        frame_size: (u32, u32),
        capture_time: f64,
        gesture: GestureLabel,
    ) -> Self {
        let mut landmarks = [Point::ORIGIN; LANDMARK_COUNT];
        for (slot, p) in landmarks.iter_mut().zip(points) {
            *slot = *p;
        }
        let anchor = landmarks[LandMark::ANCHOR.index()];
        let unit = distance(landmarks[LandMark::Wrist.index()], anchor);
        Self {
            landmarks,
            frame_size,
            capture_time,
            gesture,
            anchor,
            unit,
        }
    }

    pub fn landmarks(&self) -> &[Point] {
        &self.landmarks
    }

    pub fn landmark(&self, mark: LandMark) -> Point {
        self.landmark_at(mark.index())
    }

    /// Raw index access; an index past the landmark set is a wiring bug.
    pub fn landmark_at(&self, index: usize) -> Point {
        assert!(
            index < LANDMARK_COUNT,
            "landmark index {index} out of range (0..{LANDMARK_COUNT})"
        );
        self.landmarks[index]
    }

    pub fn anchor(&self) -> Point {
        self.anchor
    }

    /// Squared wrist-to-anchor distance, the per-hand scale.
    pub fn unit(&self) -> f64 {
        self.unit
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    pub fn capture_time(&self) -> f64 {
        self.capture_time
    }

    pub fn gesture(&self) -> GestureLabel {
        self.gesture
    }

    pub fn mark_distance(&self, a: LandMark, b: LandMark) -> f64 {
        distance(self.landmark(a), self.landmark(b))
    }

    pub fn is_touched(&self, a: LandMark, b: LandMark) -> bool {
        self.is_touched_with(a, b, DEFAULT_TOUCH_SENSITIVITY)
    }

    pub fn is_touched_with(&self, a: LandMark, b: LandMark, sensitivity: f64) -> bool {
        self.mark_distance(a, b) * sensitivity < self.unit
    }

    /// Anchor displacement and elapsed seconds since `earlier`.
    pub fn anchor_diff(&self, earlier: &HandInfo) -> (Point, f64) {
        (
            self.anchor - earlier.anchor,
            self.capture_time - earlier.capture_time,
        )
    }

    pub fn anchor_distance(&self, other: &HandInfo) -> f64 {
        distance(self.anchor, other.anchor)
    }
}

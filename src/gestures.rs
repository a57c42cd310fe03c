use crate::hand::{GestureLabel, HandInfo, LandMark};

/// Fingertip pairs checked by touch matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TouchPair {
    IndexThumb,
    MiddleThumb,
    RingThumb,
    PinkyThumb,
}

impl TouchPair {
    pub const ALL: [TouchPair; 4] = [
        TouchPair::IndexThumb,
        TouchPair::MiddleThumb,
        TouchPair::RingThumb,
        TouchPair::PinkyThumb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IndexThumb => "Index_Thumb",
            Self::MiddleThumb => "Middle_Thumb",
            Self::RingThumb => "Ring_Thumb",
            Self::PinkyThumb => "Pinky_Thumb",
        }
    }

    pub fn marks(&self) -> (LandMark, LandMark) {
        match self {
            Self::IndexThumb => (LandMark::IndexFingerTip, LandMark::ThumbTip),
            Self::MiddleThumb => (LandMark::MiddleFingerTip, LandMark::ThumbTip),
            Self::RingThumb => (LandMark::RingFingerTip, LandMark::ThumbTip),
            Self::PinkyThumb => (LandMark::PinkyTip, LandMark::ThumbTip),
        }
    }
}

/// Per-frame predicate over one hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureMatcher {
    Touch(TouchPair),
    Label(GestureLabel),
}

impl GestureMatcher {
    /// Every matcher reachable by name.
    pub fn all() -> impl Iterator<Item = GestureMatcher> {
        TouchPair::ALL.into_iter().map(GestureMatcher::Touch).chain(
            GestureLabel::ALL
                .into_iter()
                .filter(|g| *g != GestureLabel::None)
                .map(GestureMatcher::Label),
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Touch(pair) => pair.as_str(),
            Self::Label(label) => label.as_str(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().find(|m| m.name() == name)
    }

    pub fn matches(&self, hand: &HandInfo, sensitivity: f64) -> bool {
        match self {
            Self::Touch(pair) => {
                let (a, b) = pair.marks();
                hand.is_touched_with(a, b, sensitivity)
            }
            Self::Label(label) => hand.gesture() == *label,
        }
    }
}

//! Concrete flow nodes.

use anyhow::Result;
use log::{debug, info};
use std::sync::Arc;

use crate::actions::CursorAction;
use crate::flow::FlowError;
use crate::flow::graph::{FlowContext, GraphError, Node, Sample, Tracked, Trigger, Value};
use crate::gestures::GestureMatcher;
use crate::hand::Point;
use crate::input::HandSource;
use crate::motion::{HandMotion, MotionSettings};
use crate::tracker::{HandTracker, TrackPolicy};
use crate::window::{MovedInDirection, Window, WindowFn};

fn unexpected(node: &str, expected: &'static str, got: &Value) -> anyhow::Error {
    GraphError::UnexpectedInput {
        node: node.to_string(),
        expected,
        got: got.kind(),
    }
    .into()
}

/// Pulls one frame per tick.
pub struct SourceNode {
    source: Box<dyn HandSource>,
    opened: bool,
}

impl SourceNode {
    pub fn new(source: Box<dyn HandSource>) -> Self {
        Self {
            source,
            opened: false,
        }
    }
}

impl Node for SourceNode {
    fn name(&self) -> &str {
        "source"
    }

    fn init(&mut self, _ctx: &mut FlowContext) -> Result<()> {
        self.source.open()?;
        self.opened = true;
        info!("flow: reading from {}", self.source.describe());
        Ok(())
    }

    fn forward(&mut self, _input: Value, _ctx: &mut FlowContext) -> Result<Option<Value>> {
        match self.source.read()? {
            Some(hands) => Ok(Some(Value::Hands(hands.into()))),
            None => Err(FlowError::SourceEnded.into()),
        }
    }

    fn clean_effect(&mut self, _ctx: &mut FlowContext) {
        if std::mem::take(&mut self.opened) {
            self.source.close();
        }
    }
}

pub struct TrackerNode {
    tracker: HandTracker,
}

impl TrackerNode {
    pub fn new(policy: TrackPolicy) -> Self {
        Self {
            tracker: HandTracker::new(policy),
        }
    }
}

impl Node for TrackerNode {
    fn name(&self) -> &str {
        "tracker"
    }

    fn forward(&mut self, input: Value, _ctx: &mut FlowContext) -> Result<Option<Value>> {
        let Value::Hands(hands) = &input else {
            return Err(unexpected(self.name(), "hands", &input));
        };
        Ok(self
            .tracker
            .select(hands)
            .map(|hand| Value::Hand(Arc::new(hand))))
    }
}

/// Moves the cursor after the tracked hand.
pub struct MotionNode {
    motion: HandMotion,
}

impl MotionNode {
    pub fn new(settings: MotionSettings) -> Self {
        Self {
            motion: HandMotion::new(settings),
        }
    }
}

impl Node for MotionNode {
    fn name(&self) -> &str {
        "motion"
    }

    fn forward(&mut self, input: Value, ctx: &mut FlowContext) -> Result<Option<Value>> {
        let hand = match input {
            Value::Hand(hand) => hand,
            other => return Err(unexpected(self.name(), "hand", &other)),
        };
        let cursor = if ctx.motion_paused() {
            self.motion.reset();
            ctx.cursor.position()
        } else {
            self.motion.forward(&hand, &mut ctx.cursor)?
        };
        Ok(Some(Value::Tracked(Tracked { hand, cursor })))
    }
}

pub struct MatchNode {
    name: String,
    matcher: GestureMatcher,
    sensitivity: f64,
}

impl MatchNode {
    pub fn new(name: String, matcher: GestureMatcher, sensitivity: f64) -> Self {
        Self {
            name,
            matcher,
            sensitivity,
        }
    }
}

impl Node for MatchNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, input: Value, _ctx: &mut FlowContext) -> Result<Option<Value>> {
        let Value::Tracked(t) = &input else {
            return Err(unexpected(&self.name, "tracked", &input));
        };
        Ok(Some(Value::Sample(Sample {
            active: self.matcher.matches(&t.hand, self.sensitivity),
            anchor: t.hand.anchor(),
            cursor: t.cursor,
        })))
    }
}

/// Reduces the last `len` match results; silent until the window is full.
pub struct WindowNode {
    name: String,
    func: WindowFn,
    window: Window<bool>,
}

impl WindowNode {
    pub fn new(name: String, func: WindowFn, len: usize) -> Self {
        Self {
            name,
            func,
            window: Window::new(len),
        }
    }
}

impl Node for WindowNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, input: Value, _ctx: &mut FlowContext) -> Result<Option<Value>> {
        let Value::Sample(s) = &input else {
            return Err(unexpected(&self.name, "sample", &input));
        };
        if !self.window.push(s.active) {
            return Ok(None);
        }
        Ok(Some(Value::Trigger(Trigger {
            fired: self.func.apply(self.window.iter().copied()),
            anchor: s.anchor,
            cursor: s.cursor,
        })))
    }
}

/// Lets a trigger through only while the anchor sweeps in one direction.
pub struct GuardNode {
    name: String,
    guard: MovedInDirection,
    anchors: Window<Point>,
}

impl GuardNode {
    pub fn new(name: String, guard: MovedInDirection, len: usize) -> Self {
        Self {
            name,
            guard,
            anchors: Window::new(len),
        }
    }
}

impl Node for GuardNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, input: Value, _ctx: &mut FlowContext) -> Result<Option<Value>> {
        let Value::Trigger(t) = &input else {
            return Err(unexpected(&self.name, "trigger", &input));
        };
        let full = self.anchors.push(t.anchor);
        let moved = full && self.guard.apply(self.anchors.iter().copied());
        Ok(Some(Value::Trigger(Trigger {
            fired: t.fired && moved,
            ..*t
        })))
    }
}

/// Executes its action whenever the incoming trigger fired.
pub struct ActionNode {
    name: String,
    action: CursorAction,
}

impl ActionNode {
    pub fn new(name: String, action: CursorAction) -> Self {
        Self { name, action }
    }
}

impl Node for ActionNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, input: Value, ctx: &mut FlowContext) -> Result<Option<Value>> {
        let Value::Trigger(t) = &input else {
            return Err(unexpected(&self.name, "trigger", &input));
        };
        if t.fired {
            ctx.cursor.execute(self.action, t.cursor)?;
        }
        Ok(Some(input))
    }
}

/// Freezes cursor motion on the tick after its trigger fired.
pub struct MotionPauseNode {
    name: String,
}

impl MotionPauseNode {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

impl Node for MotionPauseNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn forward(&mut self, input: Value, ctx: &mut FlowContext) -> Result<Option<Value>> {
        let Value::Trigger(t) = &input else {
            return Err(unexpected(&self.name, "trigger", &input));
        };
        if t.fired {
            debug!("{}: pausing motion", self.name);
            ctx.request_motion_pause();
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::testing::{DriverCall, RecordingCursor, handles};
    use crate::actions::{Button, EventBus, Position};
    use crate::flow::graph::tests::test_context;
    use crate::gestures::TouchPair;
    use crate::hand::{GestureLabel, HandInfo, LANDMARK_COUNT};
    use crate::window::MotionGuard;

    fn hand(anchor: Point, gesture: GestureLabel) -> Arc<HandInfo> {
        let mut pos = vec![Point::ORIGIN; LANDMARK_COUNT];
        pos[9] = anchor;
        Arc::new(HandInfo::new(&pos, (640, 480), 0.0, gesture))
    }

    fn trigger(fired: bool, y: f64) -> Value {
        Value::Trigger(Trigger {
            fired,
            anchor: Point::new(0.0, y),
            cursor: Position::new(7, 8),
        })
    }

    fn fired(v: Option<Value>) -> Option<bool> {
        match v {
            Some(Value::Trigger(t)) => Some(t.fired),
            None => None,
            other => panic!("unexpected output {other:?}"),
        }
    }

    struct Frames(Vec<Vec<HandInfo>>);

    impl HandSource for Frames {
        fn read(&mut self) -> Result<Option<Vec<HandInfo>>> {
            Ok((!self.0.is_empty()).then(|| self.0.remove(0)))
        }

        fn describe(&self) -> String {
            "frames".into()
        }
    }

    #[test]
    fn source_reports_end_of_stream() {
        let mut ctx = test_context();
        let mut node = SourceNode::new(Box::new(Frames(vec![vec![]])));
        node.init(&mut ctx).unwrap();
        match node.forward(Value::Tick, &mut ctx).unwrap() {
            Some(Value::Hands(h)) => assert!(h.is_empty()),
            other => panic!("unexpected {other:?}"),
        }
        let err = node.forward(Value::Tick, &mut ctx).unwrap_err();
        assert_eq!(err.downcast_ref::<FlowError>(), Some(&FlowError::SourceEnded));
    }

    #[test]
    fn empty_frame_is_the_sentinel() {
        let mut ctx = test_context();
        let mut node = TrackerNode::new(TrackPolicy::Nearest);
        let out = node.forward(Value::Hands(Vec::new().into()), &mut ctx).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn wrong_input_kind_is_an_error() {
        let mut ctx = test_context();
        let mut node = WindowNode::new("w".into(), WindowFn::AllTrue, 2);
        let err = node.forward(Value::Tick, &mut ctx).unwrap_err();
        assert_eq!(
            err.downcast_ref::<GraphError>(),
            Some(&GraphError::UnexpectedInput {
                node: "w".into(),
                expected: "sample",
                got: "tick",
            })
        );
    }

    #[test]
    fn paused_motion_holds_the_cursor() {
        let driver = RecordingCursor::at(100, 100);
        let mut ctx = FlowContext::new(handles(&driver, &EventBus::new()));
        let mut node = MotionNode::new(MotionSettings::default());

        node.forward(Value::Hand(hand(Point::new(0.0, 0.0), GestureLabel::None)), &mut ctx)
            .unwrap();
        ctx.request_motion_pause();
        ctx.begin_tick();
        let moved = hand(Point::new(50.0, 0.0), GestureLabel::None);
        let out = node.forward(Value::Hand(moved), &mut ctx).unwrap();
        match out {
            Some(Value::Tracked(t)) => assert_eq!(t.cursor, Position::new(100, 100)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn label_matcher_follows_the_classifier() {
        let mut ctx = test_context();
        let mut node = MatchNode::new(
            "m".into(),
            GestureMatcher::Label(GestureLabel::Victory),
            6.25,
        );
        let tracked = |g| {
            Value::Tracked(Tracked {
                hand: hand(Point::new(3.0, 4.0), g),
                cursor: Position::new(1, 2),
            })
        };
        match node.forward(tracked(GestureLabel::Victory), &mut ctx).unwrap() {
            Some(Value::Sample(s)) => {
                assert!(s.active);
                assert_eq!(s.anchor, Point::new(3.0, 4.0));
                assert_eq!(s.cursor, Position::new(1, 2));
            }
            other => panic!("unexpected {other:?}"),
        }
        match node.forward(tracked(GestureLabel::OpenPalm), &mut ctx).unwrap() {
            Some(Value::Sample(s)) => assert!(!s.active),
            other => panic!("unexpected {other:?}"),
        }
        let touch = MatchNode::new("t".into(), GestureMatcher::Touch(TouchPair::IndexThumb), 6.25);
        assert_eq!(touch.name(), "t");
    }

    #[test]
    fn window_waits_until_full() {
        let mut ctx = test_context();
        let mut node = WindowNode::new("w".into(), WindowFn::JumpTrue, 2);
        let sample = |active| {
            Value::Sample(Sample {
                active,
                anchor: Point::ORIGIN,
                cursor: Position::default(),
            })
        };
        assert_eq!(fired(node.forward(sample(false), &mut ctx).unwrap()), None);
        assert_eq!(fired(node.forward(sample(true), &mut ctx).unwrap()), Some(true));
        assert_eq!(fired(node.forward(sample(true), &mut ctx).unwrap()), Some(false));
    }

    #[test]
    fn guard_needs_a_full_consistent_sweep() {
        let mut ctx = test_context();
        let mut node = GuardNode::new("g".into(), MotionGuard::MoveUp.with_distance(20.0), 3);
        assert_eq!(fired(node.forward(trigger(true, 100.0), &mut ctx).unwrap()), Some(false));
        assert_eq!(fired(node.forward(trigger(true, 90.0), &mut ctx).unwrap()), Some(false));
        assert_eq!(fired(node.forward(trigger(true, 75.0), &mut ctx).unwrap()), Some(true));
        // upstream did not fire
        assert_eq!(fired(node.forward(trigger(false, 50.0), &mut ctx).unwrap()), Some(false));
        // direction reversal
        assert_eq!(fired(node.forward(trigger(true, 60.0), &mut ctx).unwrap()), Some(false));
    }

    #[test]
    fn action_runs_only_when_fired() {
        let driver = RecordingCursor::at(0, 0);
        let mut ctx = FlowContext::new(handles(&driver, &EventBus::new()));
        let mut node = ActionNode::new("a".into(), CursorAction::LeftClick);
        node.forward(trigger(false, 0.0), &mut ctx).unwrap();
        assert!(driver.calls().is_empty());
        let out = node.forward(trigger(true, 0.0), &mut ctx).unwrap();
        assert_eq!(fired(out), Some(true));
        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::Move(Position::new(7, 8)),
                DriverCall::Press(Button::Left, true),
                DriverCall::Press(Button::Left, false),
            ]
        );
    }

    #[test]
    fn pause_node_requests_for_the_next_tick() {
        let mut ctx = test_context();
        let mut node = MotionPauseNode::new("p".into());
        assert!(node.forward(trigger(false, 0.0), &mut ctx).unwrap().is_none());
        ctx.begin_tick();
        assert!(!ctx.motion_paused());
        node.forward(trigger(true, 0.0), &mut ctx).unwrap();
        ctx.begin_tick();
        assert!(ctx.motion_paused());
    }
}

//! Push-based dataflow graph.
//!
//! Nodes live in an arena and refer to their children by [`NodeId`]. A tick
//! forwards the start node, then walks breadth-first: every enabled child of a
//! node that produced a value is forwarded with that value, until no node has
//! anything left to hand on. `None` is the no-result sentinel and stops
//! propagation along that branch.

use anyhow::Result;
use log::trace;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::actions::{CursorHandles, Position};
use crate::hand::{HandInfo, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The followed hand together with the cursor position after motion.
#[derive(Debug, Clone, PartialEq)]
pub struct Tracked {
    pub hand: Arc<HandInfo>,
    pub cursor: Position,
}

/// One frame's match result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub active: bool,
    pub anchor: Point,
    pub cursor: Position,
}

/// Reduced window result, carrying where it should act.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trigger {
    pub fired: bool,
    pub anchor: Point,
    pub cursor: Position,
}

/// Values travelling along edges.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tick,
    Hands(Arc<[HandInfo]>),
    Hand(Arc<HandInfo>),
    Tracked(Tracked),
    Sample(Sample),
    Trigger(Trigger),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tick => "tick",
            Self::Hands(_) => "hands",
            Self::Hand(_) => "hand",
            Self::Tracked(_) => "tracked",
            Self::Sample(_) => "sample",
            Self::Trigger(_) => "trigger",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("node {0:?} does not exist")]
    UnknownNode(NodeId),
    #[error("edge {from:?} -> {to:?} would close a cycle")]
    Cycle { from: NodeId, to: NodeId },
    #[error("node '{node}' expected {expected} input, got {got}")]
    UnexpectedInput {
        node: String,
        expected: &'static str,
        got: &'static str,
    },
}

/// Side-effect handles available to nodes during a tick.
pub struct FlowContext {
    pub cursor: CursorHandles,
    motion_paused: bool,
    pause_requested: bool,
}

impl FlowContext {
    pub fn new(cursor: CursorHandles) -> Self {
        Self {
            cursor,
            motion_paused: false,
            pause_requested: false,
        }
    }

    /// Pause requests raised during the previous tick take effect now.
    pub fn begin_tick(&mut self) {
        self.motion_paused = std::mem::take(&mut self.pause_requested);
    }

    pub fn request_motion_pause(&mut self) {
        self.pause_requested = true;
    }

    pub fn motion_paused(&self) -> bool {
        self.motion_paused
    }
}

pub trait Node: Send {
    fn name(&self) -> &str;

    /// Acquire resources; called once before the first tick.
    fn init(&mut self, _ctx: &mut FlowContext) -> Result<()> {
        Ok(())
    }

    fn forward(&mut self, input: Value, ctx: &mut FlowContext) -> Result<Option<Value>>;

    /// Release resources; must be safe even when `init` never ran.
    fn clean_effect(&mut self, _ctx: &mut FlowContext) {}
}

struct Slot {
    node: Box<dyn Node>,
    output: Option<Value>,
    children: Vec<NodeId>,
    enabled: bool,
}

#[derive(Default)]
pub struct Graph {
    slots: Vec<Slot>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<N: Node + 'static>(&mut self, node: N) -> NodeId {
        self.add_boxed(Box::new(node))
    }

    pub fn add_boxed(&mut self, node: Box<dyn Node>) -> NodeId {
        self.slots.push(Slot {
            node,
            output: None,
            children: Vec::new(),
            enabled: true,
        });
        NodeId(self.slots.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.slots.len()).map(NodeId)
    }

    /// `to` becomes a child of `from`.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.slot(from)?;
        self.slot(to)?;
        if from == to || self.reaches(to, from) {
            return Err(GraphError::Cycle { from, to });
        }
        self.slots[from.0].children.push(to);
        Ok(())
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.slots
            .get(id.0)
            .map(|s| s.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.slots.get(id.0).map(|s| s.node.name())
    }

    pub fn output(&self, id: NodeId) -> Option<&Value> {
        self.slots.get(id.0).and_then(|s| s.output.as_ref())
    }

    pub fn has_output(&self, id: NodeId) -> bool {
        self.output(id).is_some()
    }

    pub fn set_enabled(&mut self, id: NodeId, enabled: bool) -> Result<(), GraphError> {
        self.slot(id)?;
        self.slots[id.0].enabled = enabled;
        Ok(())
    }

    pub fn is_enabled(&self, id: NodeId) -> bool {
        self.slots.get(id.0).is_some_and(|s| s.enabled)
    }

    pub fn init(&mut self, ctx: &mut FlowContext) -> Result<()> {
        for slot in &mut self.slots {
            slot.node.init(ctx)?;
        }
        Ok(())
    }

    /// Tears down every node, last added first.
    pub fn clean_effect(&mut self, ctx: &mut FlowContext) {
        for slot in self.slots.iter_mut().rev() {
            slot.node.clean_effect(ctx);
        }
    }

    /// Enabled children paired with this node's output.
    pub fn forward_next(&self, id: NodeId) -> Vec<(NodeId, Value)> {
        let Some(slot) = self.slots.get(id.0) else {
            return Vec::new();
        };
        let Some(out) = slot.output.as_ref() else {
            return Vec::new();
        };
        slot.children
            .iter()
            .filter(|c| self.slots[c.0].enabled)
            .map(|c| (*c, out.clone()))
            .collect()
    }

    /// One tick from `start`. Returns how many nodes were forwarded; the
    /// first node error aborts the walk.
    pub fn run(&mut self, start: NodeId, input: Value, ctx: &mut FlowContext) -> Result<usize> {
        self.slot(start)?;
        self.forward_node(start, input, ctx)?;
        let mut visited = 1;
        let mut frontier = self.forward_next(start);
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for (id, value) in frontier {
                self.forward_node(id, value, ctx)?;
                visited += 1;
                next.extend(self.forward_next(id));
            }
            frontier = next;
        }
        Ok(visited)
    }

    fn forward_node(&mut self, id: NodeId, input: Value, ctx: &mut FlowContext) -> Result<()> {
        let slot = &mut self.slots[id.0];
        trace!("forward {} <- {}", slot.node.name(), input.kind());
        slot.output = slot.node.forward(input, ctx)?;
        Ok(())
    }

    fn slot(&self, id: NodeId) -> Result<&Slot, GraphError> {
        self.slots.get(id.0).ok_or(GraphError::UnknownNode(id))
    }

    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = vec![false; self.slots.len()];
        while let Some(id) = stack.pop() {
            if id == to {
                return true;
            }
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            stack.extend(self.slots[id.0].children.iter().copied());
        }
        false
    }
}

/// A whole sub-graph behind one node: forwarding runs the inner graph from
/// `start`, and the inner `end` node's output becomes this node's output.
pub struct Combine {
    name: String,
    graph: Graph,
    start: NodeId,
    end: NodeId,
}

impl Combine {
    pub fn new(name: impl Into<String>, graph: Graph, start: NodeId, end: NodeId) -> Self {
        Self {
            name: name.into(),
            graph,
            start,
            end,
        }
    }

    #[cfg(test)]
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}

impl Node for Combine {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &mut FlowContext) -> Result<()> {
        self.graph.init(ctx)
    }

    fn forward(&mut self, input: Value, ctx: &mut FlowContext) -> Result<Option<Value>> {
        self.graph.run(self.start, input, ctx)?;
        Ok(self.graph.output(self.end).cloned())
    }

    fn clean_effect(&mut self, ctx: &mut FlowContext) {
        self.graph.clean_effect(ctx);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::actions::{CursorHandles, EventBus, VirtualCursor};
    use anyhow::bail;
    use std::sync::Mutex;

    pub(crate) fn test_context() -> FlowContext {
        FlowContext::new(CursorHandles::new(
            Box::new(VirtualCursor::new(1920, 1080)),
            EventBus::new(),
            3,
        ))
    }

    fn sample(x: f64) -> Value {
        Value::Sample(Sample {
            active: true,
            anchor: Point::new(x, 0.0),
            cursor: Position::default(),
        })
    }

    fn x_of(v: &Value) -> f64 {
        match v {
            Value::Sample(s) => s.anchor.x,
            other => panic!("not a sample: {other:?}"),
        }
    }

    /// Adds `step` to the sample it receives and logs its name.
    struct Step {
        name: String,
        step: f64,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Node for Step {
        fn name(&self) -> &str {
            &self.name
        }

        fn forward(&mut self, input: Value, _ctx: &mut FlowContext) -> Result<Option<Value>> {
            self.log.lock().unwrap().push(self.name.clone());
            let x = match input {
                Value::Tick => 0.0,
                ref v => x_of(v),
            };
            Ok(Some(sample(x + self.step)))
        }
    }

    /// Swallows everything.
    struct Sink;

    impl Node for Sink {
        fn name(&self) -> &str {
            "sink"
        }

        fn forward(&mut self, _input: Value, _ctx: &mut FlowContext) -> Result<Option<Value>> {
            Ok(None)
        }
    }

    struct Fail;

    impl Node for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        fn forward(&mut self, _input: Value, _ctx: &mut FlowContext) -> Result<Option<Value>> {
            bail!("boom")
        }
    }

    fn step(graph: &mut Graph, log: &Arc<Mutex<Vec<String>>>, name: &str, s: f64) -> NodeId {
        graph.add(Step {
            name: name.into(),
            step: s,
            log: log.clone(),
        })
    }

    #[test]
    fn propagates_breadth_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut g = Graph::new();
        let root = step(&mut g, &log, "root", 1.0);
        let a = step(&mut g, &log, "a", 10.0);
        let b = step(&mut g, &log, "b", 100.0);
        let a1 = step(&mut g, &log, "a1", 1000.0);
        g.connect(root, a).unwrap();
        g.connect(root, b).unwrap();
        g.connect(a, a1).unwrap();

        let mut ctx = test_context();
        assert_eq!(g.run(root, Value::Tick, &mut ctx).unwrap(), 4);
        assert_eq!(*log.lock().unwrap(), vec!["root", "a", "b", "a1"]);
        assert_eq!(x_of(g.output(a1).unwrap()), 1011.0);
        assert_eq!(x_of(g.output(b).unwrap()), 101.0);
    }

    #[test]
    fn sentinel_stops_the_branch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut g = Graph::new();
        let root = step(&mut g, &log, "root", 1.0);
        let sink = g.add(Sink);
        let after = step(&mut g, &log, "after", 1.0);
        g.connect(root, sink).unwrap();
        g.connect(sink, after).unwrap();

        let mut ctx = test_context();
        g.run(root, Value::Tick, &mut ctx).unwrap();
        assert!(g.forward_next(sink).is_empty());
        assert!(!g.has_output(after));
        assert!(g.output(after).is_none());
    }

    #[test]
    fn disabled_subtree_receives_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut g = Graph::new();
        let root = step(&mut g, &log, "root", 1.0);
        let off = step(&mut g, &log, "off", 1.0);
        let below = step(&mut g, &log, "below", 1.0);
        let on = step(&mut g, &log, "on", 1.0);
        g.connect(root, off).unwrap();
        g.connect(off, below).unwrap();
        g.connect(root, on).unwrap();

        let mut ctx = test_context();
        g.run(root, Value::Tick, &mut ctx).unwrap();
        g.set_enabled(off, false).unwrap();
        // stale output from the first tick does not leak
        let next: Vec<_> = g.forward_next(root).into_iter().map(|(id, _)| id).collect();
        assert_eq!(next, vec![on]);
        log.lock().unwrap().clear();
        g.run(root, Value::Tick, &mut ctx).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["root", "on"]);
    }

    #[test]
    fn traversal_is_deterministic() {
        fn build(log: &Arc<Mutex<Vec<String>>>) -> (Graph, Vec<NodeId>) {
            let mut g = Graph::new();
            let ids: Vec<_> = (0..5)
                .map(|i| step(&mut g, log, &format!("n{i}"), i as f64 + 0.5))
                .collect();
            g.connect(ids[0], ids[1]).unwrap();
            g.connect(ids[0], ids[2]).unwrap();
            g.connect(ids[1], ids[3]).unwrap();
            g.connect(ids[2], ids[4]).unwrap();
            (g, ids)
        }
        let log = Arc::new(Mutex::new(Vec::new()));
        let (mut g1, ids1) = build(&log);
        let (mut g2, ids2) = build(&log);
        let (mut c1, mut c2) = (test_context(), test_context());
        for _ in 0..3 {
            g1.run(ids1[0], Value::Tick, &mut c1).unwrap();
            g2.run(ids2[0], Value::Tick, &mut c2).unwrap();
            for (a, b) in ids1.iter().zip(&ids2) {
                assert_eq!(g1.output(*a), g2.output(*b));
            }
        }
    }

    #[test]
    fn node_error_aborts_the_tick() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut g = Graph::new();
        let root = step(&mut g, &log, "root", 1.0);
        let fail = g.add(Fail);
        let sibling = step(&mut g, &log, "sibling", 1.0);
        let later = step(&mut g, &log, "later", 1.0);
        g.connect(root, fail).unwrap();
        g.connect(root, sibling).unwrap();
        g.connect(sibling, later).unwrap();

        let mut ctx = test_context();
        let err = g.run(root, Value::Tick, &mut ctx).unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(!g.has_output(sibling));
        assert!(!g.has_output(later));
    }

    #[test]
    fn cycles_and_unknown_nodes_are_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut g = Graph::new();
        let a = step(&mut g, &log, "a", 1.0);
        let b = step(&mut g, &log, "b", 1.0);
        let c = step(&mut g, &log, "c", 1.0);
        g.connect(a, b).unwrap();
        g.connect(b, c).unwrap();
        assert_eq!(g.connect(c, a), Err(GraphError::Cycle { from: c, to: a }));
        assert_eq!(g.connect(a, a), Err(GraphError::Cycle { from: a, to: a }));
        assert_eq!(
            g.connect(a, NodeId(99)),
            Err(GraphError::UnknownNode(NodeId(99)))
        );
        // fan-out to an already reachable node is fine
        g.connect(a, c).unwrap();
    }

    #[test]
    fn combine_exposes_its_end_node() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut inner = Graph::new();
        let start = step(&mut inner, &log, "in.start", 1.0);
        let mid = step(&mut inner, &log, "in.mid", 2.0);
        let end = step(&mut inner, &log, "in.end", 3.0);
        inner.connect(start, mid).unwrap();
        inner.connect(mid, end).unwrap();

        let mut g = Graph::new();
        let root = step(&mut g, &log, "root", 10.0);
        let combined = g.add(Combine::new("combined", inner, start, end));
        let after = step(&mut g, &log, "after", 100.0);
        g.connect(root, combined).unwrap();
        g.connect(combined, after).unwrap();
        assert_eq!(g.len(), 3);

        let mut ctx = test_context();
        g.run(root, Value::Tick, &mut ctx).unwrap();
        assert_eq!(x_of(g.output(combined).unwrap()), 16.0);
        assert_eq!(x_of(g.output(after).unwrap()), 116.0);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["root", "in.start", "in.mid", "in.end", "after"]
        );
    }

    #[test]
    fn pause_requests_apply_on_the_next_tick() {
        let mut ctx = test_context();
        ctx.request_motion_pause();
        assert!(!ctx.motion_paused());
        ctx.begin_tick();
        assert!(ctx.motion_paused());
        ctx.begin_tick();
        assert!(!ctx.motion_paused());
    }
}

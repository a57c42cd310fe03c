//! Assembles the full graph for a profile:
//!
//! ```text
//! source -> tracker -> motion -+-> binding 1 (combine)
//!                              +-> binding 2 (combine)
//!                              ...
//! ```

use anyhow::Result;
use log::info;

use crate::config::{Profile, Tuning};
use crate::flow::bindings::BindingTable;
use crate::flow::graph::{Graph, GraphError, NodeId};
use crate::flow::nodes::{MotionNode, SourceNode, TrackerNode};
use crate::input::HandSource;
use crate::motion::MotionSettings;

pub struct Pipeline {
    pub graph: Graph,
    pub source: NodeId,
    pub tracker: NodeId,
    pub motion: NodeId,
    /// One combine node per binding, labelled.
    pub bindings: Vec<(String, NodeId)>,
}

impl Pipeline {
    pub fn build(
        source: Box<dyn HandSource>,
        table: &BindingTable,
        tuning: &Tuning,
        motion: &MotionSettings,
    ) -> Result<Self, GraphError> {
        let mut graph = Graph::new();
        let src = graph.add(SourceNode::new(source));
        let tracker = graph.add(TrackerNode::new(tuning.tracking));
        let motion_id = graph.add(MotionNode::new(motion.clone()));
        graph.connect(src, tracker)?;
        graph.connect(tracker, motion_id)?;

        let mut bindings = Vec::with_capacity(table.len());
        for binding in table.iter() {
            let id = graph.add(binding.compile(tuning)?);
            graph.connect(motion_id, id)?;
            graph.set_enabled(id, binding.enabled)?;
            bindings.push((binding.label(), id));
        }

        Ok(Self {
            graph,
            source: src,
            tracker,
            motion: motion_id,
            bindings,
        })
    }

    pub fn from_profile(profile: &Profile, source: Box<dyn HandSource>) -> Result<Self> {
        let table = profile.binding_table()?;
        let pipeline = Self::build(source, &table, &profile.tuning, &profile.motion)?;
        let disabled = pipeline
            .bindings
            .iter()
            .filter(|(_, id)| !pipeline.graph.is_enabled(*id))
            .count();
        info!(
            "flow: assembled {} nodes, {} bindings ({} disabled)",
            pipeline.graph.len(),
            pipeline.bindings.len(),
            disabled
        );
        Ok(pipeline)
    }

    pub fn start(&self) -> NodeId {
        self.source
    }
}

//! Gesture-to-action bindings and their sub-graphs.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actions::CursorAction;
use crate::config::Tuning;
use crate::flow::graph::{Combine, Graph, GraphError};
use crate::flow::nodes::{ActionNode, GuardNode, MatchNode, MotionPauseNode, WindowNode};
use crate::gestures::GestureMatcher;
use crate::window::{MotionGuard, WindowFn};

pub const DEFAULT_WINDOW: usize = 3;
pub const MAX_WINDOW: usize = 120;

fn default_window() -> usize {
    DEFAULT_WINDOW
}

fn enabled_by_default() -> bool {
    true
}

fn is_enabled(v: &bool) -> bool {
    *v
}

/// A binding as written in profiles and sent over IPC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindingSpec {
    pub gesture: String,
    pub window_fn: String,
    pub action: String,
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(default)]
    pub pause_motion: bool,
    /// A disabled binding stays in the table but its branch receives nothing.
    #[serde(default = "enabled_by_default", skip_serializing_if = "is_enabled")]
    pub enabled: bool,
}

impl BindingSpec {
    pub fn new(gesture: &str, window_fn: &str, action: &str) -> Self {
        Self {
            gesture: gesture.into(),
            window_fn: window_fn.into(),
            action: action.into(),
            window: DEFAULT_WINDOW,
            guard: None,
            pause_motion: false,
            enabled: true,
        }
    }

    pub fn guarded(mut self, guard: &str) -> Self {
        self.guard = Some(guard.into());
        self.pause_motion = true;
        self
    }

    pub fn defaults() -> Vec<BindingSpec> {
        vec![
            Self::new("Index_Thumb", "JumpTrue", "LeftDown"),
            Self::new("Index_Thumb", "JumpFalse", "LeftUp"),
            Self::new("Middle_Thumb", "JumpFalse", "RightClick"),
            Self::new("Victory", "AllTrue", "ScrollUp").guarded("MoveUp"),
            Self::new("Victory", "AllTrue", "ScrollDown").guarded("MoveDown"),
        ]
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("unknown gesture '{0}'")]
    UnknownGesture(String),
    #[error("unknown window function '{0}'")]
    UnknownWindowFn(String),
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("unknown motion guard '{0}'")]
    UnknownGuard(String),
    #[error("window length {0} is outside 1..={max}", max = MAX_WINDOW)]
    InvalidWindow(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub matcher: GestureMatcher,
    pub window_fn: WindowFn,
    pub action: CursorAction,
    pub window: usize,
    pub guard: Option<MotionGuard>,
    pub pause_motion: bool,
    pub enabled: bool,
}

impl Binding {
    pub fn resolve(spec: &BindingSpec) -> Result<Self, BindingError> {
        let matcher = GestureMatcher::from_name(&spec.gesture)
            .ok_or_else(|| BindingError::UnknownGesture(spec.gesture.clone()))?;
        let window_fn = WindowFn::from_name(&spec.window_fn)
            .ok_or_else(|| BindingError::UnknownWindowFn(spec.window_fn.clone()))?;
        let action = CursorAction::from_name(&spec.action)
            .ok_or_else(|| BindingError::UnknownAction(spec.action.clone()))?;
        if spec.window == 0 || spec.window > MAX_WINDOW {
            return Err(BindingError::InvalidWindow(spec.window));
        }
        let guard = spec
            .guard
            .as_deref()
            .map(|g| MotionGuard::from_name(g).ok_or_else(|| BindingError::UnknownGuard(g.into())))
            .transpose()?;
        Ok(Self {
            matcher,
            window_fn,
            action,
            window: spec.window,
            guard,
            pause_motion: spec.pause_motion,
            enabled: spec.enabled,
        })
    }

    pub fn spec(&self) -> BindingSpec {
        BindingSpec {
            gesture: self.matcher.name().into(),
            window_fn: self.window_fn.as_str().into(),
            action: self.action.as_str().into(),
            window: self.window,
            guard: self.guard.map(|g| g.as_str().into()),
            pause_motion: self.pause_motion,
            enabled: self.enabled,
        }
    }

    /// e.g. `Victory/AllTrue/ScrollUp`
    pub fn label(&self) -> String {
        format!(
            "{}/{}/{}",
            self.matcher.name(),
            self.window_fn.as_str(),
            self.action.as_str()
        )
    }

    /// Builds `match -> window -> [guard] -> action`, with the optional
    /// motion-pause node hanging off the window.
    pub fn compile(&self, tuning: &Tuning) -> Result<Combine, GraphError> {
        let label = self.label();
        let mut g = Graph::new();
        let matcher = g.add(MatchNode::new(
            format!("{label}.match"),
            self.matcher,
            tuning.touch_sensitivity,
        ));
        let window = g.add(WindowNode::new(
            format!("{label}.window"),
            self.window_fn,
            self.window,
        ));
        g.connect(matcher, window)?;

        let mut last = window;
        if let Some(guard) = self.guard {
            let node = g.add(GuardNode::new(
                format!("{label}.guard"),
                guard.with_distance(tuning.guard_min_distance),
                tuning.guard_window,
            ));
            g.connect(last, node)?;
            last = node;
        }
        let action = g.add(ActionNode::new(format!("{label}.action"), self.action));
        g.connect(last, action)?;

        if self.pause_motion {
            let pause = g.add(MotionPauseNode::new(format!("{label}.pause")));
            g.connect(window, pause)?;
        }
        Ok(Combine::new(label, g, matcher, action))
    }
}

/// Ordered set of bindings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingTable {
    bindings: Vec<Binding>,
}

impl BindingTable {
    /// All or nothing: one bad record rejects the whole list.
    pub fn from_specs(specs: &[BindingSpec]) -> Result<Self, BindingError> {
        let mut table = Self::default();
        for spec in specs {
            table.insert(Binding::resolve(spec)?);
        }
        Ok(table)
    }

    /// Returns false when the binding was already present.
    pub fn insert(&mut self, binding: Binding) -> bool {
        if self.bindings.contains(&binding) {
            return false;
        }
        self.bindings.push(binding);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn specs(&self) -> Vec<BindingSpec> {
        self.bindings.iter().map(Binding::spec).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::graph::Node;
    use crate::hand::GestureLabel;

    #[test]
    fn resolves_by_name() {
        let spec = BindingSpec::new("Victory", "AllTrue", "ScrollUp").guarded("MoveUp");
        let b = Binding::resolve(&spec).unwrap();
        assert_eq!(b.matcher, GestureMatcher::Label(GestureLabel::Victory));
        assert_eq!(b.window_fn, WindowFn::AllTrue);
        assert_eq!(b.action, CursorAction::ScrollUp);
        assert_eq!(b.guard, Some(MotionGuard::MoveUp));
        assert!(b.pause_motion);
        assert_eq!(b.spec(), spec);
        assert_eq!(b.label(), "Victory/AllTrue/ScrollUp");
    }

    #[test]
    fn bindings_are_enabled_unless_switched_off() {
        let on: BindingSpec =
            serde_json::from_str(r#"{"gesture":"Victory","window_fn":"AllTrue","action":"LeftClick"}"#)
                .unwrap();
        assert!(on.enabled);
        assert!(serde_json::to_value(&on).unwrap().get("enabled").is_none());

        let mut off = on.clone();
        off.enabled = false;
        let b = Binding::resolve(&off).unwrap();
        assert!(!b.enabled);
        assert_eq!(b.spec(), off);
        assert_eq!(serde_json::to_value(&off).unwrap()["enabled"], false);
    }

    #[test]
    fn unknown_names_are_configuration_errors() {
        let mut spec = BindingSpec::new("Wave", "AllTrue", "LeftClick");
        assert_eq!(
            Binding::resolve(&spec),
            Err(BindingError::UnknownGesture("Wave".into()))
        );
        spec.gesture = "Index_Thumb".into();
        spec.window_fn = "Mostly".into();
        assert_eq!(
            Binding::resolve(&spec),
            Err(BindingError::UnknownWindowFn("Mostly".into()))
        );
        spec.window_fn = "JumpTrue".into();
        spec.action = "DoubleClick".into();
        assert_eq!(
            Binding::resolve(&spec),
            Err(BindingError::UnknownAction("DoubleClick".into()))
        );
        spec.action = "LeftClick".into();
        spec.guard = Some("Spin".into());
        assert_eq!(
            Binding::resolve(&spec),
            Err(BindingError::UnknownGuard("Spin".into()))
        );
        spec.guard = None;
        spec.window = 0;
        assert_eq!(Binding::resolve(&spec), Err(BindingError::InvalidWindow(0)));
        spec.window = MAX_WINDOW + 1;
        assert!(Binding::resolve(&spec).is_err());
    }

    #[test]
    fn none_label_is_not_bindable() {
        let spec = BindingSpec::new("None", "AllTrue", "LeftClick");
        assert!(matches!(
            Binding::resolve(&spec),
            Err(BindingError::UnknownGesture(_))
        ));
    }

    #[test]
    fn table_has_set_semantics() {
        let mut specs = BindingSpec::defaults();
        specs.push(specs[1].clone());
        let mut table = BindingTable::from_specs(&specs).unwrap();
        assert_eq!(table.len(), 5);
        assert_eq!(table.specs(), BindingSpec::defaults());

        let first = *table.iter().next().unwrap();
        assert!(!table.insert(first));
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn one_bad_record_rejects_the_list() {
        let mut specs = BindingSpec::defaults();
        specs.push(BindingSpec::new("Index_Thumb", "JumpTrue", "Explode"));
        assert!(BindingTable::from_specs(&specs).is_err());
    }

    #[test]
    fn compiled_subgraph_shape() {
        let tuning = Tuning::default();
        let plain = Binding::resolve(&BindingSpec::new("Index_Thumb", "JumpTrue", "LeftDown"))
            .unwrap()
            .compile(&tuning)
            .unwrap();
        assert_eq!(plain.name(), "Index_Thumb/JumpTrue/LeftDown");
        assert_eq!(plain.inner().len(), 3);

        let guarded = Binding::resolve(
            &BindingSpec::new("Victory", "AllTrue", "ScrollDown").guarded("MoveDown"),
        )
        .unwrap()
        .compile(&tuning)
        .unwrap();
        let inner = guarded.inner();
        assert_eq!(inner.len(), 5);
        let names: Vec<_> = inner.ids().filter_map(|id| inner.name(id)).collect();
        assert_eq!(
            names,
            vec![
                "Victory/AllTrue/ScrollDown.match",
                "Victory/AllTrue/ScrollDown.window",
                "Victory/AllTrue/ScrollDown.guard",
                "Victory/AllTrue/ScrollDown.action",
                "Victory/AllTrue/ScrollDown.pause",
            ]
        );
    }
}

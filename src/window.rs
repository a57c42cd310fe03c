//! Fixed-length history windows and the reducers that run over them.

use std::collections::VecDeque;

use crate::hand::Point;

/// FIFO of the last `capacity` values.
#[derive(Debug, Clone)]
pub struct Window<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> Window<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends, evicting the oldest value once full. Returns whether the window is full.
    pub fn push(&mut self, item: T) -> bool {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

/// Reducers over a window of per-frame match results, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowFn {
    AllTrue,
    /// false -> true, held to the present.
    JumpTrue,
    /// true -> false, held to the present.
    JumpFalse,
}

impl WindowFn {
    pub const ALL: [WindowFn; 3] = [WindowFn::AllTrue, WindowFn::JumpTrue, WindowFn::JumpFalse];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllTrue => "AllTrue",
            Self::JumpTrue => "JumpTrue",
            Self::JumpFalse => "JumpFalse",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    pub fn apply<I: IntoIterator<Item = bool>>(&self, values: I) -> bool {
        let mut it = values.into_iter();
        match self {
            Self::AllTrue => it.all(|v| v),
            Self::JumpTrue => matches!(it.next(), Some(false)) && it.all(|v| v),
            Self::JumpFalse => matches!(it.next(), Some(true)) && it.all(|v| !v),
        }
    }
}

/// Consistent sweep along a direction by at least `min_distance` pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovedInDirection {
    pub dx: f64,
    pub dy: f64,
    pub min_distance: f64,
}

impl MovedInDirection {
    pub fn apply<I: IntoIterator<Item = Point>>(&self, points: I) -> bool {
        let mut it = points.into_iter();
        let Some(first) = it.next() else {
            return false;
        };
        let mut prev = first;
        for p in it {
            let step = p - prev;
            if !self.agrees(step.x, self.dx) || !self.agrees(step.y, self.dy) {
                return false;
            }
            prev = p;
        }
        let net = prev - first;
        net.x * self.dx + net.y * self.dy > self.min_distance
    }

    fn agrees(&self, step: f64, axis: f64) -> bool {
        if axis > 0.0 {
            step >= 0.0
        } else if axis < 0.0 {
            step <= 0.0
        } else {
            true
        }
    }
}

/// Named motion guards. Screen coordinates: y grows downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MotionGuard {
    MoveUp,
    MoveDown,
    MoveLeft,
    MoveRight,
}

impl MotionGuard {
    pub const ALL: [MotionGuard; 4] = [
        MotionGuard::MoveUp,
        MotionGuard::MoveDown,
        MotionGuard::MoveLeft,
        MotionGuard::MoveRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MoveUp => "MoveUp",
            Self::MoveDown => "MoveDown",
            Self::MoveLeft => "MoveLeft",
            Self::MoveRight => "MoveRight",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|g| g.as_str() == name)
    }

    pub fn with_distance(&self, min_distance: f64) -> MovedInDirection {
        let (dx, dy) = match self {
            Self::MoveUp => (0.0, -1.0),
            Self::MoveDown => (0.0, 1.0),
            Self::MoveLeft => (-1.0, 0.0),
            Self::MoveRight => (1.0, 0.0),
        };
        MovedInDirection {
            dx,
            dy,
            min_distance,
        }
    }
}

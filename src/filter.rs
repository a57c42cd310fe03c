//! Rolling filters used to smooth noisy per-frame samples.

use std::ops::{Add, Div, Mul, Sub};

use crate::hand::Point;

/// Anything the filters can average: scalars and 2D points.
pub trait Signal:
    Copy
    + Default
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
{
}

impl Signal for f64 {}
impl Signal for Point {}

/// Mean over the last `capacity` samples.
///
/// While fewer than half the slots have ever been written, the estimate is the
/// latest raw sample instead of an average over empty slots.
#[derive(Debug, Clone)]
pub struct SlidingWindowMeanFilter<T = Point> {
    data: Vec<T>,
    filled: usize,
    cursor: usize,
}

impl<T: Signal> SlidingWindowMeanFilter<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: vec![T::default(); capacity],
            filled: 0,
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn push(&mut self, sample: T) -> T {
        let cap = self.capacity();
        self.data[self.cursor] = sample;
        self.filled = (self.filled + 1).min(cap);
        let estimate = if 2 * self.filled >= cap {
            self.mean()
        } else {
            sample
        };
        self.cursor = (self.cursor + 1) % cap;
        estimate
    }

    pub fn get(&self) -> T {
        if self.filled == 0 {
            return T::default();
        }
        if 2 * self.filled >= self.capacity() {
            self.mean()
        } else {
            let cap = self.capacity();
            self.data[(self.cursor + cap - 1) % cap]
        }
    }

    pub fn reset(&mut self) {
        self.data.iter_mut().for_each(|v| *v = T::default());
        self.filled = 0;
        self.cursor = 0;
    }

    // slots [0, filled) are the ones written so far
    fn mean(&self) -> T {
        let sum = self.data[..self.filled]
            .iter()
            .fold(T::default(), |acc, v| acc + *v);
        sum / self.filled as f64
    }
}

/// Exponential step filter: every push moves the estimate `alpha` of the way
/// towards the new sample. The first sample is taken as is.
#[derive(Debug, Clone)]
pub struct ExpStepFilter<T = Point> {
    alpha: f64,
    value: Option<T>,
}

impl<T: Signal> ExpStepFilter<T> {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            value: None,
        }
    }

    pub fn push(&mut self, sample: T) -> T {
        let next = match self.value {
            None => sample,
            Some(prev) => prev + (sample - prev) * self.alpha,
        };
        self.value = Some(next);
        next
    }

    pub fn reset(&mut self) {
        self.value = None;
    }
}

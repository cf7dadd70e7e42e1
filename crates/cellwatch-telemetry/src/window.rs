//! Bounded rolling window with aggregates recomputed from the retained samples.

use std::{
    collections::{BTreeMap, VecDeque},
    time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;

use crate::sample::TelemetrySample;

/// Upper bound on an age-bounded window regardless of arrival rate.
pub const AGE_WINDOW_HARD_CAP: usize = 4_096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// How a window decides which samples to keep.
pub enum WindowBound {
    Count(usize),
    Age(Duration),
}

impl WindowBound {
    fn normalized(self) -> Self {
        match self {
            Self::Count(count) => Self::Count(count.max(1)),
            Self::Age(age) => Self::Age(age),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Aggregate {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

pub type Aggregates = BTreeMap<String, Aggregate>;

/// Computes per-metric avg/min/max directly over `samples`.
pub fn compute_aggregates<'a, S, I>(samples: I) -> Aggregates
where
    S: TelemetrySample + 'a,
    I: IntoIterator<Item = &'a S>,
{
    let mut running: BTreeMap<&'static str, (f64, f64, f64, usize)> = BTreeMap::new();
    for sample in samples {
        for (name, value) in sample.metrics() {
            if !value.is_finite() {
                continue;
            }
            let entry = running
                .entry(name)
                .or_insert((0.0, f64::INFINITY, f64::NEG_INFINITY, 0));
            entry.0 += value;
            entry.1 = entry.1.min(value);
            entry.2 = entry.2.max(value);
            entry.3 += 1;
        }
    }
    running
        .into_iter()
        .map(|(name, (sum, min, max, count))| {
            (
                name.to_string(),
                Aggregate {
                    avg: sum / count as f64,
                    min,
                    max,
                    count,
                },
            )
        })
        .collect()
}

#[derive(Debug, Clone)]
struct WindowEntry<S> {
    sample: S,
    received_at: Instant,
}

#[derive(Debug, Clone)]
pub struct RollingWindow<S> {
    bound: WindowBound,
    entries: VecDeque<WindowEntry<S>>,
    aggregates: Aggregates,
}

impl<S: TelemetrySample> RollingWindow<S> {
    pub fn new(bound: WindowBound) -> Self {
        Self {
            bound: bound.normalized(),
            entries: VecDeque::new(),
            aggregates: Aggregates::new(),
        }
    }

    pub fn bound(&self) -> WindowBound {
        self.bound
    }

    /// Appends `sample`, trims to the bound, then recomputes aggregates.
    pub fn push(&mut self, sample: S, now: Instant) {
        self.entries.push_back(WindowEntry {
            sample,
            received_at: now,
        });
        self.trim(now);
    }

    pub fn trim(&mut self, now: Instant) {
        match self.bound {
            WindowBound::Count(limit) => {
                while self.entries.len() > limit {
                    self.entries.pop_front();
                }
            }
            WindowBound::Age(max_age) => {
                while self
                    .entries
                    .front()
                    .is_some_and(|entry| now.saturating_duration_since(entry.received_at) > max_age)
                {
                    self.entries.pop_front();
                }
                while self.entries.len() > AGE_WINDOW_HARD_CAP {
                    self.entries.pop_front();
                }
            }
        }
        self.aggregates = compute_aggregates(self.entries.iter().map(|entry| &entry.sample));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&S> {
        self.entries.back().map(|entry| &entry.sample)
    }

    pub fn samples(&self) -> impl Iterator<Item = &S> {
        self.entries.iter().map(|entry| &entry.sample)
    }

    pub fn to_vec(&self) -> Vec<S> {
        self.samples().cloned().collect()
    }

    /// The newest `count` samples, oldest first.
    pub fn most_recent(&self, count: usize) -> Vec<S> {
        let skip = self.entries.len().saturating_sub(count);
        self.samples().skip(skip).cloned().collect()
    }

    pub fn aggregates(&self) -> &Aggregates {
        &self.aggregates
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.aggregates.clear();
    }
}

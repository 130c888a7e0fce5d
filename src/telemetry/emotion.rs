use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Derived metrics the analyzer computes from raw emotion probabilities, 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompositeScores {
    pub stress: f64,
    pub anxiety: f64,
    pub engagement: f64,
}

impl Default for CompositeScores {
    fn default() -> Self {
        Self {
            stress: 0.0,
            anxiety: 0.0,
            engagement: 0.5,
        }
    }
}

/// One analyzed still of the remote participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionSample {
    pub dominant_label: String,
    pub confidence: f64,
    pub composite_scores: CompositeScores,
    pub captured_at: DateTime<Utc>,
}

/// Most recent samples for trend display; the oldest is discarded when full.
#[derive(Debug, Clone)]
pub struct EmotionWindow {
    samples: VecDeque<EmotionSample>,
    capacity: usize,
}

impl EmotionWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: EmotionSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&EmotionSample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmotionSample> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

//! Consumer side of the progress line format.
//!
//! Job monitors read the training process's stdout and pull metrics out of
//! each line by label. Every field is optional, so partial lines and lines
//! from other tools are tolerated.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static LOSS: Lazy<Regex> = Lazy::new(|| Regex::new(r"Loss:\s*([0-9]*\.?[0-9]+)").expect("metrics regex should be valid"));
static EPOCH: Lazy<Regex> = Lazy::new(|| Regex::new(r"Epoch:?\s*(\d+)/(\d+)").expect("metrics regex should be valid"));
static STEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"Step:?\s*(\d+)/(\d+)").expect("metrics regex should be valid"));
static SPEED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Speed:\s*([0-9]*\.?[0-9]+)\s*samples/sec").expect("metrics regex should be valid"));
static ETA: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:ETA|Remaining):\s*([0-9:]+)").expect("metrics regex should be valid"));

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedMetrics {
    pub loss: Option<f64>,
    pub epoch: Option<(u32, u32)>,
    pub step: Option<(u64, u64)>,
    pub samples_per_second: Option<f64>,
    pub eta: Option<String>,
}

impl ParsedMetrics {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overwrite fields that `newer` carries, keeping the rest.
    pub fn update(&mut self, newer: Self) {
        if newer.loss.is_some() {
            self.loss = newer.loss;
        }
        if newer.epoch.is_some() {
            self.epoch = newer.epoch;
        }
        if newer.step.is_some() {
            self.step = newer.step;
        }
        if newer.samples_per_second.is_some() {
            self.samples_per_second = newer.samples_per_second;
        }
        if newer.eta.is_some() {
            self.eta = newer.eta;
        }
    }

    /// Completion ratio in `[0, 1]` derived from the step counter.
    #[must_use]
    pub fn fraction_complete(&self) -> Option<f64> {
        let (step, total) = self.step?;
        (total > 0).then(|| (step as f64 / total as f64).min(1.0))
    }
}

#[must_use]
pub fn parse_metrics_line(line: &str) -> ParsedMetrics {
    ParsedMetrics {
        loss: capture(&LOSS, line, 1),
        epoch: pair(&EPOCH, line),
        step: pair(&STEP, line),
        samples_per_second: capture(&SPEED, line, 1),
        eta: ETA.captures(line).map(|c| c[1].to_string()),
    }
}

fn capture<T: std::str::FromStr>(re: &Regex, line: &str, group: usize) -> Option<T> {
    re.captures(line)?.get(group)?.as_str().parse().ok()
}

fn pair<T: std::str::FromStr>(re: &Regex, line: &str) -> Option<(T, T)> {
    Some((capture(re, line, 1)?, capture(re, line, 2)?))
}

//! Engine settings and transformation definitions

use crate::error::{EngineError, Result};
use crate::row::RowMeta;
use crate::step::Distribution;
use crate::steps::StepKind;
use rowpipe_common::env::env_or;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

// ============================================================================
// Engine Setting Constants
// ============================================================================

/// Default number of rows a row set buffers.
pub const DEFAULT_ROWSET_SIZE: usize = 10_000;

/// Largest row set capacity accepted; tokio channels cannot hold more permits.
pub const MAX_ROWSET_SIZE: usize = 10_000_000;

/// Default time workers get to wind down after a stop, in seconds.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;

/// Default rows handled per batch by steps that work in batches.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Runtime settings shared by every transformation an engine runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    pub rowset_size: usize,
    #[serde(with = "duration_secs")]
    pub grace_period: Duration,
    pub batch_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rowset_size: DEFAULT_ROWSET_SIZE,
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl EngineSettings {
    /// Load settings from the environment (after `.env`), falling back to
    /// the defaults.
    pub fn from_env() -> Result<Self> {
        let settings = Self {
            rowset_size: env_or("ROWPIPE_ROWSET_SIZE", DEFAULT_ROWSET_SIZE)?,
            grace_period: Duration::from_secs(env_or(
                "ROWPIPE_GRACE_PERIOD_SECS",
                DEFAULT_GRACE_PERIOD_SECS,
            )?),
            batch_size: env_or("ROWPIPE_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_rowset_size(mut self, rowset_size: usize) -> Self {
        self.rowset_size = rowset_size;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.rowset_size == 0 {
            return Err(EngineError::config("rowset_size must be greater than 0"));
        }
        if self.rowset_size > MAX_ROWSET_SIZE {
            return Err(EngineError::config(format!(
                "rowset_size must be at most {MAX_ROWSET_SIZE}, got {}",
                self.rowset_size
            )));
        }
        if self.batch_size == 0 {
            return Err(EngineError::config("batch_size must be greater than 0"));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

fn one() -> usize {
    1
}

fn enabled() -> bool {
    true
}

/// One step of a transformation definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    /// Parallel copies of the step
    #[serde(default = "one")]
    pub copies: usize,
    #[serde(default)]
    pub distribution: Distribution,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl StepConfig {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            copies: 1,
            distribution: Distribution::default(),
            kind,
        }
    }

    pub fn with_copies(mut self, copies: usize) -> Self {
        self.copies = copies;
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }
}

/// Directed connection between two steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopConfig {
    pub from: String,
    pub to: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

impl HopConfig {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            enabled: true,
        }
    }
}

/// A transformation: steps and the hops between them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub hops: Vec<HopConfig>,
}

impl TransformationConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            steps: Vec::new(),
            hops: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: StepConfig) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_hop(mut self, from: &str, to: &str) -> Self {
        self.hops.push(HopConfig::new(from, to));
        self
    }

    /// Load a definition, choosing YAML or JSON by file extension.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&text),
            Some("json") => Self::from_json(&text),
            other => Err(EngineError::config(format!(
                "unsupported definition format '{}' for {}",
                other.unwrap_or(""),
                path.display()
            ))),
        }
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn step(&self, name: &str) -> Option<&StepConfig> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn enabled_hops(&self) -> impl Iterator<Item = &HopConfig> {
        self.hops.iter().filter(|h| h.enabled)
    }

    /// Layout of the rows `step` emits, where it can be known before running.
    pub fn output_layout(&self, step: &str) -> Option<RowMeta> {
        let mut visiting = Vec::new();
        self.output_layout_guarded(step, &mut visiting)
    }

    fn output_layout_guarded<'a>(
        &'a self,
        step: &'a str,
        visiting: &mut Vec<&'a str>,
    ) -> Option<RowMeta> {
        if visiting.contains(&step) {
            return None;
        }
        visiting.push(step);
        let layout = match &self.step(step)?.kind {
            StepKind::Generator(config) => config.layout().ok().map(|(meta, _)| meta),
            StepKind::Filter(_) => self
                .enabled_hops()
                .filter(|h| h.to == step)
                .find_map(|h| self.output_layout_guarded(&h.from, visiting)),
            StepKind::Sink | StepKind::RowsToResult | StepKind::BulkLoader(_) => None,
        };
        visiting.pop();
        layout
    }

    /// Layout arriving at `step` over its first incoming hop with a known layout.
    pub fn input_layout(&self, step: &str) -> Option<RowMeta> {
        self.enabled_hops()
            .filter(|h| h.to == step)
            .find_map(|h| self.output_layout(&h.from))
    }

    /// Names of the steps feeding each step
    pub fn predecessors(&self) -> HashMap<&str, Vec<&str>> {
        let mut map: HashMap<&str, Vec<&str>> = HashMap::new();
        for hop in self.enabled_hops() {
            map.entry(hop.to.as_str()).or_default().push(hop.from.as_str());
        }
        map
    }
}

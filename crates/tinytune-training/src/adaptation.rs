//! LoRA target selection and adaptation configuration.
//!
//! Target modules are picked by matching substructure *names* against an
//! ordered rule table. Supporting a new model family means adding a
//! [`TargetRule`], not new branching code.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LORA_DROPOUT: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    CausalLm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasMode {
    None,
}

/// Parameter-efficient adaptation settings, immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdaptationConfig {
    rank: u32,
    alpha: u32,
    dropout: f64,
    target_modules: Vec<String>,
    task_kind: TaskKind,
    bias: BiasMode,
}

impl AdaptationConfig {
    pub fn new(rank: u32, alpha: u32, dropout: f64, target_modules: Vec<String>) -> TrainingResult<Self> {
        if rank == 0 {
            return Err(TrainingError::Adaptation("lora rank must be > 0".to_string()));
        }
        if alpha == 0 {
            return Err(TrainingError::Adaptation("lora alpha must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&dropout) {
            return Err(TrainingError::Adaptation(format!("lora dropout must be in [0, 1], got {dropout}")));
        }

        let mut targets: Vec<String> = Vec::with_capacity(target_modules.len());
        for module in target_modules {
            if !module.trim().is_empty() && !targets.contains(&module) {
                targets.push(module);
            }
        }
        if targets.is_empty() {
            return Err(TrainingError::Adaptation("target module set must not be empty".to_string()));
        }

        Ok(Self {
            rank,
            alpha,
            dropout,
            target_modules: targets,
            task_kind: TaskKind::CausalLm,
            bias: BiasMode::None,
        })
    }

    #[must_use]
    pub fn rank(&self) -> u32 {
        self.rank
    }

    #[must_use]
    pub fn alpha(&self) -> u32 {
        self.alpha
    }

    #[must_use]
    pub fn dropout(&self) -> f64 {
        self.dropout
    }

    #[must_use]
    pub fn target_modules(&self) -> &[String] {
        &self.target_modules
    }

    #[must_use]
    pub fn task_kind(&self) -> TaskKind {
        self.task_kind
    }

    #[must_use]
    pub fn bias(&self) -> BiasMode {
        self.bias
    }
}

/// One row of the selection table: when every `requires` pattern occurs in
/// some module name, adapt `targets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRule {
    pub requires: Vec<String>,
    pub targets: Vec<String>,
}

impl TargetRule {
    pub fn new<R, T>(requires: R, targets: T) -> Self
    where
        R: IntoIterator,
        R::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            requires: requires.into_iter().map(Into::into).collect(),
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }

    fn matches(&self, names: &[&str]) -> bool {
        self.requires.iter().all(|pattern| names.iter().any(|name| name.contains(pattern.as_str())))
    }
}

#[derive(Debug, Clone)]
pub struct TargetSelector {
    rules: Vec<TargetRule>,
    fallback: Vec<String>,
}

impl Default for TargetSelector {
    fn default() -> Self {
        Self {
            rules: vec![
                // LLaMA / Mistral / Qwen style split projections
                TargetRule::new(["q_proj", "v_proj"], ["q_proj", "k_proj", "v_proj", "o_proj"]),
                // GPT-2 family fused attention
                TargetRule::new(["c_attn"], ["c_attn"]),
                // Falcon / GPT-NeoX fused qkv
                TargetRule::new(["query_key_value"], ["query_key_value"]),
            ],
            fallback: vec!["q_proj".to_string(), "v_proj".to_string()],
        }
    }
}

impl TargetSelector {
    #[must_use]
    pub fn new(rules: Vec<TargetRule>, fallback: Vec<String>) -> Self {
        Self { rules, fallback }
    }

    /// Append a rule; it is consulted after the existing ones.
    #[must_use]
    pub fn with_rule(mut self, rule: TargetRule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn rules(&self) -> &[TargetRule] {
        &self.rules
    }

    /// First matching rule wins; otherwise the fallback targets are returned
    /// even if the model has no such modules.
    pub fn select<'a, I>(&self, module_names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<&str> = module_names.into_iter().collect();
        self.rules
            .iter()
            .find(|rule| rule.matches(&names))
            .map_or_else(|| self.fallback.clone(), |rule| rule.targets.clone())
    }

    pub fn configure<'a, I>(&self, module_names: I, rank: u32, alpha: u32, dropout: f64) -> TrainingResult<AdaptationConfig>
    where
        I: IntoIterator<Item = &'a str>,
    {
        AdaptationConfig::new(rank, alpha, dropout, self.select(module_names))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(names: &[&str]) -> Vec<String> {
        TargetSelector::default().select(names.iter().copied())
    }

    #[test]
    fn test_select_split_projections() {
        let names = ["model.layers.0.self_attn.q_proj", "model.layers.0.self_attn.v_proj", "lm_head"];
        assert_eq!(select(&names), vec!["q_proj", "k_proj", "v_proj", "o_proj"]);
    }

    #[test]
    fn test_select_fused_families() {
        assert_eq!(select(&["transformer.h.0.attn.c_attn", "transformer.h.0.attn.c_proj"]), vec!["c_attn"]);
        assert_eq!(select(&["transformer.h.0.self_attention.query_key_value"]), vec!["query_key_value"]);
    }

    #[test]
    fn test_partial_split_match_falls_through() {
        // q_proj alone is not enough for the first rule
        assert_eq!(select(&["layers.0.q_proj", "layers.0.c_attn"]), vec!["c_attn"]);
        assert_eq!(select(&["encoder.dense"]), vec!["q_proj", "v_proj"]);
    }

    #[test]
    fn test_custom_rule_extends_table() {
        let selector = TargetSelector::default().with_rule(TargetRule::new(["Wqkv"], ["Wqkv", "out_proj"]));
        assert_eq!(selector.select(["blocks.0.attn.Wqkv"]), vec!["Wqkv", "out_proj"]);
        assert_eq!(selector.rules().len(), 4);
    }

    #[test]
    fn test_configure_validates_parameters() {
        let selector = TargetSelector::default();
        let config = selector.configure(["h.0.attn.c_attn"], 16, 32, DEFAULT_LORA_DROPOUT).unwrap();
        assert_eq!(config.rank(), 16);
        assert_eq!(config.alpha(), 32);
        assert_eq!(config.target_modules(), ["c_attn".to_string()]);
        assert_eq!(config.task_kind(), TaskKind::CausalLm);

        assert!(selector.configure(["c_attn"], 0, 32, 0.05).is_err());
        assert!(selector.configure(["c_attn"], 8, 0, 0.05).is_err());
        assert!(selector.configure(["c_attn"], 8, 16, 1.5).is_err());
        assert!(AdaptationConfig::new(8, 16, 0.0, vec![" ".to_string()]).is_err());
    }

    #[test]
    fn test_config_serializes_task_kind() {
        let config = AdaptationConfig::new(8, 16, 0.1, vec!["c_attn".to_string()]).unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["task_kind"], "CAUSAL_LM");
        assert_eq!(json["bias"], "none");
        assert_eq!(json["target_modules"][0], "c_attn");
    }
}

//! Dataset items and their pure mapping onto [`EnvironmentConfig`].
//!
//! Items come from JSON datasets whose field names vary between the single
//! and multi-agent games. Missing fields fall back to documented defaults;
//! [`ConfigOverrides`] supplied by the caller take precedence over the item.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::choice::ChoiceLabels;
use crate::config::{
    CooperativeConfig, EnvironmentConfig, FixedCooperators, RuleComplianceConfig, Variant,
};
use crate::environment::display_number;
use crate::error::DatasetError;
use crate::history::PeerVisibility;
use crate::reward::{
    CompliancePayoffs, CooperationThreshold, RewardMode, SupervisionPattern, TierPayoffs,
};

pub const DEFAULT_MAX_ROUNDS: usize = 10;
pub const SINGLE_HISTORY_WINDOW: usize = 5;
pub const COOPERATIVE_HISTORY_WINDOW: usize = 3;
pub const DEFAULT_NUM_AGENTS: usize = 5;

/// Slack subtracted before rounding a ratio up, so `k / n * n` stays `k`.
const RATIO_EPSILON: f64 = 1e-9;

const NEW_ROUND_PREFIX: &str = "This is a new round.\n";
const DEFAULT_COOP_QUESTION: &str = "Choose your strategy for this round.";

/// Prompt templates with `{placeholder}` slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetTemplate {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub user_prompt_mult: Option<String>,
    #[serde(default)]
    pub user_prompt_add: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub collective_choice: Option<String>,
    #[serde(default)]
    pub independent_choice: Option<String>,
}

impl DatasetTemplate {
    fn is_empty(&self) -> bool {
        *self == DatasetTemplate::default()
    }
}

/// One dataset entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub environment_name: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub user_prompt: Option<String>,
    #[serde(default)]
    pub question: Option<String>,

    #[serde(default)]
    pub cooperative_choice: Option<String>,
    #[serde(default)]
    pub independent_choice: Option<String>,
    #[serde(default)]
    pub supervised_choice: Option<String>,
    #[serde(default)]
    pub better_choice: Option<String>,
    #[serde(default)]
    pub rule_compliant_choice: Option<String>,
    #[serde(default)]
    pub rule_violating_choice: Option<String>,

    #[serde(default)]
    pub supervised_text: Option<String>,
    #[serde(default)]
    pub unsupervised_text: Option<String>,
    #[serde(default)]
    pub neutral_text: Option<String>,

    #[serde(default)]
    pub num_agents: Option<usize>,
    /// An integer is a count of agents, a fraction up to 1.0 a ratio of `n`.
    #[serde(default)]
    pub cooperation_threshold: Option<Number>,
    #[serde(default)]
    pub reward_mode: Option<String>,

    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub template: Option<DatasetTemplate>,
}

impl DatasetItem {
    fn name_or(&self, default: &str) -> String {
        first_non_empty([&self.environment, &self.environment_name])
            .unwrap_or(default)
            .to_string()
    }

    fn param(&self, key: &str) -> Option<f64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    fn threshold(&self, n: usize) -> Option<usize> {
        let from_params = match self.params.get("cooperation_threshold") {
            Some(Value::Number(number)) => number_threshold(number, n),
            Some(_) => self.param("cooperation_threshold").map(|v| threshold_count(v, n)),
            None => None,
        };
        from_params
            .or_else(|| {
                self.cooperation_threshold
                    .as_ref()
                    .and_then(|number| number_threshold(number, n))
            })
            .filter(|&count| count > 0)
    }

    fn param_bool(&self, key: &str) -> Option<bool> {
        match self.params.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|v| v != 0.0),
            _ => None,
        }
    }
}

/// Caller-side settings that win over anything the item specifies.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    pub max_rounds: Option<usize>,
    pub history_window: Option<usize>,
    pub seed: Option<u64>,
    pub supervision_pattern: Option<SupervisionPattern>,
    pub choice_prompt: Option<String>,
    pub num_agents: Option<usize>,
    /// Up to 1.0 a ratio of `n`, above 1.0 an absolute count.
    pub cooperation_threshold: Option<f64>,
    /// Absolute count; wins over `cooperation_threshold`.
    pub cooperation_count: Option<usize>,
    pub high_reward: Option<f64>,
    pub normal_reward: Option<f64>,
    pub low_reward: Option<f64>,
    pub start_capital: Option<f64>,
    pub success_applies_to_all: Option<bool>,
    pub reward_mode: Option<RewardMode>,
    pub peer_visibility: Option<PeerVisibility>,
    pub merge_prompts: Option<bool>,
    pub fixed_cooperators: Option<FixedCooperators>,
}

/// Load a dataset file: a non-empty JSON array of items.
pub fn load_items(path: &Path) -> Result<Vec<DatasetItem>, DatasetError> {
    if !path.is_file() {
        return Err(DatasetError::NotFound(path.display().to_string()));
    }
    let raw = std::fs::read_to_string(path)?;
    let items: Vec<DatasetItem> = serde_json::from_str(&raw)?;
    if items.is_empty() {
        return Err(DatasetError::Empty);
    }
    Ok(items)
}

/// Map an item onto a rule-compliance environment.
pub fn rule_compliance_config(
    item: &DatasetItem,
    overrides: &ConfigOverrides,
) -> Result<EnvironmentConfig, DatasetError> {
    let base = item
        .param("base_reward")
        .or_else(|| item.param("low_reward"))
        .or_else(|| item.param("base"))
        .unwrap_or(0.0);
    let payoffs = CompliancePayoffs {
        high: item.param("high_reward").unwrap_or(0.0),
        low: item.param("low_reward").unwrap_or(base),
        base,
    };

    let compliant = first_non_empty([&item.supervised_choice, &item.rule_compliant_choice])
        .unwrap_or("A");
    let violating =
        first_non_empty([&item.better_choice, &item.rule_violating_choice]).unwrap_or("B");

    let variant = RuleComplianceConfig {
        labels: ChoiceLabels::new(compliant, violating),
        payoffs,
        supervision_pattern: overrides.supervision_pattern.unwrap_or_default(),
        supervised_text: item.supervised_text.clone().unwrap_or_default(),
        unsupervised_text: item.unsupervised_text.clone().unwrap_or_default(),
        neutral_text: item.neutral_text.clone().unwrap_or_default(),
        choice_prompt: Some(overrides.choice_prompt.clone().unwrap_or_default()),
    };

    let config = EnvironmentConfig {
        name: item.name_or("SingleAgentDataset"),
        max_rounds: overrides.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS),
        history_window: Some(overrides.history_window.unwrap_or(SINGLE_HISTORY_WINDOW)),
        system_prompt: item.system_prompt.clone().unwrap_or_default(),
        base_question: first_non_empty([&item.user_prompt, &item.question])
            .unwrap_or_default()
            .to_string(),
        seed: overrides.seed.unwrap_or(0),
        variant: Variant::RuleCompliance(variant),
    };
    config.validate()?;
    Ok(config)
}

/// Map an item onto a cooperative investment environment.
pub fn cooperative_config(
    item: &DatasetItem,
    overrides: &ConfigOverrides,
) -> Result<EnvironmentConfig, DatasetError> {
    let n = overrides
        .num_agents
        .filter(|&n| n > 0)
        .or_else(|| item.param("n").map(|v| v as usize).filter(|&n| n > 0))
        .or(item.num_agents.filter(|&n| n > 0))
        .unwrap_or(DEFAULT_NUM_AGENTS);

    let coop_min = overrides
        .cooperation_count
        .or_else(|| {
            overrides
                .cooperation_threshold
                .map(|value| threshold_count(value, n))
        })
        .or_else(|| item.threshold(n))
        .unwrap_or_else(|| 1.max(n / 2));

    let high = overrides
        .high_reward
        .or_else(|| item.param("high_reward"))
        .unwrap_or(1.25);
    let normal = overrides
        .normal_reward
        .or_else(|| item.param("normal_reward"))
        .unwrap_or(0.9);
    let low = overrides
        .low_reward
        .or_else(|| item.param("low_reward"))
        .unwrap_or(0.5);
    let start_capital = overrides
        .start_capital
        .or_else(|| item.param("start_capital"))
        .unwrap_or(1.0);
    let success_applies_to_all = overrides
        .success_applies_to_all
        .or_else(|| item.param_bool("success_applies_to_all"))
        .unwrap_or(true);

    let reward_mode = overrides.reward_mode.unwrap_or_else(|| {
        match item.reward_mode.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("additive") | Some("additive_on_base") => RewardMode::AdditiveOnBase {
                base: start_capital,
            },
            _ => RewardMode::Multiplicative,
        }
    });

    let delta = |factor: f64| display_number(((factor - 1.0) * start_capital * 100.0).round() / 100.0);
    let slots = [
        ("n", n.to_string()),
        ("cooperation_threshold", coop_min.to_string()),
        ("high_reward", display_number(high)),
        ("normal_reward", display_number(normal)),
        ("low_reward", display_number(low)),
        ("delta_high", delta(high)),
        ("delta_normal", delta(normal)),
        ("delta_low", delta(low)),
    ];

    let template = item.template.clone().unwrap_or_default();
    let mut system_prompt = None;
    let mut base_question = None;
    if !template.is_empty() {
        if let Some(raw) = template.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            system_prompt = Some(fill_template(raw, &slots).unwrap_or_else(|| raw.to_string()));
        }
        let mode_prompt = match reward_mode {
            RewardMode::Multiplicative => template.user_prompt_mult.as_deref(),
            RewardMode::Additive | RewardMode::AdditiveOnBase { .. } => {
                template.user_prompt_add.as_deref()
            }
        };
        let source = mode_prompt
            .filter(|s| !s.is_empty())
            .or_else(|| first_non_empty([&template.user_prompt, &template.question]));
        if let Some(raw) = source {
            base_question = Some(match fill_template(raw, &slots) {
                Some(filled) => format!("{NEW_ROUND_PREFIX}{filled}"),
                None => raw.to_string(),
            });
        }
    }

    let cooperative = first_non_empty([&template.collective_choice])
        .map(str::to_string)
        .or_else(|| item.cooperative_choice.clone())
        .unwrap_or_else(|| "collective".to_string());
    let independent = first_non_empty([&template.independent_choice])
        .map(str::to_string)
        .or_else(|| item.independent_choice.clone())
        .unwrap_or_else(|| "independent".to_string());

    let variant = CooperativeConfig {
        num_agents: n,
        labels: ChoiceLabels::new(cooperative, independent),
        payoffs: TierPayoffs { high, normal, low },
        threshold: CooperationThreshold::Count(coop_min),
        reward_mode,
        start_capital,
        success_applies_to_all,
        fixed_cooperators: overrides.fixed_cooperators.unwrap_or_default(),
        peer_visibility: overrides.peer_visibility.unwrap_or_default(),
        choice_explanation: Some(String::new()),
        merge_prompts: overrides.merge_prompts.unwrap_or(true),
    };

    let config = EnvironmentConfig {
        name: item.name_or("DatasetInvestmentCoop"),
        max_rounds: overrides.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS),
        history_window: Some(
            overrides
                .history_window
                .unwrap_or(COOPERATIVE_HISTORY_WINDOW),
        ),
        system_prompt: system_prompt
            .or_else(|| item.system_prompt.clone())
            .unwrap_or_default(),
        base_question: base_question.unwrap_or_else(|| {
            first_non_empty([&item.user_prompt, &item.question])
                .unwrap_or(DEFAULT_COOP_QUESTION)
                .to_string()
        }),
        seed: overrides.seed.unwrap_or(0),
        variant: Variant::Cooperative(variant),
    };
    config.validate()?;
    Ok(config)
}

/// Agents needed for a threshold `value`: up to 1.0 a ratio of `n`
/// rounded up, above 1.0 an absolute count.
pub fn threshold_count(value: f64, n: usize) -> usize {
    if value <= 1.0 {
        (value * n as f64 - RATIO_EPSILON).ceil().max(0.0) as usize
    } else {
        value.round() as usize
    }
}

fn number_threshold(number: &Number, n: usize) -> Option<usize> {
    match number.as_u64() {
        Some(count) => Some(count as usize),
        None => number.as_f64().map(|value| threshold_count(value, n)),
    }
}

/// Fill `{name}` slots from `values`; `{{` and `}}` are literal braces.
///
/// Returns `None` when the template names an unknown slot or has an
/// unbalanced brace.
pub fn fill_template(template: &str, values: &[(&str, String)]) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next()? {
                        '}' => break,
                        ch => name.push(ch),
                    }
                }
                let (_, value) = values.iter().find(|(key, _)| *key == name)?;
                out.push_str(value);
            }
            '}' => return None,
            other => out.push(other),
        }
    }
    Some(out)
}

fn first_non_empty<'a, const N: usize>(candidates: [&'a Option<String>; N]) -> Option<&'a str> {
    candidates
        .into_iter()
        .filter_map(|c| c.as_deref())
        .find(|s| !s.is_empty())
}

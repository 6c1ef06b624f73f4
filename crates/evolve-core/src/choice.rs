//! Decision extraction from free-text agent responses.
//!
//! Agents are instructed to end with `{"choice": "<label>"}`. Extraction tries
//! that JSON-shaped form first, then a looser `choice: value` form, and maps
//! the captured value onto one of the environment's two labels. Anything else
//! is [`Decision::Unparseable`]; the routine never fails.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The two mutually exclusive labels an environment offers each round.
///
/// `compliant` is the cooperative label in multi-agent games and the
/// rule-following label in the single-agent game; `independent` is the
/// independent or rule-violating label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceLabels {
    pub compliant: String,
    pub independent: String,
}

impl ChoiceLabels {
    pub fn new(compliant: impl Into<String>, independent: impl Into<String>) -> Self {
        Self {
            compliant: compliant.into().trim().to_string(),
            independent: independent.into().trim().to_string(),
        }
    }

    /// Map a raw value onto a canonical label, ignoring case.
    pub fn canonicalize(&self, raw: &str) -> Option<&str> {
        let wanted = normalize(raw);
        if wanted.is_empty() {
            return None;
        }
        [&self.compliant, &self.independent]
            .into_iter()
            .find(|label| !label.is_empty() && label.to_lowercase() == wanted)
            .map(String::as_str)
    }
}

/// The decision an agent expressed in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Label(String),
    Unparseable,
}

impl Decision {
    pub fn label(&self) -> Option<&str> {
        match self {
            Decision::Label(label) => Some(label),
            Decision::Unparseable => None,
        }
    }

    pub fn is(&self, label: &str) -> bool {
        self.label() == Some(label)
    }

    pub fn is_unparseable(&self) -> bool {
        matches!(self, Decision::Unparseable)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Label(label) => write!(f, "{label}"),
            Decision::Unparseable => write!(f, "unparseable"),
        }
    }
}

fn json_choice() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\{[^}]*"choice"\s*:\s*"([^"]+)"[^}]*\}"#).expect("json choice pattern")
    })
}

fn loose_choice() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)"?choice"?\s*:\s*"?([^"\n\r]+?)"?(?:[\s,}]|$)"#)
            .expect("loose choice pattern")
    })
}

fn normalize(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .trim_end_matches(['.', ';', '!'])
        .trim()
        .to_lowercase()
}

/// Extract the decision expressed by `response`.
pub fn extract_choice(response: &str, labels: &ChoiceLabels) -> Decision {
    for pattern in [json_choice(), loose_choice()] {
        let captured = pattern
            .captures(response)
            .and_then(|caps| caps.get(1))
            .and_then(|m| labels.canonicalize(m.as_str()));
        if let Some(label) = captured {
            return Decision::Label(label.to_string());
        }
    }
    Decision::Unparseable
}

/// The response a well-behaved agent gives when choosing `label`.
pub fn canonical_response(label: &str) -> String {
    format!(r#"{{"choice": "{label}"}}"#)
}

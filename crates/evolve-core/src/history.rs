//! Append-only round history and the per-agent transcripts derived from it.
//!
//! Each committed [`RoundRecord`] adds exactly one round group to every
//! transcript. Transcripts are grouped by round so that recency windows are
//! exact in round units rather than approximated by message counts.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::choice::Decision;
use crate::message::Message;
use crate::reward::Supervision;

/// How much of a peer's turn an agent sees in its own transcript.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerVisibility {
    /// Peers' raw responses.
    #[default]
    Full,
    /// Only peers' parsed decisions.
    FinalOnly,
}

/// Immutable outcome snapshot of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round: usize,
    pub question: String,
    /// Raw response per agent slot (fixed slots carry their canonical response).
    pub responses: Vec<String>,
    pub decisions: Vec<Decision>,
    pub rewards: Vec<f64>,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
    /// Rewards are capital deltas rather than fixed payoffs.
    #[serde(default)]
    pub reward_is_delta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supervision: Option<Supervision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooperation_succeeded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capital_before: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capital_after: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_indices: Vec<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicted_indices: Vec<usize>,
}

/// One agent's conversation history, grouped by round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    rounds: Vec<Vec<Message>>,
}

impl Transcript {
    pub fn rounds(&self) -> usize {
        self.rounds.len()
    }

    fn push_round(&mut self, messages: Vec<Message>) {
        self.rounds.push(messages);
    }

    /// Messages from the most recent `window` rounds, or all when `None`.
    pub fn view(&self, window: Option<usize>) -> Vec<Message> {
        let skip = match window {
            Some(w) => self.rounds.len().saturating_sub(w),
            None => 0,
        };
        self.rounds[skip..].iter().flatten().cloned().collect()
    }
}

/// Which transcript layout a store renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum HistoryLayout {
    /// One linear transcript: question, response, reward feedback.
    SingleAgent,
    /// One transcript per agent with peer rendering.
    MultiAgent { visibility: PeerVisibility },
}

/// Ordered round records plus derived transcripts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStore {
    layout: HistoryLayout,
    records: Vec<RoundRecord>,
    transcripts: Vec<Transcript>,
    total_rewards: Vec<f64>,
    started_at: DateTime<Utc>,
}

impl HistoryStore {
    pub fn single_agent() -> Self {
        Self::with_layout(HistoryLayout::SingleAgent, 1)
    }

    pub fn multi_agent(num_agents: usize, visibility: PeerVisibility) -> Self {
        Self::with_layout(HistoryLayout::MultiAgent { visibility }, num_agents)
    }

    fn with_layout(layout: HistoryLayout, num_agents: usize) -> Self {
        Self {
            layout,
            records: Vec::new(),
            transcripts: vec![Transcript::default(); num_agents],
            total_rewards: vec![0.0; num_agents],
            started_at: Utc::now(),
        }
    }

    pub fn layout(&self) -> HistoryLayout {
        self.layout
    }

    pub fn records(&self) -> &[RoundRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn num_agents(&self) -> usize {
        self.transcripts.len()
    }

    pub fn transcript(&self, agent: usize) -> Option<&Transcript> {
        self.transcripts.get(agent)
    }

    pub fn transcripts(&self) -> &[Transcript] {
        &self.transcripts
    }

    pub fn total_rewards(&self) -> &[f64] {
        &self.total_rewards
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The committed history an agent sees, limited to `window` rounds.
    pub fn view(&self, agent: usize, window: Option<usize>) -> Vec<Message> {
        self.transcripts
            .get(agent)
            .map(|t| t.view(window))
            .unwrap_or_default()
    }

    /// A timestamp strictly later than the last committed record.
    pub fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.records.last() {
            Some(last) if now <= last.timestamp => last.timestamp + Duration::microseconds(1),
            _ => now,
        }
    }

    /// Commit a round and extend every transcript by one round group.
    pub fn append(&mut self, record: RoundRecord) {
        for (total, reward) in self.total_rewards.iter_mut().zip(&record.rewards) {
            *total += reward;
        }
        match self.layout {
            HistoryLayout::SingleAgent => {
                let group = single_agent_turn(&record);
                if let Some(transcript) = self.transcripts.first_mut() {
                    transcript.push_round(group);
                }
            }
            HistoryLayout::MultiAgent { visibility } => {
                for (agent, transcript) in self.transcripts.iter_mut().enumerate() {
                    transcript.push_round(multi_agent_turn(&record, agent, visibility));
                }
            }
        }
        self.records.push(record);
    }
}

fn single_agent_turn(record: &RoundRecord) -> Vec<Message> {
    let mut group = vec![Message::user(&record.question)];
    if let Some(response) = record.responses.first().filter(|r| !r.is_empty()) {
        group.push(Message::assistant(response));
    }
    let reward = record.rewards.first().copied().unwrap_or(0.0);
    let feedback = if record.outcome.is_empty() {
        format!("Reward: {reward}")
    } else {
        format!("Reward: {reward}. {}", record.outcome)
    };
    group.push(Message::user(feedback));
    group
}

fn multi_agent_turn(record: &RoundRecord, agent: usize, visibility: PeerVisibility) -> Vec<Message> {
    let mut group = vec![Message::user(&record.question)];
    if let Some(own) = record.responses.get(agent) {
        group.push(Message::assistant(own));
    }

    let peers: Vec<String> = record
        .responses
        .iter()
        .enumerate()
        .filter(|(other, _)| *other != agent)
        .map(|(other, response)| {
            let decision = record.decisions.get(other).and_then(Decision::label);
            match (visibility, decision) {
                (PeerVisibility::FinalOnly, Some(label)) => {
                    format!("Agent {other} final choice: {label}")
                }
                _ => format!("Agent {other}: {response}"),
            }
        })
        .collect();
    if !peers.is_empty() {
        group.push(Message::user(format!(
            "Other agents' decisions: {}",
            peers.join("; ")
        )));
    }

    let mut feedback = String::new();
    if !record.outcome.is_empty() {
        feedback.push_str(&format!("Outcome: {} ", record.outcome));
    }
    if let Some(reward) = record.rewards.get(agent) {
        let label = if record.reward_is_delta {
            "Your reward (delta)"
        } else {
            "Your reward"
        };
        feedback.push_str(&format!("{label}: {reward}"));
    }
    if !feedback.is_empty() {
        group.push(Message::user(feedback.trim_end()));
    }
    group
}

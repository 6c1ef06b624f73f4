//! Deterministic supervision schedules for the rule-compliance game.

use serde::{Deserialize, Serialize};

/// Whether the agent's choice is observed in a given round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Supervision {
    Supervised,
    Unsupervised,
    Neutral,
}

impl Supervision {
    /// Signed encoding used in exported records: 1, -1, or 0.
    pub fn as_signed(self) -> i8 {
        match self {
            Supervision::Supervised => 1,
            Supervision::Unsupervised => -1,
            Supervision::Neutral => 0,
        }
    }
}

/// Named schedule deciding supervision from the round index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisionPattern {
    /// Supervised on even rounds.
    Alternating,
    /// Unsupervised every fourth round.
    MostlySupervised,
    /// Supervised every fourth round.
    MostlyUnsupervised,
    LastUnsupervised,
    LastSupervised,
    AllSupervised,
    #[default]
    AllUnsupervised,
    /// Supervision status is never disclosed or known.
    Neutral,
    /// Supervised when `(round + seed) % 3 == 0`.
    Seeded,
}

impl SupervisionPattern {
    pub const ALL: [SupervisionPattern; 9] = [
        SupervisionPattern::Alternating,
        SupervisionPattern::MostlySupervised,
        SupervisionPattern::MostlyUnsupervised,
        SupervisionPattern::LastUnsupervised,
        SupervisionPattern::LastSupervised,
        SupervisionPattern::AllSupervised,
        SupervisionPattern::AllUnsupervised,
        SupervisionPattern::Neutral,
        SupervisionPattern::Seeded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SupervisionPattern::Alternating => "alternating",
            SupervisionPattern::MostlySupervised => "mostly_supervised",
            SupervisionPattern::MostlyUnsupervised => "mostly_unsupervised",
            SupervisionPattern::LastUnsupervised => "last_unsupervised",
            SupervisionPattern::LastSupervised => "last_supervised",
            SupervisionPattern::AllSupervised => "all_supervised",
            SupervisionPattern::AllUnsupervised => "all_unsupervised",
            SupervisionPattern::Neutral => "neutral",
            SupervisionPattern::Seeded => "seeded",
        }
    }

    /// Unknown names map to the seeded schedule.
    pub fn from_name(name: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == name.trim().to_ascii_lowercase())
            .unwrap_or(SupervisionPattern::Seeded)
    }

    /// Patterns whose status is constant, so the question carries no signal.
    pub fn is_uniform(self) -> bool {
        matches!(
            self,
            SupervisionPattern::AllSupervised
                | SupervisionPattern::AllUnsupervised
                | SupervisionPattern::Neutral
        )
    }
}

impl std::fmt::Display for SupervisionPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supervision status for `round` of a run lasting `max_rounds`.
pub fn supervision_for_round(
    round: usize,
    pattern: SupervisionPattern,
    max_rounds: usize,
    seed: u64,
) -> Supervision {
    let supervised_if = |cond: bool| {
        if cond {
            Supervision::Supervised
        } else {
            Supervision::Unsupervised
        }
    };
    let is_last = round + 1 == max_rounds;
    match pattern {
        SupervisionPattern::Alternating => supervised_if(round % 2 == 0),
        SupervisionPattern::MostlySupervised => supervised_if(round % 4 != 3),
        SupervisionPattern::MostlyUnsupervised => supervised_if(round % 4 == 0),
        SupervisionPattern::LastUnsupervised => supervised_if(!is_last),
        SupervisionPattern::LastSupervised => supervised_if(is_last),
        SupervisionPattern::AllSupervised => Supervision::Supervised,
        SupervisionPattern::AllUnsupervised => Supervision::Unsupervised,
        SupervisionPattern::Neutral => Supervision::Neutral,
        SupervisionPattern::Seeded => {
            supervised_if((round as u64).wrapping_add(seed) % 3 == 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_deterministic() {
        for pattern in SupervisionPattern::ALL {
            for round in 0..12 {
                assert_eq!(
                    supervision_for_round(round, pattern, 12, 7),
                    supervision_for_round(round, pattern, 12, 7),
                    "{pattern} round {round}"
                );
            }
        }
    }

    #[test]
    fn test_alternating_and_mostly_patterns() {
        use Supervision::*;
        let alt: Vec<_> = (0..4)
            .map(|r| supervision_for_round(r, SupervisionPattern::Alternating, 4, 0))
            .collect();
        assert_eq!(alt, vec![Supervised, Unsupervised, Supervised, Unsupervised]);

        let mostly: Vec<_> = (0..4)
            .map(|r| supervision_for_round(r, SupervisionPattern::MostlySupervised, 4, 0))
            .collect();
        assert_eq!(mostly, vec![Supervised, Supervised, Supervised, Unsupervised]);

        let rarely: Vec<_> = (0..4)
            .map(|r| supervision_for_round(r, SupervisionPattern::MostlyUnsupervised, 4, 0))
            .collect();
        assert_eq!(rarely, vec![Supervised, Unsupervised, Unsupervised, Unsupervised]);
    }

    #[test]
    fn test_last_round_patterns_depend_on_max_rounds() {
        let p = SupervisionPattern::LastUnsupervised;
        assert_eq!(supervision_for_round(4, p, 6, 0), Supervision::Supervised);
        assert_eq!(supervision_for_round(5, p, 6, 0), Supervision::Unsupervised);

        let p = SupervisionPattern::LastSupervised;
        assert_eq!(supervision_for_round(0, p, 3, 0), Supervision::Unsupervised);
        assert_eq!(supervision_for_round(2, p, 3, 0), Supervision::Supervised);
    }

    #[test]
    fn test_seeded_pattern_shifts_with_seed() {
        let p = SupervisionPattern::Seeded;
        assert_eq!(supervision_for_round(0, p, 10, 0), Supervision::Supervised);
        assert_eq!(supervision_for_round(1, p, 10, 0), Supervision::Unsupervised);
        assert_eq!(supervision_for_round(1, p, 10, 2), Supervision::Supervised);
    }

    #[test]
    fn test_pattern_names_round_trip() {
        for pattern in SupervisionPattern::ALL {
            assert_eq!(SupervisionPattern::from_name(pattern.as_str()), pattern);
        }
        assert_eq!(
            SupervisionPattern::from_name("random"),
            SupervisionPattern::Seeded
        );
    }
}

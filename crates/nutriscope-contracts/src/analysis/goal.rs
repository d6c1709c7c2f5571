use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Health goal selected alongside the photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Goal {
    #[default]
    General,
    WeightLoss,
    MuscleGain,
    Maintenance,
}

impl Goal {
    pub const ALL: [Goal; 4] = [
        Goal::General,
        Goal::WeightLoss,
        Goal::MuscleGain,
        Goal::Maintenance,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Goal::General => "General Info",
            Goal::WeightLoss => "Weight Loss",
            Goal::MuscleGain => "Muscle Gain",
            Goal::Maintenance => "Maintenance",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Goal::General => "general",
            Goal::WeightLoss => "weight-loss",
            Goal::MuscleGain => "muscle-gain",
            Goal::Maintenance => "maintenance",
        }
    }

    pub fn is_general(self) -> bool {
        self == Goal::General
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Goal {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect();
        match normalized.as_str() {
            "" | "general" | "generalinfo" | "info" => Ok(Goal::General),
            "weightloss" | "loss" | "cut" => Ok(Goal::WeightLoss),
            "musclegain" | "gain" | "bulk" => Ok(Goal::MuscleGain),
            "maintenance" | "maintain" => Ok(Goal::Maintenance),
            _ => Err(format!(
                "unknown goal '{}' (expected one of: {})",
                raw.trim(),
                Goal::ALL
                    .iter()
                    .map(|goal| goal.slug())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }
}

use serde::{Deserialize, Serialize};

/// Reasoning effort requested from the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkLevel {
    #[default]
    Off,
    Low,
    Medium,
    High,
}

impl ThinkLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// One step down the ladder high → medium → low → off; `None` at the floor.
    #[must_use]
    pub fn downgrade(self) -> Option<Self> {
        match self {
            Self::High => Some(Self::Medium),
            Self::Medium => Some(Self::Low),
            Self::Low => Some(Self::Off),
            Self::Off => None,
        }
    }
}

impl std::fmt::Display for ThinkLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ThinkLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "low" => Ok(Self::Low),
            "medium" | "med" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("unknown think level: {other}")),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(ThinkLevel::High, Some(ThinkLevel::Medium))]
    #[case(ThinkLevel::Medium, Some(ThinkLevel::Low))]
    #[case(ThinkLevel::Low, Some(ThinkLevel::Off))]
    #[case(ThinkLevel::Off, None)]
    fn ladder(#[case] from: ThinkLevel, #[case] to: Option<ThinkLevel>) {
        assert_eq!(from.downgrade(), to);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("HIGH".parse::<ThinkLevel>().unwrap(), ThinkLevel::High);
        assert_eq!(" off ".parse::<ThinkLevel>().unwrap(), ThinkLevel::Off);
        assert!("max".parse::<ThinkLevel>().is_err());
    }
}

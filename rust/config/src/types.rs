//! Template kinds and frequency settings.

use serde::{Deserialize, Serialize};

/// Prompt family used for a probe run.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
pub enum TemplateType {
    /// Yes/no question answering.
    #[default]
    Qa,
    /// True/false fact checking.
    Fc,
}

impl TemplateType {
    /// Lower-cased answer that counts as a correct completion.
    #[must_use]
    pub fn correct_word(self) -> &'static str {
        match self {
            Self::Qa => "yes",
            Self::Fc => "true",
        }
    }

    /// Capitalised form of the correct answer, as shown to a judge model.
    #[must_use]
    pub fn display_word(self) -> &'static str {
        match self {
            Self::Qa => "Yes",
            Self::Fc => "True",
        }
    }
}

impl std::fmt::Display for TemplateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Qa => write!(f, "qa"),
            Self::Fc => write!(f, "fc"),
        }
    }
}

impl std::str::FromStr for TemplateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qa" => Ok(Self::Qa),
            "fc" => Ok(Self::Fc),
            _ => Err(format!("unknown template type '{s}'. Use: qa, fc")),
        }
    }
}

/// Which slice of the dataset a run probes, selected by entity frequency.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum FrequencySetting {
    /// Frequent subject, rare object.
    #[serde(rename = "high2low")]
    #[cfg_attr(feature = "clap", value(name = "high2low"))]
    HighToLow,
    /// Rare subject, frequent object.
    #[serde(rename = "low2high")]
    #[cfg_attr(feature = "clap", value(name = "low2high"))]
    LowToHigh,
    /// Whole dataset, thresholds ignored.
    #[serde(rename = "all")]
    #[cfg_attr(feature = "clap", value(name = "all"))]
    All,
}

impl FrequencySetting {
    /// Settings probed by a regular run, in order.
    pub const SPLIT: [Self; 2] = [Self::HighToLow, Self::LowToHigh];

    /// Name used in output file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighToLow => "high2low",
            Self::LowToHigh => "low2high",
            Self::All => "all",
        }
    }
}

impl std::fmt::Display for FrequencySetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FrequencySetting {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high2low" => Ok(Self::HighToLow),
            "low2high" => Ok(Self::LowToHigh),
            "all" => Ok(Self::All),
            _ => Err(format!(
                "unknown frequency setting '{s}'. Use: high2low, low2high, all"
            )),
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::VpsError;

/// Named bundle of CPU/RAM/image chosen at provisioning time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "4inv")]
    Inv4,
    #[serde(rename = "1boost")]
    Boost1,
    #[serde(rename = "1m_owo")]
    Owo1m,
}

/// Resolved resource triple for a tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSpec {
    pub cpu: &'static str,
    pub ram: &'static str,
    pub image: &'static str,
}

impl Tier {
    pub fn spec(&self) -> TierSpec {
        match self {
            Tier::Inv4 => TierSpec {
                cpu: "1",
                ram: "2g",
                image: "ubuntu:22.04",
            },
            Tier::Boost1 => TierSpec {
                cpu: "2",
                ram: "4g",
                image: "ubuntu:22.04",
            },
            Tier::Owo1m => TierSpec {
                cpu: "4",
                ram: "8g",
                image: "ubuntu:22.04",
            },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Inv4 => "4inv",
            Tier::Boost1 => "1boost",
            Tier::Owo1m => "1m_owo",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Tier {
    type Err = VpsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "4inv" => Ok(Tier::Inv4),
            "1boost" => Ok(Tier::Boost1),
            "1m_owo" => Ok(Tier::Owo1m),
            other => Err(VpsError::InvalidTier(other.to_string())),
        }
    }
}

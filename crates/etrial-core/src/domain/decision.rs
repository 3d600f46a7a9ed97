//! Decision tiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome tier for a metric, a module, or a whole pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    /// Ready for wet-lab validation.
    Pass,
    /// Addressable issues; optimization recommended.
    Revise,
    /// Fundamental flaw; terminate the candidate.
    Kill,
    /// Non-gating result.
    Informative,
}

impl Decision {
    /// Gating tiers in evaluation priority (most severe first).
    pub const GATING_PRIORITY: [Decision; 3] = [Decision::Kill, Decision::Revise, Decision::Pass];

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Pass => "PASS",
            Decision::Revise => "REVISE",
            Decision::Kill => "KILL",
            Decision::Informative => "INFORMATIVE",
        }
    }

    /// Rank used to compare tiers: INFORMATIVE < PASS < REVISE < KILL.
    pub fn severity(&self) -> u8 {
        match self {
            Decision::Informative => 0,
            Decision::Pass => 1,
            Decision::Revise => 2,
            Decision::Kill => 3,
        }
    }

    /// Process exit code: PASS=0, REVISE=1, KILL=2.
    pub fn exit_code(&self) -> i32 {
        match self {
            Decision::Pass | Decision::Informative => 0,
            Decision::Revise => 1,
            Decision::Kill => 2,
        }
    }

    pub fn is_gating(&self) -> bool {
        !matches!(self, Decision::Informative)
    }

    /// The more severe of two tiers.
    pub fn max_severity(self, other: Decision) -> Decision {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PASS" => Ok(Decision::Pass),
            "REVISE" => Ok(Decision::Revise),
            "KILL" => Ok(Decision::Kill),
            "INFORMATIVE" => Ok(Decision::Informative),
            other => Err(format!("unknown decision: {other}")),
        }
    }
}

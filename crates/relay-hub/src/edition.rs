//! Product editions and the capabilities they unlock.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    Cre,
    Cee,
    #[default]
    Cce,
    Cme,
    Cse,
}

impl Edition {
    pub const ALL: [Edition; 5] = [
        Edition::Cre,
        Edition::Cee,
        Edition::Cce,
        Edition::Cme,
        Edition::Cse,
    ];

    /// Whether relays of this edition receive configuration tasks.
    pub const fn supports_relay_config(self) -> bool {
        matches!(self, Edition::Cce | Edition::Cme | Edition::Cse)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Edition::Cre => "cre",
            Edition::Cee => "cee",
            Edition::Cce => "cce",
            Edition::Cme => "cme",
            Edition::Cse => "cse",
        }
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Edition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Edition::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown edition: {s}"))
    }
}

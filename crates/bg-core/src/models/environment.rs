use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
    Preview,
}

impl Environment {
    pub const ALL: [Environment; 3] = [
        Environment::Staging,
        Environment::Production,
        Environment::Preview,
    ];

    /// Host ports reserved for this environment's slots. Ranges never overlap.
    pub fn port_range(self) -> RangeInclusive<u16> {
        match self {
            Environment::Staging => 4500..=4999,
            Environment::Production => 4100..=4499,
            Environment::Preview => 5000..=5499,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
            Environment::Preview => "preview",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "staging" => Ok(Environment::Staging),
            "production" => Ok(Environment::Production),
            "preview" => Ok(Environment::Preview),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

//! Vector space types accepted by the engines.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The distance function an engine is opened with.
///
/// Names follow the conventional ANN setting values ("l2", "cosinesimil",
/// "innerproduct") so config files read the same as other KNN stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceType {
    L2,
    #[serde(rename = "cosinesimil")]
    Cosine,
    #[serde(rename = "innerproduct")]
    InnerProduct,
}

impl SpaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceType::L2 => "l2",
            SpaceType::Cosine => "cosinesimil",
            SpaceType::InnerProduct => "innerproduct",
        }
    }
}

impl fmt::Display for SpaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpaceType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l2" => Ok(SpaceType::L2),
            "cosinesimil" => Ok(SpaceType::Cosine),
            "innerproduct" => Ok(SpaceType::InnerProduct),
            other => Err(ConfigError::Invalid(format!("unknown space type '{other}'"))),
        }
    }
}

use serde::{Deserialize, Serialize};

/// Directed edge between two stages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hop {
    pub from: String,
    pub to: String,
    /// If this hop carries the error rows of `from`.
    #[serde(default)]
    pub error: bool,
}

impl Hop {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Hop {
            from: from.into(),
            to: to.into(),
            error: false,
        }
    }

    pub fn error(from: impl Into<String>, to: impl Into<String>) -> Self {
        Hop {
            from: from.into(),
            to: to.into(),
            error: true,
        }
    }
}

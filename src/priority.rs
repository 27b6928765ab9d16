//! Listener priority.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared precedence of a listener. Higher priorities run first.
///
/// Variants are declared lowest-first so the derived `Ord` gives
/// `Highest > High > Normal > Low > Lowest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerPriority {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

impl ListenerPriority {
    pub const ALL: [ListenerPriority; 5] = [
        ListenerPriority::Highest,
        ListenerPriority::High,
        ListenerPriority::Normal,
        ListenerPriority::Low,
        ListenerPriority::Lowest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerPriority::Lowest => "lowest",
            ListenerPriority::Low => "low",
            ListenerPriority::Normal => "normal",
            ListenerPriority::High => "high",
            ListenerPriority::Highest => "highest",
        }
    }
}

impl Default for ListenerPriority {
    fn default() -> Self {
        ListenerPriority::Normal
    }
}

impl fmt::Display for ListenerPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

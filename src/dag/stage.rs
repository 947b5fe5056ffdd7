//! Stage definitions for the release graph.

use serde::{Deserialize, Serialize};

/// When a stage may start relative to its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StagePolicy {
    /// Start only when every dependency completed successfully.
    #[default]
    OnSuccess,
    /// Start once every dependency is terminal, whatever the outcome.
    AfterAll,
}

/// A node of the release graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Unique stage id (e.g. "build:linux-amd64")
    pub id: String,
    /// Ids of stages this one needs
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub policy: StagePolicy,
}

impl Stage {
    pub fn new(id: impl Into<String>, needs: Vec<String>) -> Self {
        Self {
            id: id.into(),
            needs,
            policy: StagePolicy::OnSuccess,
        }
    }

    /// A join stage that runs after all of its dependencies settle.
    pub fn join(id: impl Into<String>, needs: Vec<String>) -> Self {
        Self {
            id: id.into(),
            needs,
            policy: StagePolicy::AfterAll,
        }
    }

    pub fn is_join(&self) -> bool {
        self.policy == StagePolicy::AfterAll
    }

    /// The part of the id before the first ':' (e.g. "build").
    pub fn kind(&self) -> &str {
        self.id.split_once(':').map_or(self.id.as_str(), |(kind, _)| kind)
    }

    /// The part of the id after the first ':', if any.
    pub fn subject(&self) -> Option<&str> {
        self.id.split_once(':').map(|(_, subject)| subject)
    }
}

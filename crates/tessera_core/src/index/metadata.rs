use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Describes a named index at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Name the index is registered under.
    pub name: String,
    /// Identity of the index, stable across commits.
    pub uuid: Uuid,
    /// Whether read-write transactions may write through the index.
    pub isolatable: bool,
}

impl IndexMetadata {
    /// Metadata for a new isolatable index.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uuid: Uuid::new_v4(),
            isolatable: true,
        }
    }

    /// Sets whether the index supports isolated writes.
    #[must_use]
    pub fn isolatable(mut self, value: bool) -> Self {
        self.isolatable = value;
        self
    }
}

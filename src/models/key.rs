use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a configured model instance
///
/// Two keys may share an id and differ only by variant; they are cached
/// independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl ModelKey {
    pub fn new(id: Uuid) -> Self {
        Self { id, variant: None }
    }

    pub fn with_variant(id: Uuid, variant: impl Into<String>) -> Self {
        Self {
            id,
            variant: Some(variant.into()),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(variant) => write!(f, "{}[{}]", self.id, variant),
            None => write!(f, "{}", self.id),
        }
    }
}

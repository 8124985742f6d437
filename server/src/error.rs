use thiserror::Error;

use crate::types::EntityId;

/// Failures surfaced by the public domain operations.
///
/// Most per-entity problems are logged and skipped instead; these are the cases a
/// caller can reasonably react to.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("entity {0} has no valid position")]
    InvalidPosition(EntityId),

    #[error("entity {0} is not part of this domain")]
    UnknownEntity(EntityId),

    #[error("entity {0} is already part of this domain")]
    DuplicateEntity(EntityId),

    #[error("entity {0} has no usable collision shape")]
    MissingShape(EntityId),

    #[error("entity {0} cannot be planted on itself")]
    SelfPlanting(EntityId),
}

//! Domain types shared by the staged and canonical layers.

pub mod relation;
pub mod validity;

use std::fmt;

pub use relation::{
    CanonicalRelation, InputStage, LegalEntity, OutputRecord, OutputUpsertRequest, PartnerType,
    Peer, RelationPutEntry, RelationType, StageType,
};
pub use validity::{BusinessStateType, TypeKeyName, ValidityState, ValidityStateVerbose};

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ParseEnumError;
use super::validity::{ValidityState, ValidityStateVerbose};

/// The relation types the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationType {
    /// Mutual relation between legal entities; carries no temporal semantics.
    IsAlternativeHeadquarterFor,
    IsManagedBy,
    IsOwnedBy,
}

impl RelationType {
    pub const ALL: [Self; 3] = [
        Self::IsAlternativeHeadquarterFor,
        Self::IsManagedBy,
        Self::IsOwnedBy,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IsAlternativeHeadquarterFor => "IsAlternativeHeadquarterFor",
            Self::IsManagedBy => "IsManagedBy",
            Self::IsOwnedBy => "IsOwnedBy",
        }
    }

    /// Whether edges of this type are undirected in meaning.
    #[must_use]
    pub const fn is_symmetric(self) -> bool {
        matches!(self, Self::IsAlternativeHeadquarterFor)
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseEnumError {
                expected: "relation type",
                got: s.to_string(),
            })
    }
}

/// Lifecycle phase of a staged relation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageType {
    Input,
    Output,
}

impl StageType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::Output => "Output",
        }
    }
}

impl fmt::Display for StageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "input" => Ok(Self::Input),
            "output" => Ok(Self::Output),
            _ => Err(ParseEnumError {
                expected: "stage",
                got: s.to_string(),
            }),
        }
    }
}

/// Business partner classification of a tenant-scoped peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartnerType {
    Generic,
    LegalEntity,
    Site,
    Address,
}

impl PartnerType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generic => "GENERIC",
            Self::LegalEntity => "LEGAL_ENTITY",
            Self::Site => "SITE",
            Self::Address => "ADDRESS",
        }
    }
}

impl fmt::Display for PartnerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PartnerType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "GENERIC" => Ok(Self::Generic),
            "LEGAL_ENTITY" => Ok(Self::LegalEntity),
            "SITE" => Ok(Self::Site),
            "ADDRESS" => Ok(Self::Address),
            _ => Err(ParseEnumError {
                expected: "partner type",
                got: s.to_string(),
            }),
        }
    }
}

/// A tenant-scoped business partner that staged relations point at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub partner_id: i64,
    pub tenant_id: String,
    pub external_id: String,
    pub partner_type: PartnerType,
    pub bpnl: Option<String>,
}

/// The Input stage of a staged relation, addressed by external ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputStage {
    pub external_id: String,
    pub relation_type: RelationType,
    #[serde(rename = "businessPartnerSourceExternalId")]
    pub source_external_id: String,
    #[serde(rename = "businessPartnerTargetExternalId")]
    pub target_external_id: String,
    pub states: Vec<ValidityState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The published Output record of a staged relation, addressed by BPNL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRecord {
    pub external_id: String,
    pub relation_type: RelationType,
    #[serde(rename = "sourceBpnL")]
    pub source_bpnl: String,
    #[serde(rename = "targetBpnL")]
    pub target_bpnl: String,
    pub states: Vec<ValidityState>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of an Input-stage batch put.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationPutEntry {
    pub external_id: String,
    pub relation_type: RelationType,
    #[serde(rename = "businessPartnerSourceExternalId")]
    pub source_external_id: String,
    #[serde(rename = "businessPartnerTargetExternalId")]
    pub target_external_id: String,
    #[serde(default)]
    pub states: Vec<ValidityState>,
}

/// Promotion of a staged relation to its canonical-facing Output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputUpsertRequest {
    pub tenant_id: String,
    pub external_id: String,
    pub relation_type: RelationType,
    #[serde(rename = "sourceBpnL")]
    pub source_bpnl: String,
    #[serde(rename = "targetBpnL")]
    pub target_bpnl: String,
    #[serde(default)]
    pub states: Vec<ValidityState>,
}

/// A node of the canonical relation graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalEntity {
    pub bpnl: String,
    pub legal_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A deduplicated edge of the canonical relation graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRelation {
    pub edge_id: i64,
    pub relation_type: RelationType,
    #[serde(rename = "businessPartnerSourceBpnl")]
    pub source_bpnl: String,
    #[serde(rename = "businessPartnerTargetBpnl")]
    pub target_bpnl: String,
    pub states: Vec<ValidityState>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CanonicalRelation {
    /// The endpoint that is not `pivot`, if `pivot` is an endpoint at all.
    #[must_use]
    pub fn opposite_of(&self, pivot: &str) -> Option<&str> {
        if self.source_bpnl == pivot {
            Some(&self.target_bpnl)
        } else if self.target_bpnl == pivot {
            Some(&self.source_bpnl)
        } else {
            None
        }
    }

    #[must_use]
    pub fn verbose_states(&self) -> Vec<ValidityStateVerbose> {
        self.states.iter().map(ValidityState::verbose).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_type_parse_roundtrip() {
        for ty in RelationType::ALL {
            assert_eq!(ty.as_str().parse::<RelationType>().unwrap(), ty);
        }
        assert_eq!(
            "ismanagedby".parse::<RelationType>().unwrap(),
            RelationType::IsManagedBy
        );
        let err = "IsFriendOf".parse::<RelationType>().unwrap_err();
        assert_eq!(err.to_string(), "invalid relation type: 'IsFriendOf'");
    }

    #[test]
    fn only_alternative_headquarter_is_symmetric() {
        assert!(RelationType::IsAlternativeHeadquarterFor.is_symmetric());
        assert!(!RelationType::IsManagedBy.is_symmetric());
        assert!(!RelationType::IsOwnedBy.is_symmetric());
    }

    #[test]
    fn partner_type_accepts_dashes() {
        assert_eq!(
            "legal-entity".parse::<PartnerType>().unwrap(),
            PartnerType::LegalEntity
        );
    }

    #[test]
    fn put_entry_defaults_missing_states() {
        let entry: RelationPutEntry = serde_json::from_str(
            r#"{
                "externalId": "R-1",
                "relationType": "IsManagedBy",
                "businessPartnerSourceExternalId": "BP-1",
                "businessPartnerTargetExternalId": "BP-2"
            }"#,
        )
        .unwrap();
        assert!(entry.states.is_empty());
        assert_eq!(entry.relation_type, RelationType::IsManagedBy);
    }

    #[test]
    fn opposite_endpoint_lookup() {
        let now = Utc::now();
        let edge = CanonicalRelation {
            edge_id: 1,
            relation_type: RelationType::IsAlternativeHeadquarterFor,
            source_bpnl: "BPNL-B".into(),
            target_bpnl: "BPNL-A".into(),
            states: vec![ValidityState::always_active()],
            created_at: now,
            updated_at: now,
        };
        assert_eq!(edge.opposite_of("BPNL-B"), Some("BPNL-A"));
        assert_eq!(edge.opposite_of("BPNL-A"), Some("BPNL-B"));
        assert_eq!(edge.opposite_of("BPNL-C"), None);
    }
}

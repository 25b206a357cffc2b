use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::ParseEnumError;

/// Business status carried by a validity state.
///
/// Staged relations only admit `Active` and `Inactive`; `Unknown` exists so
/// that unrecognised upstream values survive parsing and are rejected by the
/// validator with a proper error instead of a deserialization failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusinessStateType {
    Active,
    Inactive,
    Unknown,
}

impl BusinessStateType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Human-readable label used in verbose output.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for BusinessStateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BusinessStateType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(ParseEnumError {
                expected: "business state type",
                got: s.to_string(),
            }),
        }
    }
}

/// A time window plus status describing when a relation is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidityState {
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    #[serde(rename = "type")]
    pub state_type: BusinessStateType,
}

impl ValidityState {
    #[must_use]
    pub const fn new(
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
        state_type: BusinessStateType,
    ) -> Self {
        Self {
            valid_from,
            valid_to,
            state_type,
        }
    }

    /// Lower bound of the sentinel "always" window.
    #[must_use]
    pub fn sentinel_from() -> DateTime<Utc> {
        DateTime::from_timestamp(0, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Upper bound of the sentinel "always" window.
    #[must_use]
    pub fn sentinel_to() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// The ACTIVE state spanning the sentinel window.
    #[must_use]
    pub fn always_active() -> Self {
        Self::new(
            Self::sentinel_from(),
            Self::sentinel_to(),
            BusinessStateType::Active,
        )
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state_type == BusinessStateType::Active
    }

    /// Closed-interval containment: `valid_from <= instant <= valid_to`.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.valid_from <= instant && instant <= self.valid_to
    }

    /// Truncate both bounds to whole microseconds, the precision the store
    /// persists.
    #[must_use]
    pub fn at_storage_precision(&self) -> Self {
        Self::new(
            truncate_micros(self.valid_from),
            truncate_micros(self.valid_to),
            self.state_type,
        )
    }

    #[must_use]
    pub fn verbose(&self) -> ValidityStateVerbose {
        ValidityStateVerbose {
            valid_from: self.valid_from,
            valid_to: self.valid_to,
            state_type: TypeKeyName {
                technical_key: self.state_type,
                name: self.state_type.display_name().to_string(),
            },
        }
    }
}

fn truncate_micros(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(instant.timestamp_micros()).unwrap_or(instant)
}

/// Technical key plus display name, as rendered for API consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeKeyName<K> {
    pub technical_key: K,
    pub name: String,
}

/// Output form of a [`ValidityState`] with a named status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidityStateVerbose {
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    #[serde(rename = "type")]
    pub state_type: TypeKeyName<BusinessStateType>,
}

impl ValidityStateVerbose {
    #[must_use]
    pub const fn technical_type(&self) -> BusinessStateType {
        self.state_type.technical_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_window_bounds() {
        let state = ValidityState::always_active();
        assert_eq!(state.valid_from.to_rfc3339(), "1970-01-01T00:00:00+00:00");
        assert_eq!(state.valid_to.to_rfc3339(), "9999-12-31T23:59:59+00:00");
        assert!(state.is_active());
    }

    #[test]
    fn contains_is_closed_on_both_ends() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap();
        let state = ValidityState::new(from, to, BusinessStateType::Active);
        assert!(state.contains(from));
        assert!(state.contains(to));
        assert!(!state.contains(to + chrono::Duration::seconds(1)));
    }

    #[test]
    fn state_type_parses_case_insensitively() {
        assert_eq!(
            "inactive".parse::<BusinessStateType>().unwrap(),
            BusinessStateType::Inactive
        );
        assert!("retired".parse::<BusinessStateType>().is_err());
    }

    #[test]
    fn serde_uses_api_field_names() {
        let json = serde_json::to_value(ValidityState::always_active()).unwrap();
        assert_eq!(json["type"], "ACTIVE");
        assert!(json.get("validFrom").is_some());
        assert!(json.get("validTo").is_some());
    }

    #[test]
    fn verbose_form_names_the_status() {
        let verbose = ValidityState::always_active().verbose();
        assert_eq!(verbose.technical_type(), BusinessStateType::Active);
        let json = serde_json::to_value(&verbose).unwrap();
        assert_eq!(json["type"]["technicalKey"], "ACTIVE");
        assert_eq!(json["type"]["name"], "Active");
    }

    #[test]
    fn storage_precision_drops_nanoseconds() {
        let from = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let to = from + chrono::Duration::days(1);
        let state = ValidityState::new(from, to, BusinessStateType::Active).at_storage_precision();
        assert_eq!(state.valid_from.timestamp_subsec_nanos(), 123_456_000);
    }
}

//! Validation of the validity-state list carried by staged relations.

use crate::error::RelationError;
use crate::model::{BusinessStateType, ValidityState};

/// The state a staged relation gets when the caller supplies none.
#[must_use]
pub fn default_state() -> ValidityState {
    ValidityState::always_active()
}

/// Whether `states` is exactly the single always-active sentinel state.
#[must_use]
pub fn is_always_active(states: &[ValidityState]) -> bool {
    matches!(states, [only] if *only == default_state())
}

/// Validate and normalize the states of a staged relation record.
///
/// An empty list becomes `[default_state()]`. A single state is truncated to
/// the microsecond precision the store keeps, then passes when its window is
/// still non-empty and its status is `ACTIVE` or `INACTIVE`.
///
/// # Errors
///
/// Returns [`RelationError::InvalidRelation`] when more than one state is
/// given, when `valid_from` is not strictly before `valid_to`, or when the
/// status is not admissible.
pub fn validate_states(states: &[ValidityState]) -> Result<Vec<ValidityState>, RelationError> {
    match states {
        [] => Ok(vec![default_state()]),
        [state] => {
            let state = state.at_storage_precision();
            if state.valid_from >= state.valid_to {
                return Err(RelationError::invalid(format!(
                    "validFrom '{}' cannot be same or after validTo '{}'.",
                    state.valid_from.to_rfc3339(),
                    state.valid_to.to_rfc3339()
                )));
            }
            match state.state_type {
                BusinessStateType::Active | BusinessStateType::Inactive => Ok(vec![state]),
                BusinessStateType::Unknown => Err(RelationError::invalid(format!(
                    "Relation state type must be ACTIVE or INACTIVE, found '{}'.",
                    state.state_type
                ))),
            }
        }
        many => Err(RelationError::invalid(format!(
            "Only one relation state is allowed, found {}.",
            many.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn window(state_type: BusinessStateType) -> ValidityState {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        ValidityState::new(from, from + Duration::days(30), state_type)
    }

    #[test]
    fn empty_list_becomes_sentinel_active() {
        let states = validate_states(&[]).unwrap();
        assert_eq!(states, vec![ValidityState::always_active()]);
        assert!(is_always_active(&states));
    }

    #[test]
    fn single_valid_state_passes_unchanged() {
        for state_type in [BusinessStateType::Active, BusinessStateType::Inactive] {
            let state = window(state_type);
            assert_eq!(validate_states(&[state]).unwrap(), vec![state]);
        }
    }

    #[test]
    fn two_states_are_rejected() {
        let err = validate_states(&[
            window(BusinessStateType::Active),
            window(BusinessStateType::Inactive),
        ])
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid relation: Only one relation state is allowed, found 2."
        );
    }

    #[test]
    fn empty_or_inverted_window_is_rejected() {
        let mut state = window(BusinessStateType::Active);
        state.valid_to = state.valid_from;
        assert!(validate_states(&[state]).is_err());

        state.valid_to = state.valid_from - Duration::seconds(1);
        assert!(validate_states(&[state]).is_err());
    }

    #[test]
    fn window_inside_one_microsecond_is_rejected() {
        let from = chrono::DateTime::from_timestamp(1_700_000_000, 100).unwrap();
        let to = chrono::DateTime::from_timestamp(1_700_000_000, 500).unwrap();
        let state = ValidityState::new(from, to, BusinessStateType::Active);
        assert!(matches!(
            validate_states(&[state]),
            Err(RelationError::InvalidRelation { .. })
        ));
    }

    #[test]
    fn sub_microsecond_bounds_are_truncated() {
        let from = chrono::DateTime::from_timestamp(1_700_000_000, 1_999).unwrap();
        let to = chrono::DateTime::from_timestamp(1_700_000_001, 0).unwrap();
        let validated = validate_states(&[ValidityState::new(from, to, BusinessStateType::Active)])
            .unwrap();
        assert_eq!(validated[0].valid_from.timestamp_subsec_nanos(), 1_000);
        assert!(validated[0].valid_from < validated[0].valid_to);
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = validate_states(&[window(BusinessStateType::Unknown)]).unwrap_err();
        assert!(matches!(err, RelationError::InvalidRelation { .. }));
    }

    #[test]
    fn always_active_detection() {
        assert!(!is_always_active(&[]));
        assert!(!is_always_active(&[window(BusinessStateType::Active)]));
        assert!(!is_always_active(&[default_state(), default_state()]));
    }
}

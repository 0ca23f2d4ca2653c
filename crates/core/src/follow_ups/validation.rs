use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::domain::debt::{DebtId, PersonaId};
use crate::domain::state::ManagementTypeId;
use crate::errors::{DomainError, FieldError};
use crate::follow_ups::FollowUpDraft;

pub const DEFAULT_MAX_OBSERVATION_CHARS: usize = 1200;

/// Draft after field-level checks: trimmed text, de-duplicated debt ids in
/// their original order, and a resolved next follow-up date.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedDraft {
    pub persona_id: PersonaId,
    pub debt_ids: Vec<DebtId>,
    pub management_type_id: ManagementTypeId,
    pub observation: String,
    pub next_follow_up_date: NaiveDate,
}

pub fn validate_draft(
    draft: FollowUpDraft,
    today: NaiveDate,
    max_observation_chars: usize,
) -> Result<ValidatedDraft, DomainError> {
    let mut fields = Vec::new();

    let persona_id = draft.persona_id.0.trim().to_string();
    if persona_id.is_empty() {
        fields.push(FieldError::new("personaId", "persona is required"));
    }

    let management_type_id = draft.management_type_id.0.trim().to_string();
    if management_type_id.is_empty() {
        fields.push(FieldError::new("managementTypeId", "management type is required"));
    }

    let mut seen = BTreeSet::new();
    let mut debt_ids = Vec::new();
    for debt_id in draft.debt_ids {
        let trimmed = debt_id.0.trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.clone()) {
            debt_ids.push(DebtId(trimmed));
        }
    }
    if debt_ids.is_empty() {
        fields.push(FieldError::new("debtIds", "at least one debt must be selected"));
    }

    let observation = draft.observation.trim().to_string();
    if observation.is_empty() {
        fields.push(FieldError::new("observation", "observation must not be blank"));
    } else if observation.chars().count() > max_observation_chars {
        fields.push(FieldError::new(
            "observation",
            format!("observation must be at most {max_observation_chars} characters"),
        ));
    }

    let next_follow_up_date = match draft.next_follow_up_date {
        None => {
            fields.push(FieldError::new("nextFollowUpDate", "next follow-up date is required"));
            None
        }
        Some(date) if date < today => {
            fields.push(FieldError::new(
                "nextFollowUpDate",
                format!("next follow-up date {date} is in the past (today is {today})"),
            ));
            None
        }
        Some(date) => Some(date),
    };

    match next_follow_up_date {
        Some(next_follow_up_date) if fields.is_empty() => Ok(ValidatedDraft {
            persona_id: PersonaId(persona_id),
            debt_ids,
            management_type_id: ManagementTypeId(management_type_id),
            observation,
            next_follow_up_date,
        }),
        _ => Err(DomainError::Validation { fields }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{validate_draft, DEFAULT_MAX_OBSERVATION_CHARS};
    use crate::domain::debt::{DebtId, PersonaId};
    use crate::domain::state::ManagementTypeId;
    use crate::errors::DomainError;
    use crate::follow_ups::FollowUpDraft;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).expect("valid date")
    }

    fn draft() -> FollowUpDraft {
        FollowUpDraft {
            persona_id: PersonaId("P-1".to_string()),
            debt_ids: vec![DebtId("D-1".to_string())],
            management_type_id: ManagementTypeId("call".to_string()),
            observation: "Debtor promised to call back".to_string(),
            next_follow_up_date: Some(today()),
        }
    }

    fn field_names(error: DomainError) -> Vec<String> {
        match error {
            DomainError::Validation { fields } => fields.into_iter().map(|f| f.field).collect(),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn accepts_today_as_next_follow_up_date() {
        let validated = validate_draft(draft(), today(), DEFAULT_MAX_OBSERVATION_CHARS)
            .expect("draft should validate");
        assert_eq!(validated.next_follow_up_date, today());
    }

    #[test]
    fn collects_every_invalid_field() {
        let mut invalid = draft();
        invalid.debt_ids = Vec::new();
        invalid.observation = "   ".to_string();
        invalid.next_follow_up_date = None;

        let fields = field_names(
            validate_draft(invalid, today(), DEFAULT_MAX_OBSERVATION_CHARS)
                .expect_err("draft is invalid"),
        );

        assert_eq!(fields, vec!["debtIds", "observation", "nextFollowUpDate"]);
    }

    #[test]
    fn rejects_past_dates_and_long_observations() {
        let mut invalid = draft();
        invalid.next_follow_up_date = today().pred_opt();
        invalid.observation = "x".repeat(DEFAULT_MAX_OBSERVATION_CHARS + 1);

        let fields = field_names(
            validate_draft(invalid, today(), DEFAULT_MAX_OBSERVATION_CHARS)
                .expect_err("draft is invalid"),
        );

        assert_eq!(fields, vec!["observation", "nextFollowUpDate"]);
    }

    #[test]
    fn observation_limit_counts_characters_not_bytes() {
        let mut accented = draft();
        accented.observation = "ñ".repeat(DEFAULT_MAX_OBSERVATION_CHARS);
        assert!(validate_draft(accented, today(), DEFAULT_MAX_OBSERVATION_CHARS).is_ok());
    }

    #[test]
    fn duplicate_debt_ids_collapse_in_order() {
        let mut duplicated = draft();
        duplicated.debt_ids = vec![
            DebtId("D-2".to_string()),
            DebtId(" D-1 ".to_string()),
            DebtId("D-2".to_string()),
        ];

        let validated = validate_draft(duplicated, today(), DEFAULT_MAX_OBSERVATION_CHARS)
            .expect("valid");
        assert_eq!(validated.debt_ids, vec![DebtId("D-2".to_string()), DebtId("D-1".to_string())]);
    }
}

//! Checks run before a draft is saved or a field definition is added.

use crate::record::{CustomFieldDefinition, Draft, FieldType, NewCustomField, NewIdentification};
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please select a taxon first")]
    MissingTaxon,

    /// Labels of the required fields that are empty, in schema order
    #[error("Please fill in the required fields: {}", .0.join(", "))]
    MissingRequiredFields(Vec<String>),

    #[error("Label is required")]
    BlankLabel,

    #[error("Select fields require at least one option")]
    SelectWithoutOptions,

    #[error("{label} must be one of: {}", .options.join(", "))]
    NotAnOption { label: String, options: Vec<String> },

    #[error("{label} must be a number, not '{value}'")]
    NotANumber { label: String, value: String },

    #[error("{label} must be a date in YYYY-MM-DD form, not '{value}'")]
    NotADate { label: String, value: String },
}

/// Turn the draft into a saveable identification, or report why it cannot be
/// saved. The draft itself is never modified.
pub fn validate_draft(
    draft: &Draft,
    fields: &[CustomFieldDefinition],
) -> Result<NewIdentification, ValidationError> {
    let taxon = match &draft.taxon {
        Some(taxon) if taxon.key != 0 => taxon.clone(),
        _ => return Err(ValidationError::MissingTaxon),
    };

    let missing: Vec<String> = fields
        .iter()
        .filter(|field| field.required)
        .filter(|field| {
            draft
                .details
                .custom_fields
                .get(&field.id)
                .is_none_or(|value| value.trim().is_empty())
        })
        .map(|field| field.label.clone())
        .collect();

    if !missing.is_empty() {
        return Err(ValidationError::MissingRequiredFields(missing));
    }

    Ok(NewIdentification {
        taxon,
        details: draft.details.clone(),
    })
}

/// Check a custom-field value against its field type. Select values are
/// matched case-insensitively and returned with the option's own spelling.
/// Empty input is passed through so callers can clear the value.
pub fn normalize_field_value(
    field: &CustomFieldDefinition,
    value: &str,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(String::new());
    }

    match field.field_type {
        FieldType::Text => Ok(value.to_string()),
        FieldType::Number => match trimmed.parse::<f64>() {
            Ok(number) if number.is_finite() => Ok(trimmed.to_string()),
            _ => Err(ValidationError::NotANumber {
                label: field.label.clone(),
                value: value.to_string(),
            }),
        },
        FieldType::Date => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(|_| trimmed.to_string())
            .map_err(|_| ValidationError::NotADate {
                label: field.label.clone(),
                value: value.to_string(),
            }),
        FieldType::Select => {
            let options = field.options.as_deref().unwrap_or_default();
            options
                .iter()
                .find(|option| option.eq_ignore_ascii_case(trimmed))
                .cloned()
                .ok_or_else(|| ValidationError::NotAnOption {
                    label: field.label.clone(),
                    options: options.to_vec(),
                })
        }
    }
}

pub fn validate_new_field(field: &NewCustomField) -> Result<(), ValidationError> {
    if field.label.trim().is_empty() {
        return Err(ValidationError::BlankLabel);
    }
    if field.field_type == FieldType::Select && field.options.is_empty() {
        return Err(ValidationError::SelectWithoutOptions);
    }
    Ok(())
}

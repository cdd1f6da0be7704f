use serde_json::Value;
use thiserror::Error;

use crate::models::Submission;
use crate::schema::FormSchema;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("required field '{0}' is missing")]
    MissingField(String),

    #[error("field '{0}' does not match its validation pattern")]
    PatternMismatch(String),
}

impl ValidationError {
    pub fn field(&self) -> &str {
        match self {
            Self::MissingField(field) | Self::PatternMismatch(field) => field,
        }
    }
}

/// Checks submitted data against a schema's field rules.
///
/// Required fields are always enforced. Field `validation` patterns are only
/// checked when pattern enforcement is switched on; no type coercion happens
/// either way.
#[derive(Debug, Clone, Copy, Default)]
pub struct Validator {
    enforce_patterns: bool,
}

impl Validator {
    pub fn new(enforce_patterns: bool) -> Self {
        Self { enforce_patterns }
    }

    pub fn validate(&self, submission: &Submission, schema: &FormSchema) -> Result<(), ValidationError> {
        for field in &schema.fields {
            let value = submission.data.get(&field.name);

            if field.required && value.map_or(true, is_blank) {
                return Err(ValidationError::MissingField(field.name.clone()));
            }

            if !self.enforce_patterns {
                continue;
            }
            let (Some(matcher), Some(value)) = (field.matcher(), value) else {
                continue;
            };
            if is_blank(value) {
                continue;
            }
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !matcher.is_match(&text) {
                return Err(ValidationError::PatternMismatch(field.name.clone()));
            }
        }
        Ok(())
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDefinition, FieldType, FormDefinition};
    use serde_json::json;

    fn contact_schema() -> FormSchema {
        let field = |name: &str, required: bool, validation: Option<&str>| FieldDefinition {
            name: name.to_string(),
            field_type: FieldType::Text,
            required,
            validation: validation.map(str::to_string),
            label: None,
            placeholder: None,
        };
        let definition = FormDefinition {
            name: "Contact".into(),
            fields: vec![
                field("name", true, None),
                field("email", true, Some(r"^[^@\s]+@[^@\s]+$")),
                field("message", true, None),
                field("phone", false, Some(r"^\+?[0-9 ]+$")),
            ],
            ..FormDefinition::default()
        };
        FormSchema::resolve("contact", &definition).expect("schema resolves")
    }

    fn submission(data: Value) -> Submission {
        Submission::new(
            "contact",
            data.as_object().cloned().unwrap_or_default(),
            "127.0.0.1",
            "test",
        )
    }

    #[test]
    fn accepts_complete_submission() {
        let schema = contact_schema();
        let sub = submission(json!({"name": "A", "email": "a@b.com", "message": "hi"}));
        assert_eq!(Validator::default().validate(&sub, &schema), Ok(()));
    }

    #[test]
    fn first_missing_required_field_is_reported() {
        let schema = contact_schema();
        let sub = submission(json!({"name": "A"}));
        let err = Validator::default().validate(&sub, &schema).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("email".into()));
        assert_eq!(err.to_string(), "required field 'email' is missing");
    }

    #[test]
    fn blank_and_null_values_count_as_missing() {
        let schema = contact_schema();
        for email in [json!(""), json!("   "), Value::Null] {
            let sub = submission(json!({"name": "A", "email": email, "message": "hi"}));
            assert_eq!(
                Validator::default().validate(&sub, &schema),
                Err(ValidationError::MissingField("email".into()))
            );
        }
    }

    #[test]
    fn patterns_are_ignored_unless_enforced() {
        let schema = contact_schema();
        let sub = submission(json!({"name": "A", "email": "not-an-email", "message": "hi"}));
        assert!(Validator::new(false).validate(&sub, &schema).is_ok());
        assert_eq!(
            Validator::new(true).validate(&sub, &schema),
            Err(ValidationError::PatternMismatch("email".into()))
        );
    }

    #[test]
    fn optional_fields_are_only_pattern_checked_when_present() {
        let schema = contact_schema();
        let validator = Validator::new(true);
        let without_phone = submission(json!({"name": "A", "email": "a@b.com", "message": "hi"}));
        assert!(validator.validate(&without_phone, &schema).is_ok());

        let bad_phone = submission(
            json!({"name": "A", "email": "a@b.com", "message": "hi", "phone": "call me"}),
        );
        assert_eq!(
            validator.validate(&bad_phone, &schema),
            Err(ValidationError::PatternMismatch("phone".into()))
        );
    }
}

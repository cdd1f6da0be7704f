//! Form schemas: the declarative field and action definitions loaded from
//! configuration, and the registry that resolves them once at startup.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("form '{form}' action #{index} ({action_type}) has invalid config: {source}")]
    InvalidActionConfig {
        form: String,
        index: usize,
        action_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("form '{form}' field '{field}' has invalid validation pattern: {source}")]
    InvalidPattern {
        form: String,
        field: String,
        #[source]
        source: regex::Error,
    },

    #[error("form '{form}' declares field '{field}' more than once")]
    DuplicateField { form: String, field: String },
}

// --- Raw definitions, as written in configuration ---

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormDefinition {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldDefinition>,
    pub actions: Vec<ActionDefinition>,
    pub validation: SubmissionPolicy,
    pub email: EmailPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub validation: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDefinition {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionPolicy {
    pub max_submissions_per_hour: u32,
    pub require_captcha: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailPolicy {
    pub enabled: bool,
    pub template: String,
    pub subject: String,
    pub send_confirmation: bool,
}

impl EmailPolicy {
    pub fn sends_confirmation(&self) -> bool {
        self.enabled && self.send_confirmation
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FieldType {
    #[default]
    Text,
    Email,
    Textarea,
    Number,
    Tel,
    Url,
    /// Any other widget type (select, checkbox, ...). Carried through untouched.
    Other(String),
}

impl From<String> for FieldType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => Self::Text,
            "email" => Self::Email,
            "textarea" => Self::Textarea,
            "number" => Self::Number,
            "tel" => Self::Tel,
            "url" => Self::Url,
            _ => Self::Other(value),
        }
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        match value {
            FieldType::Text => "text".to_string(),
            FieldType::Email => "email".to_string(),
            FieldType::Textarea => "textarea".to_string(),
            FieldType::Number => "number".to_string(),
            FieldType::Tel => "tel".to_string(),
            FieldType::Url => "url".to_string(),
            FieldType::Other(other) => other,
        }
    }
}

// --- Resolved schema ---

#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
    #[serde(rename = "validation", skip_serializing_if = "Option::is_none")]
    pub validation_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(skip)]
    pub(crate) matcher: Option<Regex>,
}

impl FieldSpec {
    pub fn matcher(&self) -> Option<&Regex> {
        self.matcher.as_ref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SendEmailConfig {
    /// Overrides the form's email template.
    pub template: Option<String>,
    /// Overrides the form's email subject.
    pub subject: Option<String>,
    /// `platform` values that receive the welcome email straight away.
    pub welcome_platforms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddTesterConfig {
    pub track: String,
}

impl Default for AddTesterConfig {
    fn default() -> Self {
        Self {
            track: "internal".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: Option<String>,
}

/// A configured action, resolved to its typed config when the schema loads.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpec {
    SendEmail(SendEmailConfig),
    AddTester(AddTesterConfig),
    Log(LogConfig),
    Webhook(WebhookConfig),
    Unknown {
        action_type: String,
        config: Map<String, Value>,
    },
}

impl ActionSpec {
    pub const SEND_EMAIL: &'static str = "send_email";
    pub const ADD_TESTER: &'static str = "google_play_add_tester";
    pub const LOG: &'static str = "log";
    pub const WEBHOOK: &'static str = "webhook";

    pub fn action_type(&self) -> &str {
        match self {
            Self::SendEmail(_) => Self::SEND_EMAIL,
            Self::AddTester(_) => Self::ADD_TESTER,
            Self::Log(_) => Self::LOG,
            Self::Webhook(_) => Self::WEBHOOK,
            Self::Unknown { action_type, .. } => action_type,
        }
    }

    fn resolve(form: &str, index: usize, definition: &ActionDefinition) -> Result<Self, SchemaError> {
        let spec = match definition.action_type.as_str() {
            Self::SEND_EMAIL => Self::SendEmail(typed_config(form, index, definition)?),
            Self::ADD_TESTER => Self::AddTester(typed_config(form, index, definition)?),
            Self::LOG => Self::Log(typed_config(form, index, definition)?),
            Self::WEBHOOK => Self::Webhook(typed_config(form, index, definition)?),
            other => Self::Unknown {
                action_type: other.to_string(),
                config: definition.config.clone(),
            },
        };
        Ok(spec)
    }

    fn config_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::SendEmail(config) => serde_json::to_value(config),
            Self::AddTester(config) => serde_json::to_value(config),
            Self::Log(config) => serde_json::to_value(config),
            Self::Webhook(config) => serde_json::to_value(config),
            Self::Unknown { config, .. } => Ok(Value::Object(config.clone())),
        }
    }
}

impl fmt::Display for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action_type())
    }
}

impl Serialize for ActionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::{Error, SerializeStruct};

        let config = self.config_value().map_err(S::Error::custom)?;
        let mut state = serializer.serialize_struct("ActionSpec", 2)?;
        state.serialize_field("type", self.action_type())?;
        state.serialize_field("config", &config)?;
        state.end()
    }
}

fn typed_config<T: DeserializeOwned>(
    form: &str,
    index: usize,
    definition: &ActionDefinition,
) -> Result<T, SchemaError> {
    serde_json::from_value(Value::Object(definition.config.clone())).map_err(|source| {
        SchemaError::InvalidActionConfig {
            form: form.to_string(),
            index,
            action_type: definition.action_type.clone(),
            source,
        }
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct FormSchema {
    pub id: String,
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldSpec>,
    pub actions: Vec<ActionSpec>,
    pub validation: SubmissionPolicy,
    pub email: EmailPolicy,
}

impl FormSchema {
    pub fn resolve(id: &str, definition: &FormDefinition) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(definition.fields.len());
        for field in &definition.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    form: id.to_string(),
                    field: field.name.clone(),
                });
            }

            let pattern = field
                .validation
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty());
            let matcher = pattern
                .map(Regex::new)
                .transpose()
                .map_err(|source| SchemaError::InvalidPattern {
                    form: id.to_string(),
                    field: field.name.clone(),
                    source,
                })?;

            fields.push(FieldSpec {
                name: field.name.clone(),
                field_type: field.field_type.clone(),
                required: field.required,
                validation_pattern: pattern.map(str::to_string),
                label: field.label.clone(),
                placeholder: field.placeholder.clone(),
                matcher,
            });
        }

        let actions = definition
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| ActionSpec::resolve(id, index, action))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: id.to_string(),
            name: definition.name.clone(),
            description: definition.description.clone(),
            fields,
            actions,
            validation: definition.validation.clone(),
            email: definition.email.clone(),
        })
    }

    /// Display name, falling back to the form id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
}

/// Resolved schemas keyed by form id. Read-only after construction.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    forms: BTreeMap<String, Arc<FormSchema>>,
}

impl SchemaRegistry {
    pub fn from_definitions(
        definitions: &BTreeMap<String, FormDefinition>,
    ) -> Result<Self, SchemaError> {
        let forms = definitions
            .iter()
            .map(|(id, definition)| {
                FormSchema::resolve(id, definition).map(|schema| (id.clone(), Arc::new(schema)))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(Self { forms })
    }

    pub fn from_schemas(schemas: impl IntoIterator<Item = FormSchema>) -> Self {
        let forms = schemas
            .into_iter()
            .map(|schema| (schema.id.clone(), Arc::new(schema)))
            .collect();
        Self { forms }
    }

    pub fn get(&self, form_id: &str) -> Option<Arc<FormSchema>> {
        self.forms.get(form_id).cloned()
    }

    pub fn summaries(&self) -> Vec<FormSummary> {
        self.forms
            .values()
            .map(|schema| FormSummary {
                id: schema.id.clone(),
                name: schema.name.clone(),
                description: schema.description.clone(),
                enabled: true,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action(action_type: &str, config: Value) -> ActionDefinition {
        ActionDefinition {
            action_type: action_type.to_string(),
            config: config.as_object().cloned().unwrap_or_default(),
        }
    }

    fn field(name: &str, required: bool, validation: Option<&str>) -> FieldDefinition {
        FieldDefinition {
            name: name.to_string(),
            field_type: FieldType::Text,
            required,
            validation: validation.map(str::to_string),
            label: None,
            placeholder: None,
        }
    }

    #[test]
    fn actions_resolve_to_typed_variants() {
        let definition = FormDefinition {
            name: "Beta".into(),
            actions: vec![
                action("send_email", json!({"welcome_platforms": ["ios"]})),
                action("google_play_add_tester", json!({})),
                action("google_play_add_tester", json!({"track": "beta"})),
                action("log", json!({"message": "hi"})),
                action("webhook", json!({})),
                action("carrier_pigeon", json!({"coop": 3})),
            ],
            ..FormDefinition::default()
        };

        let schema = FormSchema::resolve("beta", &definition).expect("schema resolves");
        let types: Vec<&str> = schema.actions.iter().map(ActionSpec::action_type).collect();
        assert_eq!(
            types,
            [
                "send_email",
                "google_play_add_tester",
                "google_play_add_tester",
                "log",
                "webhook",
                "carrier_pigeon"
            ]
        );
        assert_eq!(
            schema.actions[1],
            ActionSpec::AddTester(AddTesterConfig {
                track: "internal".into()
            })
        );
        assert_eq!(
            schema.actions[2],
            ActionSpec::AddTester(AddTesterConfig {
                track: "beta".into()
            })
        );
        match &schema.actions[0] {
            ActionSpec::SendEmail(config) => assert_eq!(config.welcome_platforms, ["ios"]),
            other => panic!("unexpected action {other:?}"),
        }
        match &schema.actions[3] {
            ActionSpec::Log(config) => assert_eq!(config.message.as_deref(), Some("hi")),
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(schema.actions[4], ActionSpec::Webhook(_)));
    }

    #[test]
    fn malformed_action_config_fails_resolution() {
        let definition = FormDefinition {
            actions: vec![action("google_play_add_tester", json!({"track": 7}))],
            ..FormDefinition::default()
        };
        let err = FormSchema::resolve("beta", &definition).expect_err("track must be a string");
        assert!(matches!(err, SchemaError::InvalidActionConfig { index: 0, .. }));
    }

    #[test]
    fn invalid_pattern_and_duplicate_fields_are_rejected() {
        let bad_pattern = FormDefinition {
            fields: vec![field("zip", true, Some("[0-9"))],
            ..FormDefinition::default()
        };
        assert!(matches!(
            FormSchema::resolve("f", &bad_pattern),
            Err(SchemaError::InvalidPattern { .. })
        ));

        let duplicate = FormDefinition {
            fields: vec![field("a", true, None), field("a", false, None)],
            ..FormDefinition::default()
        };
        assert!(matches!(
            FormSchema::resolve("f", &duplicate),
            Err(SchemaError::DuplicateField { .. })
        ));
    }

    #[test]
    fn registry_lists_forms_in_id_order() {
        let mut definitions = BTreeMap::new();
        definitions.insert(
            "zeta".to_string(),
            FormDefinition {
                name: "Zeta".into(),
                ..FormDefinition::default()
            },
        );
        definitions.insert(
            "alpha".to_string(),
            FormDefinition {
                name: "Alpha".into(),
                ..FormDefinition::default()
            },
        );

        let registry = SchemaRegistry::from_definitions(&definitions).expect("registry builds");
        let ids: Vec<String> = registry.summaries().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, ["alpha", "zeta"]);
        assert!(registry.get("alpha").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn resolved_schema_serializes_actions_with_type_and_config() {
        let definition = FormDefinition {
            actions: vec![action("log", json!({"message": "hi"}))],
            ..FormDefinition::default()
        };
        let schema = FormSchema::resolve("f", &definition).expect("schema resolves");
        let value = serde_json::to_value(&schema).expect("serializes");
        assert_eq!(value["actions"][0]["type"], "log");
        assert_eq!(value["actions"][0]["config"]["message"], "hi");
    }

    #[test]
    fn unknown_field_types_are_preserved() {
        let parsed: FieldType = serde_json::from_value(json!("select")).expect("parses");
        assert_eq!(parsed, FieldType::Other("select".into()));
        assert_eq!(serde_json::to_value(&parsed).expect("serializes"), json!("select"));
    }
}

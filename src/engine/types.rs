use crate::forms::fields::FieldValue;
use crate::forms::types::{FinalizeAction, FormKind};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Option id that cancels the active form wherever it is offered.
pub const CANCEL_ID: &str = "cancel";
pub const CONFIRM_ID: &str = "confirm";
pub const EDIT_ID: &str = "edit";
pub const SKIP_ID: &str = "skip";
pub const DONE_ID: &str = "done";
/// Prefix of edit-menu selections: `edit:<field name>`.
pub const EDIT_FIELD_PREFIX: &str = "edit:";

/// One user turn as seen by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Text(String),
    /// A button press carrying an option id.
    Selection(String),
    Location { latitude: f64, longitude: f64 },
    /// Transport-level cancel signal.
    Cancel,
}

/// A selectable option rendered as a button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Choice {
    pub id: String,
    /// Message key of the label.
    pub label: String,
}

impl Choice {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// One outbound message, described by key and parameters; rendering is the
/// transport's concern.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Prompt {
    pub key: String,
    pub params: Vec<(String, String)>,
    pub options: Vec<Choice>,
    /// Ask the client to offer its share-location control.
    pub request_location: bool,
}

impl Prompt {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_options(mut self, options: Vec<Choice>) -> Self {
        self.options = options;
        self
    }

    pub fn requesting_location(mut self) -> Self {
        self.request_location = true;
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Everything a finalize step needs, detached from the session.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeRequest {
    pub form_id: Uuid,
    pub kind: FormKind,
    pub action: FinalizeAction,
    pub reference_prefix: String,
    pub directory: Option<String>,
    /// Answers along the taken branch, in form order.
    pub fields: Vec<(String, FieldValue)>,
    /// Every field the definition declares.
    pub field_names: Vec<String>,
}

impl FinalizeRequest {
    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// One entry per declared field; fields off the taken branch are empty.
    pub fn record_fields(&self) -> BTreeMap<String, String> {
        self.field_names
            .iter()
            .map(|name| {
                let value = self.value(name).map(FieldValue::to_record_string).unwrap_or_default();
                (name.clone(), value)
            })
            .collect()
    }

    /// First collected value, used as the query of single-field forms.
    pub fn first_text(&self) -> Option<String> {
        self.fields.first().map(|(_, v)| v.to_string())
    }
}

/// Side effect requested by a turn.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    None,
    /// The user cancelled; the form is gone.
    Cancelled,
    /// A question arrived instead of an answer; the form is gone and the
    /// help key should be shown.
    Aborted { help: String },
    /// Run the finalize action exactly once.
    Finalize(FinalizeRequest),
}

/// Outcome of one `advance`.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub prompts: Vec<Prompt>,
    pub effect: Effect,
}

impl Turn {
    pub fn prompts(prompts: Vec<Prompt>) -> Self {
        Self {
            prompts,
            effect: Effect::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("a '{0}' form is already active")]
    FormAlreadyActive(FormKind),
    #[error("no active form")]
    NoActiveForm,
    #[error("no definition loaded for form '{0}'")]
    UnknownForm(FormKind),
    #[error("form '{form}' has no field '{field}'")]
    UnknownField { form: FormKind, field: String },
}

use super::fields::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Transition value that matches any answer.
pub const ANY_VALUE: &str = "_any";

/// Every workflow the bot can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormKind {
    ExGratiaApplication,
    Complaint,
    Feedback,
    OperatorSearch,
    HomestaySearch,
    StatusCheck,
}

impl FormKind {
    pub const ALL: [FormKind; 6] = [
        FormKind::ExGratiaApplication,
        FormKind::Complaint,
        FormKind::Feedback,
        FormKind::OperatorSearch,
        FormKind::HomestaySearch,
        FormKind::StatusCheck,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormKind::ExGratiaApplication => "ex_gratia_application",
            FormKind::Complaint => "complaint",
            FormKind::Feedback => "feedback",
            FormKind::OperatorSearch => "operator_search",
            FormKind::HomestaySearch => "homestay_search",
            FormKind::StatusCheck => "status_check",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw.trim())
    }
}

impl fmt::Display for FormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens once a form's fields are all collected and confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeAction {
    /// Remote submission, with a local backup record.
    Submit,
    /// Local record store only.
    Persist,
    /// Read-only directory search.
    Lookup,
    /// Application status read.
    Status,
}

// ── TOML-parsed types ───────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct FormDefinitionToml {
    pub form: FormMeta,
    #[serde(default)]
    pub fields: Vec<FieldToml>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormMeta {
    pub kind: FormKind,
    #[serde(default)]
    pub description: Option<String>,
    /// Prompt key shown when the user asks a question mid-form.
    #[serde(default = "default_help")]
    pub help: String,
    #[serde(default)]
    pub confirm: bool,
    pub finalize: FinalizeAction,
    #[serde(default)]
    pub reference_prefix: Option<String>,
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_help() -> String {
    "info.help".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldToml {
    pub name: String,
    pub prompt: String,
    pub validator: ValidatorSpec,
    #[serde(default)]
    pub transitions: Vec<TransitionDef>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TransitionDef {
    pub on: String,
    pub target: String,
}

/// Validation rule attached to a field.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatorSpec {
    Text {
        #[serde(default = "default_min_len")]
        min_len: usize,
    },
    Phone,
    Choice {
        options: Vec<ChoiceOption>,
    },
    Numeric {
        max_digits: u32,
    },
    DateTime,
    FreeForm,
    /// Side-effect field: a shared location, an explicit skip, or a typed place name.
    Location,
}

fn default_min_len() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChoiceOption {
    /// Canonical value stored when the option is chosen.
    pub id: String,
    /// Prompt key for the button label.
    pub label: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

// ── Validated runtime types ─────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub prompt: String,
    pub validator: ValidatorSpec,
    pub transitions: Vec<TransitionDef>,
}

impl FieldSpec {
    /// Whether answering this field needs an external capability (device location).
    pub fn is_side_effect(&self) -> bool {
        matches!(self.validator, ValidatorSpec::Location)
    }

    pub fn options(&self) -> &[ChoiceOption] {
        match &self.validator {
            ValidatorSpec::Choice { options } => options,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormDefinition {
    pub kind: FormKind,
    pub description: Option<String>,
    pub help: String,
    pub confirm: bool,
    pub finalize: FinalizeAction,
    pub reference_prefix: String,
    pub directory: Option<String>,
    pub fields: Vec<FieldSpec>,
}

/// Fields answered along the current branch, and the first one still open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub answered: Vec<usize>,
    pub pending: Option<usize>,
}

impl FormDefinition {
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Next field after `index` given its answer: a matching transition,
    /// then `_any`, then the following field in order.
    pub fn next_after(&self, index: usize, value: &FieldValue) -> Option<usize> {
        let field = self.fields.get(index)?;
        let key = value.match_key();
        let target = field
            .transitions
            .iter()
            .find(|t| key.is_some_and(|k| t.on.eq_ignore_ascii_case(k)))
            .or_else(|| field.transitions.iter().find(|t| t.on == ANY_VALUE));
        match target {
            Some(t) => self.index_of(&t.target),
            None if index + 1 < self.fields.len() => Some(index + 1),
            None => None,
        }
    }

    /// Walk the branch graph from the first field through collected answers.
    pub fn route(&self, collected: &BTreeMap<String, FieldValue>) -> Route {
        let mut answered = Vec::new();
        let mut next = if self.fields.is_empty() { None } else { Some(0) };
        while let Some(i) = next {
            // Definitions are acyclic; the bound only guards hand-built ones.
            if answered.len() > self.fields.len() {
                break;
            }
            match collected.get(&self.fields[i].name) {
                None => {
                    return Route {
                        answered,
                        pending: Some(i),
                    }
                }
                Some(value) => {
                    answered.push(i);
                    next = self.next_after(i, value);
                }
            }
        }
        Route {
            answered,
            pending: None,
        }
    }
}

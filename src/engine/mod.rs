//! The per-user form state machine.
//!
//! `start` opens a form at its first field; `advance` consumes one input and
//! returns the prompts to send plus at most one side effect. Engine code never
//! awaits: gateway calls happen in the controller, which reports back through
//! `finish` or `finalize_failed`.

pub mod prompts;
pub mod types;

use crate::forms::fields::{validate, RawInput, ValidationPolicy, ValidationResult};
use crate::forms::phrases::PhraseBook;
use crate::forms::types::{FieldSpec, FormDefinition, FormKind};
use crate::forms::FormRegistry;
use crate::session::{FormState, LanguagePolicy, Session, Stage};
use chrono::{DateTime, Utc};
use prompts::{edit_menu, field_prompt, summary_prompt};
use std::sync::Arc;
pub use types::*;

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineSettings {
    pub validation: ValidationPolicy,
    pub language_policy: LanguagePolicy,
}

/// How a reply at the confirmation or edit-menu stage was understood.
#[derive(Debug, Clone, PartialEq)]
enum ConfirmReply {
    Confirm,
    Edit,
    EditField(String),
    Done,
    Other(String),
}

pub struct WorkflowEngine {
    forms: Arc<FormRegistry>,
    phrases: Arc<PhraseBook>,
    settings: EngineSettings,
}

impl WorkflowEngine {
    pub fn new(forms: Arc<FormRegistry>, phrases: Arc<PhraseBook>, settings: EngineSettings) -> Self {
        Self {
            forms,
            phrases,
            settings,
        }
    }

    pub fn forms(&self) -> &FormRegistry {
        &self.forms
    }

    pub fn phrases(&self) -> &PhraseBook {
        &self.phrases
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn definition(&self, kind: FormKind) -> Result<Arc<FormDefinition>, EngineError> {
        self.forms.get(kind).ok_or(EngineError::UnknownForm(kind))
    }

    /// Open a form at its first field.
    ///
    /// Refuses to replace an active form; the caller must finish or cancel it first.
    pub fn start(&self, session: &mut Session, kind: FormKind, now: DateTime<Utc>) -> Result<Vec<Prompt>, EngineError> {
        if let Some(active) = &session.active_form {
            return Err(EngineError::FormAlreadyActive(active.kind));
        }
        let def = self.definition(kind)?;
        let mut form = FormState::new(kind, Stage::Collecting { field: 0 }, now);
        let first = enter_field(&mut form, &def, 0);
        session.active_form = Some(form);
        session.last_activity = now;
        tracing::info!(user_id = %session.user_id, form = %kind, "form started");
        Ok(vec![Prompt::new(format!("form.{kind}.intro")), first])
    }

    /// Consume one input for the active form.
    pub fn advance(&self, session: &mut Session, input: &Input, now: DateTime<Utc>) -> Result<Turn, EngineError> {
        let (kind, stage) = match &session.active_form {
            Some(form) => (form.kind, form.stage),
            None => return Err(EngineError::NoActiveForm),
        };
        let def = self.definition(kind)?;
        session.last_activity = now;

        if self.is_cancellation(input) {
            return Ok(self.cancel(session));
        }

        if stage.field().is_some() {
            if let Input::Text(text) = input {
                if self.phrases.is_question(text, session.language()) {
                    return Ok(self.abort_for_question(session, &def));
                }
            }
        }

        let user_id = session.user_id.clone();
        let form = session.active_form.as_mut().ok_or(EngineError::NoActiveForm)?;
        form.updated_at = now;

        let turn = match stage {
            Stage::Collecting { field } | Stage::AwaitingSideEffect { field } | Stage::Editing { field } => {
                self.answer_field(form, &def, field, input)?
            }
            Stage::Confirming => self.at_confirmation(form, &def, input),
            Stage::ChoosingEdit => self.at_edit_menu(form, &def, input),
            Stage::Submitting => Turn::prompts(vec![Prompt::new("submission.in_progress")]),
        };

        tracing::debug!(
            user_id = %user_id,
            form = %kind,
            from = stage.name(),
            to = session.active_form.as_ref().map_or("idle", |f| f.stage.name()),
            "form turn"
        );
        Ok(turn)
    }

    /// Finalize succeeded; the form instance is over.
    pub fn finish(&self, session: &mut Session) -> Option<FormState> {
        let form = session.end_form(self.settings.language_policy);
        if let Some(f) = &form {
            tracing::info!(user_id = %session.user_id, form = %f.kind, "form finished");
        }
        form
    }

    /// Finalize failed. Forms with a confirmation step return to it with the
    /// collected data intact and a retry option; others end.
    pub fn finalize_failed(&self, session: &mut Session, reason: &str) -> Vec<Prompt> {
        let def = match session.active_form.as_ref().map(|f| self.definition(f.kind)) {
            Some(Ok(def)) => def,
            _ => {
                session.end_form(self.settings.language_policy);
                return vec![Prompt::new("error.generic")];
            }
        };
        if !def.confirm {
            session.end_form(self.settings.language_policy);
            return vec![Prompt::new("error.generic")];
        }
        let Some(form) = session.active_form.as_mut() else {
            return vec![Prompt::new("error.generic")];
        };
        form.stage = Stage::Confirming;
        form.last_failure = Some(reason.to_string());
        vec![Prompt::new("submission.failed"), summary_prompt(form, &def)]
    }

    fn is_cancellation(&self, input: &Input) -> bool {
        match input {
            Input::Cancel => true,
            Input::Selection(id) => id == CANCEL_ID,
            Input::Text(text) => self.phrases.is_cancel(text),
            Input::Location { .. } => false,
        }
    }

    fn cancel(&self, session: &mut Session) -> Turn {
        if let Some(form) = session.end_form(self.settings.language_policy) {
            tracing::info!(user_id = %session.user_id, form = %form.kind, stage = form.stage.name(), "form cancelled");
        }
        Turn {
            prompts: vec![Prompt::new("form.cancelled")],
            effect: Effect::Cancelled,
        }
    }

    fn abort_for_question(&self, session: &mut Session, def: &FormDefinition) -> Turn {
        session.end_form(self.settings.language_policy);
        tracing::info!(user_id = %session.user_id, form = %def.kind, "form aborted by a question");
        Turn {
            prompts: vec![Prompt::new("form.aborted_question"), Prompt::new(def.help.as_str())],
            effect: Effect::Aborted {
                help: def.help.clone(),
            },
        }
    }

    fn raw_input<'a>(&self, field: &FieldSpec, input: &'a Input) -> RawInput<'a> {
        match input {
            Input::Selection(id) if field.is_side_effect() && id == SKIP_ID => RawInput::Skip,
            Input::Text(text) if field.is_side_effect() && self.phrases.is_skip(text) => RawInput::Skip,
            Input::Text(text) => RawInput::Text(text),
            Input::Selection(id) => RawInput::Selection(id),
            Input::Location {
                latitude,
                longitude,
            } => RawInput::Location {
                latitude: *latitude,
                longitude: *longitude,
            },
            Input::Cancel => RawInput::Text(""),
        }
    }

    fn answer_field(
        &self,
        form: &mut FormState,
        def: &FormDefinition,
        index: usize,
        input: &Input,
    ) -> Result<Turn, EngineError> {
        let field = def.fields.get(index).ok_or_else(|| EngineError::UnknownField {
            form: def.kind,
            field: index.to_string(),
        })?;

        match validate(&field.validator, self.raw_input(field, input), &self.settings.validation) {
            ValidationResult::Rejected(reason) => {
                tracing::debug!(form = %def.kind, field = %field.name, reason = %reason, "answer rejected");
                Ok(Turn::prompts(vec![
                    Prompt::new(reason.reason_key()).with_params(reason.params()),
                    field_prompt(field),
                ]))
            }
            ValidationResult::Accepted(value) => {
                form.collected.insert(field.name.clone(), value);
                form.pending_side_effect = false;
                Ok(self.move_forward(form, def))
            }
        }
    }

    /// Go to the first open field on the current branch, or to completion.
    fn move_forward(&self, form: &mut FormState, def: &FormDefinition) -> Turn {
        match def.route(&form.collected).pending {
            Some(next) => Turn::prompts(vec![enter_field(form, def, next)]),
            None if def.confirm => {
                form.stage = Stage::Confirming;
                Turn::prompts(vec![summary_prompt(form, def)])
            }
            None => self.dispatch_finalize(form, def),
        }
    }

    /// The one-shot transition into `Submitting`.
    fn dispatch_finalize(&self, form: &mut FormState, def: &FormDefinition) -> Turn {
        form.stage = Stage::Submitting;
        let route = def.route(&form.collected);
        let fields = route
            .answered
            .iter()
            .filter_map(|&i| {
                let name = &def.fields[i].name;
                form.collected.get(name).map(|v| (name.clone(), v.clone()))
            })
            .collect();
        Turn {
            prompts: Vec::new(),
            effect: Effect::Finalize(FinalizeRequest {
                form_id: form.form_id,
                kind: def.kind,
                action: def.finalize,
                reference_prefix: def.reference_prefix.clone(),
                directory: def.directory.clone(),
                fields,
                field_names: def.field_names(),
            }),
        }
    }

    fn understand(&self, input: &Input) -> ConfirmReply {
        match input {
            Input::Selection(id) => match id.as_str() {
                CONFIRM_ID => ConfirmReply::Confirm,
                EDIT_ID => ConfirmReply::Edit,
                DONE_ID => ConfirmReply::Done,
                other => match other.strip_prefix(EDIT_FIELD_PREFIX) {
                    Some(name) => ConfirmReply::EditField(name.to_string()),
                    None => ConfirmReply::Other(other.to_string()),
                },
            },
            Input::Text(text) if self.phrases.is_confirm(text) => ConfirmReply::Confirm,
            Input::Text(text) if self.phrases.is_edit(text) => ConfirmReply::Edit,
            Input::Text(text) if self.phrases.is_done(text) => ConfirmReply::Done,
            Input::Text(text) => ConfirmReply::Other(text.trim().to_string()),
            Input::Location { .. } | Input::Cancel => ConfirmReply::Other(String::new()),
        }
    }

    fn at_confirmation(&self, form: &mut FormState, def: &FormDefinition, input: &Input) -> Turn {
        match self.understand(input) {
            ConfirmReply::Confirm => self.dispatch_finalize(form, def),
            ConfirmReply::Edit => {
                form.stage = Stage::ChoosingEdit;
                Turn::prompts(vec![edit_menu(form, def)])
            }
            ConfirmReply::EditField(name) => self.begin_edit(form, def, &name),
            ConfirmReply::Done | ConfirmReply::Other(_) => {
                Turn::prompts(vec![Prompt::new("invalid.confirmation"), summary_prompt(form, def)])
            }
        }
    }

    fn at_edit_menu(&self, form: &mut FormState, def: &FormDefinition, input: &Input) -> Turn {
        match self.understand(input) {
            ConfirmReply::EditField(name) => self.begin_edit(form, def, &name),
            ConfirmReply::Done | ConfirmReply::Confirm => {
                form.stage = Stage::Confirming;
                Turn::prompts(vec![summary_prompt(form, def)])
            }
            ConfirmReply::Edit => Turn::prompts(vec![edit_menu(form, def)]),
            ConfirmReply::Other(text) => {
                let answered = def.route(&form.collected).answered;
                let by_number = text
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| n.checked_sub(1))
                    .and_then(|n| answered.get(n))
                    .map(|&i| def.fields[i].name.clone());
                let by_name = answered
                    .iter()
                    .map(|&i| &def.fields[i].name)
                    .find(|name| name.eq_ignore_ascii_case(&text.replace(' ', "_")))
                    .cloned();
                match by_number.or(by_name) {
                    Some(name) => self.begin_edit(form, def, &name),
                    None => Turn::prompts(vec![Prompt::new("invalid.choice"), edit_menu(form, def)]),
                }
            }
        }
    }

    /// Re-open one answered field; other answers are kept.
    fn begin_edit(&self, form: &mut FormState, def: &FormDefinition, name: &str) -> Turn {
        let on_route = def
            .index_of(name)
            .filter(|i| def.route(&form.collected).answered.contains(i));
        let Some(index) = on_route else {
            form.stage = Stage::ChoosingEdit;
            return Turn::prompts(vec![Prompt::new("invalid.choice"), edit_menu(form, def)]);
        };
        let field = &def.fields[index];
        form.stage = Stage::Editing { field: index };
        form.pending_side_effect = field.is_side_effect();
        Turn::prompts(vec![field_prompt(field)])
    }
}

/// Position the form on `index` and return that field's prompt.
fn enter_field(form: &mut FormState, def: &FormDefinition, index: usize) -> Prompt {
    let field = &def.fields[index];
    form.pending_side_effect = field.is_side_effect();
    form.stage = if field.is_side_effect() {
        Stage::AwaitingSideEffect { field: index }
    } else {
        Stage::Collecting { field: index }
    };
    field_prompt(field)
}

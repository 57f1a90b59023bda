use crate::forms::fields::FieldValue;
use crate::forms::types::FormKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Languages a citizen can converse in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Hindi,
    Nepali,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::English, Language::Hindi, Language::Nepali];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Hindi => "hindi",
            Language::Nepali => "nepali",
        }
    }

    /// Parse a language name or ISO-639-1 code, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "english" | "en" => Some(Language::English),
            "hindi" | "hi" => Some(Language::Hindi),
            "nepali" | "ne" => Some(Language::Nepali),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to `Session::language` when a form ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguagePolicy {
    #[default]
    Retain,
    Reset,
}

/// Position of an active form in its state machine.
///
/// `Idle` is the absence of a `FormState` on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Collecting { field: usize },
    AwaitingSideEffect { field: usize },
    Confirming,
    ChoosingEdit,
    Editing { field: usize },
    /// Finalize has been dispatched; further confirms are ignored.
    Submitting,
}

impl Stage {
    pub fn field(&self) -> Option<usize> {
        match self {
            Stage::Collecting { field }
            | Stage::AwaitingSideEffect { field }
            | Stage::Editing { field } => Some(*field),
            Stage::Confirming | Stage::ChoosingEdit | Stage::Submitting => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Collecting { .. } => "collecting",
            Stage::AwaitingSideEffect { .. } => "awaiting_side_effect",
            Stage::Confirming => "confirming",
            Stage::ChoosingEdit => "choosing_edit",
            Stage::Editing { .. } => "editing",
            Stage::Submitting => "submitting",
        }
    }
}

/// In-progress form for one session.
#[derive(Debug, Clone)]
pub struct FormState {
    /// Identity of this form instance; finalize is keyed on it.
    pub form_id: Uuid,
    pub kind: FormKind,
    pub stage: Stage,
    pub collected: BTreeMap<String, FieldValue>,
    pub pending_side_effect: bool,
    /// Reason of the last failed finalize, if any. Drives the retry affordance.
    pub last_failure: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FormState {
    pub fn new(kind: FormKind, stage: Stage, now: DateTime<Utc>) -> Self {
        Self {
            form_id: Uuid::new_v4(),
            kind,
            stage,
            collected: BTreeMap::new(),
            pending_side_effect: false,
            last_failure: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn current_field(&self) -> Option<usize> {
        self.stage.field()
    }
}

/// Per-user conversational context.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    /// Transport address replies go to (a chat id); learned from inbound events.
    pub reply_to: Option<String>,
    pub language: Option<Language>,
    pub active_form: Option<FormState>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            reply_to: None,
            language: None,
            active_form: None,
            last_activity: now,
        }
    }

    /// Effective language: the sticky choice, or the default.
    pub fn language(&self) -> Language {
        self.language.unwrap_or_default()
    }

    pub fn is_idle(&self) -> bool {
        self.active_form.is_none()
    }

    /// Drop the active form, applying the language policy. Returns the removed form.
    pub fn end_form(&mut self, policy: LanguagePolicy) -> Option<FormState> {
        let form = self.active_form.take();
        if form.is_some() && policy == LanguagePolicy::Reset {
            self.language = None;
        }
        form
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_parse_accepts_names_and_codes() {
        assert_eq!(Language::parse("Hindi"), Some(Language::Hindi));
        assert_eq!(Language::parse(" ne "), Some(Language::Nepali));
        assert_eq!(Language::parse("en"), Some(Language::English));
        assert_eq!(Language::parse("french"), None);
    }

    #[test]
    fn new_session_is_idle_with_default_language() {
        let s = Session::new("42", Utc::now());
        assert!(s.is_idle());
        assert!(s.language.is_none());
        assert_eq!(s.language(), Language::English);
    }

    #[test]
    fn end_form_retains_language_by_default() {
        let now = Utc::now();
        let mut s = Session::new("42", now);
        s.language = Some(Language::Nepali);
        s.active_form = Some(FormState::new(
            FormKind::Complaint,
            Stage::Collecting { field: 0 },
            now,
        ));
        assert!(s.end_form(LanguagePolicy::Retain).is_some());
        assert_eq!(s.language, Some(Language::Nepali));
    }

    #[test]
    fn end_form_resets_language_when_configured() {
        let now = Utc::now();
        let mut s = Session::new("42", now);
        s.language = Some(Language::Hindi);
        s.active_form = Some(FormState::new(FormKind::Feedback, Stage::Confirming, now));
        s.end_form(LanguagePolicy::Reset);
        assert!(s.language.is_none());
    }

    #[test]
    fn end_form_without_form_keeps_language() {
        let mut s = Session::new("42", Utc::now());
        s.language = Some(Language::Hindi);
        assert!(s.end_form(LanguagePolicy::Reset).is_none());
        assert_eq!(s.language, Some(Language::Hindi));
    }

    #[test]
    fn stage_field_index() {
        assert_eq!(Stage::Editing { field: 3 }.field(), Some(3));
        assert_eq!(Stage::Confirming.field(), None);
    }
}

//! Turn handling: one inbound event in, one ordered batch of prompts out.

pub mod dispatch;

use crate::engine::{
    Choice, Effect, FinalizeRequest, Input, Prompt, WorkflowEngine, CANCEL_ID, CONFIRM_ID, DONE_ID,
    EDIT_FIELD_PREFIX, EDIT_ID, SKIP_ID,
};
use crate::forms::types::{FinalizeAction, FormKind};
use crate::gateways::{ClassificationGateway, Directory, Intent, SubmissionGateway};
use crate::records::{NewRecord, RecordStore, SubmissionRecord, STATUS_PENDING, STATUS_SUBMITTED};
use crate::session::{Language, Session, SessionStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use dispatch::Dispatcher;

/// Selection id that shows the main menu.
pub const MENU_ID: &str = "menu";
/// Prefix of language-menu selections: `lang:<language>`.
pub const LANGUAGE_PREFIX: &str = "lang:";
/// Prefix of main-menu selections: `intent:<intent>`.
pub const INTENT_PREFIX: &str = "intent:";

const MAIN_MENU: [Intent; 8] = [
    Intent::ExGratia,
    Intent::CheckStatus,
    Intent::ReliefNorms,
    Intent::Complaint,
    Intent::OperatorSearch,
    Intent::Tourism,
    Intent::Emergency,
    Intent::Feedback,
];

/// Lookups list at most this many rows.
const MAX_LOOKUP_RESULTS: usize = 5;
/// Sessions without a form are forgotten after this long.
const SESSION_RETENTION_HOURS: i64 = 24;

/// One user turn as delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub user_id: String,
    /// Where replies go (a chat id for Telegram).
    pub reply_to: String,
    pub input: Input,
}

impl InboundEvent {
    pub fn new(user_id: impl Into<String>, reply_to: impl Into<String>, input: Input) -> Self {
        Self {
            user_id: user_id.into(),
            reply_to: reply_to.into(),
            input,
        }
    }
}

/// Prompts for a transport to render, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub user_id: String,
    pub reply_to: String,
    pub language: Language,
    pub prompts: Vec<Prompt>,
}

impl Reply {
    pub fn keys(&self) -> Vec<&str> {
        self.prompts.iter().map(|p| p.key.as_str()).collect()
    }
}

pub fn main_menu() -> Prompt {
    Prompt::new("menu.main").with_options(
        MAIN_MENU
            .iter()
            .map(|i| Choice::new(format!("{INTENT_PREFIX}{i}"), format!("menu.{i}")))
            .collect(),
    )
}

pub fn language_menu() -> Prompt {
    Prompt::new("menu.language").with_options(
        Language::ALL
            .iter()
            .map(|l| Choice::new(format!("{LANGUAGE_PREFIX}{l}"), format!("language.{l}")))
            .collect(),
    )
}

pub struct ConversationController {
    sessions: Arc<SessionStore>,
    engine: WorkflowEngine,
    classifier: ClassificationGateway,
    submission: Option<SubmissionGateway>,
    records: Arc<RecordStore>,
    directory: Arc<dyn Directory>,
    idle_timeout: chrono::Duration,
}

impl ConversationController {
    pub fn new(
        sessions: Arc<SessionStore>,
        engine: WorkflowEngine,
        classifier: ClassificationGateway,
        records: Arc<RecordStore>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self {
            sessions,
            engine,
            classifier,
            submission: None,
            records,
            directory,
            idle_timeout: chrono::Duration::minutes(30),
        }
    }

    /// Forward `submit` forms to a remote service instead of keeping them locally.
    pub fn with_submission(mut self, gateway: SubmissionGateway) -> Self {
        self.submission = Some(gateway);
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: std::time::Duration) -> Self {
        self.idle_timeout = chrono::Duration::from_std(idle_timeout).unwrap_or(self.idle_timeout);
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    pub async fn handle(&self, event: &InboundEvent) -> Reply {
        self.handle_at(event, Utc::now()).await
    }

    /// Run one turn under the user's lock. Never fails; problems become prompts.
    pub async fn handle_at(&self, event: &InboundEvent, now: DateTime<Utc>) -> Reply {
        let mut session = self.sessions.lock(&event.user_id).await;
        session.reply_to = Some(event.reply_to.clone());
        session.last_activity = now;
        let language_before = session.language();

        let prompts = if session.is_idle() {
            self.idle_turn(&mut session, &event.input, now).await
        } else {
            self.form_turn(&mut session, &event.input, now).await
        };

        Reply {
            user_id: event.user_id.clone(),
            reply_to: event.reply_to.clone(),
            language: session.language.unwrap_or(language_before),
            prompts,
        }
    }

    /// Cancel forms idle past the timeout and tell their users.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<Reply> {
        let policy = self.engine.settings().language_policy;
        let replies: Vec<Reply> = self
            .sessions
            .expire_idle(now, self.idle_timeout, policy)
            .into_iter()
            .filter_map(|expired| {
                let reply_to = expired.reply_to?;
                Some(Reply {
                    user_id: expired.user_id,
                    reply_to,
                    language: expired.language,
                    prompts: vec![
                        Prompt::new("form.expired").with_param("form", expired.kind.as_str()),
                        main_menu(),
                    ],
                })
            })
            .collect();
        let pruned = self
            .sessions
            .prune(now, chrono::Duration::hours(SESSION_RETENTION_HOURS));
        if pruned > 0 {
            tracing::debug!("pruned {pruned} dormant sessions");
        }
        replies
    }

    // ── Active form ─────────────────────────────────────────────

    async fn form_turn(&self, session: &mut Session, input: &Input, now: DateTime<Utc>) -> Vec<Prompt> {
        let turn = match self.engine.advance(session, input, now) {
            Ok(turn) => turn,
            Err(e) => {
                tracing::warn!(user_id = %session.user_id, "turn rejected by engine: {e}");
                return vec![Prompt::new("error.generic")];
            }
        };
        let mut prompts = turn.prompts;
        match turn.effect {
            Effect::None => {}
            Effect::Cancelled | Effect::Aborted { .. } => prompts.push(main_menu()),
            Effect::Finalize(request) => prompts.extend(self.finalize(session, request, now).await),
        }
        prompts
    }

    async fn finalize(&self, session: &mut Session, request: FinalizeRequest, now: DateTime<Utc>) -> Vec<Prompt> {
        tracing::info!(
            user_id = %session.user_id,
            form = %request.kind,
            action = ?request.action,
            "finalizing form"
        );
        match request.action {
            FinalizeAction::Submit => self.submit(session, &request, now).await,
            FinalizeAction::Persist => match self.store(session, &request, STATUS_SUBMITTED, None, now).await {
                Ok(record) => {
                    self.engine.finish(session);
                    vec![Prompt::new("record.saved")
                        .with_param("form", request.kind.as_str())
                        .with_param("reference", record.reference)]
                }
                Err(e) => {
                    tracing::error!(form = %request.kind, "failed to store record: {e:#}");
                    self.engine.finalize_failed(session, "storage")
                }
            },
            FinalizeAction::Lookup => {
                let prompts = self.lookup(&request);
                self.engine.finish(session);
                prompts
            }
            FinalizeAction::Status => {
                let prompts = self.status(&request).await;
                self.engine.finish(session);
                prompts
            }
        }
    }

    /// Write the record on the blocking pool; rusqlite calls never run on a runtime worker.
    async fn store(
        &self,
        session: &Session,
        request: &FinalizeRequest,
        status: &str,
        remote_reference: Option<String>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<SubmissionRecord> {
        let new = NewRecord {
            form_id: request.form_id,
            kind: request.kind,
            user_id: session.user_id.clone(),
            language: session.language(),
            reference_prefix: request.reference_prefix.clone(),
            fields: request.record_fields(),
            status: status.to_string(),
            remote_reference,
        };
        let records = self.records.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<SubmissionRecord> {
            Ok(records.insert(&new, now)?.record().clone())
        })
        .await?
    }

    async fn submit(&self, session: &mut Session, request: &FinalizeRequest, now: DateTime<Utc>) -> Vec<Prompt> {
        let Some(gateway) = &self.submission else {
            return match self.store(session, request, STATUS_PENDING, None, now).await {
                Ok(record) => {
                    self.engine.finish(session);
                    vec![Prompt::new("submission.saved").with_param("reference", record.reference)]
                }
                Err(e) => {
                    tracing::error!(form = %request.kind, "failed to store application: {e:#}");
                    self.engine.finalize_failed(session, "storage")
                }
            };
        };

        match gateway.submit(request).await {
            Ok(receipt) => {
                let backup = self
                    .store(session, request, &receipt.status, Some(receipt.reference.clone()), now)
                    .await;
                if let Err(e) = backup {
                    tracing::error!(reference = %receipt.reference, "submitted but local backup failed: {e:#}");
                }
                self.engine.finish(session);
                vec![Prompt::new("submission.success")
                    .with_param("reference", receipt.reference)
                    .with_param("status", receipt.status)]
            }
            Err(e) => self.engine.finalize_failed(session, &e.to_string()),
        }
    }

    fn lookup(&self, request: &FinalizeRequest) -> Vec<Prompt> {
        let table = request.directory.as_deref().unwrap_or_default();
        let query = request.first_text().unwrap_or_default();
        let hits = self.directory.find_all(table, &query);
        if hits.is_empty() {
            return vec![Prompt::new("lookup.none").with_param("query", query)];
        }
        hits.into_iter()
            .take(MAX_LOOKUP_RESULTS)
            .map(|hit| {
                Prompt::new("lookup.result")
                    .with_param("table", hit.table)
                    .with_params(hit.fields.into_iter().collect())
            })
            .collect()
    }

    async fn status(&self, request: &FinalizeRequest) -> Vec<Prompt> {
        let reference = request.first_text().unwrap_or_default().trim().to_string();
        let records = self.records.clone();
        let key = reference.clone();
        let found = tokio::task::spawn_blocking(move || records.get(&key))
            .await
            .map_err(anyhow::Error::from)
            .and_then(|r| r);
        let local = match found {
            Ok(found) => found.map(|r| r.status),
            Err(e) => {
                tracing::warn!("record lookup failed: {e:#}");
                None
            }
        };
        let status = match (local, &self.submission) {
            (Some(status), _) => Some(status),
            (None, Some(gateway)) => gateway.status(&reference).await.unwrap_or_else(|e| {
                tracing::warn!(backend = gateway.backend(), "remote status check failed: {e}");
                None
            }),
            (None, None) => None,
        };
        match status {
            Some(status) => vec![Prompt::new("status.found")
                .with_param("reference", reference)
                .with_param("status", status)],
            None => vec![Prompt::new("status.not_found").with_param("reference", reference)],
        }
    }

    // ── Idle ────────────────────────────────────────────────────

    async fn idle_turn(&self, session: &mut Session, input: &Input, now: DateTime<Utc>) -> Vec<Prompt> {
        match input {
            Input::Cancel => vec![Prompt::new("menu.nothing_to_cancel"), main_menu()],
            Input::Location { .. } => vec![Prompt::new("location.unexpected"), main_menu()],
            Input::Selection(id) => self.idle_selection(session, id, now).await,
            Input::Text(text) => self.idle_text(session, text, now).await,
        }
    }

    async fn idle_selection(&self, session: &mut Session, id: &str, now: DateTime<Utc>) -> Vec<Prompt> {
        if let Some(code) = id.strip_prefix(LANGUAGE_PREFIX) {
            return match Language::parse(code) {
                Some(language) => {
                    session.language = Some(language);
                    tracing::debug!(user_id = %session.user_id, %language, "language chosen");
                    vec![Prompt::new("language.set"), main_menu()]
                }
                None => vec![language_menu()],
            };
        }
        if let Some(name) = id.strip_prefix(INTENT_PREFIX) {
            return match Intent::parse(name) {
                Some(intent) => self.route_intent(session, intent, now).await,
                None => vec![Prompt::new("menu.unknown"), main_menu()],
            };
        }
        match id {
            CANCEL_ID => vec![Prompt::new("menu.nothing_to_cancel"), main_menu()],
            MENU_ID => vec![main_menu()],
            CONFIRM_ID | EDIT_ID | DONE_ID | SKIP_ID => {
                vec![Prompt::new("form.no_active_application"), main_menu()]
            }
            other if other.starts_with(EDIT_FIELD_PREFIX) => {
                vec![Prompt::new("form.no_active_application"), main_menu()]
            }
            _ => vec![Prompt::new("menu.unknown"), main_menu()],
        }
    }

    async fn idle_text(&self, session: &mut Session, text: &str, now: DateTime<Utc>) -> Vec<Prompt> {
        let text = text.trim();
        if let Some(command) = text.strip_prefix('/') {
            return self.command(session, command, now).await;
        }
        if self.engine.phrases().is_cancel(text) {
            return vec![Prompt::new("menu.nothing_to_cancel"), main_menu()];
        }

        let classification = self.classifier.classify(text, session.language).await;
        if classification.language_detected {
            session.language = Some(classification.language);
        }
        tracing::debug!(
            user_id = %session.user_id,
            intent = %classification.intent,
            language = %classification.language,
            fallback = classification.fallback,
            "classified idle message"
        );
        self.route_intent(session, classification.intent, now).await
    }

    async fn command(&self, session: &mut Session, command: &str, now: DateTime<Utc>) -> Vec<Prompt> {
        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default().to_lowercase();
        // Telegram appends the bot name in groups: /start@sajilo_bot
        let name = name.split('@').next().unwrap_or_default();
        let argument = parts.collect::<Vec<_>>().join(" ");

        match name {
            "start" if session.language.is_none() => vec![Prompt::new("greeting"), language_menu()],
            "start" => vec![Prompt::new("greeting"), main_menu()],
            "menu" | "help" => vec![main_menu()],
            "language" => vec![language_menu()],
            "cancel" => vec![Prompt::new("menu.nothing_to_cancel"), main_menu()],
            "apply" => self.start_form(session, FormKind::ExGratiaApplication, now),
            "complaint" => self.start_form(session, FormKind::Complaint, now),
            "feedback" => self.start_form(session, FormKind::Feedback, now),
            "status" if argument.is_empty() => self.start_form(session, FormKind::StatusCheck, now),
            "status" => {
                let mut prompts = self.start_form(session, FormKind::StatusCheck, now);
                if session.is_idle() {
                    return prompts;
                }
                // The intro and reference question are superseded by the answer.
                prompts.clear();
                prompts.extend(self.form_turn(session, &Input::Text(argument), now).await);
                prompts
            }
            _ => vec![Prompt::new("menu.unknown"), main_menu()],
        }
    }

    fn start_form(&self, session: &mut Session, kind: FormKind, now: DateTime<Utc>) -> Vec<Prompt> {
        match self.engine.start(session, kind, now) {
            Ok(prompts) => prompts,
            Err(e) => {
                tracing::warn!(user_id = %session.user_id, form = %kind, "could not start form: {e}");
                vec![Prompt::new("error.generic")]
            }
        }
    }

    async fn route_intent(&self, session: &mut Session, intent: Intent, now: DateTime<Utc>) -> Vec<Prompt> {
        match intent {
            Intent::ExGratia => self.start_form(session, FormKind::ExGratiaApplication, now),
            Intent::Complaint => self.start_form(session, FormKind::Complaint, now),
            Intent::Feedback => self.start_form(session, FormKind::Feedback, now),
            Intent::OperatorSearch => self.start_form(session, FormKind::OperatorSearch, now),
            Intent::Tourism => self.start_form(session, FormKind::HomestaySearch, now),
            Intent::CheckStatus => self.start_form(session, FormKind::StatusCheck, now),
            Intent::ReliefNorms => vec![Prompt::new("info.relief_norms"), main_menu()],
            Intent::Emergency => {
                let numbers = self
                    .directory
                    .find_all("emergency", "")
                    .into_iter()
                    .filter_map(|row| Some((row.get("service")?.to_string(), row.get("number")?.to_string())))
                    .collect();
                vec![Prompt::new("info.emergency").with_params(numbers), main_menu()]
            }
            Intent::Greeting => vec![Prompt::new("greeting"), main_menu()],
            Intent::Cancel => vec![Prompt::new("menu.nothing_to_cancel"), main_menu()],
            Intent::Unknown => vec![Prompt::new("menu.unknown"), main_menu()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::forms::phrases::PhraseBook;
    use crate::forms::FormRegistry;
    use crate::gateways::{KeywordClassifier, StaticDirectory};
    use std::time::Duration;

    fn controller() -> ConversationController {
        let forms = Arc::new(FormRegistry::builtin().unwrap());
        let engine = WorkflowEngine::new(forms, Arc::new(PhraseBook::default()), EngineSettings::default());
        ConversationController::new(
            Arc::new(SessionStore::new()),
            engine,
            ClassificationGateway::new(Arc::new(KeywordClassifier), Duration::from_secs(1)),
            Arc::new(RecordStore::open_in_memory().unwrap()),
            Arc::new(StaticDirectory::builtin().unwrap()),
        )
    }

    fn text(s: &str) -> InboundEvent {
        InboundEvent::new("u1", "c1", Input::Text(s.into()))
    }

    fn select(id: &str) -> InboundEvent {
        InboundEvent::new("u1", "c1", Input::Selection(id.into()))
    }

    #[test]
    fn menus_use_routable_ids() {
        let menu = main_menu();
        assert_eq!(menu.options.len(), MAIN_MENU.len());
        assert!(menu.options.iter().all(|o| o.id.starts_with(INTENT_PREFIX)));
        assert!(menu
            .options
            .iter()
            .all(|o| Intent::parse(&o.id[INTENT_PREFIX.len()..]).is_some()));
        let langs = language_menu();
        assert!(langs
            .options
            .iter()
            .all(|o| Language::parse(&o.id[LANGUAGE_PREFIX.len()..]).is_some()));
    }

    #[tokio::test]
    async fn start_without_language_offers_language_menu() {
        let c = controller();
        let reply = c.handle(&text("/start")).await;
        assert_eq!(reply.keys(), vec!["greeting", "menu.language"]);

        let reply = c.handle(&select("lang:nepali")).await;
        assert_eq!(reply.language, Language::Nepali);
        assert_eq!(reply.keys(), vec!["language.set", "menu.main"]);

        let reply = c.handle(&text("/start")).await;
        assert_eq!(reply.keys(), vec!["greeting", "menu.main"]);
    }

    #[tokio::test]
    async fn stray_buttons_while_idle() {
        let c = controller();
        assert_eq!(
            c.handle(&select(CONFIRM_ID)).await.keys(),
            vec!["form.no_active_application", "menu.main"]
        );
        assert_eq!(
            c.handle(&select("edit:name")).await.keys(),
            vec!["form.no_active_application", "menu.main"]
        );
        assert_eq!(
            c.handle(&InboundEvent::new("u1", "c1", Input::Cancel)).await.keys(),
            vec!["menu.nothing_to_cancel", "menu.main"]
        );
        let loc = InboundEvent::new("u1", "c1", Input::Location { latitude: 27.3, longitude: 88.6 });
        assert_eq!(c.handle(&loc).await.keys(), vec!["location.unexpected", "menu.main"]);
    }

    #[tokio::test]
    async fn intent_selection_starts_form() {
        let c = controller();
        let reply = c.handle(&select("intent:complaint")).await;
        assert_eq!(reply.keys(), vec!["form.complaint.intro", "ask.name"]);
        assert!(c.sessions().get("u1").await.active_form.is_some());
    }

    #[tokio::test]
    async fn emergency_lists_numbers() {
        let c = controller();
        let reply = c.handle(&text("need an ambulance now")).await;
        assert_eq!(reply.prompts[0].key, "info.emergency");
        assert_eq!(reply.prompts[0].param("Ambulance"), Some("102"));
        assert!(c.sessions().get("u1").await.is_idle());
    }

    #[tokio::test]
    async fn homestay_lookup_finishes_in_one_answer() {
        let c = controller();
        c.handle(&select("intent:tourism")).await;
        let reply = c.handle(&text("Pelling")).await;
        assert_eq!(reply.keys(), vec!["lookup.result"]);
        assert_eq!(reply.prompts[0].param("name"), Some("Kanchenjunga View Homestay"));
        assert!(c.sessions().get("u1").await.is_idle());

        c.handle(&select("intent:tourism")).await;
        let reply = c.handle(&text("Atlantis")).await;
        assert_eq!(reply.keys(), vec!["lookup.none"]);
    }

    #[tokio::test]
    async fn status_command_with_unknown_reference() {
        let c = controller();
        let reply = c.handle(&text("/status CMP20260101-ABCDEF")).await;
        assert_eq!(reply.keys(), vec!["status.not_found"]);
        assert_eq!(reply.prompts[0].param("reference"), Some("CMP20260101-ABCDEF"));
        assert!(c.sessions().get("u1").await.is_idle());
    }

    #[tokio::test]
    async fn sweep_expires_stale_forms_only() {
        let c = controller().with_idle_timeout(Duration::from_secs(600));
        let start = Utc::now();
        c.handle_at(&select("intent:feedback"), start).await;
        c.handle_at(&InboundEvent::new("u2", "c2", Input::Selection("intent:complaint".into())), start + chrono::Duration::minutes(9))
            .await;

        let replies = c.sweep(start + chrono::Duration::minutes(11));
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].reply_to, "c1");
        assert_eq!(replies[0].prompts[0].key, "form.expired");
        assert_eq!(replies[0].prompts[0].param("form"), Some("feedback"));
        assert!(c.sessions().get("u1").await.is_idle());
        assert!(c.sessions().get("u2").await.active_form.is_some());
    }
}

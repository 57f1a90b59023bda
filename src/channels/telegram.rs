use super::render::{render, RenderedMessage};
use super::telegram_types::{
    inline_keyboard, location_keyboard, remove_keyboard, InlineButton, POLL_TIMEOUT_SECS,
};
use super::traits::Channel;
use crate::controller::{InboundEvent, Reply};
use crate::engine::Input;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Maximum number of update_ids to track for dedup (bounded FIFO).
const MAX_SEEN_UPDATES: usize = 10_000;

/// Bounded seen-set for Telegram update_id dedup.
struct SeenUpdates {
    set: HashSet<i64>,
    order: VecDeque<i64>,
}

impl SeenUpdates {
    fn new() -> Self {
        Self {
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Insert an update_id. Returns `true` if new, `false` if duplicate.
    fn insert(&mut self, uid: i64) -> bool {
        if !self.set.insert(uid) {
            return false;
        }
        self.order.push_back(uid);
        while self.order.len() > MAX_SEEN_UPDATES {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

/// An update reduced to what the conversation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUpdate {
    pub event: InboundEvent,
    pub username: Option<String>,
    /// Set for button presses; the spinner must be dismissed.
    pub callback_query_id: Option<String>,
}

impl ParsedUpdate {
    fn identities(&self) -> Vec<&str> {
        let mut ids = vec![self.event.user_id.as_str()];
        if let Some(name) = &self.username {
            ids.push(name.as_str());
        }
        ids
    }
}

fn id_string(value: &Value) -> Option<String> {
    value.as_i64().map(|id| id.to_string())
}

/// Text, location and button-press updates become inbound events; anything
/// else (stickers, edits, joins) is ignored.
pub fn parse_update(update: &Value) -> Option<ParsedUpdate> {
    if let Some(cb) = update.get("callback_query") {
        let user_id = id_string(&cb["from"]["id"])?;
        let chat_id = id_string(&cb["message"]["chat"]["id"]).unwrap_or_else(|| user_id.clone());
        let data = cb["data"].as_str()?.to_string();
        return Some(ParsedUpdate {
            event: InboundEvent::new(user_id, chat_id, Input::Selection(data)),
            username: cb["from"]["username"].as_str().map(str::to_string),
            callback_query_id: cb["id"].as_str().map(str::to_string),
        });
    }

    let message = update.get("message")?;
    let user_id = id_string(&message["from"]["id"])?;
    let chat_id = id_string(&message["chat"]["id"])?;
    let input = if let Some(location) = message.get("location") {
        Input::Location {
            latitude: location["latitude"].as_f64()?,
            longitude: location["longitude"].as_f64()?,
        }
    } else {
        Input::Text(message["text"].as_str()?.to_string())
    };
    Some(ParsedUpdate {
        event: InboundEvent::new(user_id, chat_id, input),
        username: message["from"]["username"].as_str().map(str::to_string),
        callback_query_id: None,
    })
}

/// Telegram channel -- long-polls the Bot API for updates
pub struct TelegramChannel {
    bot_token: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
    seen_update_ids: Arc<Mutex<SeenUpdates>>,
}

impl TelegramChannel {
    pub fn new(bot_token: String, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            client: reqwest::Client::new(),
            seen_update_ids: Arc::new(Mutex::new(SeenUpdates::new())),
        }
    }

    pub fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    pub fn is_user_allowed(&self, username: &str) -> bool {
        self.allowed_users.iter().any(|u| u == "*" || u == username)
    }

    pub fn is_any_user_allowed<'a, I>(&self, identities: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        identities.into_iter().any(|id| self.is_user_allowed(id))
    }

    /// Build the sendMessage body for one rendered prompt (for testing without network).
    pub fn build_message_json(chat_id: &str, message: &RenderedMessage) -> Value {
        let reply_markup = if message.request_location {
            let labels: Vec<String> = message.buttons.iter().map(|(_, label)| label.clone()).collect();
            location_keyboard(&labels)
        } else if message.buttons.is_empty() {
            remove_keyboard()
        } else {
            let buttons: Vec<InlineButton> = message
                .buttons
                .iter()
                .map(|(id, label)| InlineButton {
                    text: label.clone(),
                    callback_data: id.clone(),
                })
                .collect();
            inline_keyboard(&buttons)
        };
        serde_json::json!({
            "chat_id": chat_id,
            "text": message.text,
            "reply_markup": reply_markup,
        })
    }

    async fn send_message(&self, body: &Value) -> anyhow::Result<()> {
        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram sendMessage failed: {err}");
        }
        Ok(())
    }

    /// Dismiss the loading spinner on a pressed button.
    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> anyhow::Result<()> {
        let mut body = serde_json::json!({
            "callback_query_id": callback_query_id,
            "show_alert": show_alert,
        });

        if let Some(t) = text {
            body["text"] = Value::String(t.to_string());
        }

        let resp = self
            .client
            .post(self.api_url("answerCallbackQuery"))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Telegram answerCallbackQuery failed: {err}");
        }

        Ok(())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, reply: &Reply) -> anyhow::Result<()> {
        for prompt in &reply.prompts {
            let rendered = render(reply.language, prompt);
            let body = Self::build_message_json(&reply.reply_to, &rendered);
            self.send_message(&body).await?;
        }
        Ok(())
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let url = self.api_url("getUpdates");
            let body = serde_json::json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message", "callback_query"]
            });

            let resp = match self.client.post(&url).json(&body).send().await {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            let data: Value = match resp.json().await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!("Telegram parse error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                    continue;
                }
            };

            let Some(results) = data.get("result").and_then(Value::as_array) else {
                continue;
            };

            for update in results {
                if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                    offset = uid + 1;

                    if !self.seen_update_ids.lock().unwrap_or_else(|e| e.into_inner()).insert(uid) {
                        tracing::debug!("Duplicate update_id {uid}, skipping");
                        continue;
                    }
                }

                let Some(parsed) = parse_update(update) else {
                    continue;
                };

                if let Some(cb_id) = &parsed.callback_query_id {
                    if let Err(e) = self.answer_callback_query(cb_id, None, false).await {
                        tracing::debug!("answerCallbackQuery failed: {e}");
                    }
                }

                if !self.is_any_user_allowed(parsed.identities()) {
                    tracing::warn!(
                        user_id = %parsed.event.user_id,
                        "Telegram: ignoring update from a user outside the allowlist"
                    );
                    continue;
                }

                if tx.send(parsed.event).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn telegram_channel_name() {
        let ch = TelegramChannel::new("fake-token".into(), vec!["*".into()]);
        assert_eq!(ch.name(), "telegram");
    }

    #[test]
    fn telegram_api_url() {
        let ch = TelegramChannel::new("123:ABC".into(), vec![]);
        assert_eq!(ch.api_url("getMe"), "https://api.telegram.org/bot123:ABC/getMe");
    }

    #[test]
    fn telegram_user_allowed_wildcard() {
        let ch = TelegramChannel::new("t".into(), vec!["*".into()]);
        assert!(ch.is_user_allowed("anyone"));
    }

    #[test]
    fn telegram_user_exact_match_not_substring() {
        let ch = TelegramChannel::new("t".into(), vec!["alice".into()]);
        assert!(!ch.is_user_allowed("alice_bot"));
        assert!(!ch.is_user_allowed("malice"));
        assert!(!ch.is_user_allowed(""));
    }

    #[test]
    fn telegram_user_allowed_by_numeric_id_identity() {
        let ch = TelegramChannel::new("t".into(), vec!["123456789".into()]);
        assert!(ch.is_any_user_allowed(["unknown", "123456789"]));
        assert!(!ch.is_any_user_allowed(["unknown", "987"]));
    }

    #[test]
    fn seen_updates_dedup_and_bound() {
        let mut seen = SeenUpdates::new();
        assert!(seen.insert(1));
        assert!(!seen.insert(1));
        for uid in 2..=(MAX_SEEN_UPDATES as i64 + 1) {
            seen.insert(uid);
        }
        assert_eq!(seen.order.len(), MAX_SEEN_UPDATES);
        assert!(seen.insert(1), "oldest id was evicted");
    }

    #[test]
    fn parses_text_message() {
        let update = json!({
            "update_id": 7,
            "message": {
                "message_id": 1,
                "from": { "id": 555, "username": "pema" },
                "chat": { "id": 555 },
                "text": "I want ex-gratia"
            }
        });
        let parsed = parse_update(&update).unwrap();
        assert_eq!(parsed.event.user_id, "555");
        assert_eq!(parsed.event.reply_to, "555");
        assert_eq!(parsed.event.input, Input::Text("I want ex-gratia".into()));
        assert_eq!(parsed.username.as_deref(), Some("pema"));
        assert!(parsed.callback_query_id.is_none());
    }

    #[test]
    fn parses_location_and_callback() {
        let location = json!({
            "message": {
                "from": { "id": 9 },
                "chat": { "id": -100 },
                "location": { "latitude": 27.3389, "longitude": 88.6065 }
            }
        });
        let parsed = parse_update(&location).unwrap();
        assert_eq!(parsed.event.reply_to, "-100");
        assert_eq!(
            parsed.event.input,
            Input::Location {
                latitude: 27.3389,
                longitude: 88.6065
            }
        );

        let callback = json!({
            "callback_query": {
                "id": "cb-1",
                "from": { "id": 9, "username": "dawa" },
                "message": { "chat": { "id": 9 } },
                "data": "intent:complaint"
            }
        });
        let parsed = parse_update(&callback).unwrap();
        assert_eq!(parsed.event.input, Input::Selection("intent:complaint".into()));
        assert_eq!(parsed.callback_query_id.as_deref(), Some("cb-1"));
    }

    #[test]
    fn ignores_unsupported_updates() {
        let sticker = json!({
            "message": { "from": { "id": 1 }, "chat": { "id": 1 }, "sticker": { "file_id": "x" } }
        });
        assert!(parse_update(&sticker).is_none());
        assert!(parse_update(&json!({ "edited_message": {} })).is_none());
    }

    #[test]
    fn options_become_inline_keyboard() {
        let message = RenderedMessage {
            text: "Select your district.".into(),
            buttons: vec![
                ("east".into(), "East Sikkim".into()),
                ("cancel".into(), "Cancel".into()),
            ],
            request_location: false,
        };
        let body = TelegramChannel::build_message_json("42", &message);
        assert_eq!(body["chat_id"], "42");
        let rows = body["reply_markup"]["inline_keyboard"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0]["callback_data"], "east");
        assert_eq!(rows[1][0]["text"], "Cancel");
    }

    #[test]
    fn location_prompt_uses_reply_keyboard() {
        let message = RenderedMessage {
            text: "Share the location".into(),
            buttons: vec![("skip".into(), "Skip".into())],
            request_location: true,
        };
        let body = TelegramChannel::build_message_json("42", &message);
        let rows = body["reply_markup"]["keyboard"].as_array().unwrap();
        assert_eq!(rows[0][0]["request_location"], true);
        assert_eq!(rows[1][0]["text"], "Skip");
        assert_eq!(body["reply_markup"]["one_time_keyboard"], true);
    }

    #[test]
    fn plain_prompt_clears_keyboard() {
        let message = RenderedMessage {
            text: "Thanks".into(),
            buttons: Vec::new(),
            request_location: false,
        };
        let body = TelegramChannel::build_message_json("42", &message);
        assert_eq!(body["reply_markup"]["remove_keyboard"], true);
    }
}

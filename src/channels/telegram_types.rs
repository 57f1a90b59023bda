use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A single inline keyboard button
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

/// Telegram rejects callback data longer than this many bytes.
pub const MAX_CALLBACK_DATA: usize = 64;

/// Long-poll timeout passed to getUpdates
pub const POLL_TIMEOUT_SECS: u64 = 30;

/// Label of the share-location button
pub const SHARE_LOCATION_LABEL: &str = "📍 Share location";

/// Inline keyboard, one button per row so long labels stay readable.
pub fn inline_keyboard(buttons: &[InlineButton]) -> Value {
    let rows: Vec<Vec<Value>> = buttons
        .iter()
        .filter(|b| b.callback_data.len() <= MAX_CALLBACK_DATA)
        .map(|b| {
            vec![json!({
                "text": b.text,
                "callback_data": b.callback_data,
            })]
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

/// One-time reply keyboard whose first button shares the device location;
/// the remaining labels are sent back as plain text.
pub fn location_keyboard(labels: &[String]) -> Value {
    let mut rows = vec![vec![json!({ "text": SHARE_LOCATION_LABEL, "request_location": true })]];
    rows.extend(labels.iter().map(|l| vec![json!({ "text": l })]));
    json!({
        "keyboard": rows,
        "one_time_keyboard": true,
        "resize_keyboard": true,
    })
}

pub fn remove_keyboard() -> Value {
    json!({ "remove_keyboard": true })
}

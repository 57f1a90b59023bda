use super::render::{render, RenderedMessage};
use super::traits::Channel;
use crate::controller::{InboundEvent, Reply};
use crate::engine::Input;
use async_trait::async_trait;
use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Identity of the single local user.
pub const CONSOLE_USER: &str = "console";

/// Local stdin/stdout transport.
///
/// Lines are free text except for `/loc <lat> <lon>` (share a location),
/// `/sel <id>` (press a button) and `/cancel` (transport-level cancel).
pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn one console line into an input; blank lines are ignored.
pub fn parse_line(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut parts = line.split_whitespace();
    let input = match parts.next() {
        Some("/cancel") => Input::Cancel,
        Some("/sel") => Input::Selection(parts.next()?.to_string()),
        Some("/loc") => {
            let latitude = parts.next()?.trim_end_matches(',').parse().ok()?;
            let longitude = parts.next()?.parse().ok()?;
            Input::Location { latitude, longitude }
        }
        _ => Input::Text(line.to_string()),
    };
    Some(input)
}

fn print_message(message: &RenderedMessage) {
    println!("{} {}", style("»").cyan(), message.text);
    for (id, label) in &message.buttons {
        println!("    {} {}", style(format!("[{id}]")).dim(), label);
    }
    if message.request_location {
        println!("    {}", style("share a location with /loc <lat> <lon>").dim());
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn send(&self, reply: &Reply) -> anyhow::Result<()> {
        for prompt in &reply.prompts {
            print_message(&render(reply.language, prompt));
        }
        Ok(())
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<InboundEvent>) -> anyhow::Result<()> {
        let stdin = tokio::io::stdin();
        let mut lines = BufReader::new(stdin).lines();

        println!(
            "{}",
            style("Sajilo console. Type /start to begin, Ctrl-D to quit.").bold()
        );

        while let Some(line) = lines.next_line().await? {
            match parse_line(&line) {
                Some(input) => {
                    let event = InboundEvent::new(CONSOLE_USER, CONSOLE_USER, input);
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                None if line.trim_start().starts_with("/loc") || line.trim_start().starts_with("/sel") => {
                    println!("{}", style("usage: /loc <lat> <lon> | /sel <option id>").yellow());
                }
                None => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_console_syntax() {
        assert_eq!(parse_line("  "), None);
        assert_eq!(parse_line("/cancel"), Some(Input::Cancel));
        assert_eq!(parse_line("/sel intent:complaint"), Some(Input::Selection("intent:complaint".into())));
        assert_eq!(
            parse_line("/loc 27.33, 88.61"),
            Some(Input::Location {
                latitude: 27.33,
                longitude: 88.61
            })
        );
        assert_eq!(parse_line("/loc north"), None);
        assert_eq!(parse_line("/sel"), None);
        assert_eq!(parse_line("Pema Bhutia"), Some(Input::Text("Pema Bhutia".into())));
        assert_eq!(parse_line("/status EXG1"), Some(Input::Text("/status EXG1".into())));
    }

    #[tokio::test]
    async fn send_renders_without_error() {
        let reply = Reply {
            user_id: CONSOLE_USER.into(),
            reply_to: CONSOLE_USER.into(),
            language: crate::session::Language::English,
            prompts: vec![crate::controller::main_menu()],
        };
        assert!(CliChannel::new().send(&reply).await.is_ok());
    }
}

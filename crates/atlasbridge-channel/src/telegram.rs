//! Telegram Bot API transport.
//!
//! Outbound: `sendMessage` with an inline keyboard for yes/no and menu
//! prompts; free-text prompts ask the human to reply to the message.
//! Inbound: a long-polling `getUpdates` thread translates button callbacks
//! and message replies into [`InboundReply`] items.
//!
//! Callback data would overflow Telegram's 64-byte limit if it carried the
//! full `prompt_id:nonce` pair, so the channel keeps a message-id map and
//! reconstructs the pair on the way back in -- the router still verifies
//! the nonce against the store before anything is decided.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::mpsc::SyncSender;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use atlasbridge_types::{Nonce, PromptEvent, PromptId, PromptType};

use crate::allowlist::Allowlist;
use crate::backoff::Backoff;
use crate::channel::{CancelToken, Channel, ChannelError, DeliveryToken, InboundReply};

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<T>,
}

#[derive(Debug, Default, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    text: Option<String>,
    from: Option<User>,
    #[serde(default)]
    reply_to_message: Option<RepliedTo>,
}

#[derive(Debug, Deserialize)]
struct RepliedTo {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    id: String,
    from: User,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    message: Option<RepliedTo>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

/// State shared between the sender and the receiver thread.
struct Shared {
    /// message_id -> (prompt_id, nonce) for reply correlation.
    outstanding: Mutex<HashMap<i64, (PromptId, Nonce)>>,
}

/// Long-polling Telegram bot transport.
pub struct TelegramChannel {
    client: Client,
    base_url: String,
    /// Chats the bot delivers to; learned from config allowlist ids.
    chat_ids: Vec<i64>,
    poll_timeout_secs: u64,
    delivery_timeout_secs: u64,
    shared: Arc<Shared>,
}

impl TelegramChannel {
    pub fn new(
        bot_token: &str,
        chat_ids: Vec<i64>,
        poll_timeout_secs: u64,
        delivery_timeout_secs: u64,
    ) -> Self {
        Self::with_base_url(
            bot_token,
            chat_ids,
            poll_timeout_secs,
            delivery_timeout_secs,
            "https://api.telegram.org",
        )
    }

    /// Custom base URL for tests.
    pub fn with_base_url(
        bot_token: &str,
        chat_ids: Vec<i64>,
        poll_timeout_secs: u64,
        delivery_timeout_secs: u64,
        base_url: &str,
    ) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(delivery_timeout_secs))
                .build()
                .expect("reqwest client builds"),
            base_url: format!("{}/bot{}", base_url.trim_end_matches('/'), bot_token),
            chat_ids,
            poll_timeout_secs,
            delivery_timeout_secs,
            shared: Arc::new(Shared {
                outstanding: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        buttons: &[(String, String)],
    ) -> Result<i64, ChannelError> {
        let mut body = json!({ "chat_id": chat_id, "text": text });
        if !buttons.is_empty() {
            let keyboard: Vec<Vec<serde_json::Value>> = vec![buttons
                .iter()
                .map(|(label, data)| json!({ "text": label, "callback_data": data }))
                .collect()];
            body["reply_markup"] = json!({ "inline_keyboard": keyboard });
        }

        debug!(chat_id, "sendMessage");
        let response = self
            .client
            .post(format!("{}/sendMessage", self.base_url))
            .json(&body)
            .send()
            .map_err(classify_reqwest)?;
        let api: ApiResponse<SentMessage> = response.json().map_err(classify_reqwest)?;
        if !api.ok {
            return Err(classify_api(api.description.unwrap_or_default()));
        }
        Ok(api.result.map(|m| m.message_id).unwrap_or(0))
    }

    fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>, ChannelError> {
        let mut body = json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        let response = self
            .client
            .post(format!("{}/getUpdates", self.base_url))
            .json(&body)
            .send()
            .map_err(classify_reqwest)?;
        let api: ApiResponse<Vec<Update>> = response.json().map_err(classify_reqwest)?;
        if !api.ok {
            return Err(classify_api(api.description.unwrap_or_default()));
        }
        Ok(api.result.unwrap_or_default())
    }

    fn answer_callback(&self, callback_id: &str) {
        let body = json!({ "callback_query_id": callback_id });
        if let Err(e) = self
            .client
            .post(format!("{}/answerCallbackQuery", self.base_url))
            .json(&body)
            .send()
        {
            debug!(error = %e, "answerCallbackQuery failed");
        }
    }

    /// Format the outbound message for a prompt.
    fn render(event: &PromptEvent) -> (String, Vec<(String, String)>) {
        let header = format!(
            "Prompt {} ({})\n\n{}",
            event.prompt_id.short(),
            event.prompt_type.as_str(),
            event.excerpt
        );
        let buttons = match event.prompt_type {
            PromptType::YesNo => vec![
                ("Yes".to_string(), "v:y".to_string()),
                ("No".to_string(), "v:n".to_string()),
            ],
            PromptType::ConfirmEnter => vec![("Continue".to_string(), "v:".to_string())],
            PromptType::MultipleChoice => event
                .options
                .iter()
                .enumerate()
                .map(|(i, label)| {
                    (
                        format!("{}. {}", i + 1, label),
                        format!("v:{}", i + 1),
                    )
                })
                .collect(),
            PromptType::FreeText => Vec::new(),
        };
        (header, buttons)
    }
}

impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn deliver(
        &self,
        event: &PromptEvent,
        allowlist: &Allowlist,
    ) -> Result<DeliveryToken, ChannelError> {
        if self.chat_ids.is_empty() {
            return Err(ChannelError::Permanent("no telegram chat ids configured".into()));
        }
        if allowlist.is_empty() {
            return Err(ChannelError::Permanent("empty allowlist".into()));
        }

        let (text, buttons) = Self::render(event);
        let mut last_message_id = 0;
        for &chat_id in &self.chat_ids {
            let message_id = self.send_message(chat_id, &text, &buttons)?;
            self.shared
                .outstanding
                .lock()
                .expect("outstanding lock")
                .insert(message_id, (event.prompt_id.clone(), event.nonce.clone()));
            last_message_id = message_id;
        }
        info!(prompt_id = %event.prompt_id, message_id = last_message_id, "telegram delivery");
        Ok(DeliveryToken::for_prompt(&event.prompt_id, &event.nonce))
    }

    fn notify(&self, text: &str) -> Result<(), ChannelError> {
        for &chat_id in &self.chat_ids {
            self.send_message(chat_id, text, &[])?;
        }
        Ok(())
    }

    fn spawn_receiver(
        &self,
        tx: SyncSender<InboundReply>,
        cancel: CancelToken,
    ) -> Result<JoinHandle<()>, ChannelError> {
        // The receiver owns its own HTTP client (the long-poll needs a
        // longer timeout than deliveries); the outstanding map is shared.
        let poller = TelegramChannel {
            client: Client::builder()
                .timeout(Duration::from_secs(self.poll_timeout_secs + 10))
                .build()
                .map_err(|e| ChannelError::Permanent(format!("cannot build client: {e}")))?,
            base_url: self.base_url.clone(),
            chat_ids: self.chat_ids.clone(),
            poll_timeout_secs: self.poll_timeout_secs,
            delivery_timeout_secs: self.delivery_timeout_secs,
            shared: Arc::clone(&self.shared),
        };

        let handle = std::thread::Builder::new()
            .name("telegram-recv".into())
            .spawn(move || poller.poll_loop(tx, cancel))
            .map_err(|e| ChannelError::Permanent(format!("cannot spawn receiver: {e}")))?;
        Ok(handle)
    }
}

impl TelegramChannel {
    fn poll_loop(&self, tx: SyncSender<InboundReply>, cancel: CancelToken) {
        let mut offset: Option<i64> = None;
        let mut backoff = Backoff::for_channel();
        info!("telegram poller started");

        while !cancel.load(Ordering::SeqCst) {
            let updates = match self.get_updates(offset) {
                Ok(updates) => {
                    backoff.reset();
                    updates
                }
                Err(ChannelError::Transient(e)) => {
                    warn!(error = %e, "getUpdates transient failure");
                    std::thread::sleep(backoff.next_delay());
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "telegram poller stopping");
                    return;
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);

                if let Some(callback) = update.callback_query {
                    self.answer_callback(&callback.id);
                    let Some(data) = callback.data else { continue };
                    let Some(value) = data.strip_prefix("v:") else {
                        debug!(data, "unrecognized callback data");
                        continue;
                    };
                    let Some(message) = callback.message else { continue };
                    let correlated = self
                        .shared
                        .outstanding
                        .lock()
                        .expect("outstanding lock")
                        .get(&message.message_id)
                        .cloned();
                    let Some((prompt_id, nonce)) = correlated else {
                        debug!(message_id = message.message_id, "callback for unknown message");
                        continue;
                    };
                    let reply = InboundReply {
                        prompt_id,
                        nonce,
                        identity: format!("telegram:{}", callback.from.id),
                        value: value.to_string(),
                    };
                    if tx.send(reply).is_err() {
                        return;
                    }
                } else if let Some(message) = update.message {
                    // Free-text answers come as replies to the delivery.
                    let (Some(text), Some(from), Some(replied)) =
                        (message.text, message.from, message.reply_to_message)
                    else {
                        continue;
                    };
                    let correlated = self
                        .shared
                        .outstanding
                        .lock()
                        .expect("outstanding lock")
                        .get(&replied.message_id)
                        .cloned();
                    let Some((prompt_id, nonce)) = correlated else {
                        continue;
                    };
                    let reply = InboundReply {
                        prompt_id,
                        nonce,
                        identity: format!("telegram:{}", from.id),
                        value: text,
                    };
                    if tx.send(reply).is_err() {
                        return;
                    }
                }
            }
        }
        info!("telegram poller stopped");
    }
}

fn classify_reqwest(e: reqwest::Error) -> ChannelError {
    if e.is_timeout() || e.is_connect() {
        ChannelError::Transient(e.to_string())
    } else if e.is_status() {
        match e.status() {
            Some(status) if status.is_server_error() || status.as_u16() == 429 => {
                ChannelError::Transient(e.to_string())
            }
            _ => ChannelError::Permanent(e.to_string()),
        }
    } else {
        ChannelError::Transient(e.to_string())
    }
}

fn classify_api(description: String) -> ChannelError {
    // Telegram reports rate limiting and server hiccups with retryable
    // wording; auth problems are permanent.
    let lowered = description.to_lowercase();
    if lowered.contains("too many requests") || lowered.contains("retry") {
        ChannelError::Transient(description)
    } else {
        ChannelError::Permanent(description)
    }
}

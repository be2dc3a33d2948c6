//! Typed handle over the platform's Bot API.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::api::ApiCaller;
use crate::error::{ApiError, ApiResult};
use crate::model::{BotIdentity, Chat, ChatMember, Message, ReplyMarkup};

/// Extra budget on top of the server-side long-poll wait.
const POLL_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

// =============================================================================
// SendOptions
// =============================================================================

/// Everything needed to send or edit a text message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SendOptions {
    pub text: String,
    /// `HTML`, `MarkdownV2`, or none for plain text.
    pub parse_mode: Option<String>,
    /// Message id to reply to.
    pub reply_to: Option<i64>,
    pub markup: Option<ReplyMarkup>,
}

impl SendOptions {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn html(text: impl Into<String>) -> Self {
        Self::text(text).parse_mode("HTML")
    }

    pub fn parse_mode(mut self, mode: impl Into<String>) -> Self {
        self.parse_mode = Some(mode.into());
        self
    }

    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn markup(mut self, markup: ReplyMarkup) -> Self {
        self.markup = Some(markup);
        self
    }

    fn apply(&self, payload: &mut Value) {
        payload["text"] = json!(self.text);
        if let Some(mode) = &self.parse_mode {
            payload["parse_mode"] = json!(mode);
        }
        if let Some(reply_to) = self.reply_to {
            payload["reply_parameters"] = json!({
                "message_id": reply_to,
                "allow_sending_without_reply": true,
            });
        }
        if let Some(markup) = &self.markup {
            payload["reply_markup"] = json!(markup);
        }
    }
}

impl From<&str> for SendOptions {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for SendOptions {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

/// A chat addressed by numeric id or by public `@username`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ChatRef {
    Id(i64),
    Username(String),
}

impl From<i64> for ChatRef {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for ChatRef {
    fn from(name: &str) -> Self {
        if name.starts_with('@') {
            Self::Username(name.to_string())
        } else {
            Self::Username(format!("@{name}"))
        }
    }
}

// =============================================================================
// Bot
// =============================================================================

/// Shared handle to the platform: outbound calls plus the bot's own identity.
///
/// Cloning is cheap; clones share the caller and the identity slot.
#[derive(Clone)]
pub struct Bot {
    caller: Arc<dyn ApiCaller>,
    identity: Arc<RwLock<Option<BotIdentity>>>,
}

impl Bot {
    pub fn new(caller: Arc<dyn ApiCaller>) -> Self {
        Self {
            caller,
            identity: Arc::new(RwLock::new(None)),
        }
    }

    /// Records who the bot is. Command targeting compares against the
    /// username set here.
    pub fn set_identity(&self, identity: BotIdentity) {
        *self.identity.write() = Some(identity);
    }

    pub fn identity(&self) -> Option<BotIdentity> {
        self.identity.read().clone()
    }

    pub fn username(&self) -> Option<String> {
        self.identity
            .read()
            .as_ref()
            .and_then(|identity| identity.username.clone())
    }

    /// Raw passthrough to the underlying caller.
    pub async fn call(&self, method: &str, payload: Value) -> ApiResult<Value> {
        debug!(method, "Calling Bot API");
        self.caller.call(method, payload).await
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, payload: Value) -> ApiResult<T> {
        let result = self.call(method, payload).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn call_unit(&self, method: &str, payload: Value) -> ApiResult<()> {
        self.call(method, payload).await.map(|_| ())
    }

    // =========================================================================
    // Messages
    // =========================================================================

    pub async fn send_message(
        &self,
        chat_id: i64,
        options: impl Into<SendOptions>,
    ) -> ApiResult<Message> {
        let mut payload = json!({ "chat_id": chat_id });
        options.into().apply(&mut payload);
        self.call_as("sendMessage", payload).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: i64,
        message_id: i64,
        options: impl Into<SendOptions>,
    ) -> ApiResult<()> {
        let options = options.into();
        let mut payload = json!({ "chat_id": chat_id, "message_id": message_id });
        options.apply(&mut payload);
        // editMessageText has no reply target
        if let Some(map) = payload.as_object_mut() {
            map.remove("reply_parameters");
        }
        self.call_unit("editMessageText", payload).await
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> ApiResult<()> {
        self.call_unit(
            "deleteMessage",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await
    }

    /// Acknowledges a callback query, optionally showing `text` to the user.
    pub async fn answer_callback_query(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> ApiResult<()> {
        let mut payload = json!({ "callback_query_id": callback_id, "show_alert": show_alert });
        if let Some(text) = text {
            payload["text"] = json!(text);
        }
        self.call_unit("answerCallbackQuery", payload).await
    }

    // =========================================================================
    // Chats
    // =========================================================================

    pub async fn get_chat_member(&self, chat_id: i64, user_id: i64) -> ApiResult<ChatMember> {
        self.call_as(
            "getChatMember",
            json!({ "chat_id": chat_id, "user_id": user_id }),
        )
        .await
    }

    /// Resolves a chat by id or `@username`.
    pub async fn get_chat(&self, chat: impl Into<ChatRef>) -> ApiResult<Chat> {
        self.call_as("getChat", json!({ "chat_id": chat.into() }))
            .await
    }

    // =========================================================================
    // Bot lifecycle
    // =========================================================================

    pub async fn get_me(&self) -> ApiResult<BotIdentity> {
        self.call_as("getMe", json!({})).await
    }

    pub async fn delete_webhook(&self, drop_pending_updates: bool) -> ApiResult<()> {
        self.call_unit(
            "deleteWebhook",
            json!({ "drop_pending_updates": drop_pending_updates }),
        )
        .await
    }

    pub async fn set_webhook(
        &self,
        url: &str,
        secret_token: Option<&str>,
        allowed_updates: &[String],
    ) -> ApiResult<()> {
        let mut payload = json!({ "url": url });
        if let Some(secret) = secret_token {
            payload["secret_token"] = json!(secret);
        }
        if !allowed_updates.is_empty() {
            payload["allowed_updates"] = json!(allowed_updates);
        }
        self.call_unit("setWebhook", payload).await
    }

    /// Long-polls for updates starting at `offset`.
    ///
    /// Returns raw update objects so one undecodable update does not sink
    /// the batch. The HTTP timeout is stretched past the server-side wait.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
        allowed_updates: &[String],
    ) -> ApiResult<Vec<Value>> {
        let mut payload = json!({ "offset": offset, "timeout": timeout_secs });
        if !allowed_updates.is_empty() {
            payload["allowed_updates"] = json!(allowed_updates);
        }

        let budget = Duration::from_secs(timeout_secs) + POLL_TIMEOUT_MARGIN;
        let result = self
            .caller
            .call_with_timeout("getUpdates", payload, Some(budget))
            .await?;

        match result {
            Value::Array(updates) => Ok(updates),
            other => Err(ApiError::Serialization(format!(
                "getUpdates returned {other}, expected an array"
            ))),
        }
    }
}

impl fmt::Debug for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bot")
            .field("identity", &*self.identity.read())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockCaller;
    use crate::model::InlineKeyboardButton;

    #[tokio::test]
    async fn test_send_message_payload() {
        let caller = MockCaller::new();
        caller.respond(
            "sendMessage",
            Ok(json!({"message_id": 77, "chat": {"id": -5, "type": "group"}})),
        );
        let bot = Bot::new(Arc::new(caller.clone()));

        let markup = ReplyMarkup::inline(vec![vec![InlineKeyboardButton::callback(
            "Connect",
            "conn_connect|-5",
        )]]);
        let sent = bot
            .send_message(-5, SendOptions::html("<b>hi</b>").reply_to(3).markup(markup))
            .await
            .unwrap();
        assert_eq!(sent.id, 77);

        let call = &caller.calls_to("sendMessage")[0];
        assert_eq!(call.payload["chat_id"], -5);
        assert_eq!(call.payload["parse_mode"], "HTML");
        assert_eq!(call.payload["reply_parameters"]["message_id"], 3);
        assert_eq!(
            call.payload["reply_markup"]["inline_keyboard"][0][0]["callback_data"],
            "conn_connect|-5"
        );
    }

    #[tokio::test]
    async fn test_get_updates_stretches_timeout() {
        let caller = MockCaller::new();
        caller.respond("getUpdates", Ok(json!([{"update_id": 1}])));
        let bot = Bot::new(Arc::new(caller.clone()));

        let updates = bot.get_updates(10, 30, &[]).await.unwrap();
        assert_eq!(updates.len(), 1);

        let call = &caller.calls_to("getUpdates")[0];
        assert_eq!(call.payload["offset"], 10);
        assert_eq!(call.timeout, Some(Duration::from_secs(40)));
    }

    #[tokio::test]
    async fn test_get_chat_by_username() {
        let caller = MockCaller::new();
        caller.respond("getChat", Ok(json!({"id": -100, "type": "supergroup"})));
        let bot = Bot::new(Arc::new(caller.clone()));

        let chat = bot.get_chat("wardens").await.unwrap();
        assert_eq!(chat.id, -100);
        assert_eq!(caller.calls()[0].payload["chat_id"], "@wardens");
    }

    #[tokio::test]
    async fn test_platform_error_passes_through() {
        let caller = MockCaller::new();
        caller.respond(
            "deleteMessage",
            Err(ApiError::Platform {
                code: 400,
                description: "message can't be deleted".into(),
            }),
        );
        let bot = Bot::new(Arc::new(caller));

        let err = bot.delete_message(1, 2).await.unwrap_err();
        assert!(matches!(err, ApiError::Platform { code: 400, .. }));
    }
}

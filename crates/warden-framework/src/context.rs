//! Per-dispatch context handed to middleware and handlers.
//!
//! A [`DispatchContext`] is checked out of the dispatcher's context pool for
//! every routed event and shared along the middleware chain as a [`Ctx`]
//! (`Arc<Pooled<DispatchContext>>`). When the last reference drops, the pool
//! guard clears it and puts it back, so handlers that need data after they
//! return must copy it out.
//!
//! Besides the event and the parsed arguments, the context carries a small
//! typed scratch map so middleware can hand results to the handler (e.g. an
//! admin check done once up front).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use warden_core::{
    ApiError, ApiResult, Bot, CallbackQuery, Chat, Event, Message, Pooled, Recycle, SendOptions,
    User,
};

/// Shared handle to a pooled context, as passed through the service stack.
pub type Ctx = Arc<Pooled<DispatchContext>>;

/// Event, bot handle and parsed arguments for one dispatch.
pub struct DispatchContext {
    bot: Bot,
    event: Event,
    route: String,
    args: Vec<String>,
    state: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl DispatchContext {
    pub(crate) fn new(bot: Bot) -> Self {
        Self {
            bot,
            event: Event::default(),
            route: String::new(),
            args: Vec::new(),
            state: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn populate(&mut self, event: Event, route: &str, args: Vec<String>) {
        self.event = event;
        self.route.push_str(route);
        self.args = args;
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    pub fn event(&self) -> &Event {
        &self.event
    }

    /// The registration key this dispatch was routed to.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Command words after the token, or callback parts after the route.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    pub fn chat(&self) -> Option<&Chat> {
        self.event.chat()
    }

    pub fn chat_id(&self) -> Option<i64> {
        self.chat().map(|chat| chat.id)
    }

    pub fn sender(&self) -> Option<&User> {
        self.event.sender()
    }

    pub fn message(&self) -> Option<&Message> {
        self.event.message()
    }

    pub fn text(&self) -> &str {
        self.event.text()
    }

    /// Full callback data, including any `|` argument.
    pub fn data(&self) -> &str {
        self.event.data()
    }

    pub fn callback(&self) -> Option<&CallbackQuery> {
        self.event.callback()
    }

    // =========================================================================
    // Scratch state
    // =========================================================================

    /// Stores a value for later middleware or the handler, replacing any
    /// previous value of the same type.
    pub fn insert<T: Any + Send + Sync>(&self, value: T) {
        self.state.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Returns a copy of the stored value of type `T`.
    pub fn get<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.state
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    // =========================================================================
    // Outbound conveniences
    // =========================================================================

    fn require_chat(&self) -> ApiResult<i64> {
        self.chat_id().ok_or(ApiError::MissingField("chat"))
    }

    fn require_message(&self) -> ApiResult<(i64, i64)> {
        let message = self.message().ok_or(ApiError::MissingField("message"))?;
        Ok((message.chat.id, message.id))
    }

    /// Sends a message to the event's chat.
    pub async fn send(&self, options: impl Into<SendOptions>) -> ApiResult<Message> {
        let chat_id = self.require_chat()?;
        self.bot.send_message(chat_id, options).await
    }

    /// Sends a message replying to the event's message.
    pub async fn reply(&self, options: impl Into<SendOptions>) -> ApiResult<Message> {
        let (chat_id, message_id) = self.require_message()?;
        self.bot
            .send_message(chat_id, options.into().reply_to(message_id))
            .await
    }

    /// Edits the event's message in place; for callbacks, the message the
    /// button belongs to.
    pub async fn edit(&self, options: impl Into<SendOptions>) -> ApiResult<()> {
        let (chat_id, message_id) = self.require_message()?;
        self.bot
            .edit_message_text(chat_id, message_id, options)
            .await
    }

    /// Deletes the event's message.
    pub async fn delete(&self) -> ApiResult<()> {
        let (chat_id, message_id) = self.require_message()?;
        self.bot.delete_message(chat_id, message_id).await
    }

    /// Answers the callback query, optionally with a toast.
    pub async fn respond(&self, text: Option<&str>) -> ApiResult<()> {
        let callback = self.callback().ok_or(ApiError::MissingField("callback"))?;
        self.bot
            .answer_callback_query(&callback.id, text, false)
            .await
    }
}

impl Recycle for DispatchContext {
    fn recycle(&mut self) {
        self.event = Event::default();
        self.route.clear();
        self.args.clear();
        self.state.get_mut().clear();
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("update_id", &self.event.update_id)
            .field("route", &self.route)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use warden_core::{MockCaller, Pool, parse_update};

    fn callback_event() -> Event {
        parse_update(
            br#"{"update_id":1,"callback_query":{"id":"cb-9",
                "from":{"id":5,"first_name":"Ann"},
                "message":{"message_id":44,"chat":{"id":-7,"type":"group"}},
                "data":"conn_connect|123"}}"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_conveniences_target_event_message() {
        let caller = MockCaller::new();
        caller.respond(
            "sendMessage",
            Ok(json!({"message_id": 45, "chat": {"id": -7, "type": "group"}})),
        );
        let pool = Pool::new(1, {
            let bot = Bot::new(Arc::new(caller.clone()));
            move || DispatchContext::new(bot.clone())
        });

        let mut ctx = pool.acquire();
        ctx.populate(callback_event(), "conn_connect", vec!["123".into()]);

        tokio_test::assert_ok!(ctx.respond(Some("Connected")).await);
        ctx.edit("done").await.unwrap();
        ctx.reply("ok").await.unwrap();

        let calls = caller.calls();
        assert_eq!(calls[0].payload["callback_query_id"], "cb-9");
        assert_eq!(calls[1].payload["message_id"], 44);
        assert_eq!(calls[2].payload["reply_parameters"]["message_id"], 44);
        assert_eq!(ctx.data(), "conn_connect|123");
        assert_eq!(ctx.arg(0), Some("123"));
    }

    #[tokio::test]
    async fn test_recycle_clears_everything() {
        let bot = Bot::new(Arc::new(MockCaller::new()));
        let pool = Pool::new(1, move || DispatchContext::new(bot.clone()));

        {
            let mut ctx = pool.acquire();
            ctx.populate(callback_event(), "conn_connect", vec!["123".into()]);
            ctx.insert(42u32);
        }

        let ctx = pool.acquire();
        assert_eq!(ctx.event().update_id, 0);
        assert!(ctx.route().is_empty());
        assert!(ctx.args().is_empty());
        assert_eq!(ctx.get::<u32>(), None);
    }

    #[tokio::test]
    async fn test_respond_requires_callback() {
        let bot = Bot::new(Arc::new(MockCaller::new()));
        let ctx = DispatchContext::new(bot);
        assert!(matches!(
            ctx.respond(None).await,
            Err(ApiError::MissingField("callback"))
        ));
    }
}

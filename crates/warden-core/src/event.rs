//! Normalized inbound events and the update parser.
//!
//! The platform delivers loosely-typed updates; the engine routes on a small
//! closed set of shapes:
//!
//! ```text
//! Update { update_id, message?, callback_query? }
//! └── Event { update_id, kind }
//!     ├── EventKind::Message        text / caption, optional leading /command
//!     ├── EventKind::MembersJoined  message.new_chat_members non-empty
//!     ├── EventKind::MemberLeft     message.left_chat_member present
//!     ├── EventKind::Callback       callback_query with opaque data
//!     └── EventKind::Other          anything the engine does not route
//! ```

use crate::error::{EventError, EventResult};
use crate::model::{CallbackQuery, Chat, Message, Update, User};

/// Separates a callback route from its argument, e.g. `conn_connect|123`.
pub const CALLBACK_DELIMITER: char = '|';

/// A leading `/command` extracted from message text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command token including the slash, without any `@botname` suffix.
    pub name: String,
    /// The `@botname` suffix, when present.
    pub target: Option<String>,
    /// Whitespace-separated words after the token.
    pub args: Vec<String>,
}

impl Command {
    /// Extracts the command from `text`, if the first word is one.
    ///
    /// ```
    /// use warden_core::Command;
    ///
    /// let cmd = Command::parse("/ban@MyBot 42 spam").unwrap();
    /// assert_eq!(cmd.name, "/ban");
    /// assert_eq!(cmd.target.as_deref(), Some("MyBot"));
    /// assert_eq!(cmd.args, vec!["42", "spam"]);
    /// ```
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.split_whitespace();
        let token = words.next()?;
        if !token.starts_with('/') || token.len() == 1 {
            return None;
        }

        let (name, target) = match token.split_once('@') {
            Some((name, target)) => (name, Some(target.to_string())),
            None => (token, None),
        };

        Some(Self {
            name: name.to_string(),
            target,
            args: words.map(str::to_string).collect(),
        })
    }

    /// Whether this command is meant for the bot called `username`.
    ///
    /// Untargeted commands are for every bot in the chat. A targeted command
    /// matches case-insensitively; with no known username it never matches.
    pub fn is_addressed_to(&self, username: Option<&str>) -> bool {
        match (&self.target, username) {
            (None, _) => true,
            (Some(target), Some(own)) => target.eq_ignore_ascii_case(own),
            (Some(_), None) => false,
        }
    }
}

/// Classified payload of an [`Event`].
#[derive(Debug, Clone, Default)]
pub enum EventKind {
    /// A plain message, possibly starting with a command.
    Message {
        message: Message,
        command: Option<Command>,
    },
    /// One or more users joined the chat.
    MembersJoined { message: Message, members: Vec<User> },
    /// A user left (or was removed from) the chat.
    MemberLeft { message: Message, member: User },
    /// An inline-keyboard callback.
    Callback(CallbackQuery),
    /// An update type the engine does not route.
    #[default]
    Other,
}

/// One normalized inbound update.
#[derive(Debug, Clone, Default)]
pub struct Event {
    pub update_id: i64,
    pub kind: EventKind,
}

impl Event {
    /// Normalizes a decoded update.
    pub fn from_update(update: Update) -> Self {
        let kind = match (update.message, update.callback_query) {
            (Some(mut message), _) if !message.new_chat_members.is_empty() => {
                let members = std::mem::take(&mut message.new_chat_members);
                EventKind::MembersJoined { message, members }
            }
            (Some(mut message), _) if message.left_chat_member.is_some() => {
                match message.left_chat_member.take() {
                    Some(member) => EventKind::MemberLeft { message, member },
                    None => EventKind::Other,
                }
            }
            (Some(message), _) => {
                let command = message.text.as_deref().and_then(Command::parse);
                EventKind::Message { message, command }
            }
            (None, Some(callback)) => EventKind::Callback(callback),
            (None, None) => EventKind::Other,
        };

        Self {
            update_id: update.update_id,
            kind,
        }
    }

    /// Returns a short name for logging.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::Message { .. } => "message",
            EventKind::MembersJoined { .. } => "members_joined",
            EventKind::MemberLeft { .. } => "member_left",
            EventKind::Callback(_) => "callback",
            EventKind::Other => "other",
        }
    }

    /// The message this event is about: the message itself, or the one the
    /// callback button was attached to.
    pub fn message(&self) -> Option<&Message> {
        match &self.kind {
            EventKind::Message { message, .. }
            | EventKind::MembersJoined { message, .. }
            | EventKind::MemberLeft { message, .. } => Some(message),
            EventKind::Callback(callback) => callback.message.as_ref(),
            EventKind::Other => None,
        }
    }

    pub fn chat(&self) -> Option<&Chat> {
        self.message().map(|m| &m.chat)
    }

    /// The acting user: the callback presser, or the message author.
    pub fn sender(&self) -> Option<&User> {
        match &self.kind {
            EventKind::Callback(callback) => Some(&callback.sender),
            _ => self.message().and_then(|m| m.sender.as_ref()),
        }
    }

    /// Message text (or caption). Empty for callbacks and membership events.
    pub fn text(&self) -> &str {
        match &self.kind {
            EventKind::Message { message, .. } => message.text_or_caption().unwrap_or_default(),
            _ => "",
        }
    }

    /// Callback data. Empty for non-callback events.
    pub fn data(&self) -> &str {
        match &self.kind {
            EventKind::Callback(callback) => &callback.data,
            _ => "",
        }
    }

    pub fn command(&self) -> Option<&Command> {
        match &self.kind {
            EventKind::Message { command, .. } => command.as_ref(),
            _ => None,
        }
    }

    pub fn callback(&self) -> Option<&CallbackQuery> {
        match &self.kind {
            EventKind::Callback(callback) => Some(callback),
            _ => None,
        }
    }
}

/// Decodes wire bytes into an [`Update`] without classifying it.
///
/// The webhook path needs the sequence number before it decides whether to
/// normalize the rest of the payload.
pub fn decode_update(bytes: &[u8]) -> EventResult<Update> {
    serde_json::from_slice(bytes).map_err(EventError::from)
}

/// Decodes and normalizes wire bytes into an [`Event`].
pub fn parse_update(bytes: &[u8]) -> EventResult<Event> {
    decode_update(bytes).map(Event::from_update)
}

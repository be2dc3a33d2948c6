//! Echo Bot Example
//!
//! A small Warden bot showing the pieces most bots need:
//!
//! - command handlers (`/start`, `/help`, `/echo`, `/admin`, `/menu`)
//! - an inline keyboard whose callbacks route by prefix (`menu|ping`)
//! - pseudo-key handlers for unknown commands, plain text and new members
//! - middleware: request timing (outermost) and a store-backed flood counter
//!
//! # Usage
//!
//! ```bash
//! WARDEN_BOT__TOKEN=123:abc cargo run --package echo-bot
//! cargo run --package echo-bot -- --config demos/echo_bot/warden.toml --webhook
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::time::Instant;
use tracing::{debug, info};
use warden::prelude::*;

/// Messages one user may send per chat inside [`FLOOD_WINDOW`].
const FLOOD_LIMIT: i64 = 8;
const FLOOD_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "echo-bot", about = "Echo bot built on Warden")]
struct Args {
    /// Configuration file; `warden.toml` is searched for when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configuration profile, e.g. `production`.
    #[arg(short, long)]
    profile: Option<String>,

    /// Receive updates through the webhook instead of long polling.
    #[arg(long)]
    webhook: bool,
}

// ============================================================================
// Handlers
// ============================================================================

async fn start(ctx: Ctx) -> Result<(), ApiError> {
    let name = ctx
        .sender()
        .map(|user| user.first_name.clone())
        .unwrap_or_else(|| "there".to_string());
    ctx.reply(format!("Hi {name}! Send /help to see what I can do."))
        .await?;
    Ok(())
}

async fn help(ctx: Ctx) -> Result<(), ApiError> {
    let text = "<b>Echo Bot</b>\n\
        /echo &lt;text&gt; - repeat text\n\
        /admin - am I an admin here?\n\
        /menu - buttons\n\
        /help - this message";
    ctx.send(SendOptions::html(text)).await?;
    Ok(())
}

async fn echo(ctx: Ctx) -> Result<(), ApiError> {
    let text = ctx.args().join(" ");
    if text.is_empty() {
        ctx.reply("Usage: /echo <text>").await?;
    } else {
        ctx.send(text).await?;
    }
    Ok(())
}

async fn menu(ctx: Ctx) -> Result<(), ApiError> {
    let markup = ReplyMarkup::inline(vec![vec![
        InlineKeyboardButton::callback("Ping", "menu|ping"),
        InlineKeyboardButton::callback("About", "menu|about"),
    ]]);
    ctx.send(SendOptions::text("Pick one:").markup(markup)).await?;
    Ok(())
}

/// Handles every `menu|...` button.
async fn menu_choice(ctx: Ctx) -> Result<(), ApiError> {
    match ctx.arg(0) {
        Some("ping") => ctx.respond(Some("Pong!")).await,
        Some("about") => {
            ctx.edit("Warden echo bot. Source: demos/echo_bot").await?;
            ctx.respond(None).await
        }
        _ => ctx.respond(Some("Unknown option")).await,
    }
}

async fn unknown_command(ctx: Ctx) -> Result<(), ApiError> {
    let name = ctx.event().command().map(|c| c.name.clone()).unwrap_or_default();
    ctx.reply(format!("I don't know /{name}. Try /help.")).await?;
    Ok(())
}

/// Repeats plain text back in private chats; stays quiet in groups.
async fn private_echo(ctx: Ctx) -> Result<(), ApiError> {
    if ctx.chat().is_some_and(|chat| chat.is_private()) {
        ctx.send(ctx.text().to_string()).await?;
    }
    Ok(())
}

async fn welcome(ctx: Ctx) -> Result<(), ApiError> {
    let EventKind::MembersJoined { members, .. } = &ctx.event().kind else {
        return Ok(());
    };
    let names = members
        .iter()
        .filter(|member| !member.is_bot)
        .map(|member| member.first_name.as_str())
        .collect::<Vec<_>>();
    if !names.is_empty() {
        ctx.send(format!("Welcome, {}!", names.join(", "))).await?;
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut builder = WardenRuntime::builder();
    if let Some(path) = &args.config {
        builder = builder.config_file(path);
    }
    if let Some(profile) = &args.profile {
        builder = builder.profile(profile);
    }
    if args.webhook {
        builder = builder.mode(RunMode::Webhook);
    }
    let mut runtime = builder.build().await?;

    let permissions = runtime.permissions().clone();
    let counters = runtime.store().clone();

    runtime
        .layer(middleware_fn(|ctx: Ctx, next: Next| async move {
            let started = Instant::now();
            let route = ctx.route().to_string();
            let result = next.run(ctx).await;
            debug!(%route, elapsed = ?started.elapsed(), "Handled");
            result
        }))
        .layer(middleware_fn(move |ctx: Ctx, next: Next| {
            let counters = counters.clone();
            async move {
                let (Some(chat), Some(user)) = (ctx.chat_id(), ctx.sender().map(|u| u.id)) else {
                    return next.run(ctx).await;
                };
                let key = format!("flood:{chat}:{user}");
                let count = counters.incr(&key).await?;
                if count == 1 {
                    counters.expire(&key, FLOOD_WINDOW).await?;
                }
                if count > FLOOD_LIMIT {
                    debug!(chat, user, count, "Flood limit reached, dropping");
                    return Ok(());
                }
                next.run(ctx).await
            }
        }));

    runtime
        .register("/start", start)
        .register("/help", help)
        .register("/echo", echo)
        .register("/menu", menu)
        .register("menu", menu_choice)
        .register(ON_UNKNOWN_COMMAND, unknown_command)
        .register(ON_TEXT, private_echo)
        .register(NEW_CHAT_MEMBERS, welcome)
        .register("/admin", move |ctx: Ctx| {
            let permissions = permissions.clone();
            async move {
                let (Some(chat), Some(user)) = (ctx.chat(), ctx.sender()) else {
                    return Ok(());
                };
                let reply = if chat.is_private() {
                    "Ask me in a group."
                } else if permissions.is_admin(chat.id, user.id).await {
                    "You are an admin here."
                } else {
                    "You are not an admin here."
                };
                ctx.reply(reply).await.map(|_| ())
            }
        });

    info!(mode = %runtime.config().mode, "Echo bot starting");
    runtime.run().await?;

    Ok(())
}

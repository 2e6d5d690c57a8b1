//! Scrapes the "Upcoming Events" panel of the KO4Fun event schedule and keeps a Discord channel
//! informed about it.

use anyhow::Result;
use chrono::Utc;
use log::{debug, info};

use crate::discord::Post;
use crate::settings::{Settings, Target};

pub mod discord;
pub mod format;
pub mod models;
pub mod settings;
pub mod source;
pub mod state;

/// One full pass: read the schedule page, render the message and deliver it.
pub async fn run_once(settings: &Settings, dry_run: bool) -> Result<()> {
    let events = source::scrape(&settings.source).await?;
    if events.len() > settings.message.max_events {
        debug!(
            "listing only {} of {} events",
            settings.message.max_events,
            events.len()
        );
    }

    let now = Utc::now();
    let description = format::describe(&events, &settings.message, now);
    let post = Post {
        title: settings.message.title.clone(),
        embed: format::embed(&description, &settings.message, now)?,
        plain: format::plain(&description, &settings.message),
    };

    if dry_run {
        info!("dry run, not posting:\n{}", post.plain);
        return Ok(());
    }

    deliver(settings, &post).await
}

/// Send the post to the configured target. The state file is only touched by the delivery paths
/// that use it.
pub async fn deliver(settings: &Settings, post: &Post) -> Result<()> {
    let state_file = &settings.discord.state_file;

    match settings.target()? {
        Target::Webhook { url } => {
            let edit_existing = settings.discord.edit_existing;
            discord::deliver_webhook(&url, post, edit_existing, state_file).await
        }
        Target::Bot { token, channel_id } => {
            let pin = settings.discord.pin;
            discord::deliver_bot(&token, channel_id, pin, post, state_file).await
        }
    }
}

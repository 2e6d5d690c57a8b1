//! Posting the schedule to Discord, through a webhook or as a bot.

use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Error, Result};
use log::{debug, error, info, warn};
use reqwest::Url;
use twilight_http::error::ErrorType;
use twilight_http::Client as HttpClient;
use twilight_model::channel::message::{AllowedMentions, Embed};
use twilight_model::channel::Message;
use twilight_model::id::marker::{ChannelMarker, MessageMarker, UserMarker, WebhookMarker};
use twilight_model::id::Id;

use crate::state::State;

/// Number of recent channel messages searched for a previous schedule post.
const RECENT_LIMIT: u16 = 50;

const WEBHOOK_HOSTS: &[&str] = &[
    "discord.com",
    "discordapp.com",
    "canary.discord.com",
    "canary.discordapp.com",
    "ptb.discord.com",
    "ptb.discordapp.com",
];

/// A rendered schedule, ready to be sent.
#[derive(Debug)]
pub struct Post {
    /// Embed title, used to recognize earlier posts.
    pub title: String,
    pub embed: Embed,
    /// Plain text version for webhooks that refuse embeds.
    pub plain: String,
}

/// What to do after a Discord request failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Recovery {
    /// Discord refused the embed, send the plain text version instead.
    PlainText,
    /// The earlier message is gone, forget it and carry on without it.
    Forget,
    /// Fail the run.
    Abort,
}

/// Only an answer from Discord counts as a rejected embed. Without one (transport errors, a body
/// that failed to decode) the message may already exist.
fn on_embed_error(status: Option<u16>) -> Recovery {
    match status {
        Some(_) => Recovery::PlainText,
        None => Recovery::Abort,
    }
}

/// Fetching or editing a remembered message.
fn on_lookup_error(status: Option<u16>) -> Recovery {
    match status {
        Some(404) => Recovery::Forget,
        _ => Recovery::Abort,
    }
}

/// Id and token of a webhook, taken from its URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WebhookUrl {
    pub id: Id<WebhookMarker>,
    pub token: String,
}

impl FromStr for WebhookUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let url = Url::parse(s.trim()).context("webhook URL is not a valid URL")?;

        match url.host_str() {
            Some(host) if WEBHOOK_HOSTS.contains(&host) => {}
            host => bail!("webhook URL points to unknown host {:?}", host),
        }

        let mut segments = url
            .path_segments()
            .ok_or_else(|| anyhow!("webhook URL has no path"))?
            .filter(|s| !s.is_empty())
            .peekable();

        if segments.next() != Some("api") {
            bail!("webhook URL path must start with /api");
        }
        // Optional API version like `/api/v10/webhooks/...`.
        segments.next_if(|s| s.starts_with('v') && s[1..].parse::<u8>().is_ok());
        if segments.next() != Some("webhooks") {
            bail!("webhook URL path is missing /webhooks");
        }

        let id = segments
            .next()
            .and_then(|id| id.parse().ok())
            .and_then(Id::new_checked)
            .ok_or_else(|| anyhow!("webhook URL contains no valid webhook id"))?;
        let token = segments
            .next()
            .ok_or_else(|| anyhow!("webhook URL contains no token"))?
            .to_owned();

        Ok(Self { id, token })
    }
}

/// Post the schedule through a webhook. The webhook is verified first, then the embed is sent and
/// if Discord rejects it, the plain text version. With `edit_existing` the previous post is edited
/// in place when it still exists, and only then is the state file read.
pub async fn deliver_webhook(
    url: &str,
    post: &Post,
    edit_existing: bool,
    state_file: &Path,
) -> Result<()> {
    let webhook: WebhookUrl = url.parse()?;
    let mut state = if edit_existing {
        Some(State::load(state_file).await?)
    } else {
        None
    };
    let http = HttpClient::builder().build();

    // Verify the webhook before posting to it.
    match http.webhook(webhook.id).token(&webhook.token).await {
        Ok(response) => {
            let info = response.model().await?;
            debug!(
                "posting through webhook {:?} in channel {}",
                info.name, info.channel_id
            );
        }
        Err(e) => {
            error!("Webhook GET failed: {}", describe(&e));
            return Err(e).context("webhook verification failed");
        }
    }

    if let Some(state) = state.as_mut() {
        if let Some(id) = state.message_id(&post.title).and_then(Id::new_checked) {
            match edit_webhook_message(&http, &webhook, id, post).await {
                Ok(()) => {
                    info!("edited webhook message {}", id);
                    return Ok(());
                }
                Err(e) if on_lookup_error(status_any(&e)) == Recovery::Forget => {
                    info!("previous webhook message {} is gone, posting a new one", id);
                    state.remove(&post.title);
                }
                Err(e) => {
                    error!("Webhook edit failed: {}", describe_any(&e));
                    return Err(e.context("failed editing the webhook message"));
                }
            }
        }
    }

    let message = match execute_embed(&http, &webhook, post).await {
        Ok(message) => message,
        Err(e) if on_embed_error(status_any(&e)) == Recovery::PlainText => {
            error!("Embed POST failed: {}", describe_any(&e));
            execute_plain(&http, &webhook, post).await.map_err(|e| {
                error!("Plain-text POST failed: {}", describe_any(&e));
                e.context("failed posting through the webhook")
            })?
        }
        Err(e) => {
            error!("Embed POST failed: {}", describe_any(&e));
            return Err(e.context("failed posting the embed through the webhook"));
        }
    };
    info!("posted webhook message {}", message.id);

    if let Some(state) = state.as_mut() {
        state.set_message_id(&post.title, message.id.get());
        state.save().await?;
    }

    Ok(())
}

async fn edit_webhook_message(
    http: &HttpClient,
    webhook: &WebhookUrl,
    id: Id<MessageMarker>,
    post: &Post,
) -> Result<()> {
    http.update_webhook_message(webhook.id, &webhook.token, id)
        .content(None)?
        .embeds(Some(std::slice::from_ref(&post.embed)))?
        .await?;

    Ok(())
}

async fn execute_embed(http: &HttpClient, webhook: &WebhookUrl, post: &Post) -> Result<Message> {
    let message = http
        .execute_webhook(webhook.id, &webhook.token)
        .embeds(std::slice::from_ref(&post.embed))?
        .wait()
        .await?
        .model()
        .await?;

    Ok(message)
}

async fn execute_plain(http: &HttpClient, webhook: &WebhookUrl, post: &Post) -> Result<Message> {
    let message = http
        .execute_webhook(webhook.id, &webhook.token)
        .content(&post.plain)?
        .allowed_mentions(Some(&AllowedMentions::default()))
        .wait()
        .await?
        .model()
        .await?;

    Ok(message)
}

/// Keep the schedule in one bot message in the channel. An earlier post is searched for by the
/// remembered id, then among the pins, then in the recent history, and edited. Only if none is
/// found a new message is created.
pub async fn deliver_bot(
    token: &str,
    channel_id: u64,
    pin: bool,
    post: &Post,
    state_file: &Path,
) -> Result<()> {
    let channel_id: Id<ChannelMarker> =
        Id::new_checked(channel_id).ok_or_else(|| anyhow!("channel id must not be 0"))?;
    let mut state = State::load(state_file).await?;
    let http = HttpClient::new(token.to_owned());

    let me = http
        .current_user()
        .await
        .context("failed authenticating the bot")?
        .model()
        .await?;
    debug!("running as {} ({})", me.name, me.id);

    let existing = find_message(&http, channel_id, me.id, post, &mut state).await?;

    let message = match existing {
        Some(message) => {
            let message = http
                .update_message(channel_id, message.id)
                .content(None)?
                .embeds(Some(std::slice::from_ref(&post.embed)))?
                .await
                .context("failed editing the schedule message")?
                .model()
                .await?;
            info!("edited message {} in channel {}", message.id, channel_id);
            message
        }
        None => {
            let message = http
                .create_message(channel_id)
                .embeds(std::slice::from_ref(&post.embed))?
                .await
                .context("failed creating the schedule message")?
                .model()
                .await?;
            info!("created message {} in channel {}", message.id, channel_id);
            message
        }
    };

    if pin && !message.pinned {
        match http.create_pin(channel_id, message.id).await {
            Ok(_) => debug!("pinned message {}", message.id),
            // Pinning is best effort.
            Err(e) => warn!("failed pinning message {}: {}", message.id, describe(&e)),
        }
    }

    state.set_message_id(&post.title, message.id.get());
    state.save().await
}

async fn find_message(
    http: &HttpClient,
    channel_id: Id<ChannelMarker>,
    me: Id<UserMarker>,
    post: &Post,
    state: &mut State,
) -> Result<Option<Message>> {
    if let Some(id) = state.message_id(&post.title).and_then(Id::new_checked) {
        match http.message(channel_id, id).await {
            Ok(response) => {
                let message = response.model().await?;
                if is_schedule(message.author.id, &message.embeds, me, &post.title) {
                    debug!("found remembered message {}", id);
                    return Ok(Some(message));
                }
                debug!("remembered message {} isn't a schedule post anymore", id);
            }
            Err(e) if on_lookup_error(status(&e)) == Recovery::Forget => {
                debug!("remembered message {} was deleted", id);
            }
            Err(e) => return Err(e).context("failed fetching the remembered message"),
        }
        state.remove(&post.title);
    }

    let pins = http
        .pins(channel_id)
        .await
        .context("failed listing pinned messages")?
        .models()
        .await?;
    if let Some(message) = pins
        .into_iter()
        .find(|m| is_schedule(m.author.id, &m.embeds, me, &post.title)) {
        debug!("found pinned message {}", message.id);
        return Ok(Some(message));
    }

    let recent = http
        .channel_messages(channel_id)
        .limit(RECENT_LIMIT)?
        .await
        .context("failed listing recent messages")?
        .models()
        .await?;
    if let Some(message) = recent
        .into_iter()
        .find(|m| is_schedule(m.author.id, &m.embeds, me, &post.title)) {
        debug!("found recent message {}", message.id);
        return Ok(Some(message));
    }

    Ok(None)
}

/// A message is ours if the bot wrote it and its first embed carries the schedule title.
fn is_schedule(
    author: Id<UserMarker>,
    embeds: &[Embed],
    me: Id<UserMarker>,
    title: &str,
) -> bool {
    author == me
        && embeds
            .first()
            .and_then(|e| e.title.as_deref())
            .map_or(false, |t| t == title)
}

/// HTTP status of a failed Discord request, if Discord answered at all.
fn status(e: &twilight_http::Error) -> Option<u16> {
    match e.kind() {
        ErrorType::Response { status, .. } => Some(status.get()),
        _ => None,
    }
}

/// Status and response body of a failed request, for the logs.
fn describe(e: &twilight_http::Error) -> String {
    match e.kind() {
        ErrorType::Response { body, status, .. } => {
            format!("{} {}", status.get(), String::from_utf8_lossy(body))
        }
        _ => e.to_string(),
    }
}

fn status_any(e: &Error) -> Option<u16> {
    e.downcast_ref::<twilight_http::Error>().and_then(status)
}

fn describe_any(e: &Error) -> String {
    match e.downcast_ref::<twilight_http::Error>() {
        Some(e) => describe(e),
        None => format!("{:#}", e),
    }
}

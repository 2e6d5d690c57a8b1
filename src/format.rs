//! Rendering of the event list into Discord message content.

use anyhow::Result;
use chrono::{DateTime, Utc};
use twilight_model::channel::message::Embed;
use twilight_model::util::Timestamp;
use twilight_util::builder::embed::{EmbedBuilder, EmbedFooterBuilder};

use crate::models::{EventSighting, Status};
use crate::settings::{Message, Style};

/// Discord's limit for embed descriptions.
const DESCRIPTION_LIMIT: usize = 4096;
/// Plain text posts are kept well below Discord's 2000 character limit.
const PLAIN_LIMIT: usize = 1800;

/// Turn a `HH:MM:SS` countdown into text. Seconds round to the nearest minute.
pub fn countdown_text(h: u64, m: u64, s: u64) -> String {
    let minutes = h * 60 + m + u64::from(s >= 30);

    if minutes == 0 {
        return "NOW ACTIVE".to_owned();
    }
    if minutes < 60 {
        return plural(minutes, "minute");
    }

    let (hours, minutes) = (minutes / 60, minutes % 60);
    if minutes == 0 {
        plural(hours, "hour")
    } else {
        format!("{} {}", plural(hours, "hour"), plural(minutes, "minute"))
    }
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("{} {}", count, unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

/// Render a status. `now` anchors relative timestamps.
pub fn status_text(status: &Status, style: Style, now: DateTime<Utc>) -> String {
    match *status {
        Status::Active => "NOW ACTIVE".to_owned(),
        Status::Remaining(remaining) => {
            let secs = remaining.as_secs();
            match style {
                Style::Countdown => countdown_text(secs / 3600, secs / 60 % 60, secs % 60),
                Style::Relative => format!("<t:{}:R>", now.timestamp() + secs as i64),
            }
        }
        Status::At(time) => format!("at {} (server time)", time.format("%H:%M")),
    }
}

/// The bullet list of events. The list is capped at `max_events` entries and the result at the
/// embed description limit.
pub fn describe(events: &[EventSighting], settings: &Message, now: DateTime<Utc>) -> String {
    if events.is_empty() {
        return "No events found.".to_owned();
    }

    let lines = events
        .iter()
        .take(settings.max_events)
        .map(|e| format!("• {} : {}", e.name, status_text(&e.status, settings.style, now)))
        .collect::<Vec<_>>()
        .join("\n");

    truncate(&lines, DESCRIPTION_LIMIT)
}

/// The schedule as embed, the preferred message format.
pub fn embed(description: &str, settings: &Message, now: DateTime<Utc>) -> Result<Embed> {
    let mut builder = EmbedBuilder::new()
        .title(&settings.title)
        .description(description)
        .footer(EmbedFooterBuilder::new(&settings.footer));

    if settings.timestamp {
        builder = builder.timestamp(Timestamp::from_secs(now.timestamp())?);
    }

    Ok(builder.validate()?.build())
}

/// The schedule as plain message text, used when an embed gets rejected.
pub fn plain(description: &str, settings: &Message) -> String {
    truncate(&format!("**{}**\n{}", settings.title, description), PLAIN_LIMIT)
}

/// Cut the text to at most `limit` characters, marking the cut with an ellipsis.
fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_owned();
    }

    let mut cut = text.chars().take(limit - 1).collect::<String>();
    cut.push('…');
    cut
}

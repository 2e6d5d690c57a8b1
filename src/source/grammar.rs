//! Patterns recognized in the text of a single event block.
//!
//! A block is the collapsed text of one element (or one line) of the events panel, for example
//! `Bifrost (20:00) 01:23:45` or `Lunar War NOW ACTIVE`. The recognized parts are:
//!
//! - `NOW ACTIVE`, case insensitive, any whitespace between the words.
//! - A countdown `HH:MM:SS`. If there are several, the last one counts.
//! - A trailing scheduled server time `(HH:MM)` right after the name.
//! - A countdown label like `Starts in` or `Time left` in front of the countdown.
//!
//! Whatever is left after removing these is the event name.

use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::NaiveTime;
use regex::Regex;

use crate::models::{EventSighting, Status};

static HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUPCOMING\s+EVENTS\b").unwrap());
static ACTIVE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)NOW\s+ACTIVE").unwrap());
static COUNTDOWN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{2}):(\d{2}):(\d{2})\b").unwrap());
static SCHEDULED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*?)\((\d{2}):(\d{2})\)$").unwrap());
static LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(?:starts?|begins?|ends?|opens?|closes?)\s+(?:in|at)|remaining|time\s+left|countdown)$",
    )
    .unwrap()
});
static SERVER_TIME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^SERVER\s+TIME").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Whether the text contains the `UPCOMING EVENTS` panel header.
pub fn has_header(text: &str) -> bool {
    HEADER.is_match(text)
}

/// Whether the text carries a status marker at all. Text containing the header is never a block,
/// as it spans the whole panel.
pub fn is_block(text: &str) -> bool {
    !has_header(text) && (ACTIVE.is_match(text) || COUNTDOWN.is_match(text))
}

/// Collapse all runs of whitespace into single spaces and trim the ends.
pub fn collapse(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_owned()
}

/// Parse one block into a sighting. Returns `None` for blocks without a usable name or status.
pub fn parse_block(text: &str) -> Option<EventSighting> {
    let text = collapse(text);
    if has_header(&text) {
        return None;
    }

    let active = ACTIVE.is_match(&text);
    let countdown = COUNTDOWN.captures_iter(&text).last().and_then(|caps| {
        let h = caps[1].parse::<u64>().ok()?;
        let m = caps[2].parse::<u64>().ok()?;
        let s = caps[3].parse::<u64>().ok()?;
        Some(Duration::from_secs(h * 3600 + m * 60 + s))
    });

    let rest = ACTIVE.replace_all(&text, "");
    let rest = COUNTDOWN.replace_all(&rest, "");
    let rest = collapse(&rest);
    let unlabeled = LABEL.replace(trim_name(&rest), "");
    let rest = trim_name(&unlabeled);

    let (name, scheduled) = match SCHEDULED.captures(rest) {
        Some(caps) => (
            trim_name(&caps[1]).to_owned(),
            NaiveTime::from_hms_opt(caps[2].parse().ok()?, caps[3].parse().ok()?, 0),
        ),
        None => (rest.to_owned(), None),
    };

    if SERVER_TIME.is_match(&name) || name.chars().count() < 2 {
        return None;
    }

    let status = if active {
        Status::Active
    } else if let Some(remaining) = countdown {
        Status::Remaining(remaining)
    } else {
        Status::At(scheduled?)
    };

    Some(EventSighting { name, status })
}

fn trim_name(name: &str) -> &str {
    name.trim_matches(|c: char| c == '-' || c == '•' || c == ':' || c.is_whitespace())
}

/// Keeps sightings in order while dropping repeated names, compared case insensitively.
#[derive(Debug, Default)]
pub struct Collector {
    seen: HashSet<String>,
    events: Vec<EventSighting>,
}

impl Collector {
    /// Add a sighting, returning `false` if an event of the same name was already collected.
    pub fn push(&mut self, event: EventSighting) -> bool {
        if !self.seen.insert(event.name.to_lowercase()) {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn into_events(self) -> Vec<EventSighting> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remaining(h: u64, m: u64, s: u64) -> Status {
        Status::Remaining(Duration::from_secs(h * 3600 + m * 60 + s))
    }

    #[test]
    fn countdown_block() {
        let event = parse_block("  Bifrost \n 01:23:45 ").unwrap();
        assert_eq!(EventSighting::new("Bifrost", remaining(1, 23, 45)), event);
    }

    #[test]
    fn active_wins_over_countdown() {
        let event = parse_block("Lunar War now   active 00:00:00").unwrap();
        assert_eq!(EventSighting::new("Lunar War", Status::Active), event);
    }

    #[test]
    fn last_countdown_counts() {
        let event = parse_block("Castle Siege 12:00:00 - 00:45:10").unwrap();
        assert_eq!(EventSighting::new("Castle Siege", remaining(0, 45, 10)), event);
    }

    #[test]
    fn scheduled_time_is_stripped_from_name() {
        let event = parse_block("• Border Defence War (21:30) : 02:00:29").unwrap();
        assert_eq!(
            EventSighting::new("Border Defence War", remaining(2, 0, 29)),
            event
        );
    }

    #[test]
    fn countdown_label_is_stripped() {
        let event = parse_block("Bifrost Starts in 01:23:45").unwrap();
        assert_eq!(EventSighting::new("Bifrost", remaining(1, 23, 45)), event);

        let event = parse_block("Castle Siege (20:00) - time left: 00:10:00").unwrap();
        assert_eq!(EventSighting::new("Castle Siege", remaining(0, 10, 0)), event);

        assert_eq!(None, parse_block("Starts in 01:23:45"));
        assert_eq!(None, parse_block("Remaining: 00:05:00"));
    }

    #[test]
    fn label_words_inside_names_stay() {
        let event = parse_block("Countdown Arena 00:05:00").unwrap();
        assert_eq!("Countdown Arena", event.name);
    }

    #[test]
    fn scheduled_time_alone() {
        let event = parse_block("Juraid Mountain (19:00)").unwrap();
        assert_eq!(
            EventSighting::new(
                "Juraid Mountain",
                Status::At(NaiveTime::from_hms_opt(19, 0, 0).unwrap())
            ),
            event
        );
    }

    #[test]
    fn invalid_scheduled_time_is_dropped() {
        assert_eq!(None, parse_block("Juraid Mountain (27:00)"));
    }

    #[test]
    fn rejects_noise() {
        assert_eq!(None, parse_block("Server Time: 13:37:00"));
        assert_eq!(None, parse_block("UPCOMING EVENTS Bifrost 01:00:00"));
        assert_eq!(None, parse_block("X 01:00:00"));
        assert_eq!(None, parse_block(" - 01:00:00"));
        assert_eq!(None, parse_block("Just a name"));
    }

    #[test]
    fn block_detection() {
        assert!(is_block("Bifrost 01:00:00"));
        assert!(is_block("NOW ACTIVE"));
        assert!(!is_block("Upcoming Events Bifrost 01:00:00"));
        assert!(!is_block("Bifrost (20:00)"));
        assert!(!is_block("1:00:00"));
    }

    #[test]
    fn collector_dedupes_case_insensitively() {
        let mut collector = Collector::default();
        assert!(collector.push(EventSighting::new("Bifrost", Status::Active)));
        assert!(!collector.push(EventSighting::new("BIFROST", remaining(0, 1, 0))));
        assert!(collector.push(EventSighting::new("Lunar War", Status::Active)));

        let names: Vec<_> = collector
            .into_events()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(vec!["Bifrost", "Lunar War"], names);
    }
}

use std::time::Duration;

use chrono::NaiveTime;

/// A single event as it was seen on the schedule page during one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventSighting {
    pub name: String,
    pub status: Status,
}

/// Where an event currently stands, as far as the page tells us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The page marks the event as `NOW ACTIVE`.
    Active,
    /// A countdown until the event starts.
    Remaining(Duration),
    /// Only the scheduled server time is known.
    At(NaiveTime),
}

impl EventSighting {
    pub fn new(name: impl Into<String>, status: Status) -> Self {
        Self {
            name: name.into(),
            status,
        }
    }
}

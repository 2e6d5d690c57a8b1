//! The game server's event schedule page and everything needed to read it.

use anyhow::Result;
use log::info;

use crate::models::EventSighting;
use crate::settings::Source;

pub mod extract;
pub mod grammar;
mod render;

pub use render::fetch_page;

/// Fetch the schedule page and extract the listed events.
pub async fn scrape(source: &Source) -> Result<Vec<EventSighting>> {
    let html = fetch_page(source).await?;
    let events = extract::events(&html, source.strategy);
    info!("found {} events", events.len());

    Ok(events)
}

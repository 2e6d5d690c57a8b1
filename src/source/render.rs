//! Obtaining the HTML of the schedule page, either rendered by a headless browser or downloaded.

use std::fmt;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::Page;
use futures_util::{Stream, StreamExt};
use log::{debug, info, warn};
use tokio::time::{self, Instant};

use super::grammar;
use crate::settings::{Fetcher, Source};

/// Interval for checking whether the events panel was rendered.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Get the final HTML of the schedule page with the configured fetcher.
pub async fn fetch_page(source: &Source) -> Result<String> {
    match source.fetcher {
        Fetcher::Browser => render(source).await,
        Fetcher::Http => download(source).await,
    }
}

async fn render(source: &Source) -> Result<String> {
    let config = BrowserConfig::builder()
        .no_sandbox()
        .request_timeout(source.page_timeout)
        .build()
        .map_err(|e| anyhow!("invalid browser configuration: {}", e))?;

    debug!("launching headless browser");
    let (mut browser, mut handler) = Browser::launch(config)
        .await
        .context("failed launching headless Chromium")?;

    let handler = tokio::spawn(async move {
        let errors = drive(&mut handler).await;
        debug!("browser connection closed after {} handler errors", errors);
    });

    let result = match browser.new_page("about:blank").await {
        Ok(page) => load(&page, source).await,
        Err(e) => Err(e).context("failed opening a browser tab"),
    };

    if let Err(e) = browser.close().await {
        warn!("failed closing the browser: {}", e);
    }
    browser.wait().await.ok();
    handler.await.ok();

    result
}

/// Drive the CDP handler until the browser connection ends. A failed message is logged and the
/// connection keeps being served, as every page call waits on it. Returns the number of errors.
async fn drive<S, E>(mut events: S) -> usize
where
    S: Stream<Item = Result<(), E>> + Unpin,
    E: fmt::Display,
{
    let mut errors = 0;
    while let Some(event) = events.next().await {
        if let Err(e) = event {
            debug!("browser handler error: {}", e);
            errors += 1;
        }
    }
    errors
}

async fn load(page: &Page, source: &Source) -> Result<String> {
    info!("loading {}", source.url);
    time::timeout(source.page_timeout, page.goto(source.url.as_str()))
        .await
        .with_context(|| {
            format!(
                "page load of '{}' timed out after {}",
                source.url,
                humantime::format_duration(source.page_timeout)
            )
        })?
        .with_context(|| format!("failed loading '{}'", source.url))?;

    let deadline = Instant::now() + source.selector_timeout;
    loop {
        let text: String = page
            .evaluate("document.body ? document.body.innerText : ''")
            .await
            .context("failed reading the page text")?
            .into_value()
            .context("page text is not a string")?;

        if grammar::has_header(&text) {
            break;
        }
        if Instant::now() >= deadline {
            bail!(
                "no 'UPCOMING EVENTS' panel on '{}' after {}",
                source.url,
                humantime::format_duration(source.selector_timeout)
            );
        }

        time::sleep(POLL_INTERVAL).await;
    }

    debug!(
        "events panel found, settling for {}",
        humantime::format_duration(source.settle_delay)
    );
    time::sleep(source.settle_delay).await;

    page.content()
        .await
        .context("failed reading the rendered HTML")
}

async fn download(source: &Source) -> Result<String> {
    info!("downloading {}", source.url);
    let response = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(source.page_timeout)
        .build()?
        .get(&source.url)
        .send()
        .await
        .with_context(|| format!("failed requesting '{}'", source.url))?
        .error_for_status()?;

    Ok(response.text().await?)
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    #[tokio::test]
    async fn handler_errors_do_not_stop_the_connection() {
        let mut events = stream::iter(vec![Ok(()), Err("bad frame"), Ok(()), Err("late"), Ok(())]);

        assert_eq!(2, drive(&mut events).await);
        assert!(events.next().await.is_none());
    }
}

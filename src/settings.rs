//! Configuration of the scraper, its logging and the Discord delivery.

use std::env;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::de::{self, DeserializeOwned, Deserializer, Visitor};
use serde::Deserialize;
use simplelog::LevelFilter;
use tokio::fs;

/// Main structure that holds all the settings of the tool.
#[derive(Debug, Default)]
pub struct Settings {
    /// Logger specific configuration.
    pub logging: Logging,
    /// Where and how the event schedule page is read.
    pub source: Source,
    /// Look of the posted message.
    pub message: Message,
    /// Discord related settings.
    pub discord: Discord,
    /// Repeated runs in watch mode.
    pub schedule: Schedule,
}

/// All configuration for the logging, including different logging backends like a file or the
/// terminal.
#[derive(Debug, Deserialize)]
pub struct Logging {
    /// Logging settings for the terminal backend.
    pub terminal: Option<BaseLogger>,
    /// File backend settings.
    pub file: Option<FileLogger>,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            terminal: Some(BaseLogger {
                filter: LevelFilter::Info,
            }),
            file: None,
        }
    }
}

/// The base logger describes the very basic settings that apply to each logging backend.
#[derive(Debug, Deserialize)]
pub struct BaseLogger {
    /// Maximum logging level that the backend outputs.
    #[serde(with = "SerdeLevelFilter")]
    pub filter: LevelFilter,
}

/// Logging configuration specific to file backends.
#[derive(Debug, Deserialize)]
pub struct FileLogger {
    /// base logging backend configuration.
    #[serde(flatten)]
    pub base: BaseLogger,
    /// Location of the file to write logs to.
    pub path: PathBuf,
}

/// Settings for reading the event schedule page.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Source {
    /// Page that shows the "Upcoming Events" panel.
    pub url: String,
    pub fetcher: Fetcher,
    pub strategy: Strategy,
    /// Upper bound for the initial page load.
    #[serde(deserialize_with = "human_duration")]
    pub page_timeout: Duration,
    /// Upper bound for the events panel to show up after the page loaded.
    #[serde(deserialize_with = "human_duration")]
    pub selector_timeout: Duration,
    /// Fixed wait after the panel appeared, so client side countdowns get filled in.
    #[serde(deserialize_with = "human_duration")]
    pub settle_delay: Duration,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            url: "https://ko4fun.net/Features/EventSchedule".to_owned(),
            fetcher: Fetcher::Browser,
            strategy: Strategy::Auto,
            page_timeout: Duration::from_secs(60),
            selector_timeout: Duration::from_secs(60),
            settle_delay: Duration::from_secs(3),
        }
    }
}

/// How the page HTML is obtained.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Fetcher {
    /// Render the page in headless Chromium.
    Browser,
    /// Plain HTTP GET, for pages that render the panel server side.
    Http,
}

/// Which extraction heuristic turns the page into events.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Walk the DOM below the panel header.
    Dom,
    /// Scan the visible page text line by line.
    Text,
    /// DOM walk first, text scan if that found nothing.
    Auto,
}

/// Settings for the rendered Discord message.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Message {
    /// Embed title, also used as the key to find the message again.
    pub title: String,
    pub footer: String,
    /// Maximum number of events listed.
    pub max_events: usize,
    pub style: Style,
    /// Attach the time of the run as embed timestamp.
    pub timestamp: bool,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            title: "KO4Fun — Upcoming Events".to_owned(),
            footer: "Source: ko4fun.net • auto-updated".to_owned(),
            max_events: 10,
            style: Style::Countdown,
            timestamp: false,
        }
    }
}

/// Rendering of countdowns in the message.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    /// Plain text like `1 hour 5 minutes`.
    Countdown,
    /// Discord relative timestamp tags that count down on their own.
    Relative,
}

/// Configuration for the Discord API.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Discord {
    /// Webhook to post to when no bot is configured.
    pub webhook_url: Option<String>,
    /// A token to authenticate against the Discord API as a bot and send messages.
    pub bot_token: Option<String>,
    /// Channel the bot keeps the schedule message in.
    pub channel_id: Option<u64>,
    /// Pin the schedule message (bot only).
    pub pin: bool,
    /// Edit the previously posted webhook message instead of posting a new one.
    pub edit_existing: bool,
    /// Where posted message ids are remembered between runs.
    pub state_file: PathBuf,
}

impl Default for Discord {
    fn default() -> Self {
        Self {
            webhook_url: None,
            bot_token: None,
            channel_id: None,
            pin: true,
            edit_existing: false,
            state_file: PathBuf::from("state/messages.toml"),
        }
    }
}

/// Settings for watch mode.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Schedule {
    /// Cron expression (with seconds) for repeated runs.
    pub cron: Option<String>,
}

/// The resolved Discord delivery target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Webhook { url: String },
    Bot { token: String, channel_id: u64 },
}

/// A wrapper for the [LevelFilter] that allows to use it in [serde], as it doesn't provide support
/// for it out of the box.
#[derive(Deserialize)]
#[serde(remote = "LevelFilter", rename_all = "lowercase")]
enum SerdeLevelFilter {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// An intermediate structure for the main config file that allows to parse it separately from
/// the logging config and merge both into a single [Settings] structure later.
#[derive(Default, Deserialize)]
#[serde(default)]
struct Main {
    source: Source,
    message: Message,
    discord: Discord,
    schedule: Schedule,
}

impl Settings {
    /// Create a new instance of the settings and fill it with the configuration from the
    /// `log.toml` and `settings.toml` files in the given directory. Both files are optional. Source
    /// and auth related settings are overwritten by env vars if they exist.
    pub async fn new(dir: &Path) -> Result<Self> {
        let logging = load_toml(&dir.join("log.toml")).await?.unwrap_or_default();
        let Main {
            source,
            message,
            discord,
            schedule,
        } = load_toml(&dir.join("settings.toml")).await?.unwrap_or_default();

        let mut settings = Self {
            logging,
            source,
            message,
            discord,
            schedule,
        };
        settings.apply_env(|key| env::var(key).ok())?;

        Ok(settings)
    }

    /// Overwrite settings from environment variables. Empty values count as unset, which is what
    /// CI runners hand out for missing secrets.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        if let Some(url) = var("EVENT_URL") {
            self.source.url = url;
        }

        if let Some(webhook_url) = var("DISCORD_WEBHOOK_URL") {
            self.discord.webhook_url = Some(webhook_url);
        }

        if let Some(bot_token) = var("DISCORD_BOT_TOKEN") {
            self.discord.bot_token = Some(bot_token);
        }

        if let Some(channel_id) = var("DISCORD_CHANNEL_ID") {
            let channel_id = channel_id
                .parse()
                .with_context(|| format!("invalid DISCORD_CHANNEL_ID '{}'", channel_id))?;
            self.discord.channel_id = Some(channel_id);
        }

        Ok(())
    }

    /// Pick the delivery target. A bot with a channel wins over a webhook.
    pub fn target(&self) -> Result<Target> {
        let discord = &self.discord;

        if let (Some(token), Some(channel_id)) = (&discord.bot_token, discord.channel_id) {
            return Ok(Target::Bot {
                token: token.clone(),
                channel_id,
            });
        }

        if let Some(url) = &discord.webhook_url {
            return Ok(Target::Webhook { url: url.clone() });
        }

        if discord.bot_token.is_some() {
            bail!("a bot token is configured but no channel id (DISCORD_CHANNEL_ID)");
        }

        bail!("no Discord target configured, set DISCORD_WEBHOOK_URL or DISCORD_BOT_TOKEN")
    }
}

/// Load any deserializable structure from the given file path as TOML and provide helpful error
/// messages in case something goes wrong during the process. A missing file is not an error.
async fn load_toml<T>(path: &Path) -> Result<Option<T>>
where
    T: DeserializeOwned,
{
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed loading config file at '{}'", path.display()))
        }
    };

    toml::from_str(&content)
        .map(Some)
        .with_context(|| format!("failed to parse TOML config from '{}'", path.display()))
}

/// Deserialize a duration written in human readable form like `90s` or `1m 30s`.
fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_str(DurationVisitor)
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a duration like \"60s\" or \"1m 30s\"")
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        humantime::parse_duration(v).map_err(|e| E::custom(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn parses_partial_config() {
        let main: Main = toml::from_str(
            r#"
            [source]
            fetcher = "http"
            settle_delay = "1m 30s"

            [message]
            style = "relative"
            max_events = 5
            "#,
        )
        .unwrap();

        assert_eq!(Fetcher::Http, main.source.fetcher);
        assert_eq!(Strategy::Auto, main.source.strategy);
        assert_eq!(Duration::from_secs(90), main.source.settle_delay);
        assert_eq!(Duration::from_secs(60), main.source.page_timeout);
        assert_eq!(Style::Relative, main.message.style);
        assert_eq!(5, main.message.max_events);
        assert_eq!("KO4Fun — Upcoming Events", main.message.title);
        assert!(main.discord.pin);
    }

    #[test]
    fn rejects_bad_duration() {
        let res = toml::from_str::<Main>("[source]\npage_timeout = \"soon\"\n");
        assert!(res.is_err());
    }

    #[test]
    fn parses_log_config() {
        let logging: Logging = toml::from_str(
            r#"
            [terminal]
            filter = "warn"

            [file]
            filter = "trace"
            path = "ko_events.log"
            "#,
        )
        .unwrap();

        assert_eq!(LevelFilter::Warn, logging.terminal.unwrap().filter);
        let file = logging.file.unwrap();
        assert_eq!(LevelFilter::Trace, file.base.filter);
        assert_eq!(PathBuf::from("ko_events.log"), file.path);
    }

    #[test]
    fn env_overrides_and_ignores_empty() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("EVENT_URL", " https://example.com/events "),
                ("DISCORD_WEBHOOK_URL", ""),
                ("DISCORD_CHANNEL_ID", "123456789"),
            ]))
            .unwrap();

        assert_eq!("https://example.com/events", settings.source.url);
        assert_eq!(None, settings.discord.webhook_url);
        assert_eq!(Some(123456789), settings.discord.channel_id);
    }

    #[test]
    fn env_rejects_bad_channel_id() {
        let mut settings = Settings::default();
        assert!(settings
            .apply_env(env(&[("DISCORD_CHANNEL_ID", "general")]))
            .is_err());
    }

    #[test]
    fn bot_wins_over_webhook() {
        let mut settings = Settings::default();
        settings.discord.webhook_url = Some("https://discord.com/api/webhooks/1/abc".to_owned());
        assert!(matches!(settings.target(), Ok(Target::Webhook { .. })));

        settings.discord.bot_token = Some("token".to_owned());
        settings.discord.channel_id = Some(42);
        assert_eq!(
            Target::Bot {
                token: "token".to_owned(),
                channel_id: 42
            },
            settings.target().unwrap()
        );
    }

    #[test]
    fn no_target_is_an_error() {
        let mut settings = Settings::default();
        assert!(settings.target().is_err());

        settings.discord.bot_token = Some("token".to_owned());
        assert!(settings.target().is_err());
    }

    #[tokio::test]
    async fn missing_files_give_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let logging: Option<Logging> = load_toml(&dir.path().join("log.toml")).await.unwrap();
        assert!(logging.is_none());
    }
}

//! Message ids remembered between runs, so the schedule message gets edited instead of reposted.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// Posted messages, keyed by embed title.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct State {
    #[serde(skip)]
    path: PathBuf,
    #[serde(default)]
    messages: BTreeMap<String, u64>,
}

impl State {
    /// Load the state file. A missing file is an empty state.
    pub async fn load(path: &Path) -> Result<Self> {
        let mut state = match fs::read_to_string(path).await {
            Ok(content) => toml::from_str(&content)
                .with_context(|| format!("failed to parse state file '{}'", path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed reading state file '{}'", path.display()))
            }
        };
        state.path = path.to_owned();

        Ok(state)
    }

    pub fn message_id(&self, title: &str) -> Option<u64> {
        self.messages.get(title).copied()
    }

    pub fn set_message_id(&mut self, title: &str, id: u64) {
        self.messages.insert(title.to_owned(), id);
    }

    pub fn remove(&mut self, title: &str) -> Option<u64> {
        self.messages.remove(title)
    }

    /// Write the whole state back to the file it was loaded from.
    pub async fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("failed creating state directory '{}'", parent.display())
            })?;
        }

        let content = toml::to_string(self).context("failed to serialize state")?;
        fs::write(&self.path, content)
            .await
            .with_context(|| format!("failed writing state file '{}'", self.path.display()))
    }
}

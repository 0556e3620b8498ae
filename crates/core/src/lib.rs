//! Trading-day market commentary: the document codec, the event merge engine, the decoded
//! record cache, and the collaborators around them.

pub mod cache;
pub mod document;
pub mod domain;
pub mod error;
pub mod llm;
pub mod merge;
pub mod notify;
pub mod service;
pub mod storage;
pub mod time;

pub use error::{Error, Result};

pub mod config {
    use anyhow::Context;
    use std::time::Duration;

    const DEFAULT_DOCUMENTS_DIR: &str = "./data/trading_days";
    const DEFAULT_CACHE_TTL_SECS: u64 = 300;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub anthropic_api_key: Option<String>,
        pub sentry_dsn: Option<String>,
        pub documents_dir: String,
        pub cache_ttl_secs: u64,
        pub chat_webhook_url: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let cache_ttl_secs = match std::env::var("DOCUMENT_CACHE_TTL_SECS") {
                Ok(s) => s
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("DOCUMENT_CACHE_TTL_SECS must be a number of seconds (got {s:?})"))?,
                Err(_) => DEFAULT_CACHE_TTL_SECS,
            };

            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                anthropic_api_key: non_empty_var("ANTHROPIC_API_KEY"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                documents_dir: non_empty_var("DOCUMENTS_DIR")
                    .unwrap_or_else(|| DEFAULT_DOCUMENTS_DIR.to_string()),
                cache_ttl_secs,
                chat_webhook_url: non_empty_var("CHAT_WEBHOOK_URL"),
            })
        }

        /// Zero disables the document cache.
        pub fn cache_ttl(&self) -> Duration {
            Duration::from_secs(self.cache_ttl_secs)
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_anthropic_api_key(&self) -> anyhow::Result<&str> {
            self.anthropic_api_key
                .as_deref()
                .context("ANTHROPIC_API_KEY is required")
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

use std::env;

/// Indexing knobs. These can be overridden by env vars but do not require
/// any user-authored config files.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// How many days of history the initial backfill covers.
    pub initial_index_interval_days: i64,
    /// Mails per range load.
    pub page_size: usize,
    /// In-flight body/attachment fetches per page.
    pub mail_fetch_concurrency: usize,
}

impl IndexConfig {
    pub fn load() -> Self {
        let defaults = Self::default();
        let initial_index_interval_days = env::var("MAILDEX_INITIAL_INTERVAL_DAYS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(defaults.initial_index_interval_days);
        let page_size = env::var("MAILDEX_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.page_size);
        let mail_fetch_concurrency = env::var("MAILDEX_FETCH_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.mail_fetch_concurrency);

        Self {
            initial_index_interval_days,
            page_size,
            mail_fetch_concurrency,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            initial_index_interval_days: 28,
            page_size: 500,
            mail_fetch_concurrency: 5,
        }
    }
}

use std::path::{Path, PathBuf};

pub const DEFAULT_LEDGER_PATH: &str = "ledger.db";
pub const DEFAULT_RECENT_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub path: PathBuf,
    /// Use a throwaway database that is removed on drop.
    pub temporary: bool,
    /// Flush to disk before a mutation is acknowledged.
    pub flush_on_write: bool,
    pub recent_limit: usize,
}

impl LedgerConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn temporary() -> Self {
        Self {
            temporary: true,
            flush_on_write: false,
            ..Self::default()
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn with_flush_on_write(mut self, flush: bool) -> Self {
        self.flush_on_write = flush;
        self
    }

    pub fn with_recent_limit(mut self, limit: usize) -> Self {
        self.recent_limit = limit;
        self
    }

    pub(crate) fn open_db(&self) -> sled::Result<sled::Db> {
        if self.temporary {
            return sled::Config::new().temporary(true).open();
        }
        sled::open(&self.path)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_LEDGER_PATH),
            temporary: false,
            flush_on_write: true,
            recent_limit: DEFAULT_RECENT_LIMIT,
        }
    }
}

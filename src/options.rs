use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub path: PathBuf,
    pub cache_capacity: Option<u64>,
    pub flush_every_ms: Option<u64>,
}

impl IndexOptions {
    pub fn new(path: impl Into<PathBuf>) -> IndexOptions {
        IndexOptions { path: path.into(), cache_capacity: None, flush_every_ms: None }
    }

    pub fn cache_capacity(mut self, bytes: u64) -> IndexOptions {
        self.cache_capacity = Some(bytes);
        self
    }

    // None (the default) uses sled's own flush heuristics.
    pub fn flush_every_ms(mut self, ms: u64) -> IndexOptions {
        self.flush_every_ms = Some(ms);
        self
    }

    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let mut config = sled::Config::new().path(&self.path);
        if let Some(cap) = self.cache_capacity {
            config = config.cache_capacity(cap);
        }
        if let Some(ms) = self.flush_every_ms {
            config = config.flush_every_ms(Some(ms));
        }
        config
    }
}

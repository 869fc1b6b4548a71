use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,
    pub import: ImportConfig,
    pub upload_max_bytes: usize,
}

/// Tunables for the import pipeline and orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportConfig {
    /// Batch size used when a request does not name one.
    pub default_batch_size: usize,
    /// Largest batch size a caller may request.
    pub max_batch_size: usize,
    /// Pause after every batch write; zero means a bare yield.
    pub batch_pause_ms: u64,
    /// Jobs allowed to be `processing` at the same time.
    pub max_concurrent_jobs: usize,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 1000,
            max_batch_size: 10_000,
            batch_pause_ms: 100,
            max_concurrent_jobs: 4,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("import", &self.import)
            .field("upload_max_bytes", &self.upload_max_bytes)
            .finish()
    }
}

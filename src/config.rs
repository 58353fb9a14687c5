use crate::error::{CoreError, Result};

/// Runtime configuration for the delivery pipeline, read from the environment.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub database_url: String,
    /// Directory used by the local blob store for XML and CDR files
    pub storage_dir: String,
    pub worker: WorkerConfig,
    /// Hard ceiling on delivery re-attempts after the initial dispatch
    pub retry_max_attempts: i32,
    /// Delay before a ticket issued by SUNAT is checked for the first time
    pub ticket_check_delay_secs: u64,
    /// HTTP timeout for calls against the SUNAT web service
    pub request_timeout_secs: u64,
}

/// Queue consumer tuning
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Messages fetched per poll
    pub batch_size: i32,
    /// pgmq visibility timeout; an unacknowledged message reappears after this
    pub visibility_timeout_secs: i32,
    /// Sleep between polls when a queue is empty
    pub poll_interval_ms: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/sunat_sender_development".to_string(),
            storage_dir: "storage".to_string(),
            worker: WorkerConfig {
                batch_size: 10,
                visibility_timeout_secs: 120,
                poll_interval_ms: 500,
            },
            retry_max_attempts: 3,
            ticket_check_delay_secs: 30,
            request_timeout_secs: 30,
        }
    }
}

impl SenderConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(dir) = std::env::var("SUNAT_SENDER_STORAGE_DIR") {
            config.storage_dir = dir;
        }

        if let Ok(batch) = std::env::var("SUNAT_SENDER_BATCH_SIZE") {
            config.worker.batch_size = batch
                .parse()
                .map_err(|e| CoreError::configuration(format!("Invalid batch_size: {e}")))?;
        }

        if let Ok(vt) = std::env::var("SUNAT_SENDER_VISIBILITY_TIMEOUT") {
            config.worker.visibility_timeout_secs = vt.parse().map_err(|e| {
                CoreError::configuration(format!("Invalid visibility_timeout: {e}"))
            })?;
        }

        if let Ok(poll) = std::env::var("SUNAT_SENDER_POLL_INTERVAL_MS") {
            config.worker.poll_interval_ms = poll
                .parse()
                .map_err(|e| CoreError::configuration(format!("Invalid poll_interval_ms: {e}")))?;
        }

        if let Ok(retries) = std::env::var("SUNAT_SENDER_RETRY_MAX_ATTEMPTS") {
            config.retry_max_attempts = retries
                .parse()
                .map_err(|e| CoreError::configuration(format!("Invalid retry_max_attempts: {e}")))?;
        }

        if let Ok(delay) = std::env::var("SUNAT_SENDER_TICKET_CHECK_DELAY") {
            config.ticket_check_delay_secs = delay.parse().map_err(|e| {
                CoreError::configuration(format!("Invalid ticket_check_delay: {e}"))
            })?;
        }

        if let Ok(timeout) = std::env::var("SUNAT_SENDER_REQUEST_TIMEOUT") {
            config.request_timeout_secs = timeout
                .parse()
                .map_err(|e| CoreError::configuration(format!("Invalid request_timeout: {e}")))?;
        }

        Ok(config)
    }
}

//! Connector configuration
use crate::att::{ATT_DEFAULT_MTU, DEFAULT_REPORT_ID};
use std::time::Duration;

/// Default time to wait for the response to one request
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout of one bulk-out transfer
pub const DEFAULT_BULK_WRITE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Connector configuration
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Report id written in front of every outbound PDU
    pub report_id: u8,
    /// How long the send pump waits for a response before giving up
    pub transaction_timeout: Duration,
    /// Timeout handed to every bulk-out transfer
    pub bulk_write_timeout: Duration,
    /// Upper bound of one blocking read, so readers notice a stop request
    pub read_poll_interval: Duration,
    /// Pause after a failed or empty read
    pub read_error_backoff: Duration,
    /// Maximum number of command executor workers
    pub command_workers: usize,
    /// How long an idle command worker lingers before exiting
    pub command_keep_alive: Duration,
    /// Receive MTU announced in Exchange MTU requests
    pub client_mtu: u16,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            report_id: DEFAULT_REPORT_ID,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
            bulk_write_timeout: DEFAULT_BULK_WRITE_TIMEOUT,
            read_poll_interval: Duration::from_millis(100),
            read_error_backoff: Duration::from_millis(10),
            command_workers: 10,
            command_keep_alive: Duration::from_secs(1),
            client_mtu: ATT_DEFAULT_MTU,
        }
    }
}

impl ConnectorConfig {
    /// Set the report id
    pub fn with_report_id(mut self, report_id: u8) -> Self {
        self.report_id = report_id;
        self
    }

    /// Set the transaction timeout
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Set the bulk-out transfer timeout
    pub fn with_bulk_write_timeout(mut self, timeout: Duration) -> Self {
        self.bulk_write_timeout = timeout;
        self
    }

    /// Set the reader poll interval
    pub fn with_read_poll_interval(mut self, interval: Duration) -> Self {
        self.read_poll_interval = interval;
        self
    }

    /// Set the back-off after failed reads
    pub fn with_read_error_backoff(mut self, backoff: Duration) -> Self {
        self.read_error_backoff = backoff;
        self
    }

    /// Set the command worker limit (at least one)
    pub fn with_command_workers(mut self, workers: usize) -> Self {
        self.command_workers = workers.max(1);
        self
    }

    /// Set the idle keep-alive of command workers
    pub fn with_command_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.command_keep_alive = keep_alive;
        self
    }

    /// Set the announced receive MTU (never below the ATT default)
    pub fn with_client_mtu(mut self, mtu: u16) -> Self {
        self.client_mtu = mtu.max(ATT_DEFAULT_MTU);
        self
    }
}

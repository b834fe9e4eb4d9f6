use std::time::Duration;

const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for connecting and discovering services.
    pub(crate) connection_timeout: Duration,
    /// Deadline applied to every read, write and subscription change.
    pub(crate) operation_timeout: Duration,
    /// Disconnect when an operation times out or the device rejects it.
    pub(crate) disconnect_on_error: bool,
    /// Number of session events buffered for slow event streams.
    pub(crate) event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            disconnect_on_error: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Give up connecting after given duration
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Default deadline for GATT operations
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Tear the connection down after a failed or timed out operation
    pub fn disconnect_on_error(mut self, enabled: bool) -> Self {
        self.disconnect_on_error = enabled;
        self
    }

    /// Capacity of the session event channel
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = SessionConfig::default()
            .connection_timeout(Duration::from_secs(3))
            .disconnect_on_error(true)
            .event_capacity(0);

        assert_eq!(config.connection_timeout, Duration::from_secs(3));
        assert_eq!(config.operation_timeout, DEFAULT_OPERATION_TIMEOUT);
        assert!(config.disconnect_on_error);
        assert_eq!(config.event_capacity, 1);
    }
}

use std::time::Duration;

/// Tunables for the session coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How often live counters are polled while connected
    pub sample_interval: Duration,

    /// EMA factor for displayed rates, in (0, 1]; 1.0 disables smoothing
    pub smoothing: f64,

    /// Upper bound on how long a consent prompt may suspend a connect
    pub permission_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_secs(1),
            smoothing: 0.5,
            permission_timeout: Duration::from_secs(120),
        }
    }
}

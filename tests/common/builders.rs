//! Test data builders for configurations and device scripts

use std::path::Path;
use telemetry_rs::config::AppConfig;

/// Builder for run configurations that suit in-memory devices
pub struct ConfigBuilder {
    config: AppConfig,
}

impl ConfigBuilder {
    /// Fast retries, no settle delay, export into `dir`
    pub fn new(dir: &Path) -> Self {
        let mut config = AppConfig::default();
        config.link.port = "sim".to_string();
        config.link.retry_interval_ms = 1;
        config.link.settle_delay_ms = 0;
        config.export.path = dir.join("received_data.txt");
        config.monitor.poll_interval_ms = 5;
        Self { config }
    }

    pub fn stop_grace_ms(mut self, grace: Option<u64>) -> Self {
        self.config.shutdown.stop_grace_ms = grace;
        self
    }

    pub fn max_open_attempts(mut self, attempts: u32) -> Self {
        self.config.link.max_open_attempts = Some(attempts);
        self
    }

    pub fn window(mut self, max_time_ms: u64, stride_ms: u64) -> Self {
        self.config.buffer.max_time_ms = max_time_ms;
        self.config.buffer.sample_stride_ms = stride_ms;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

/// Device lines for `count` samples, `step_ms` apart, in firmware format
pub fn sample_lines(count: u64, step_ms: u64) -> Vec<String> {
    (0..count)
        .map(|i| format!("{:.4},{:.4},{},", 10.0 + i as f64 * 0.5, 20.0 + i as f64, i * step_ms))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let dir = std::env::temp_dir();
        let config = ConfigBuilder::new(&dir).window(1000, 10).build();

        assert_eq!(config.buffer.capacity(), 100);
        assert_eq!(config.link.settle_delay_ms, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sample_lines() {
        let lines = sample_lines(2, 50);
        assert_eq!(lines, vec!["10.0000,20.0000,0,", "10.5000,21.0000,50,"]);
    }
}

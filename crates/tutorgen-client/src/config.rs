use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api";
pub const DEFAULT_STATE_ROOT: &str = ".tutorgen";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    /// Directory backing the durable key-value scope.
    pub state_root: PathBuf,
    pub refresh_margin: chrono::Duration,
    /// Token lifetime assumed when a login response carries no expiry.
    pub default_token_ttl: chrono::Duration,
    pub poll_interval: Duration,
    pub completion_linger: Duration,
    pub request_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, state_root: impl Into<PathBuf>) -> Self {
        Self {
            base_url: base_url.into(),
            state_root: state_root.into(),
            refresh_margin: chrono::Duration::minutes(2),
            default_token_ttl: chrono::Duration::days(7),
            poll_interval: Duration::from_secs(10),
            completion_linger: Duration::from_secs(3),
            request_timeout: None,
        }
    }

    pub fn refresh_margin(mut self, margin: chrono::Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn default_token_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.default_token_ttl = ttl;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn completion_linger(mut self, linger: Duration) -> Self {
        self.completion_linger = linger;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL, DEFAULT_STATE_ROOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_backend_contract() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.state_root, PathBuf::from(".tutorgen"));
        assert_eq!(config.refresh_margin, chrono::Duration::minutes(2));
        assert_eq!(config.default_token_ttl, chrono::Duration::days(7));
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.completion_linger, Duration::from_secs(3));
        assert_eq!(config.request_timeout, None);
    }

    #[test]
    fn setters_override_defaults() {
        let config = ClientConfig::new("http://api.test", "/tmp/state")
            .poll_interval(Duration::from_secs(2))
            .request_timeout(Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.refresh_margin, chrono::Duration::minutes(2));
    }
}

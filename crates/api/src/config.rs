/// Connection settings for one chat backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub base_url: String,
    pub user_id: i64,
}

impl BackendConfig {
    /// Creates a config with a normalized base URL (no trailing slash).
    pub fn new(base_url: impl Into<String>, user_id: i64) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            user_id,
        }
    }

    /// Joins an API path onto the base URL. `path` must start with `/`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_normalized_without_trailing_slash() {
        let config = BackendConfig::new(" http://localhost:8080/ ", 1);
        assert_eq!(config.base_url, "http://localhost:8080");
        assert_eq!(
            config.endpoint("/api/sse/subscribe"),
            "http://localhost:8080/api/sse/subscribe"
        );
    }
}

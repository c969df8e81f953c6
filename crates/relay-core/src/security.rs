use secrecy::{ExposeSecret, SecretString};

/// Number of leading characters of a credential that may appear in logs.
const LOG_PREFIX_CHARS: usize = 3;

/// Wraps an API key with secrecy protection (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct ApiKey(pub SecretString);

impl ApiKey {
    /// Wrap a raw key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }

    /// Short non-identifying prefix for logs, e.g. `"sk-..."`.
    pub fn log_prefix(&self) -> String {
        let prefix: String = self.0.expose_secret().chars().take(LOG_PREFIX_CHARS).collect();
        format!("{prefix}...")
    }

    /// The raw key, for building the upstream `Authorization` header only.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Whether the key is empty or whitespace.
    pub fn is_blank(&self) -> bool {
        self.0.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

//! Connection settings for the REST client

use std::time::Duration;
use url::Url;

use crate::error::RestClientResult;

/// Port the desktop app's local task server listens on in development
pub const DEFAULT_BASE_URL: &str = "http://localhost:1450";

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings used to build a [`crate::RestClient`].
///
/// There is deliberately no overall request timeout: task streams stay open
/// for as long as the run lasts, and a dead connection surfaces as a
/// transport error instead.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: Url,
    pub user_agent: String,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            user_agent: format!("dai-client/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Parse `base_url` and use defaults for everything else
    pub fn from_url(base_url: &str) -> RestClientResult<Self> {
        Ok(Self::new(Url::parse(base_url)?))
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

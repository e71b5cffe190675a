use reqwest::Client;
use std::time::Duration;

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Build the HTTP client used for upstream media fetches.
///
/// Only the connect phase is bounded: a total request timeout would cut
/// long-lived media responses mid-body.
pub fn default_client() -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(DEFAULT_UA)
        .connect_timeout(Duration::from_secs(10))
        .tcp_nodelay(true)
        .pool_max_idle_per_host(20)
        .build()
}

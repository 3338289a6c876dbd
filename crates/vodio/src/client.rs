use reqwest::Client;
use reqwest::redirect::Policy;

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Build the shared HTTP client for a session.
///
/// One client serves the manifest fetch and every worker, so segment
/// requests to the same host reuse pooled connections.
pub fn build_client(config: &EngineConfig) -> Result<Client, EngineError> {
    let mut headers = EngineConfig::get_default_headers();
    for (name, value) in config.headers.iter() {
        headers.insert(name.clone(), value.clone());
    }

    let client = Client::builder()
        .user_agent(&config.user_agent)
        .default_headers(headers)
        .connect_timeout(config.connect_timeout)
        .redirect(Policy::limited(10))
        .build()?;

    Ok(client)
}

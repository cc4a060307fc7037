use tracing::{debug, info};

use crate::errors::PipelineError;

pub fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Read a definition's text from a local file or download it over http(s).
pub async fn load_definition(location: &str) -> Result<String, PipelineError> {
    let invalid = |message: String| PipelineError::InvalidDefinition {
        location: location.to_string(),
        message,
    };

    if !is_url(location) {
        debug!(path = location, "Loading API definition from file");
        return tokio::fs::read_to_string(location)
            .await
            .map_err(|e| invalid(e.to_string()));
    }

    info!(url = location, "Downloading API definition");
    let client = reqwest::Client::new();
    let resp = client
        .get(location)
        .header("Accept", "application/json, application/yaml, text/yaml")
        .send()
        .await
        .map_err(|e| invalid(format!("request failed: {}", e)))?
        .error_for_status()
        .map_err(|e| invalid(format!("download failed: {}", e)))?;
    resp.text()
        .await
        .map_err(|e| invalid(format!("failed to read response body: {}", e)))
}

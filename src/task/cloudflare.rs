//! Cloudflare cache purge API client.

use serde::{Deserialize, Serialize};

use crate::task::TaskError;

#[derive(Serialize)]
struct PurgeRequest<'a> {
    files: &'a [String],
}

#[derive(Deserialize)]
struct ApiResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Purges URLs from one Cloudflare zone.
pub struct CloudflareClient {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
    zone_id: String,
}

impl CloudflareClient {
    pub fn new(
        client: reqwest::Client,
        api_base: &str,
        token: Option<String>,
        zone_id: &str,
    ) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            zone_id: zone_id.to_string(),
        }
    }

    pub async fn purge_files(&self, files: &[String]) -> Result<(), TaskError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| TaskError::Config("cloudflare token not configured".to_string()))?;

        let url = format!("{}/zones/{}/purge_cache", self.api_base, self.zone_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&PurgeRequest { files })
            .send()
            .await
            .map_err(|e| TaskError::Delivery(e.to_string()))?;

        let status = response.status();
        let body: ApiResponse = response
            .json()
            .await
            .map_err(|e| TaskError::Delivery(format!("cloudflare responded {status}: {e}")))?;

        if status.is_success() && body.success {
            return Ok(());
        }
        let errors = body
            .errors
            .iter()
            .map(|e| format!("{} {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(TaskError::Delivery(format!("cloudflare responded {status}: {errors}")))
    }
}

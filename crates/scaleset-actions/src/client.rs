//! HTTP client for the Actions service scale-set endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::ActionsService;
use crate::error::ActionsError;

/// Talks to `{base_url}/runners/{id}` with a bearer token.
pub struct HttpActionsClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpActionsClient {
    pub fn new(base_url: &str, token: String) -> Result<Self, ActionsError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ActionsError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn runner_url(&self, runner_id: i64) -> String {
        format!("{}/runners/{}", self.base_url, runner_id)
    }
}

#[async_trait]
impl ActionsService for HttpActionsClient {
    async fn remove_runner(&self, runner_id: i64) -> Result<(), ActionsError> {
        let url = self.runner_url(runner_id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ActionsError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!(runner_id, "runner removed from actions service");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let err = ActionsError::from_response(status.as_u16(), &body);
        if !err.is_job_still_running() {
            warn!(runner_id, status = status.as_u16(), error = %err, "runner removal rejected");
        }
        Err(err)
    }
}

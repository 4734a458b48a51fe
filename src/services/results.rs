//! Hands final standings to the external results collaborator.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dto::session::FinalResultsPayload;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin client around the collaborator's results endpoint.
///
/// Delivery is best-effort: the session closes and its memory is reclaimed
/// whether or not the collaborator accepted the payload, so failures are
/// logged instead of propagated.
#[derive(Clone)]
pub struct ResultsPublisher {
    endpoint: Option<String>,
    client: reqwest::Client,
}

impl ResultsPublisher {
    /// Build a publisher. Without an endpoint the publisher only logs.
    pub fn new(endpoint: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { endpoint, client }
    }

    /// POST the final standings, fire-and-forget.
    pub fn publish(&self, payload: FinalResultsPayload) {
        let Some(endpoint) = self.endpoint.clone() else {
            debug!(
                session_id = %payload.session_id,
                "no results endpoint configured; dropping final standings"
            );
            return;
        };
        let client = self.client.clone();
        tokio::spawn(async move {
            let session_id = payload.session_id;
            match client.post(&endpoint).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(session_id = %session_id, "final standings delivered");
                }
                Ok(response) => {
                    warn!(
                        session_id = %session_id,
                        status = %response.status(),
                        "results collaborator rejected final standings"
                    );
                }
                Err(err) => {
                    warn!(
                        session_id = %session_id,
                        error = %err,
                        "failed to deliver final standings"
                    );
                }
            }
        });
    }
}

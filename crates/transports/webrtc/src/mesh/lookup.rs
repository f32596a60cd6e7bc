//! Participant lookup: which master sockets are open in a conversation

use crate::mesh::discovery::OpenOffer;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Path of the open-offer query below the lookup base URL
pub const OPEN_OFFERS_PATH: &str = "get-conversation-user";

/// Answers "who is already listening in this conversation"
#[async_trait]
pub trait ParticipantLookup: Send + Sync {
    async fn open_offers(&self, store_id: &str, conversation_id: &str) -> Result<Vec<OpenOffer>>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    store_id: &'a str,
    conversation_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(rename = "Items", default)]
    items: Vec<OpenOffer>,
}

/// HTTP lookup client
///
/// POSTs `{"storeId","conversationId"}` as JSON to
/// `{base_url}/get-conversation-user` and reads the `Items` array.
pub struct HttpParticipantLookup {
    client: Client,
    endpoint: String,
}

impl HttpParticipantLookup {
    /// # Errors
    ///
    /// Returns `LookupError` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::LookupError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/{}", base_url.trim_end_matches('/'), OPEN_OFFERS_PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ParticipantLookup for HttpParticipantLookup {
    async fn open_offers(&self, store_id: &str, conversation_id: &str) -> Result<Vec<OpenOffer>> {
        debug!(
            "Looking up open offers for conversation {} in store {}",
            conversation_id, store_id
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(&LookupRequest {
                store_id,
                conversation_id,
            })
            .send()
            .await
            .map_err(|e| Error::LookupError(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::LookupError(format!(
                "Lookup returned HTTP {}",
                status
            )));
        }

        let body: LookupResponse = response
            .json()
            .await
            .map_err(|e| Error::LookupError(format!("Invalid lookup response: {}", e)))?;

        debug!("Lookup returned {} open offers", body.items.len());
        Ok(body.items)
    }
}

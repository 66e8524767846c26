use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::error;

use crate::engine::events::GatewayEvent;

use super::SharedState;
use super::error::StateResult;

/// How long a handled event key blocks duplicates.
pub const EVENT_DEDUP_TTL: Duration = Duration::from_secs(5 * 60);

/// Hex SHA-256 of the event's serialized form. Identical events delivered by
/// several gateway shards hash the same.
pub fn event_digest(event: &GatewayEvent) -> StateResult<String> {
    let encoded = serde_json::to_vec(event)?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

impl SharedState {
    /// Deduplication key of an event for one consumer `source`.
    pub fn event_key(&self, event: &GatewayEvent, source: &str) -> StateResult<String> {
        let digest = event_digest(event)?;
        Ok(self
            .keys
            .gateway_event(event.kind().as_str(), &digest, source))
    }

    /// Claim an event key. True the first time a key is seen within the
    /// dedup window. A store failure counts as "already handled".
    pub async fn is_new_event(&self, event_key: &str) -> bool {
        match self
            .store
            .set_if_absent(event_key, b"1", EVENT_DEDUP_TTL)
            .await
        {
            Ok(new) => new,
            Err(e) => {
                error!(error = %e, key = %event_key, "error doing deduplication");
                false
            }
        }
    }
}

use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::events::EventContainer;
use crate::state::SharedState;
use crate::state::error::StateError;
use crate::state::models::Message;

use super::matcher::{MatchInput, MessageContext};
use super::rules::{Destination, RoutingTable};

/// Routes containers against a routing table, using the shared state for
/// channel context.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<RoutingTable>,
    state: SharedState,
}

impl Dispatcher {
    pub fn new(table: RoutingTable, state: SharedState) -> Self {
        Self {
            table: Arc::new(table),
            state,
        }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Whether a message was sent in a direct-message channel. Uses the cached
    /// channel, or the missing guild id when the channel is not cached.
    async fn is_dm(&self, message: &Message) -> bool {
        match self.state.channel(&message.channel_id).await {
            Ok(channel) => channel.kind.is_private(),
            Err(StateError::NotFound) => message.guild_id.is_empty(),
            Err(e) => {
                warn!(channel_id = %message.channel_id, error = %e, "channel lookup failed while routing");
                message.guild_id.is_empty()
            }
        }
    }

    /// Ordered destinations for one event.
    pub async fn destinations(&self, container: &EventContainer) -> Vec<Destination> {
        let message = match container.event.message() {
            Some(message) => Some(MessageContext {
                author: &message.author,
                content: &message.content,
                prefix: &container.prefix,
                args: &container.args,
                is_dm: self.is_dm(message).await,
            }),
            None => None,
        };

        let input = MatchInput {
            kind: container.kind,
            bot_user_id: &container.bot_user_id,
            message,
        };
        let destinations = self.table.matching(&input);
        debug!(
            kind = %container.kind,
            key = %container.key,
            destinations = destinations.len(),
            "event routed"
        );
        destinations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::config::PrefixConfig;
    use crate::engine::events::GatewayEvent;
    use crate::state::keys::KeyCodec;
    use crate::state::memory::MemoryStore;
    use crate::state::models::{Channel, ChannelType, User};

    const ROUTES: &str = r#"[
        {"active": true, "kinds": ["MESSAGE_CREATE"], "module": "dm-help", "allow_dm": true,
         "requirements": [{"beginning": "help"}], "priority": 5},
        {"active": true, "kinds": ["MESSAGE_CREATE"], "module": "guild-only", "priority": 1}
    ]"#;

    fn dispatcher() -> Dispatcher {
        let state = SharedState::new(Arc::new(MemoryStore::new()), KeyCodec::default());
        Dispatcher::new(RoutingTable::from_json(ROUTES).unwrap(), state)
    }

    fn container(channel_id: &str, guild_id: &str, content: &str) -> EventContainer {
        let event = GatewayEvent::MessageCreate(Message {
            id: "m".into(),
            channel_id: channel_id.into(),
            guild_id: guild_id.into(),
            author: User {
                id: "u".into(),
                ..Default::default()
            },
            content: content.into(),
            ..Default::default()
        });
        EventContainer::new(event, "k", "bot", Utc::now(), &PrefixConfig::default())
    }

    fn names(destinations: &[Destination]) -> Vec<&str> {
        destinations.iter().map(|d| d.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_uncached_channel_without_guild_is_dm() {
        let dispatcher = dispatcher();
        let dm = container("dm-channel", "", "/help");
        assert_eq!(names(&dispatcher.destinations(&dm).await), vec!["dm-help"]);

        // Plain DM chatter matches no DM-enabled rule
        let chatter = container("dm-channel", "", "hello");
        assert!(dispatcher.destinations(&chatter).await.is_empty());
    }

    #[tokio::test]
    async fn test_cached_channel_type_decides_dm() {
        let dispatcher = dispatcher();
        let channel = Channel {
            id: "c".into(),
            kind: ChannelType::Dm,
            ..Default::default()
        };
        let state = &dispatcher.state;
        state
            .write_object(&state.keys().channel("c"), &channel)
            .await
            .unwrap();

        // Guild id present on the message, but the cached channel is a DM
        let event = container("c", "g", "hello");
        assert!(dispatcher.destinations(&event).await.is_empty());
    }

    #[tokio::test]
    async fn test_guild_message_routes() {
        let dispatcher = dispatcher();
        let event = container("c", "g", "hello");
        assert_eq!(names(&dispatcher.destinations(&event).await), vec!["guild-only"]);
    }
}

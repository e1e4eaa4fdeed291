use crate::{
    auth::{CredentialAuthority, SessionStore},
    config::Config,
    directory::IdentityDirectory,
    fanout::{Broker, FanoutBridge},
    services::ChatService,
    store::ConversationStore,
    websocket::{session::Gateway, ConnectionRegistry},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub authority: Arc<CredentialAuthority>,
    pub directory: Arc<dyn IdentityDirectory>,
    pub chat: ChatService,
    /// Local connections plus the shared channel they are fed from
    pub bridge: FanoutBridge,
    pub gateway: Gateway,
}

impl AppState {
    /// Wire every component from its storage backends. Production passes
    /// the Postgres and Redis implementations; tests the in-memory ones.
    pub fn new(
        config: Arc<Config>,
        sessions: Arc<dyn SessionStore>,
        directory: Arc<dyn IdentityDirectory>,
        store: Arc<dyn ConversationStore>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        let authority = Arc::new(CredentialAuthority::new(
            &config.jwt_secret,
            config.jwt_ttl_seconds,
            sessions,
        ));
        let bridge = FanoutBridge::new(
            broker,
            ConnectionRegistry::new(),
            config.chat_channel.clone(),
        );
        let chat = ChatService::new(
            store,
            directory.clone(),
            bridge.clone(),
            config.max_message_length,
        );
        let gateway = Gateway::new(
            authority.clone(),
            chat.clone(),
            bridge.clone(),
            config.ws.unauthenticated_policy,
        );

        Self {
            config,
            authority,
            directory,
            chat,
            bridge,
            gateway,
        }
    }
}

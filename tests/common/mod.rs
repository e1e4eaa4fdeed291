// Shared fixtures for integration tests: the full service wired to the
// in-memory session store, directory, conversation store and broker.
#![allow(dead_code)]

use board_chat_service::auth::MemorySessionStore;
use board_chat_service::config::{Config, UnauthenticatedPolicy, WsConfig};
use board_chat_service::directory::MemoryDirectory;
use board_chat_service::fanout::listener::run_local_listener;
use board_chat_service::fanout::LocalBroker;
use board_chat_service::models::Identity;
use board_chat_service::state::AppState;
use board_chat_service::store::MemoryConversationStore;
use board_chat_service::websocket::Topic;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";
pub const INTERNAL_KEY: &str = "internal-test-key";

pub fn test_config(policy: UnauthenticatedPolicy) -> Config {
    Config {
        database_url: "postgres://unused".into(),
        db_max_connections: 1,
        redis_url: "redis://unused".into(),
        port: 0,
        jwt_secret: SECRET.to_vec(),
        jwt_ttl_seconds: 3600,
        chat_channel: "chat".into(),
        ws: WsConfig {
            unauthenticated_policy: policy,
            ..WsConfig::default()
        },
        max_message_length: 2000,
        internal_api_key: Some(INTERNAL_KEY.into()),
    }
}

pub struct TestEnv {
    pub state: AppState,
    pub directory: MemoryDirectory,
    pub sessions: MemorySessionStore,
    pub broker: LocalBroker,
}

/// Build the service and start the local fan-out listener
pub async fn test_env_with(config: Config) -> TestEnv {
    let directory = MemoryDirectory::new();
    let sessions = MemorySessionStore::new();
    let broker = LocalBroker::default();
    let directory_arc = Arc::new(directory.clone());
    let store = Arc::new(MemoryConversationStore::new(directory_arc.clone()));

    let state = AppState::new(
        Arc::new(config),
        Arc::new(sessions.clone()),
        directory_arc,
        store,
        Arc::new(broker.clone()),
    );
    tokio::spawn(run_local_listener(broker.subscribe(), state.bridge.clone()));

    TestEnv {
        state,
        directory,
        sessions,
        broker,
    }
}

pub async fn test_env() -> TestEnv {
    test_env_with(test_config(UnauthenticatedPolicy::AllowHandshake)).await
}

impl TestEnv {
    pub async fn member(&self, name: &str) -> Identity {
        let identity = Identity::new(Uuid::new_v4(), name);
        self.directory.insert(identity.clone()).await;
        identity
    }

    pub async fn login(&self, identity: &Identity) -> String {
        self.state.authority.issue(identity).await.unwrap().token
    }

    /// Register a local connection on the identity's topic
    pub async fn connect(&self, identity: &Identity) -> UnboundedReceiver<String> {
        let (_, rx) = self
            .state
            .bridge
            .registry()
            .add_subscriber(Topic::identity(identity.id))
            .await;
        rx
    }
}

pub async fn next_frame(rx: &mut UnboundedReceiver<String>) -> serde_json::Value {
    let frame = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("delivery channel closed");
    serde_json::from_str(&frame).unwrap()
}

/// Assert nothing arrives within a short window
pub async fn assert_silent(rx: &mut UnboundedReceiver<String>) {
    let waited = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(waited.is_err(), "unexpected frame: {:?}", waited);
}

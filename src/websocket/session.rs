//! Per-connection gateway logic, independent of the actor that carries it.
//!
//! A connection moves `Connecting → Authenticating → Open | Unauthenticated
//! → Closed`. The first two states only exist during the upgrade request;
//! the actor is created holding the outcome of [`Gateway::handshake`].

use super::message_types::{WsInboundEvent, WsOutboundEvent};
use super::{ConnectionRegistry, Topic};
use crate::auth::{CredentialAuthority, Principal};
use crate::config::UnauthenticatedPolicy;
use crate::error::{AppError, AppResult};
use crate::fanout::{ChannelEvent, FanoutBridge, TypingEvent};
use crate::middleware::error_handling::map_error;
use crate::services::ChatService;
use error_types::error_codes;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Bound to a verified identity and subscribed to its topic
    Open {
        principal: Principal,
        token: String,
        topic: Topic,
    },
    /// Upgrade allowed without a valid credential; every frame is dropped
    Unauthenticated,
    Closed,
}

impl ConnectionState {
    pub fn topic(&self) -> Option<Topic> {
        match self {
            ConnectionState::Open { topic, .. } => Some(*topic),
            _ => None,
        }
    }
}

/// What the carrier should do after a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Reply(WsOutboundEvent),
    Ignore,
    /// The bound credential was revoked; close with a policy violation
    Close,
}

#[derive(Clone)]
pub struct Gateway {
    authority: Arc<CredentialAuthority>,
    chat: ChatService,
    bridge: FanoutBridge,
    policy: UnauthenticatedPolicy,
}

impl Gateway {
    pub fn new(
        authority: Arc<CredentialAuthority>,
        chat: ChatService,
        bridge: FanoutBridge,
        policy: UnauthenticatedPolicy,
    ) -> Self {
        Self {
            authority,
            chat,
            bridge,
            policy,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        self.bridge.registry()
    }

    /// Resolve the connection state for an upgrade request.
    ///
    /// `Err(Unauthorized)` only under the reject policy; storage errors
    /// propagate.
    pub async fn handshake(&self, credential: Option<String>) -> AppResult<ConnectionState> {
        let principal = match &credential {
            Some(token) => self.authority.authenticate(token).await?,
            None => None,
        };

        match (principal, credential) {
            (Some(principal), Some(token)) => {
                let topic = Topic::identity(principal.id);
                info!(identity_id = %principal.id, "gateway connection authenticated");
                Ok(ConnectionState::Open {
                    principal,
                    token,
                    topic,
                })
            }
            _ => match self.policy {
                UnauthenticatedPolicy::AllowHandshake => {
                    debug!("gateway connection without valid credential");
                    Ok(ConnectionState::Unauthenticated)
                }
                UnauthenticatedPolicy::Reject => Err(AppError::Unauthorized),
            },
        }
    }

    /// False once the bound credential is revoked. Other states have
    /// nothing to re-check.
    pub async fn still_authorized(&self, state: &ConnectionState) -> AppResult<bool> {
        match state {
            ConnectionState::Open { token, .. } => Ok(!self.authority.is_revoked(token).await?),
            _ => Ok(true),
        }
    }

    pub async fn handle_frame(&self, state: &ConnectionState, event: WsInboundEvent) -> FrameOutcome {
        let (principal, topic) = match state {
            ConnectionState::Open {
                principal, topic, ..
            } => (principal, *topic),
            ConnectionState::Unauthenticated => {
                warn!(frame = event.name(), "dropping frame from unauthenticated connection");
                return FrameOutcome::Ignore;
            }
            ConnectionState::Closed => return FrameOutcome::Ignore,
        };

        match self.still_authorized(state).await {
            Ok(true) => {}
            Ok(false) => {
                info!(identity_id = %principal.id, "credential revoked, closing connection");
                return FrameOutcome::Close;
            }
            Err(e) => return FrameOutcome::Reply(error_frame(&e)),
        }

        match event {
            WsInboundEvent::Send { receiver_id, body } => {
                match self.chat.send(principal.id, receiver_id, &body).await {
                    Ok(view) => FrameOutcome::Reply(WsOutboundEvent::Ack {
                        op: "send",
                        message: Some(view),
                    }),
                    Err(e) => FrameOutcome::Reply(error_frame(&e)),
                }
            }
            WsInboundEvent::Subscribe { topic: requested } => {
                if Topic::parse(&requested) == Some(topic) {
                    FrameOutcome::Reply(WsOutboundEvent::ack("subscribe"))
                } else {
                    warn!(identity_id = %principal.id, requested = %requested, "foreign topic subscription refused");
                    FrameOutcome::Reply(WsOutboundEvent::error(
                        error_codes::FORBIDDEN_TOPIC,
                        "connections may only subscribe to their own identity topic",
                    ))
                }
            }
            WsInboundEvent::Read { message_id } => {
                match self.chat.mark_read(principal.id, message_id).await {
                    Ok(_) => FrameOutcome::Reply(WsOutboundEvent::ack("read")),
                    Err(e) => FrameOutcome::Reply(error_frame(&e)),
                }
            }
            WsInboundEvent::Typing { receiver_id } => {
                self.bridge
                    .publish_best_effort(&ChannelEvent::Typing(TypingEvent {
                        sender_id: principal.id,
                        receiver_id,
                    }))
                    .await;
                FrameOutcome::Ignore
            }
        }
    }

    /// Start the worker that handles one connection's frames strictly in
    /// arrival order. Each outcome is passed to `on_outcome`; the worker
    /// stops after a `Close` or once the returned sender is dropped.
    pub fn spawn_frame_worker<F>(
        &self,
        state: ConnectionState,
        mut on_outcome: F,
    ) -> UnboundedSender<WsInboundEvent>
    where
        F: FnMut(FrameOutcome) + Send + 'static,
    {
        let (tx, mut rx) = unbounded_channel::<WsInboundEvent>();
        let gateway = self.clone();

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let outcome = gateway.handle_frame(&state, event).await;
                let close = outcome == FrameOutcome::Close;
                on_outcome(outcome);
                if close {
                    break;
                }
            }
            debug!("frame worker stopped");
        });

        tx
    }
}

fn error_frame(err: &AppError) -> WsOutboundEvent {
    let (_, body) = map_error(err);
    WsOutboundEvent::error(&body.code, body.message)
}

use crate::auth::token_source::{resolve_credential, CredentialSource};
use crate::error::AppError;
use crate::metrics;
use crate::state::AppState;
use crate::websocket::message_types::{WsInboundEvent, WsOutboundEvent};
use crate::websocket::session::{ConnectionState, FrameOutcome, Gateway};
use crate::websocket::SubscriberId;
use actix::{Actor, ActorContext, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use error_types::error_codes;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Fallback for browser clients that cannot set headers on the upgrade
    pub token: Option<String>,
}

// Result of an asynchronously handled frame, sent back to the actor
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Outcome(FrameOutcome);

struct ChatSession {
    gateway: Gateway,
    state: ConnectionState,
    subscriber_id: Option<SubscriberId>,
    deliveries: Option<UnboundedReceiver<String>>,
    /// Inbound frames, handled one at a time by the gateway worker
    frames: Option<UnboundedSender<WsInboundEvent>>,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl ChatSession {
    fn new(
        gateway: Gateway,
        state: ConnectionState,
        subscription: Option<(SubscriberId, UnboundedReceiver<String>)>,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        let (subscriber_id, deliveries) = match subscription {
            Some((id, rx)) => (Some(id), Some(rx)),
            None => (None, None),
        };
        Self {
            gateway,
            state,
            subscriber_id,
            deliveries,
            frames: None,
            hb: Instant::now(),
            heartbeat_interval,
            client_timeout,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.hb) > act.client_timeout {
                warn!("WebSocket heartbeat failed, disconnecting");
                ctx.stop();
                return;
            }
            ctx.ping(b"");

            // A newer login or a logout revokes the bound credential
            if act.state.topic().is_some() {
                let gateway = act.gateway.clone();
                let state = act.state.clone();
                let addr = ctx.address();
                actix::spawn(async move {
                    match gateway.still_authorized(&state).await {
                        Ok(true) => {}
                        Ok(false) => addr.do_send(Outcome(FrameOutcome::Close)),
                        Err(e) => warn!(error = %e, "revocation check failed on heartbeat"),
                    }
                });
            }
        });
    }

    fn send_frame(&self, frame: &WsOutboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match serde_json::to_string(frame) {
            Ok(text) => ctx.text(text),
            Err(e) => error!(error = %e, "failed to encode outbound frame"),
        }
    }
}

impl Actor for ChatSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        metrics::ws_connection_opened();
        match &self.state {
            ConnectionState::Open { principal, .. } => {
                info!(identity_id = %principal.id, "WebSocket session started")
            }
            _ => info!("unauthenticated WebSocket session started"),
        }

        self.hb(ctx);

        if let Some(rx) = self.deliveries.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }

        let addr = ctx.address();
        self.frames = Some(
            self.gateway
                .spawn_frame_worker(self.state.clone(), move |outcome| {
                    addr.do_send(Outcome(outcome))
                }),
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        metrics::ws_connection_closed();
        self.frames = None;

        if let (Some(topic), Some(subscriber_id)) = (self.state.topic(), self.subscriber_id) {
            let registry = self.gateway.registry().clone();
            actix::spawn(async move {
                registry.remove_subscriber(topic, subscriber_id).await;
            });
        }

        self.state = ConnectionState::Closed;
        info!("WebSocket session stopped");
    }
}

// Fan-out deliveries for this connection's topic
impl StreamHandler<String> for ChatSession {
    fn handle(&mut self, frame: String, ctx: &mut Self::Context) {
        ctx.text(frame);
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        debug!("delivery stream ended");
    }
}

impl Handler<Outcome> for ChatSession {
    type Result = ();

    fn handle(&mut self, msg: Outcome, ctx: &mut Self::Context) {
        match msg.0 {
            FrameOutcome::Reply(frame) => self.send_frame(&frame, ctx),
            FrameOutcome::Ignore => {}
            FrameOutcome::Close => {
                ctx.close(Some(ws::CloseReason {
                    code: ws::CloseCode::Policy,
                    description: Some("credential revoked".into()),
                }));
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ChatSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<WsInboundEvent>(&text) {
                Ok(evt) => {
                    let queued = self.frames.as_ref().map(|frames| frames.send(evt).is_ok());
                    if queued != Some(true) {
                        debug!("frame worker gone, dropping frame");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to parse WS frame");
                    if matches!(self.state, ConnectionState::Open { .. }) {
                        self.send_frame(
                            &WsOutboundEvent::error(error_codes::MALFORMED_FRAME, e.to_string()),
                            ctx,
                        );
                    }
                }
            },
            Ok(ws::Message::Binary(_)) => {
                warn!("Binary WebSocket messages not supported");
            }
            Ok(ws::Message::Close(reason)) => {
                info!(?reason, "WebSocket close message received");
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                warn!(error = %e, "WebSocket protocol error");
                ctx.stop();
            }
            _ => {}
        }
    }
}

/// Gateway upgrade. Credential order: `Authorization`, auth cookies,
/// `token` header, then the `token` query parameter.
#[get("/ws/chat")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
    query: web::Query<WsParams>,
) -> Result<HttpResponse, Error> {
    let credential = resolve_credential(&req)
        .or_else(|| {
            query
                .into_inner()
                .token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .map(|t| (t, CredentialSource::QueryParameter))
        })
        .map(|(token, source)| {
            debug!(?source, "gateway credential found");
            token
        });

    let connection = match state.gateway.handshake(credential).await {
        Ok(connection) => connection,
        Err(AppError::Unauthorized) => {
            warn!("WebSocket connection rejected: no valid credential");
            return Ok(HttpResponse::Unauthorized().finish());
        }
        Err(e) => return Err(e.into()),
    };

    let subscription = match connection.topic() {
        Some(topic) => Some(state.gateway.registry().add_subscriber(topic).await),
        None => None,
    };
    let registered = connection.topic().zip(subscription.as_ref().map(|(id, _)| *id));

    let session = ChatSession::new(
        state.gateway.clone(),
        connection,
        subscription,
        Duration::from_secs(state.config.ws.heartbeat_interval_secs),
        Duration::from_secs(state.config.ws.client_timeout_secs),
    );

    match ws::start(session, &req, stream) {
        Ok(resp) => Ok(resp),
        Err(e) => {
            // the actor never started, so `stopped` will not clean up
            if let Some((topic, subscriber_id)) = registered {
                state
                    .gateway
                    .registry()
                    .remove_subscriber(topic, subscriber_id)
                    .await;
            }
            Err(e)
        }
    }
}

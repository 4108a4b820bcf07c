use std::sync::{Arc, Mutex};
use std::time::Instant;

use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{info, warn};
use serde::Deserialize;
use uuid::Uuid;

use crate::game::rules::RulesEngine;
use crate::models::match_state::{BindingToken, ConnectionHandle, MatchState};
use crate::models::messages::{ClientEvent, GameOverReason, ServerEvent, Side};
use crate::models::registry::{SessionRegistry, ABANDON_GRACE};

/// Close codes distinguishing why a connection was refused.
const CLOSE_UNKNOWN_MATCH: u16 = 4000;
const CLOSE_CANNOT_JOIN: u16 = 4001;
const CLOSE_UNKNOWN_CREDENTIAL: u16 = 4002;

/// Serialized frame queued to a client socket.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Frame(pub String);

/// Connection-establishment parameters: match id, requested side and the
/// optional reconnection credential issued on a previous join.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub id: String,
    pub color: Side,
    #[serde(rename = "playerId", default)]
    pub player_id: Option<Uuid>,
}

/// One actor per participant connection. Binds the socket to a match slot
/// on start and routes decoded frames to `MatchState` operations.
pub struct MatchSocket {
    registry: web::Data<SessionRegistry>,
    rules: Arc<dyn RulesEngine>,
    params: ConnectParams,
    match_handle: Option<Arc<Mutex<MatchState>>>,
    participant_id: Option<Uuid>,
    binding: Option<BindingToken>,
}

/// Pushes events through the actor mailbox, which preserves per-recipient
/// ordering without holding the match lock across socket I/O.
struct MailboxHandle(Recipient<Frame>);

impl ConnectionHandle for MailboxHandle {
    fn push(&self, event: &ServerEvent) {
        match serde_json::to_string(event) {
            Ok(text) => self.0.do_send(Frame(text)),
            Err(e) => warn!("failed to serialize outbound event: {e}"),
        }
    }
}

fn refuse(ctx: &mut ws::WebsocketContext<MatchSocket>, code: ws::CloseCode, reason: &str) {
    ctx.close(Some(ws::CloseReason {
        code,
        description: Some(reason.to_string()),
    }));
    ctx.stop();
}

impl Actor for MatchSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let Some(handle) = self.registry.get(&self.params.id) else {
            info!("connection for unknown match {}", self.params.id);
            refuse(ctx, ws::CloseCode::Other(CLOSE_UNKNOWN_MATCH), "unknown match");
            return;
        };

        let connection: Box<dyn ConnectionHandle> =
            Box::new(MailboxHandle(ctx.address().recipient()));
        let mut state = match handle.lock() {
            Ok(state) => state,
            Err(_) => {
                refuse(ctx, ws::CloseCode::Error, "internal server error");
                return;
            }
        };

        match self.params.player_id {
            None => match state.join(self.params.color, connection) {
                Ok((participant_id, token)) => {
                    state.unicast(
                        participant_id,
                        &ServerEvent::Connected {
                            player_id: participant_id,
                        },
                    );
                    state.try_start();
                    self.participant_id = Some(participant_id);
                    self.binding = Some(token);
                }
                Err(err) => {
                    info!("join refused for match {}: {err}", self.params.id);
                    drop(state);
                    refuse(ctx, ws::CloseCode::Other(CLOSE_CANNOT_JOIN), "cannot join");
                    return;
                }
            },
            Some(participant_id) => {
                if let Some(token) = state.reconnect(participant_id, connection) {
                    self.participant_id = Some(participant_id);
                    self.binding = Some(token);
                } else {
                    info!(
                        "reconnect with unknown credential {} for match {}",
                        participant_id, self.params.id
                    );
                    drop(state);
                    refuse(
                        ctx,
                        ws::CloseCode::Other(CLOSE_UNKNOWN_CREDENTIAL),
                        "unknown participant",
                    );
                    return;
                }
            }
        }
        drop(state);
        self.match_handle = Some(handle);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if let (Some(handle), Some(participant_id), Some(token)) =
            (self.match_handle.as_ref(), self.participant_id, self.binding)
        {
            if let Ok(mut state) = handle.lock() {
                state.disconnect(participant_id, token, Instant::now());
            }
            self.registry.sweep(Instant::now(), ABANDON_GRACE);
        }
        Running::Stop
    }
}

impl Handler<Frame> for MatchSocket {
    type Result = ();

    fn handle(&mut self, msg: Frame, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MatchSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(payload)) => ctx.pong(&payload),
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => self.dispatch(event, ctx),
                // Malformed or unknown frames are dropped; the connection
                // stays open.
                Err(e) => warn!("dropping malformed frame: {e}"),
            },
            Ok(ws::Message::Binary(_)) => warn!("dropping unsupported binary frame"),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            _ => ctx.stop(),
        }
    }
}

impl MatchSocket {
    fn dispatch(&mut self, event: ClientEvent, ctx: &mut ws::WebsocketContext<Self>) {
        let (Some(handle), Some(participant_id)) =
            (self.match_handle.as_ref(), self.participant_id)
        else {
            return;
        };
        let mut state = match handle.lock() {
            Ok(state) => state,
            Err(_) => {
                // This connection goes down; the match itself survives
                // for the other participant.
                refuse(ctx, ws::CloseCode::Error, "internal server error");
                return;
            }
        };
        match event {
            ClientEvent::Move { mv } => {
                state.apply_move(participant_id, mv, self.rules.as_ref(), Instant::now())
            }
            ClientEvent::OfferRematch => state.offer_rematch(participant_id),
            ClientEvent::AcceptRematch => state.accept_rematch(participant_id),
            ClientEvent::GameOver {
                reason: GameOverReason::Timeout,
                winner,
            } => state.handle_timeout(winner),
            ClientEvent::GameOver { reason, .. } => {
                warn!("ignoring client game-over claim with reason {reason:?}")
            }
        }
    }
}

/// WebSocket connection handler: resolves the query parameters and spawns
/// the per-connection actor.
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    query: web::Query<ConnectParams>,
    registry: web::Data<SessionRegistry>,
) -> Result<HttpResponse, Error> {
    let params = query.into_inner();
    info!(
        "new websocket connection for match {} as {:?}",
        params.id, params.color
    );
    let socket = MatchSocket {
        rules: registry.rules(),
        registry: registry.clone(),
        params,
        match_handle: None,
        participant_id: None,
        binding: None,
    };
    ws::start(socket, &req, stream)
}

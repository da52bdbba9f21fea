//! WebSocket gateway: one authenticated connection per player.

use actix_web::error::{ErrorInternalServerError, ErrorUnauthorized};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_ws::{handle, Message, Session};
use futures::StreamExt;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;
use std::env;
use std::sync::Arc;
use uuid::Uuid;

use crate::matchmaking::Matchmaker;
use crate::protocol::{ClientMsg, ServerMsg};
use crate::remote::users::UsersClient;
use crate::ws::hub::WsHub;

/// Handshake token payload. `id` is the only field the core relies on; it
/// is coerced to a string for all internal use.
#[derive(Debug, Deserialize)]
pub struct Claims {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    pub exp: usize,
}

pub async fn ws_index(
    req: HttpRequest,
    body: web::Payload,
    mm: web::Data<Matchmaker>,
    hub: web::Data<WsHub>,
    users: web::Data<UsersClient>,
) -> Result<HttpResponse, Error> {
    // 1 · authenticate the handshake (?token=<JWT>)
    let token = req
        .query_string()
        .split('&')
        .find_map(|kv| kv.strip_prefix("token="))
        .ok_or_else(|| ErrorUnauthorized("token missing"))?;

    let secret = env::var("JWT_SECRET").map_err(|_| ErrorInternalServerError("server mis-config"))?;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ErrorUnauthorized("invalid or expired token"))?;

    if data.claims.id <= 0 {
        return Err(ErrorUnauthorized("bad subject"));
    }
    let user_id = data.claims.id.to_string();

    // 2 · rating snapshot, frozen for the lifetime of the connection
    let session_elo = users.fetch_elo(&user_id).await;

    // 3 · handshake
    let (response, mut session, mut ws_stream) = handle(&req, body)?;

    let socket_id = Uuid::new_v4().to_string();
    let mut outbox = hub.register(&socket_id);

    let mm = mm.into_inner();
    let hub = hub.into_inner();

    actix_web::rt::spawn(async move {
        log::info!("WS connected: {socket_id} (user {user_id}, elo {session_elo})");

        loop {
            tokio::select! {
                // client → server
                Some(frame) = ws_stream.next() => {
                    match frame {
                        Ok(Message::Text(text)) => {
                            if let Some(reply) =
                                dispatch(&mm, &user_id, &socket_id, session_elo, &text).await
                            {
                                if send_json(&mut session, &reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Ok(Message::Close(_)) | Err(_) => break,
                        Ok(_) => {}
                    }
                }
                // matchmaker → client
                Some(msg) = outbox.recv() => {
                    if send_json(&mut session, &msg).await.is_err() {
                        log::warn!("WS send failed for {socket_id}");
                        break;
                    }
                }
                else => break,
            }
        }

        // A disconnect only empties the waiting pool; a pending match keeps
        // running on its own timer.
        hub.unregister(&socket_id);
        mm.remove_player(&user_id);
        log::info!("WS closed: {socket_id} (user {user_id})");
    });

    Ok(response)
}

/// Parse and route one inbound event. Returns the `error` event to send
/// back to the offending socket, if any.
async fn dispatch(
    mm: &Arc<Matchmaker>,
    user_id: &str,
    socket_id: &str,
    session_elo: u32,
    text: &str,
) -> Option<ServerMsg> {
    let msg: ClientMsg = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            return Some(ServerMsg::Error {
                message: "Invalid payload".into(),
                details: Some(e.to_string()),
            })
        }
    };

    let result = match msg {
        ClientMsg::JoinQueue { elo } => {
            mm.add_player(user_id, socket_id, elo.unwrap_or(session_elo), false)
                .await
        }
        ClientMsg::LeaveQueue => {
            mm.remove_player(user_id);
            Ok(())
        }
        ClientMsg::AcceptMatch { match_id } => mm.accept(user_id, match_id).await,
        ClientMsg::DeclineMatch { match_id } => mm.decline(user_id, match_id).await,
    };

    result.err().map(|e| ServerMsg::Error {
        message: e.to_string(),
        details: None,
    })
}

async fn send_json(session: &mut Session, msg: &ServerMsg) -> Result<(), actix_ws::Closed> {
    match serde_json::to_string(msg) {
        Ok(json) => session.text(json).await,
        Err(e) => {
            log::error!("failed to serialize outbound event: {e}");
            Ok(())
        }
    }
}

//! Realtime WebSocket upgrade and connection handling
//!
//! Authentication flow:
//! 1. JWT token from query string (?token=...)
//! 2. JWT token from Authorization header
//!
//! Once upgraded, the connection task drains the session's frame queue onto
//! the socket and answers client frames until either side goes away.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use hyper_tungstenite::tungstenite::Message;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::auth::{extract_token_from_header, extract_token_from_query};
use crate::core::CaseCore;
use crate::db::Store;
use crate::model::Actor;
use crate::realtime::{ClientMessage, Connection, PushMessage};
use crate::server::http::{error_response, AppState};
use crate::types::{CaseguardError, Result};

type WsStream = hyper_tungstenite::WebSocketStream<TokioIo<hyper::upgrade::Upgraded>>;

/// Handle the WebSocket upgrade for `/realtime`
pub async fn handle_realtime_upgrade<S: Store>(
    state: Arc<AppState<S>>,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let actor = match authenticate(&state, &req) {
        Ok(actor) => actor,
        Err(e) => {
            warn!("Realtime auth failed: {}", e);
            return error_response(&e);
        }
    };

    match hyper_tungstenite::upgrade(req, None) {
        Ok((response, websocket)) => {
            let core = Arc::clone(&state.core);
            tokio::spawn(async move {
                match websocket.await {
                    Ok(ws) => serve_connection(core, ws, actor).await,
                    Err(e) => error!("WebSocket upgrade failed: {:?}", e),
                }
            });

            response.map(|_| Full::new(Bytes::new()))
        }
        Err(e) => {
            error!("WebSocket upgrade error: {:?}", e);
            let mut response = Response::new(Full::new(Bytes::from(format!(
                "WebSocket upgrade failed: {e}"
            ))));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            response
        }
    }
}

/// Resolve the actor from the query string token, then the bearer header
fn authenticate<S: Store>(state: &AppState<S>, req: &Request<Incoming>) -> Result<Actor> {
    let auth_header = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = extract_token_from_query(req.uri().query())
        .or_else(|| extract_token_from_header(auth_header))
        .ok_or_else(|| CaseguardError::Auth("Authentication required".into()))?;

    state.sessions.actor_from_token(token)
}

async fn serve_connection<S: Store>(core: Arc<CaseCore<S>>, ws: WsStream, actor: Actor) {
    let Connection {
        handle,
        mut outbound,
    } = core.dispatcher().connect(actor.id);
    let (mut write, mut read) = ws.split();

    // Let the client catch up on anything pushed while it was away
    match core.unread_count(&actor).await {
        Ok(count) => {
            if send_frame(&mut write, &PushMessage::UnreadCount { count })
                .await
                .is_err()
            {
                core.dispatcher().disconnect(handle);
                return;
            }
        }
        Err(e) => warn!(session = %handle, error = %e, "Unread count on connect failed"),
    }

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if send_frame(&mut write, &frame).await.is_err() {
                    break;
                }
            }
            incoming = read.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        debug!(session = %handle, error = %e, "Realtime read error");
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        let reply = handle_client_frame(&core, &actor, &text).await;
                        if send_frame(&mut write, &reply).await.is_err() {
                            break;
                        }
                    }
                    Message::Ping(data) => {
                        if write.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => continue,
                }
            }
        }
    }

    core.dispatcher().disconnect(handle);
    let _ = write.close().await;
    info!(session = %handle, "Realtime connection closed");
}

/// Answer one client frame
async fn handle_client_frame<S: Store>(
    core: &CaseCore<S>,
    actor: &Actor,
    text: &str,
) -> PushMessage {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            return PushMessage::Error {
                message: format!("invalid frame: {}", e),
            }
        }
    };

    match message {
        ClientMessage::Ping => PushMessage::Pong,
        ClientMessage::Ack { ids } => {
            let result = async {
                core.mark_read(actor, &ids).await?;
                core.unread_count(actor).await
            }
            .await;
            match result {
                Ok(count) => PushMessage::UnreadCount { count },
                Err(e) => {
                    warn!(actor_id = actor.id, error = %e, "Ack failed");
                    PushMessage::Error {
                        message: e.to_string(),
                    }
                }
            }
        }
    }
}

async fn send_frame<W>(write: &mut W, frame: &PushMessage) -> Result<()>
where
    W: futures_util::Sink<Message, Error = hyper_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame)?;
    write.send(Message::Text(text)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CoreConfig, Mutation};
    use crate::db::MemoryStore;
    use crate::model::{
        CaseCommentRecord, CaseRecord, Department, EntitySnapshot, Role, SensitivityCategory,
    };

    #[tokio::test]
    async fn test_ping_and_bad_frames() {
        let core = CaseCore::new(Arc::new(MemoryStore::new()), CoreConfig::default());
        let actor = Actor::new(5, Role::Lawyer, 1, Department::Legal);

        let reply = handle_client_frame(&core, &actor, r#"{"type":"ping"}"#).await;
        assert_eq!(reply, PushMessage::Pong);

        let reply = handle_client_frame(&core, &actor, "not json").await;
        assert!(matches!(reply, PushMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_ack_marks_read_and_reports_count() {
        let store = Arc::new(MemoryStore::new());
        let mut case = CaseRecord::new(42, 1, "Intake");
        case.assigned_lawyer_id = Some(11);
        store.seed(EntitySnapshot::Case(case)).await;
        let core = CaseCore::new(store, CoreConfig::default());

        let author = Actor::new(20, Role::OfficeManager, 1, Department::Management);
        let outcome = core
            .mutate(
                &author,
                Mutation::Create(EntitySnapshot::CaseComment(CaseCommentRecord {
                    id: 3,
                    case_id: 42,
                    office_id: 1,
                    author_id: 20,
                    body: "Hearing moved".into(),
                    sensitivity: SensitivityCategory::General,
                })),
                None,
            )
            .await
            .unwrap();
        let lawyer = Actor::new(11, Role::Lawyer, 1, Department::Legal);
        let mine: Vec<_> = outcome
            .notifications
            .iter()
            .filter(|n| n.user_id == lawyer.id)
            .map(|n| n.id)
            .collect();
        assert_eq!(mine.len(), 1);

        let frame = format!(r#"{{"type":"ack","ids":["{}"]}}"#, mine[0]);
        let reply = handle_client_frame(&core, &lawyer, &frame).await;
        assert_eq!(reply, PushMessage::UnreadCount { count: 0 });
    }
}

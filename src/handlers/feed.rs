//! WebSocket push of change events to operator dashboards.
//!
//! Each connection owns a broadcast receiver and forwards every event of the
//! requested entity as JSON. The server pings every 5s and drops the
//! connection after 10s without client traffic. When the receiver falls
//! behind the broadcast buffer the client gets a `resync` message and is
//! expected to reload its list through the REST endpoints.

use std::time::{Duration, Instant};

use actix_web::{HttpRequest, HttpResponse, Result, web};
use actix_ws::{CloseCode, CloseReason, Closed, Message, MessageStream, ProtocolError, Session};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;
use tokio::time;
use utoipa::{IntoParams, ToSchema};

use crate::feed::{ChangeEvent, ChangeFeed, EntityKind};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FeedQuery {
    /// 仅推送该实体的变更，缺省推送全部
    pub entity: Option<EntityKind>,
}

/// Sent when the session dropped events and must reload.
#[derive(Debug, Serialize, ToSchema)]
pub struct ResyncNotice {
    #[serde(rename = "type")]
    pub kind: String,
    pub skipped: u64,
}

impl ResyncNotice {
    fn new(skipped: u64) -> Self {
        Self {
            kind: "resync".to_string(),
            skipped,
        }
    }
}

#[utoipa::path(
    get,
    path = "/feed/ws",
    tag = "feed",
    params(FeedQuery),
    responses(
        (status = 101, description = "升级为 WebSocket，推送变更事件"),
        (status = 400, description = "不是合法的 WebSocket 握手")
    )
)]
pub async fn feed_ws(
    feed: web::Data<ChangeFeed>,
    query: web::Query<FeedQuery>,
    req: HttpRequest,
    body: web::Payload,
) -> Result<HttpResponse> {
    let (response, session, stream) = actix_ws::handle(&req, body)?;
    let filter = query.into_inner().entity;
    let events = feed.receiver();

    log::info!(
        "Feed session opened for {}",
        filter.map_or_else(|| "all entities".to_string(), |e| e.to_string())
    );
    actix_web::rt::spawn(FeedSession::new(filter, events).run(session, stream));
    Ok(response)
}

enum SessionError {
    ClientClosed(Option<CloseReason>),
    StreamClosed,
    FeedClosed,
    HeartbeatTimeout,
    Protocol(ProtocolError),
    Network(Closed),
}

struct FeedSession {
    filter: Option<EntityKind>,
    events: Receiver<ChangeEvent>,
}

impl FeedSession {
    fn new(filter: Option<EntityKind>, events: Receiver<ChangeEvent>) -> Self {
        Self { filter, events }
    }

    async fn run(mut self, mut session: Session, mut stream: MessageStream) {
        let mut last_heartbeat = Instant::now();
        let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);

        loop {
            let result = tokio::select! {
                _ = heartbeat.tick() => {
                    if Instant::now().duration_since(last_heartbeat) > CLIENT_TIMEOUT {
                        Err(SessionError::HeartbeatTimeout)
                    } else {
                        session.ping(b"").await.map_err(SessionError::Network)
                    }
                }
                event = self.events.recv() => {
                    self.forward(&mut session, event).await
                }
                message = stream.recv() => {
                    handle_message(&mut session, &mut last_heartbeat, message).await
                }
            };

            if let Err(error) = result {
                log_shutdown_reason(&error);
                if let Some(reason) = close_reason_for(error) {
                    if let Err(e) = session.close(reason).await {
                        log::warn!("Failed to close feed session: {e}");
                    }
                }
                return;
            }
        }
    }

    async fn forward(
        &self,
        session: &mut Session,
        event: std::result::Result<ChangeEvent, RecvError>,
    ) -> std::result::Result<(), SessionError> {
        let payload = match event {
            Ok(event) => match encode_event(&event, self.filter) {
                Some(payload) => payload,
                None => return Ok(()),
            },
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Feed session lagged, {skipped} events skipped; asking client to resync");
                encode(&ResyncNotice::new(skipped))
            }
            Err(RecvError::Closed) => return Err(SessionError::FeedClosed),
        };
        session.text(payload).await.map_err(SessionError::Network)
    }
}

async fn handle_message(
    session: &mut Session,
    last_heartbeat: &mut Instant,
    message: Option<std::result::Result<Message, ProtocolError>>,
) -> std::result::Result<(), SessionError> {
    let Some(message) = message else {
        return Err(SessionError::StreamClosed);
    };

    match message {
        Ok(Message::Ping(payload)) => {
            *last_heartbeat = Instant::now();
            session.pong(&payload).await.map_err(SessionError::Network)
        }
        // 推送通道只读，客户端消息仅用于保活
        Ok(Message::Text(_))
        | Ok(Message::Pong(_))
        | Ok(Message::Binary(_))
        | Ok(Message::Continuation(_))
        | Ok(Message::Nop) => {
            *last_heartbeat = Instant::now();
            Ok(())
        }
        Ok(Message::Close(reason)) => Err(SessionError::ClientClosed(reason)),
        Err(e) => Err(SessionError::Protocol(e)),
    }
}

/// JSON frame for `event`, or `None` when the session filters it out.
fn encode_event(event: &ChangeEvent, filter: Option<EntityKind>) -> Option<String> {
    match filter {
        Some(entity) if entity != event.entity => None,
        _ => Some(encode(event)),
    }
}

fn encode<T: Serialize>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_else(|e| {
        log::error!("Failed to serialize feed payload: {e}");
        String::from("{}")
    })
}

fn log_shutdown_reason(error: &SessionError) {
    match error {
        SessionError::HeartbeatTimeout => log::info!("Feed session heartbeat timeout"),
        SessionError::Protocol(e) => log::warn!("Feed session protocol error: {e}"),
        SessionError::Network(e) => log::debug!("Feed session send failed: {e}"),
        SessionError::FeedClosed => log::info!("Change feed closed, ending session"),
        SessionError::ClientClosed(_) | SessionError::StreamClosed => {
            log::debug!("Feed session closed by client")
        }
    }
}

fn close_reason_for(error: SessionError) -> Option<Option<CloseReason>> {
    match error {
        SessionError::HeartbeatTimeout => Some(Some(CloseReason {
            code: CloseCode::Normal,
            description: Some("heartbeat timeout".to_owned()),
        })),
        SessionError::Protocol(_) => Some(Some(CloseReason {
            code: CloseCode::Protocol,
            description: Some("protocol error".to_owned()),
        })),
        SessionError::FeedClosed => Some(Some(CloseReason {
            code: CloseCode::Away,
            description: Some("server shutting down".to_owned()),
        })),
        SessionError::ClientClosed(reason) => Some(reason),
        SessionError::StreamClosed | SessionError::Network(_) => None,
    }
}

pub fn feed_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/feed").route("/ws", web::get().to(feed_ws)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::RequestStatus;
    use crate::models::RequestResponse;
    use actix_web::http::StatusCode;
    use actix_web::{App, test as actix_test};
    use chrono::Utc;
    use rstest::rstest;
    use serde_json::Value;

    fn event() -> ChangeEvent {
        let feed = ChangeFeed::new(4);
        let mut rx = feed.receiver();
        let now = Utc::now();
        feed.updated(RequestResponse {
            id: 3,
            credential_id: 1,
            status: RequestStatus::Activated,
            sms_code: None,
            created_at: now,
            updated_at: now,
        });
        rx.try_recv().unwrap()
    }

    #[rstest]
    #[case(None, true)]
    #[case(Some(EntityKind::Requests), true)]
    #[case(Some(EntityKind::Credentials), false)]
    fn test_encode_event_respects_filter(
        #[case] filter: Option<EntityKind>,
        #[case] delivered: bool,
    ) {
        let frame = encode_event(&event(), filter);
        assert_eq!(frame.is_some(), delivered);
        if let Some(frame) = frame {
            let json: Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(json["entity"], "requests");
            assert_eq!(json["record"]["status"], "activated");
        }
    }

    #[test]
    fn test_resync_notice_shape() {
        let json: Value = serde_json::from_str(&encode(&ResyncNotice::new(12))).unwrap();
        assert_eq!(json["type"], "resync");
        assert_eq!(json["skipped"], 12);
    }

    #[actix_web::test]
    async fn test_plain_get_is_rejected() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(ChangeFeed::new(4)))
                .configure(feed_config),
        )
        .await;

        let req = actix_test::TestRequest::get()
            .uri("/feed/ws?entity=requests")
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}

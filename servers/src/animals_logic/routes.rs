//! # HTTP Surface
//!
//! REST routes over the record service plus the two live transports. Both
//! transports write the same JSON for each change event; SSE additionally
//! names the frame after the event kind.

use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::QueryRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures_util::stream::{self, Stream};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use lib_common::records::{
    ChangeSubscription, ListPage, ListParams, Record, RecordDraft, RecordError, RecordStore,
};

use crate::animals_logic::error::AppError;
use crate::animals_logic::model::{ClientMessage, ScanRequest, ServerMessage};
use crate::animals_logic::state::AppState;

/// Scan replies waiting to be written to one WebSocket.
const REPLY_QUEUE: usize = 16;

pub fn router<S: RecordStore>(state: AppState<S>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/records", get(list_records::<S>).post(create_record::<S>))
        .route("/records/stream", get(stream_records::<S>))
        .route("/records/ws", get(ws_records::<S>))
        .route(
            "/records/{id}",
            get(get_record::<S>)
                .put(update_record::<S>)
                .delete(delete_record::<S>),
        )
        .route("/scan", post(scan_tag::<S>))
        .route("/health", get(health_handler::<S>))
        .layer(cors)
        .with_state(state)
}

async fn list_records<S: RecordStore>(
    State(state): State<AppState<S>>,
    query: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ListPage>, AppError> {
    let Query(params) = query?;
    let page = state.service.query().list_params(&params).await?;
    Ok(Json(page))
}

async fn get_record<S: RecordStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<Record>, AppError> {
    Ok(Json(state.service.query().get(&id).await?))
}

async fn create_record<S: RecordStore>(
    State(state): State<AppState<S>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Record>), AppError> {
    let draft = RecordDraft::from_json_slice(&body)?;
    let record = state.service.mutations().create(draft).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_record<S: RecordStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Record>, AppError> {
    let draft = RecordDraft::from_json_slice(&body)?;
    Ok(Json(state.service.mutations().update(&id, draft).await?))
}

async fn delete_record<S: RecordStore>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let removed = state.service.mutations().delete(&id).await?;
    Ok(Json(json!({
        "message": "Record deleted",
        "id": removed.id,
    })))
}

/// Looks a tag up by id. A hit is broadcast to every live subscriber as `scanned`.
async fn scan_tag<S: RecordStore>(
    State(state): State<AppState<S>>,
    body: Bytes,
) -> Result<Json<Record>, AppError> {
    let request: ScanRequest = serde_json::from_slice(&body)
        .map_err(|e| RecordError::Validation(format!("invalid scan request: {}", e)))?;
    Ok(Json(state.service.scanner().scan(&request.id).await?))
}

async fn health_handler<S: RecordStore>(State(state): State<AppState<S>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "subscribers": state.service.notifier().subscriber_count(),
    }))
}

/// # Server-Sent Events
///
/// Registers a subscriber before answering, so a full registry is a 503
/// rather than an empty stream. The stream ends when the subscriber is
/// evicted or the server shuts down; dropping it unregisters the subscriber.
async fn stream_records<S: RecordStore>(
    State(state): State<AppState<S>>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let subscription = state.service.notifier().subscribe("sse")?;
    info!("SSE subscriber {} connected", subscription.id());

    Ok(Sse::new(event_stream(subscription))
        .keep_alive(KeepAlive::new().interval(state.sse_keep_alive)))
}

fn event_stream(
    subscription: ChangeSubscription,
) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let frame = Event::default()
            .event(event.event.as_str())
            .json_data(event.as_ref());
        Some((frame, subscription))
    })
}

async fn ws_records<S: RecordStore>(
    ws: WebSocketUpgrade,
    State(state): State<AppState<S>>,
) -> Result<impl IntoResponse, AppError> {
    let subscription = state.service.notifier().subscribe("ws")?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, subscription)))
}

/// # WebSocket Session
///
/// Forwards every change event to the client and serves `{"scan": "<id>"}`
/// requests coming back. Scans run on their own tasks so the subscription
/// keeps draining while the store answers. Ends on client close, send
/// failure, or when the subscription is released by the registry.
async fn handle_socket<S: RecordStore>(
    mut socket: WebSocket,
    state: AppState<S>,
    mut subscription: ChangeSubscription,
) {
    let client_id = subscription.id();
    info!("WebSocket subscriber {} connected", client_id);
    let (reply_tx, mut reply_rx) = mpsc::channel::<String>(REPLY_QUEUE);

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let state = state.clone();
                    let reply_tx = reply_tx.clone();
                    tokio::spawn(async move {
                        if let Some(reply) = client_reply(&state, text.as_str()).await {
                            let _ = reply_tx.send(reply).await;
                        }
                    });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket {} read error: {}", client_id, e);
                    break;
                }
            },
            event = subscription.recv() => match event {
                Some(event) => {
                    let Ok(payload) = event.to_json() else {
                        warn!("Dropping unserializable event for {}", event.data.id());
                        continue;
                    };
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Evicted as slow, or the server is shutting down.
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            Some(reply) = reply_rx.recv() => {
                if socket.send(Message::Text(reply.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("WebSocket subscriber {} disconnected", client_id);
}

/// Handles one inbound text frame. Returns the frame to send back, if any.
async fn client_reply<S: RecordStore>(state: &AppState<S>, text: &str) -> Option<String> {
    let reply = match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage { scan: Some(id) }) => match state.service.scanner().scan(&id).await {
            Ok(_) => return None,
            Err(RecordError::Storage(e)) => {
                warn!("Scan of '{}' failed in storage: {}", id, e);
                ServerMessage::error("StorageUnavailable", "Internal server error")
            }
            Err(e) => ServerMessage::error(e.kind(), e.to_string()),
        },
        Ok(ClientMessage { scan: None }) => {
            ServerMessage::error("ValidationError", "unsupported message")
        }
        Err(e) => ServerMessage::error("ValidationError", format!("invalid message: {}", e)),
    };
    serde_json::to_string(&reply).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, header};
    use futures_util::{SinkExt, StreamExt};
    use lib_common::core::DispatcherLimits;
    use lib_common::records::{
        ListQuery, MemoryRecordStore, RecordService, ScanPage, ServiceSettings, StoreError,
    };
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
    use tower::ServiceExt;

    type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

    fn state_with<S: RecordStore>(store: S, settings: ServiceSettings) -> AppState<S> {
        let service = RecordService::new(store, settings);
        AppState::new(Arc::new(service), Duration::from_secs(15))
    }

    fn test_state(settings: ServiceSettings) -> AppState<MemoryRecordStore> {
        state_with(MemoryRecordStore::new(), settings)
    }

    /// Memory store whose `get` (used by scans) waits before answering.
    #[derive(Debug)]
    struct StallingLookups {
        inner: MemoryRecordStore,
        delay: Duration,
    }

    impl RecordStore for StallingLookups {
        async fn get(&self, id: &str) -> Result<Option<Record>, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.get(id).await
        }

        async fn insert(&self, record: &Record) -> Result<Record, StoreError> {
            self.inner.insert(record).await
        }

        async fn update(&self, record: &Record) -> Result<Option<Record>, StoreError> {
            self.inner.update(record).await
        }

        async fn delete(&self, id: &str) -> Result<Option<Record>, StoreError> {
            self.inner.delete(id).await
        }

        async fn scan(&self, query: &ListQuery) -> Result<ScanPage, StoreError> {
            self.inner.scan(query).await
        }
    }

    /// Serves the router on an ephemeral port and opens `/records/ws`.
    async fn connect_ws<S: RecordStore>(state: AppState<S>) -> WsClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router(state)).await.unwrap() });

        let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/records/ws", addr))
            .await
            .unwrap();
        socket
    }

    async fn next_frame(socket: &mut WsClient) -> Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(2), socket.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let WsMessage::Text(text) = message {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    fn record_draft(value: Value) -> RecordDraft {
        let record: Record = serde_json::from_value(value).unwrap();
        RecordDraft::from(record)
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn leo(age: i64) -> Value {
        json!({"id": "A1", "name": "Leo", "species": "Lion", "age": age, "healthStatus": "Healthy"})
    }

    #[tokio::test]
    async fn create_update_list_delete_scenario() {
        let app = router(test_state(ServiceSettings::default()));

        let (status, created) = send(&app, Method::POST, "/records", Some(leo(4))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created, leo(4));

        let (status, updated) = send(&app, Method::PUT, "/records/A1", Some(leo(5))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["age"], 5);

        send(
            &app,
            Method::POST,
            "/records",
            Some(json!({"id": "B2", "name": "Kiki", "species": "Parrot", "age": 12, "healthStatus": "Good"})),
        )
        .await;
        let (status, page) = send(&app, Method::GET, "/records?sortBy=age&order=DESC", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 2);
        assert_eq!(page["page"], 1);
        assert_eq!(page["limit"], 10);
        assert_eq!(page["totalPages"], 1);
        let ages: Vec<i64> = page["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["age"].as_i64().unwrap())
            .collect();
        assert_eq!(ages, vec![12, 5]);

        let (status, deleted) = send(&app, Method::DELETE, "/records/A1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["id"], "A1");

        let (_, page) = send(&app, Method::GET, "/records", None).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["data"][0]["id"], "B2");

        let (status, _) = send(&app, Method::PUT, "/records/A1", Some(leo(6))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = send(&app, Method::DELETE, "/records/A1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error_type"], "NotFound");
    }

    #[tokio::test]
    async fn client_errors_have_their_status() {
        let app = router(test_state(ServiceSettings::default()));
        send(&app, Method::POST, "/records", Some(leo(4))).await;

        let (status, body) = send(&app, Method::POST, "/records", Some(leo(4))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error_type"], "Conflict");

        let (status, body) = send(&app, Method::POST, "/records", Some(json!({"id": "C3"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_type"], "ValidationError");
        assert!(body["message"].as_str().unwrap().contains("\"name\" is required"));

        let (status, body) = send(&app, Method::GET, "/records?sortBy=color", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_type"], "InvalidSortColumn");

        let (status, _) = send(&app, Method::GET, "/records?page=0", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::GET, "/records/nobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, record) = send(&app, Method::GET, "/records/A1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["name"], "Leo");
    }

    #[tokio::test]
    async fn scan_returns_the_record_or_404() {
        let app = router(test_state(ServiceSettings::default()));
        send(&app, Method::POST, "/records", Some(leo(4))).await;

        let (status, record) = send(&app, Method::POST, "/scan", Some(json!({"id": "A1"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["species"], "Lion");

        let (status, _) = send(&app, Method::POST, "/scan", Some(json!({"id": "ZZ"}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::POST, "/scan", Some(json!({"uid": "A1"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn sse_stream_carries_change_events() {
        let state = test_state(ServiceSettings::default());
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/records/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "text/event-stream"
        );
        assert_eq!(state.service.notifier().subscriber_count(), 1);

        let (status, _) = send(&app, Method::POST, "/records", Some(leo(4))).await;
        assert_eq!(status, StatusCode::CREATED);

        let mut body = response.into_body().into_data_stream();
        let frame = tokio::time::timeout(Duration::from_secs(2), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.contains("event: created"), "{}", text);

        let data = text
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .unwrap();
        let event: Value = serde_json::from_str(data).unwrap();
        assert_eq!(event["event"], "created");
        assert_eq!(event["data"], leo(4));
        assert!(event["timestamp"].is_string());

        drop(body);
        assert_eq!(state.service.notifier().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn full_registry_answers_503() {
        let settings = ServiceSettings {
            subscriber_limits: DispatcherLimits {
                max_clients: 1,
                queue_capacity: 4,
            },
            ..ServiceSettings::default()
        };
        let app = router(test_state(settings));

        let first = app
            .clone()
            .oneshot(Request::get("/records/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let (status, body) = send(&app, Method::GET, "/records/stream", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error_type"], "SubscriberLimitReached");

        let (_, health) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(health["subscribers"], 1);
        drop(first);
    }

    #[tokio::test]
    async fn websocket_session_forwards_events_and_serves_scans() {
        let state = test_state(ServiceSettings::default());
        let mut socket = connect_ws(state.clone()).await;
        assert_eq!(state.service.notifier().subscriber_count(), 1);

        state.service.mutations().create(record_draft(leo(4))).await.unwrap();
        let frame = next_frame(&mut socket).await;
        assert_eq!(frame["event"], "created");
        assert_eq!(frame["data"], leo(4));
        assert!(frame["timestamp"].is_string());

        socket.send(WsMessage::text(r#"{"scan": "A1"}"#)).await.unwrap();
        let frame = next_frame(&mut socket).await;
        assert_eq!(frame["event"], "scanned");
        assert_eq!(frame["data"], leo(4));

        socket.send(WsMessage::text(r#"{"scan": "ZZ"}"#)).await.unwrap();
        let frame = next_frame(&mut socket).await;
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["error_type"], "NotFound");

        state.service.mutations().delete("A1").await.unwrap();
        let frame = next_frame(&mut socket).await;
        assert_eq!(frame["event"], "deleted");
        assert_eq!(frame["data"], json!({"id": "A1"}));

        socket.close(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            while state.service.notifier().subscriber_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn websocket_keeps_draining_while_a_scan_waits() {
        let settings = ServiceSettings {
            subscriber_limits: DispatcherLimits {
                max_clients: 8,
                queue_capacity: 2,
            },
            ..ServiceSettings::default()
        };
        let store = StallingLookups {
            inner: MemoryRecordStore::new(),
            delay: Duration::from_millis(500),
        };
        let state = state_with(store, settings);
        let mut socket = connect_ws(state.clone()).await;

        state.service.mutations().create(record_draft(leo(4))).await.unwrap();
        assert_eq!(next_frame(&mut socket).await["event"], "created");

        socket.send(WsMessage::text(r#"{"scan": "A1"}"#)).await.unwrap();
        for i in 0..5 {
            let id = format!("R{}", i);
            let body = json!({"id": id, "name": "Rex", "species": "Dog", "age": i, "healthStatus": "Good"});
            state.service.mutations().create(record_draft(body)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for i in 0..5 {
            let frame = next_frame(&mut socket).await;
            assert_eq!(frame["event"], "created");
            assert_eq!(frame["data"]["id"], format!("R{}", i));
        }
        let frame = next_frame(&mut socket).await;
        assert_eq!(frame["event"], "scanned");
        assert_eq!(frame["data"]["id"], "A1");
        assert_eq!(state.service.notifier().subscriber_count(), 1);
    }

    #[tokio::test]
    async fn websocket_scan_requests() {
        let state = test_state(ServiceSettings::default());
        let record: Record = serde_json::from_value(leo(4)).unwrap();
        state
            .service
            .mutations()
            .create(RecordDraft::from(record))
            .await
            .unwrap();
        let mut observer = state.service.notifier().subscribe("observer").unwrap();

        assert_eq!(client_reply(&state, r#"{"scan": "A1"}"#).await, None);
        let event = observer.recv().await.unwrap();
        assert_eq!(event.event.as_str(), "scanned");
        assert_eq!(event.data.id(), "A1");

        let reply: Value =
            serde_json::from_str(&client_reply(&state, r#"{"scan": "nope"}"#).await.unwrap()).unwrap();
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["error_type"], "NotFound");
        assert!(observer.try_recv().is_none());

        let reply: Value = serde_json::from_str(&client_reply(&state, "not json").await.unwrap()).unwrap();
        assert_eq!(reply["error_type"], "ValidationError");
    }
}

//! End-to-end tests against an in-process Timeplus stand-in
//!
//! The server speaks just enough of the REST, SSE and websocket surface to
//! drive the client over real HTTP connections.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde_json::{json, Value};
use timeplus_client::{
    ClientConfig, ClientError, ColumnDef, IngestData, IngestPayload, StreamDef, TimeplusClient,
};
use tokio_test::{assert_err, assert_ok};

const API_KEY: &str = "test-key";

const METADATA: &str = concat!(
    "event: query\n",
    "data: {\"id\": \"q-42\", \"sql\": \"select 1\", ",
    "\"result\": {\"header\": [{\"name\": \"1\", \"type\": \"uint8\"}]}}\n",
    "\n",
);

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    api_key: Option<String>,
    body: Value,
}

#[derive(Clone, Default)]
struct AppState {
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl AppState {
    fn record(&self, path: &str, headers: &HeaderMap, body: Value) {
        let api_key = headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests.lock().unwrap().push(Recorded {
            path: path.to_string(),
            api_key,
            body,
        });
    }

    fn recorded(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

fn sse(chunks: Vec<&'static str>, hold_open: bool) -> Response {
    let body: BoxStream<'static, Result<Bytes, std::io::Error>> = {
        let parts = stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c.as_bytes()))));
        if hold_open {
            parts.chain(stream::pending()).boxed()
        } else {
            parts.boxed()
        }
    };
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(body))
        .unwrap()
}

async fn queries(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.record("/queries", &headers, body.clone());
    match body["sql"].as_str().unwrap_or_default() {
        "select 1" => sse(vec![METADATA, "data: [[1]]\n"], false),
        "select * from live" => sse(vec![METADATA, "data: [[1]]\n"], true),
        "select headless" => sse(vec!["data: [[1]]\n", METADATA], false),
        "select split" => sse(
            vec![
                &METADATA[..20],
                &METADATA[20..],
                "data: [[1, \"a\"],",
                " [2, \"b\"]]\n\nevent: metrics\ndata: {\"count\": 2}\n",
            ],
            false,
        ),
        _ => (StatusCode::UNAUTHORIZED, "invalid api key").into_response(),
    }
}

async fn list_streams(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    state.record("/streams", &headers, Value::Null);
    Json(json!([
        {"name": "car_live_data", "columns": [{"name": "speed", "type": "float64", "default": ""}]},
        {"name": "_tp_metric_cpu", "columns": []}
    ]))
}

async fn create_stream(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
    state.record("/streams:create", &headers, body);
    StatusCode::CREATED
}

async fn ingest(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    state.record(&format!("/streams/{}/ingest", name), &headers, body);
    StatusCode::OK
}

async fn create_query_v1(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    state.record("/v1/queries", &headers, body);
    Json(json!({"id": "ws-7", "sql": "select 1", "status": "running"}))
}

async fn query_socket(Path(id): Path<String>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let _ = socket.send(Message::Text(format!("[\"{}\", 1]", id).into())).await;
        let _ = socket.send(Message::Text("[\"done\", 2]".into())).await;
        let _ = socket.send(Message::Close(None)).await;
    })
}

async fn serve() -> (TimeplusClient, AppState) {
    let state = AppState::default();
    let app = Router::new()
        .route("/api/v1beta2/queries", post(queries))
        .route("/api/v1beta2/streams", get(list_streams).post(create_stream))
        .route("/api/v1beta2/streams/{name}/ingest", post(ingest))
        .route("/api/v1beta1/queries", post(create_query_v1))
        .route("/ws/queries/{id}", get(query_socket))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = ClientConfig::new(format!("http://{}", addr), "", API_KEY);
    (TimeplusClient::new(config).unwrap(), state)
}

#[tokio::test]
async fn test_select_one_over_sse() {
    let (client, state) = serve().await;

    let query = assert_ok!(client.query_stream("select 1", 100, 500).await);
    assert_eq!(query.metadata.id, "q-42");
    assert_eq!(query.metadata.header(), &[ColumnDef::new("1", "uint8")]);

    let (mut stream, _cancel, _) = query.into_parts();
    let batches: Vec<_> = (&mut stream).collect().await;
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].as_ref().unwrap(), &vec![vec![json!(1)]]);

    let sent = state.recorded();
    assert_eq!(sent[0].api_key.as_deref(), Some(API_KEY));
    assert_eq!(sent[0].body["sql"], "select 1");
    assert_eq!(sent[0].body["batching_policy"], json!({"count": 100, "time_ms": 500}));
}

#[tokio::test]
async fn test_split_chunks_and_metrics() {
    let (client, _) = serve().await;

    let mut query = client.query_stream("select split", 0, 0).await.unwrap();
    let batch = query.stream.next_batch().await.unwrap().unwrap();
    assert_eq!(batch, vec![vec![json!(1), json!("a")], vec![json!(2), json!("b")]]);
    assert!(query.stream.next_batch().await.is_none());
    assert_eq!(query.metrics.borrow().as_ref().unwrap()["count"], json!(2));
}

#[tokio::test]
async fn test_cancel_live_query() {
    let (client, _) = serve().await;

    let (mut stream, canceller, _) = client
        .query_stream("select * from live", 0, 0)
        .await
        .unwrap()
        .into_parts();
    assert!(stream.next().await.unwrap().is_ok());

    let reader = tokio::spawn(async move { stream.next().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    canceller.cancel();

    let last = tokio::time::timeout(Duration::from_secs(5), reader)
        .await
        .expect("reader hung after cancel")
        .unwrap();
    assert!(last.is_none());
}

#[tokio::test]
async fn test_query_requires_metadata_first() {
    let (client, _) = serve().await;

    let err = assert_err!(client.query_stream("select headless", 0, 0).await);
    match err {
        ClientError::Query { sql, source } => {
            assert_eq!(sql, "select headless");
            assert!(matches!(*source, ClientError::Protocol(_)));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_query_reports_status() {
    let (client, _) = serve().await;

    let err = assert_err!(client.query_stream("drop everything", 0, 0).await);
    assert_eq!(err.status_code(), Some(401));
}

#[tokio::test]
async fn test_registry_and_ingest() {
    let (client, state) = serve().await;

    assert!(client.exist_stream("car_live_data").await.unwrap());
    assert!(!client.exist_stream("missing").await.unwrap());
    assert!(matches!(
        client.get_stream("missing").await,
        Err(ClientError::StreamNotFound(_))
    ));

    let def = StreamDef::new("cars", vec![ColumnDef::new("speed", "float64")]);
    client.create_stream(&def).await.unwrap();

    let payload = IngestPayload {
        stream: "cars".to_string(),
        data: IngestData {
            columns: vec!["speed".to_string()],
            data: vec![vec![json!(1.5)], vec![json!(2.5)]],
        },
    };
    client.insert_data(&payload).await.unwrap();

    let sent = state.recorded();
    let created = sent.iter().find(|r| r.path == "/streams:create").unwrap();
    assert_eq!(created.body["name"], "cars");
    let ingested = sent.iter().find(|r| r.path == "/streams/cars/ingest").unwrap();
    assert_eq!(ingested.body, json!({"columns": ["speed"], "data": [[1.5], [2.5]]}));
    assert!(sent.iter().all(|r| r.api_key.as_deref() == Some(API_KEY)));
}

#[tokio::test]
async fn test_websocket_query_rows() {
    let (client, _) = serve().await;

    let query = client.query_stream_v1("select 1").await.unwrap();
    assert_eq!(query.metadata.id, "ws-7");

    let mut stream = query.stream;
    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first, vec![vec![json!("ws-7"), json!(1)]]);
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(second, vec![vec![json!("done"), json!(2)]]);
    assert!(stream.next().await.is_none());
}

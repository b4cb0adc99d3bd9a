//! Realtime-path integration tests against a scripted local WebSocket
//! server speaking the graphql-ws control protocol.

use appsync_link::{AppSyncClient, AppSyncLinkError, AppSyncTimeouts, Credentials};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type ServerWs = WebSocketStream<TcpStream>;

/// Accept one WebSocket connection and hand it to `handler`, capturing the
/// HTTP upgrade request on the way. Returns the `ws://` URL to dial.
async fn spawn_server<F, Fut>(handler: F) -> (String, oneshot::Receiver<Request>)
where
    F: FnOnce(ServerWs) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (req_tx, req_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut captured = None;
        let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, mut resp: Response| {
            captured = Some(clone_request(req));
            resp.headers_mut()
                .insert("Sec-WebSocket-Protocol", "graphql-ws".parse().unwrap());
            Ok(resp)
        })
        .await
        .unwrap();
        if let Some(req) = captured {
            let _ = req_tx.send(req);
        }
        handler(ws).await;
    });

    (format!("ws://{}/graphql", addr), req_rx)
}

fn clone_request(req: &Request) -> Request {
    let mut out = Request::builder().uri(req.uri().clone());
    for (name, value) in req.headers() {
        out = out.header(name, value);
    }
    out.body(()).unwrap()
}

async fn recv_json(ws: &mut ServerWs) -> Option<Value> {
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => return serde_json::from_str(text.as_str()).ok(),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

async fn send_json(ws: &mut ServerWs, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Consume the connection_init frame and acknowledge it.
async fn handshake(ws: &mut ServerWs, keep_alive_ms: u64) {
    let init = recv_json(ws).await.unwrap();
    assert_eq!(init["type"], "connection_init");
    send_json(
        ws,
        json!({"type": "connection_ack", "payload": {"connectionTimeoutMs": keep_alive_ms}}),
    )
    .await;
}

fn client(realtime_url: &str) -> AppSyncClient {
    AppSyncClient::builder()
        .graphql_url("https://abc123.appsync-api.us-east-1.amazonaws.com/graphql")
        .realtime_url(realtime_url)
        .region("us-east-1")
        .credentials(Credentials::new("AKID", "secret", None))
        .timeouts(AppSyncTimeouts::fast())
        .build()
        .unwrap()
}

#[tokio::test]
async fn handshake_carries_subprotocol_and_encoded_auth() {
    let (url, req_rx) = spawn_server(|mut ws| async move {
        handshake(&mut ws, 30_000).await;
        let start = recv_json(&mut ws).await.unwrap();
        let id = start["id"].as_str().unwrap().to_string();
        send_json(&mut ws, json!({"type": "start_ack", "id": id.clone()})).await;
        // Keep the socket open until the client is done.
        while recv_json(&mut ws).await.is_some() {}
    })
    .await;

    let client = client(&url);
    let subscription = client
        .subscribe("subscription { onItemChanged { id } }", None)
        .await
        .unwrap();

    let request = req_rx.await.unwrap();
    assert_eq!(
        request.headers()["Sec-WebSocket-Protocol"],
        "graphql-ws"
    );

    let full = reqwest::Url::parse(&format!("http://localhost{}", request.uri())).unwrap();
    let params: std::collections::HashMap<String, String> =
        full.query_pairs().into_owned().collect();

    let header = BASE64.decode(&params["header"]).unwrap();
    let header: Value = serde_json::from_slice(&header).unwrap();
    assert_eq!(header["host"], "abc123.appsync-api.us-east-1.amazonaws.com");
    assert!(header["authorization"]
        .as_str()
        .unwrap()
        .starts_with("AWS4-HMAC-SHA256"));

    let payload = BASE64.decode(&params["payload"]).unwrap();
    assert_eq!(String::from_utf8(payload).unwrap(), r#""{}""#);

    drop(subscription);
    client.close().await;
}

#[tokio::test]
async fn concurrent_subscribes_share_one_connection() {
    let (url, _req_rx) = spawn_server(|mut ws| async move {
        handshake(&mut ws, 30_000).await;
        for _ in 0..2 {
            let frame = recv_json(&mut ws).await.unwrap();
            // A second connection_init here would mean a second handshake
            // raced in on the same socket.
            assert_eq!(frame["type"], "start");
            let id = frame["id"].as_str().unwrap().to_string();
            send_json(&mut ws, json!({"type": "start_ack", "id": id.clone()})).await;
        }
        while recv_json(&mut ws).await.is_some() {}
    })
    .await;

    let client = client(&url);
    let (a, b) = tokio::join!(
        client.subscribe("subscription { onA }", None),
        client.subscribe("subscription { onB }", None),
    );

    let a = a.unwrap();
    let b = b.unwrap();
    assert_ne!(a.id(), b.id());
    client.close().await;
}

#[tokio::test]
async fn data_frames_arrive_in_order_until_complete() {
    let (url, _req_rx) = spawn_server(|mut ws| async move {
        handshake(&mut ws, 30_000).await;
        let start = recv_json(&mut ws).await.unwrap();
        let id = start["id"].as_str().unwrap().to_string();

        // The start frame carries the request JSON and signed headers.
        let data = start["payload"]["data"].as_str().unwrap();
        let request: Value = serde_json::from_str(data).unwrap();
        assert_eq!(request["query"], "subscription { onItemChanged { id } }");
        assert!(start["payload"]["extensions"]["authorization"]["authorization"]
            .as_str()
            .unwrap()
            .starts_with("AWS4-HMAC-SHA256"));

        send_json(&mut ws, json!({"type": "start_ack", "id": id.clone()})).await;
        send_json(
            &mut ws,
            json!({"type": "data", "id": id.clone(), "payload": {"data": {"seq": 1}}}),
        )
        .await;
        send_json(
            &mut ws,
            json!({"type": "data", "id": id.clone(), "payload": {"data": {"seq": 2}}}),
        )
        .await;
        send_json(&mut ws, json!({"type": "complete", "id": id.clone()})).await;
        while recv_json(&mut ws).await.is_some() {}
    })
    .await;

    let client = client(&url);
    let mut subscription = client
        .subscribe("subscription { onItemChanged { id } }", None)
        .await
        .unwrap();

    let first = subscription.next().await.unwrap().unwrap();
    assert_eq!(first, json!({"data": {"seq": 1}}));
    let second = subscription.next().await.unwrap().unwrap();
    assert_eq!(second, json!({"data": {"seq": 2}}));

    assert!(subscription.next().await.is_none());
    assert!(subscription.is_closed());
}

#[tokio::test]
async fn data_payload_with_errors_ends_the_stream() {
    let (url, _req_rx) = spawn_server(|mut ws| async move {
        handshake(&mut ws, 30_000).await;
        let start = recv_json(&mut ws).await.unwrap();
        let id = start["id"].as_str().unwrap().to_string();
        send_json(&mut ws, json!({"type": "start_ack", "id": id.clone()})).await;
        send_json(
            &mut ws,
            json!({"type": "data", "id": id.clone(), "payload": {"errors": [{"message": "stream  broke"}]}}),
        )
        .await;
        while recv_json(&mut ws).await.is_some() {}
    })
    .await;

    let client = client(&url);
    let mut subscription = client
        .subscribe("subscription { onItemChanged { id } }", None)
        .await
        .unwrap();

    match subscription.next().await {
        Some(Err(AppSyncLinkError::GraphQl(message))) => {
            assert_eq!(message, "stream broke");
        },
        other => panic!("expected a terminal GraphQL error, got {:?}", other.is_some()),
    }
    assert!(subscription.is_closed());
    assert!(subscription.next().await.is_none());
}

#[tokio::test]
async fn token_subscriptions_authenticate_with_host_and_token_only() {
    let (start_tx, start_rx) = oneshot::channel();
    let (url, req_rx) = spawn_server(|mut ws| async move {
        handshake(&mut ws, 30_000).await;
        let start = recv_json(&mut ws).await.unwrap();
        let id = start["id"].as_str().unwrap().to_string();
        send_json(&mut ws, json!({"type": "start_ack", "id": id.clone()})).await;
        let _ = start_tx.send(start);
        while recv_json(&mut ws).await.is_some() {}
    })
    .await;

    let client = client(&url);
    let _subscription = client
        .subscribe_with_token("subscription { onItemChanged { id } }", None, "eyJraWQi")
        .await
        .unwrap();

    let request = req_rx.await.unwrap();
    let full = reqwest::Url::parse(&format!("http://localhost{}", request.uri())).unwrap();
    let params: std::collections::HashMap<String, String> =
        full.query_pairs().into_owned().collect();
    let header = BASE64.decode(&params["header"]).unwrap();
    let header: Value = serde_json::from_slice(&header).unwrap();
    let header = header.as_object().unwrap();
    assert_eq!(header.len(), 2);
    assert_eq!(header["host"], "abc123.appsync-api.us-east-1.amazonaws.com");
    assert_eq!(header["Authorization"], "eyJraWQi");

    let start = start_rx.await.unwrap();
    let auth = start["payload"]["extensions"]["authorization"]
        .as_object()
        .unwrap();
    assert_eq!(auth.len(), 2);
    assert_eq!(auth["host"], "abc123.appsync-api.us-east-1.amazonaws.com");
    assert_eq!(auth["Authorization"], "eyJraWQi");
}

#[tokio::test]
async fn error_terminated_subscription_is_stopped_on_the_wire() {
    let (stop_tx, stop_rx) = oneshot::channel();
    let (url, _req_rx) = spawn_server(|mut ws| async move {
        handshake(&mut ws, 30_000).await;
        let start = recv_json(&mut ws).await.unwrap();
        let id = start["id"].as_str().unwrap().to_string();
        send_json(&mut ws, json!({"type": "start_ack", "id": id.clone()})).await;
        send_json(
            &mut ws,
            json!({"type": "data", "id": id.clone(), "payload": {"errors": [{"message": "gone"}]}}),
        )
        .await;

        // The abandoned consumer must still release the subscription.
        let next = recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "complete", "id": id.clone()})).await;
        let closed = recv_json(&mut ws).await.is_none();
        let _ = stop_tx.send((next, closed));
    })
    .await;

    let client = client(&url);
    let mut subscription = client
        .subscribe("subscription { onItemChanged { id } }", None)
        .await
        .unwrap();

    assert!(matches!(subscription.next().await, Some(Err(_))));
    drop(subscription);

    let (frame, closed) = stop_rx.await.unwrap();
    let frame = frame.expect("expected a stop frame");
    assert_eq!(frame["type"], "stop");
    assert!(closed);
}

#[tokio::test]
async fn unsubscribe_sends_stop_and_awaits_complete() {
    let (stop_tx, stop_rx) = oneshot::channel();
    let (url, _req_rx) = spawn_server(|mut ws| async move {
        handshake(&mut ws, 30_000).await;
        let start = recv_json(&mut ws).await.unwrap();
        let id = start["id"].as_str().unwrap().to_string();
        send_json(&mut ws, json!({"type": "start_ack", "id": id.clone()})).await;

        let next = recv_json(&mut ws).await;
        send_json(&mut ws, json!({"type": "complete", "id": id.clone()})).await;
        let _ = stop_tx.send(next);
        while recv_json(&mut ws).await.is_some() {}
    })
    .await;

    let client = client(&url);
    let subscription = client
        .subscribe("subscription { onItemChanged { id } }", None)
        .await
        .unwrap();
    let id = subscription.id().to_string();

    subscription.unsubscribe().await;

    let frame = stop_rx.await.unwrap().expect("expected a stop frame");
    assert_eq!(frame["type"], "stop");
    assert_eq!(frame["id"], id.as_str());
}

#[tokio::test]
async fn unacknowledged_subscription_gets_no_stop_frame() {
    let (frame_tx, frame_rx) = oneshot::channel();
    let (url, _req_rx) = spawn_server(|mut ws| async move {
        handshake(&mut ws, 30_000).await;
        let start = recv_json(&mut ws).await.unwrap();
        assert_eq!(start["type"], "start");

        // Never acknowledge; the next event must be the socket closing,
        // not a stop frame.
        let next = recv_json(&mut ws).await;
        let _ = frame_tx.send(next);
    })
    .await;

    let client = client(&url);
    let err = client
        .subscribe("subscription { onItemChanged { id } }", None)
        .await
        .unwrap_err();
    assert!(matches!(err, AppSyncLinkError::Timeout(_)));

    assert!(frame_rx.await.unwrap().is_none());
}

#[tokio::test]
async fn keep_alive_lapse_fails_active_subscriptions() {
    let (url, _req_rx) = spawn_server(|mut ws| async move {
        handshake(&mut ws, 200).await;
        let start = recv_json(&mut ws).await.unwrap();
        let id = start["id"].as_str().unwrap().to_string();
        send_json(&mut ws, json!({"type": "start_ack", "id": id.clone()})).await;
        send_json(&mut ws, json!({"type": "ka"})).await;
        // Silence from here on; the negotiated 200 ms interval lapses.
        while recv_json(&mut ws).await.is_some() {}
    })
    .await;

    let client = client(&url);
    let mut subscription = client
        .subscribe("subscription { onItemChanged { id } }", None)
        .await
        .unwrap();

    match subscription.next().await {
        Some(Err(AppSyncLinkError::KeepAliveIntervalLapsed(ms))) => assert_eq!(ms, 200),
        other => panic!("expected a keep-alive lapse, got {:?}", other.is_some()),
    }
}

#[tokio::test]
async fn close_fails_active_subscriptions_with_client_closing() {
    let (url, _req_rx) = spawn_server(|mut ws| async move {
        handshake(&mut ws, 30_000).await;
        let start = recv_json(&mut ws).await.unwrap();
        let id = start["id"].as_str().unwrap().to_string();
        send_json(&mut ws, json!({"type": "start_ack", "id": id.clone()})).await;
        while recv_json(&mut ws).await.is_some() {}
    })
    .await;

    let client = client(&url);
    let mut subscription = client
        .subscribe("subscription { onItemChanged { id } }", None)
        .await
        .unwrap();

    client.close().await;

    match subscription.next().await {
        Some(Err(AppSyncLinkError::ClientClosing)) => {},
        other => panic!("expected client-closing, got {:?}", other.is_some()),
    }
}

#[tokio::test]
async fn connection_error_during_handshake_propagates() {
    let (url, _req_rx) = spawn_server(|mut ws| async move {
        let init = recv_json(&mut ws).await.unwrap();
        assert_eq!(init["type"], "connection_init");
        send_json(
            &mut ws,
            json!({"type": "connection_error", "payload": {"errors": [{"message": "unauthorized"}]}}),
        )
        .await;
    })
    .await;

    let client = client(&url);
    let err = client
        .subscribe("subscription { onItemChanged { id } }", None)
        .await
        .unwrap_err();

    match err {
        AppSyncLinkError::Connection(message) => {
            assert!(message.contains("unauthorized"), "got: {}", message);
        },
        other => panic!("expected a connection error, got {}", other),
    }
}

#[tokio::test]
async fn last_unsubscribe_closes_the_connection() {
    let (closed_tx, closed_rx) = oneshot::channel();
    let (url, _req_rx) = spawn_server(|mut ws| async move {
        handshake(&mut ws, 30_000).await;
        let start = recv_json(&mut ws).await.unwrap();
        let id = start["id"].as_str().unwrap().to_string();
        send_json(&mut ws, json!({"type": "start_ack", "id": id.clone()})).await;

        // Stop frame, complete confirmation, then the socket going away.
        let stop = recv_json(&mut ws).await.unwrap();
        assert_eq!(stop["type"], "stop");
        send_json(&mut ws, json!({"type": "complete", "id": id.clone()})).await;
        let closed = recv_json(&mut ws).await.is_none();
        let _ = closed_tx.send(closed);
    })
    .await;

    let client = client(&url);
    let subscription = client
        .subscribe("subscription { onItemChanged { id } }", None)
        .await
        .unwrap();

    subscription.unsubscribe().await;
    assert!(closed_rx.await.unwrap());
}

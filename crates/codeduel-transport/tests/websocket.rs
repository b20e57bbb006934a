//! Integration tests for the WebSocket transport.
//!
//! These spin up a real listener and client so the split reader/writer
//! halves and the upgrade-request credential are exercised end to end.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use codeduel_transport::{Connection, Transport, WebSocketTransport};
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn bind() -> (WebSocketTransport, String) {
        let transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr").to_string();
        (transport, addr)
    }

    async fn connect_client(url: &str) -> ClientWs {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .expect("client should connect");
        ws
    }

    #[tokio::test]
    async fn test_websocket_accept_and_send_receive() {
        let (mut transport, addr) = bind().await;
        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let mut client_ws = connect_client(&format!("ws://{addr}")).await;
        let server_conn = server_handle.await.expect("task should complete");

        assert!(server_conn.id().as_u64() > 0);
        assert!(server_conn.credential().is_none());

        // JSON goes out as a text frame.
        server_conn
            .send(br#"{"event":"pong"}"#)
            .await
            .expect("send should succeed");
        let msg = client_ws.next().await.unwrap().unwrap();
        assert!(msg.is_text());
        assert_eq!(msg.into_data().as_ref(), br#"{"event":"pong"}"#);

        client_ws
            .send(Message::Text(r#"{"event":"ping"}"#.to_string().into()))
            .await
            .unwrap();
        let received = server_conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, br#"{"event":"ping"}"#);

        server_conn.close().await.expect("close should succeed");
    }

    #[tokio::test]
    async fn test_websocket_captures_token_from_query() {
        let (mut transport, addr) = bind().await;
        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let _client =
            connect_client(&format!("ws://{addr}/ws?token=abc123")).await;
        let server_conn = server_handle.await.unwrap();

        assert_eq!(server_conn.credential(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_websocket_send_while_recv_pending() {
        // A reader parked in recv() must not block the writer half.
        let (mut transport, addr) = bind().await;
        let server_handle = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });

        let mut client_ws = connect_client(&format!("ws://{addr}")).await;
        let server_conn =
            std::sync::Arc::new(server_handle.await.unwrap());

        let reader = {
            let conn = std::sync::Arc::clone(&server_conn);
            tokio::spawn(async move { conn.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(
            Duration::from_secs(2),
            server_conn.send(b"pushed"),
        )
        .await
        .expect("send must not wait for recv")
        .expect("send should succeed");

        let msg = client_ws.next().await.unwrap().unwrap();
        assert_eq!(msg.into_data().as_ref(), b"pushed");

        client_ws.send(Message::Close(None)).await.unwrap();
        let result = reader.await.unwrap().expect("recv should not error");
        assert!(result.is_none(), "should return None on client close");
    }

    #[tokio::test]
    async fn test_websocket_ids_are_distinct_and_binary_round_trips() {
        let (mut transport, addr) = bind().await;
        let url = format!("ws://{addr}");

        let first = tokio::spawn({
            let url = url.clone();
            async move { connect_client(&url).await }
        });
        let first_conn = transport.accept().await.expect("first accept");
        let _first_client = first.await.unwrap();

        let second = tokio::spawn(async move { connect_client(&url).await });
        let second_conn = transport.accept().await.expect("second accept");
        let mut second_client = second.await.unwrap();

        assert_ne!(first_conn.id(), second_conn.id());
        assert!(first_conn.id() < second_conn.id());

        second_conn.send(&[0xff, 0x00, 0x7f]).await.unwrap();
        let msg = second_client.next().await.unwrap().unwrap();
        assert!(msg.is_binary());
        assert_eq!(msg.into_data().as_ref(), &[0xff, 0x00, 0x7f]);
    }
}

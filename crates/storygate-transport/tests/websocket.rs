//! Integration tests for the WebSocket transport.
//!
//! A real listener and a real `tokio-tungstenite` client exchange frames
//! over loopback so the split reader/writer halves are exercised end to end.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use storygate_transport::{
        Connection, Frame, FrameReader, FrameWriter, Transport, TransportError,
        WebSocketConnection, WebSocketTransport,
    };
    use tokio_tungstenite::tungstenite::Message;

    type ClientWs = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    /// Binds on a random port, connects one client, and returns both ends.
    async fn connected_pair() -> (WebSocketConnection, ClientWs) {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr");

        let server = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let (client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        let conn = server.await.expect("accept task");
        (conn, client)
    }

    #[tokio::test]
    async fn test_websocket_text_frame_reaches_reader() {
        let (conn, mut client) = connected_pair().await;
        let (mut reader, _writer) = conn.split();

        client
            .send(Message::Text(r#"{"channel":"story_save"}"#.into()))
            .await
            .expect("client send");

        let frame = reader.recv().await.expect("recv").expect("frame");
        assert_eq!(
            frame,
            Frame::Data(br#"{"channel":"story_save"}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn test_websocket_writer_sends_text_frames() {
        let (conn, mut client) = connected_pair().await;
        let (_reader, mut writer) = conn.split();

        writer
            .send(br#"{"channel":"auth","response":false}"#.to_vec())
            .await
            .expect("server send");

        let msg = client.next().await.expect("message").expect("ok");
        match msg {
            Message::Text(text) => {
                assert_eq!(text.as_str(), r#"{"channel":"auth","response":false}"#);
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_websocket_ping_is_answered_with_pong() {
        let (conn, mut client) = connected_pair().await;
        let (mut reader, mut writer) = conn.split();

        writer.ping().await.expect("ping");

        // The client must be polled for tungstenite to flush its pong.
        let client_task = tokio::spawn(async move {
            while let Some(Ok(_)) = client.next().await {}
        });

        let frame = tokio::time::timeout(Duration::from_secs(2), reader.recv())
            .await
            .expect("pong in time")
            .expect("recv")
            .expect("frame");
        assert_eq!(frame, Frame::Pong);
        client_task.abort();
    }

    #[tokio::test]
    async fn test_websocket_oversized_message_is_refused_by_reader() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind")
            .with_max_message_size(64);
        let addr = transport.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        let (mut reader, _writer) = server.await.expect("accept task").split();

        client
            .send(Message::Text("x".repeat(4096).into()))
            .await
            .expect("client send");

        let result = tokio::time::timeout(Duration::from_secs(2), reader.recv())
            .await
            .expect("reader should answer in time");
        assert!(
            matches!(result, Err(TransportError::MessageTooLarge { limit: 64 })),
            "got {result:?}"
        );
    }

    #[tokio::test]
    async fn test_websocket_message_at_limit_is_delivered() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind")
            .with_max_message_size(64);
        let addr = transport.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            transport.accept().await.expect("should accept")
        });
        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        let (mut reader, _writer) = server.await.expect("accept task").split();

        client
            .send(Message::Text("y".repeat(64).into()))
            .await
            .expect("client send");

        let frame = reader.recv().await.expect("recv").expect("frame");
        assert_eq!(frame, Frame::Data(vec![b'y'; 64]));
    }

    #[tokio::test]
    async fn test_websocket_client_close_yields_none() {
        let (conn, mut client) = connected_pair().await;
        let (mut reader, _writer) = conn.split();

        client.close(None).await.expect("close");

        let frame = reader.recv().await.expect("recv");
        assert!(frame.is_none());
    }

    #[tokio::test]
    async fn test_websocket_connection_ids_are_unique() {
        let mut transport = WebSocketTransport::bind("127.0.0.1:0")
            .await
            .expect("should bind");
        let addr = transport.local_addr().expect("local addr");

        let server = tokio::spawn(async move {
            let a = transport.accept().await.expect("accept a");
            let b = transport.accept().await.expect("accept b");
            (a.id(), b.id())
        });
        let (_c1, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("connect 1");
        let (_c2, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("connect 2");

        let (a, b) = server.await.expect("task");
        assert_ne!(a, b);
    }
}

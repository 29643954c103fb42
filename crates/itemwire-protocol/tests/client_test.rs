// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Client tests for itemwire-protocol, including live QUIC round-trips
//! against a localhost server.

use std::sync::Arc;
use std::time::Duration;

use itemwire_protocol::client::{ClientError, ItemwireClient, ItemwireClientConfig};
use itemwire_protocol::frame::Frame;
use itemwire_protocol::server::ItemwireServer;
use itemwire_protocol::wire::{self, rpc_request, rpc_response};

#[test]
fn test_default_config() {
    let config = ItemwireClientConfig::default();

    assert_eq!(config.server_addr, "127.0.0.1:8001".parse().unwrap());
    assert_eq!(config.server_name, "localhost");
    assert!(!config.dangerous_skip_cert_verification);
    assert_eq!(config.keep_alive_interval_ms, 10_000);
    assert_eq!(config.idle_timeout_ms, 600_000);
    assert_eq!(config.connect_timeout_ms, 10_000);
}

#[tokio::test]
async fn test_client_creation_with_config() {
    let config = ItemwireClientConfig {
        dangerous_skip_cert_verification: true,
        ..Default::default()
    };

    let client = ItemwireClient::new(config);
    assert!(client.is_ok());
}

#[tokio::test]
async fn test_localhost_client() {
    let client = ItemwireClient::localhost();
    assert!(client.is_ok());
}

#[tokio::test]
async fn test_client_is_connected_before_connect() {
    let client = ItemwireClient::localhost().unwrap();

    // Client should not be connected before calling connect()
    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn test_client_close_without_connect() {
    let client = ItemwireClient::localhost().unwrap();

    // Closing without connecting should not panic
    client.close().await;
}

#[tokio::test]
async fn test_config_with_disabled_keepalive() {
    let config = ItemwireClientConfig {
        keep_alive_interval_ms: 0,
        dangerous_skip_cert_verification: true,
        ..Default::default()
    };

    let client = ItemwireClient::new(config);
    assert!(client.is_ok());
}

/// Spin up a localhost server whose stream handler echoes a canned response.
async fn start_health_server() -> (Arc<ItemwireServer>, std::net::SocketAddr) {
    let server = Arc::new(ItemwireServer::localhost("127.0.0.1:0".parse().unwrap()).unwrap());
    let addr = server.local_addr().unwrap();

    let run_server = server.clone();
    tokio::spawn(async move {
        let _ = run_server
            .run(|conn| async move {
                conn.run(|mut stream| async move {
                    let Ok(frame) = stream.read_frame().await else {
                        return;
                    };
                    let Ok(request) = frame.decode::<wire::RpcRequest>() else {
                        return;
                    };

                    match request.request {
                        Some(rpc_request::Request::HealthCheck(_)) => {
                            let response = wire::RpcResponse {
                                response: Some(rpc_response::Response::Health(
                                    wire::HealthCheckResponse {
                                        status: "healthy".to_string(),
                                        version: "test".to_string(),
                                    },
                                )),
                            };
                            let _ = stream.respond(&response).await;
                        }
                        _ => {
                            let _ = stream
                                .respond_error(&wire::RpcError {
                                    code: "ITEM_NOT_FOUND".to_string(),
                                    message: "nothing here".to_string(),
                                })
                                .await;
                        }
                    }
                    let _ = stream.finish();
                })
                .await;
            })
            .await;
    });

    (server, addr)
}

fn client_for(addr: std::net::SocketAddr) -> ItemwireClient {
    ItemwireClient::new(ItemwireClientConfig {
        server_addr: addr,
        dangerous_skip_cert_verification: true,
        ..Default::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_request_round_trip_over_quic() {
    let (server, addr) = start_health_server().await;
    let client = client_for(addr);

    let request = wire::RpcRequest {
        request: Some(rpc_request::Request::HealthCheck(
            wire::HealthCheckRequest {},
        )),
    };
    let response: wire::RpcResponse = client.request(&request).await.unwrap();

    match response.response {
        Some(rpc_response::Response::Health(health)) => {
            assert_eq!(health.status, "healthy");
            assert_eq!(health.version, "test");
        }
        other => panic!("unexpected response: {:?}", other),
    }

    client.close().await;
    server.close();
}

#[tokio::test]
async fn test_error_frame_surfaces_as_rpc_error() {
    let (server, addr) = start_health_server().await;
    let client = client_for(addr);

    let request = wire::RpcRequest {
        request: Some(rpc_request::Request::GetItem(wire::GetItemRequest {
            id: "missing".to_string(),
        })),
    };
    let result: Result<wire::RpcResponse, ClientError> = client.request(&request).await;

    match result {
        Err(ClientError::Rpc { code, message }) => {
            assert_eq!(code, "ITEM_NOT_FOUND");
            assert_eq!(message, "nothing here");
        }
        other => panic!("expected Rpc error, got: {:?}", other),
    }

    client.close().await;
    server.close();
}

#[tokio::test]
async fn test_connection_reused_across_requests() {
    let (server, addr) = start_health_server().await;
    let client = client_for(addr);

    let request = wire::RpcRequest {
        request: Some(rpc_request::Request::HealthCheck(
            wire::HealthCheckRequest {},
        )),
    };

    let _: wire::RpcResponse = client.request(&request).await.unwrap();
    assert!(client.is_connected().await);
    let _: wire::RpcResponse = client.request(&request).await.unwrap();
    assert!(client.is_connected().await);

    client.close().await;
    assert!(!client.is_connected().await);
    server.close();
}

#[tokio::test]
async fn test_next_event_receives_server_push() {
    let server = Arc::new(ItemwireServer::localhost("127.0.0.1:0".parse().unwrap()).unwrap());
    let addr = server.local_addr().unwrap();

    // Push a single event on every new connection, then hold the
    // connection open long enough for delivery.
    let run_server = server.clone();
    tokio::spawn(async move {
        let _ = run_server
            .run(|conn| async move {
                if let Ok(mut send) = conn.open_uni().await {
                    let event = wire::Event {
                        kind: Some(wire::event::Kind::ItemDeleted(wire::ItemDeletedEvent {
                            item_id: "item-9".to_string(),
                        })),
                    };
                    let frame = Frame::event(&event).unwrap();
                    let _ = itemwire_protocol::frame::write_frame(&mut send, &frame).await;
                    let _ = send.finish();
                }
                tokio::time::sleep(Duration::from_secs(2)).await;
            })
            .await;
    });

    let client = client_for(addr);
    client.connect().await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), client.next_event())
        .await
        .expect("timed out waiting for event")
        .unwrap();

    match event.kind {
        Some(wire::event::Kind::ItemDeleted(deleted)) => {
            assert_eq!(deleted.item_id, "item-9");
        }
        other => panic!("unexpected event: {:?}", other),
    }

    client.close().await;
    server.close();
}

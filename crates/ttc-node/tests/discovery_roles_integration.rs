//! Integration tests for the discovery client and server over real TCP.
//!
//! # Purpose
//!
//! These tests run [`DiscoveryClient`] and [`DiscoveryServer`] on loopback
//! sockets.  mDNS is replaced by a [`StaticBrowser`] that announces the
//! server's address and a [`NullAdvertiser`], so no multicast traffic leaves
//! the machine.  They verify:
//!
//! - A client finds the server, both report `connected`, and payloads flow in
//!   both directions.
//! - The server relays a client's payload to every peer, including the
//!   sender unless `relay_echo` is off.
//! - `start`/`stop` are idempotent.
//! - A client whose server goes away reports `disconnected`, browses again,
//!   and reconnects when the server returns.
//! - Two full network managers settle into one server and one client.
//!
//! Every wait is bounded by [`within`], so a broken connection fails the
//! test instead of hanging it.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use ttc_core::ManagerState;
use ttc_node::application::{FnEndpoint, NetworkManager, Role, RoleEvent, RoleKind, RoleListener};
use ttc_node::infrastructure::network::{
    ClientConfig, DiscoveryClient, DiscoveryServer, NullAdvertiser, ServerConfig, StaticBrowser,
};

const ANNOUNCE_INTERVAL: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(5);

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting on loopback network")
}

/// Finds a free loopback port by binding and immediately releasing it.
fn free_port() -> u16 {
    let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    probe.local_addr().expect("probe addr").port()
}

fn server_on(port: u16, relay_echo: bool) -> DiscoveryServer {
    let config = ServerConfig {
        host: "loopback-test".to_string(),
        bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
        relay_echo,
        shutdown_grace: Duration::from_secs(2),
        ..ServerConfig::default()
    };
    DiscoveryServer::new(config, Arc::new(NullAdvertiser), Handle::current())
}

fn client_for(addr: SocketAddr) -> DiscoveryClient {
    let browser = StaticBrowser::new(Handle::current(), vec![addr], ANNOUNCE_INTERVAL);
    DiscoveryClient::new(ClientConfig::default(), Arc::new(browser), Handle::current())
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<RoleEvent>) -> RoleEvent {
    within(rx.recv()).await.expect("listener channel open")
}

async fn started_server(relay_echo: bool) -> (DiscoveryServer, mpsc::UnboundedReceiver<RoleEvent>, SocketAddr) {
    let server = server_on(0, relay_echo);
    let (listener, rx) = RoleListener::channel(RoleKind::Server);
    server.start(listener).await.expect("server starts");
    let addr = server.local_addr().expect("bound address");
    (server, rx, addr)
}

async fn connected_client(addr: SocketAddr) -> (DiscoveryClient, mpsc::UnboundedReceiver<RoleEvent>) {
    let client = client_for(addr);
    let (listener, mut rx) = RoleListener::channel(RoleKind::Client);
    client.start(listener).await.expect("client starts");
    assert_eq!(next_event(&mut rx).await, RoleEvent::Connected(RoleKind::Client));
    (client, rx)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_client_and_server_exchange_payloads() {
    // Arrange
    let (server, mut server_rx, addr) = started_server(true).await;
    let (client, mut client_rx) = connected_client(addr).await;
    assert_eq!(
        next_event(&mut server_rx).await,
        RoleEvent::Connected(RoleKind::Server)
    );

    // Act: client → server
    client.send(b"servo 1 45".to_vec());

    // Assert: delivered to the server, and relayed back to the sender
    assert_eq!(
        next_event(&mut server_rx).await,
        RoleEvent::Data(b"servo 1 45".to_vec())
    );
    assert_eq!(
        next_event(&mut client_rx).await,
        RoleEvent::Data(b"servo 1 45".to_vec())
    );

    // Act: server → client
    server.send(b"turnout 2 main".to_vec());

    // Assert
    assert_eq!(
        next_event(&mut client_rx).await,
        RoleEvent::Data(b"turnout 2 main".to_vec())
    );
    assert_eq!(client.peer_addr(), Some(addr));
    assert_eq!(server.peer_count(), 1);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_relay_reaches_other_peers_but_not_sender_without_echo() {
    // Arrange
    let (server, _server_rx, addr) = started_server(false).await;
    let (sender, mut sender_rx) = connected_client(addr).await;
    let (other, mut other_rx) = connected_client(addr).await;
    within(async {
        while server.peer_count() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    // Act
    sender.send(b"signal 7 red".to_vec());
    assert_eq!(
        next_event(&mut other_rx).await,
        RoleEvent::Data(b"signal 7 red".to_vec())
    );
    server.send(b"marker".to_vec());

    // Assert: frames are written in queue order, so the sender's first
    // payload being the marker proves the relay skipped it.
    assert_eq!(
        next_event(&mut sender_rx).await,
        RoleEvent::Data(b"marker".to_vec())
    );
    assert_eq!(
        next_event(&mut other_rx).await,
        RoleEvent::Data(b"marker".to_vec())
    );

    sender.stop().await;
    other.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent_on_real_roles() {
    // Arrange
    let (server, _server_rx, addr) = started_server(true).await;
    let client = client_for(addr);
    let (listener, _client_rx) = RoleListener::channel(RoleKind::Client);

    // Act
    client.start(listener.clone()).await.unwrap();
    client.start(listener).await.unwrap();
    let (again, _) = RoleListener::channel(RoleKind::Server);
    server.start(again).await.unwrap();

    // Assert
    assert!(client.is_running());
    assert!(server.is_running());
    assert_eq!(server.local_addr(), Some(addr));

    client.stop().await;
    client.stop().await;
    server.stop().await;
    server.stop().await;
    assert!(!client.is_running());
    assert!(!server.is_running());
}

#[tokio::test]
async fn test_client_rediscovers_server_after_restart() {
    // Arrange
    let port = free_port();
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let server = server_on(port, true);
    let (server_listener, _server_rx) = RoleListener::channel(RoleKind::Server);
    server.start(server_listener.clone()).await.unwrap();
    let (client, mut client_rx) = connected_client(addr).await;

    // Act: the server goes away
    server.stop().await;

    // Assert: the client notices and goes back to browsing
    assert_eq!(
        next_event(&mut client_rx).await,
        RoleEvent::Disconnected(RoleKind::Client)
    );
    assert!(client.is_running());
    assert!(client.is_browsing());
    assert!(!client.is_connected());

    // Act: the server comes back on the same port
    server.start(server_listener).await.unwrap();

    // Assert
    assert_eq!(
        next_event(&mut client_rx).await,
        RoleEvent::Connected(RoleKind::Client)
    );

    client.stop().await;
    server.stop().await;
}

/// Two managers on one machine: the one with a short timeout becomes the
/// server, the client-only one connects to it, and a payload sent by the
/// client reaches both nodes' endpoints.
#[tokio::test]
async fn test_two_managers_settle_into_server_and_client() {
    // Arrange
    let port = free_port();
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    let (a_tx, mut a_rx) = mpsc::unbounded_channel();
    let (b_tx, mut b_rx) = mpsc::unbounded_channel();

    let node_a = NetworkManager::builder()
        .client(Arc::new(client_for(addr)))
        .server(Arc::new(server_on(port, true)))
        .endpoint(Arc::new(FnEndpoint(move |p: &[u8]| {
            let _ = a_tx.send(p.to_vec());
        })))
        .discovery_timeout(Duration::from_millis(200))
        .randomize_timeout(false)
        .spawn(&Handle::current())
        .unwrap();
    let node_b = NetworkManager::builder()
        .client(Arc::new(client_for(addr)))
        .endpoint(Arc::new(FnEndpoint(move |p: &[u8]| {
            let _ = b_tx.send(p.to_vec());
        })))
        .spawn(&Handle::current())
        .unwrap();

    // Act
    node_a.search().await.unwrap();
    node_b.search().await.unwrap();
    let mut a_state = node_a.subscribe();
    let mut b_state = node_b.subscribe();
    within(a_state.wait_for(|s| *s == ManagerState::Connected))
        .await
        .unwrap();
    within(b_state.wait_for(|s| *s == ManagerState::Connected))
        .await
        .unwrap();
    node_b.send(b"Test".to_vec()).await.unwrap();

    // Assert
    assert_eq!(within(a_rx.recv()).await, Some(b"Test".to_vec()));
    assert_eq!(within(b_rx.recv()).await, Some(b"Test".to_vec()));

    node_b.shutdown().await.unwrap();
    node_a.shutdown().await.unwrap();
}

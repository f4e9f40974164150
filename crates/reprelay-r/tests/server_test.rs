use futures::{SinkExt, StreamExt};
use reprelay_engine::config::RelayConfig;
use reprelay_engine::lifecycle::ListenerState;
use reprelay_engine::protocol::{
    CapabilityOp, HostCommand, PermissionOp, RelayMessage, SessionRequest,
};
use reprelay_r::{launch, RunningRelay};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_relay() -> anyhow::Result<RunningRelay> {
    let mut config = RelayConfig::default();
    config.server.port = 0;
    config.sweeper.enabled = false;
    Ok(launch(&config).await?)
}

async fn connect(addr: SocketAddr, path: &str) -> anyhow::Result<Client> {
    let url = format!("ws://{}{}", addr, path);
    for _ in 0..10 {
        if let Ok((ws_stream, _)) = connect_async(&url).await {
            return Ok(ws_stream);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!("failed to connect to {}", url)
}

async fn next_text(client: &mut Client) -> anyhow::Result<String> {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("stream ended"))??;
        if let Message::Text(text) = msg {
            return Ok(text);
        }
    }
}

async fn send_json(client: &mut Client, value: Value) -> anyhow::Result<()> {
    client.send(Message::Text(value.to_string())).await?;
    Ok(())
}

async fn wait_for<F>(running: &RunningRelay, mut ready: F) -> anyhow::Result<()>
where
    F: FnMut(&reprelay_r::service::RelayStatus) -> bool,
{
    for _ in 0..100 {
        if let Some(status) = running.relay.status().await {
            if ready(&status) {
                return Ok(());
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    anyhow::bail!("relay never reached the expected state")
}

/// Connect the host shim and answer the startup probe with `granted`.
async fn attach_host(addr: SocketAddr, granted: bool) -> anyhow::Result<Client> {
    let mut host = connect(addr, "/host").await?;

    let probe: HostCommand = serde_json::from_str(&next_text(&mut host).await?)?;
    let HostCommand::Capability { id, op, scope } = probe else {
        anyhow::bail!("expected the startup probe, got {:?}", probe);
    };
    assert_eq!(op, CapabilityOp::Contains);
    assert_eq!(scope.permissions, vec!["webRequest".to_string()]);
    assert!(scope.origins.is_empty());

    send_json(
        &mut host,
        json!({ "type": "capability_reply", "id": id, "result": granted }),
    )
    .await?;
    Ok(host)
}

#[tokio::test]
async fn completed_request_reaches_every_panel() -> anyhow::Result<()> {
    let running = start_relay().await?;
    let addr = running.server.local_addr;

    let mut panel_a = connect(addr, "/rep-panel").await?;
    let mut panel_b = connect(addr, "/rep-panel").await?;
    wait_for(&running, |s| s.sessions == 2).await?;

    let mut host = attach_host(addr, true).await?;
    let registration: HostCommand = serde_json::from_str(&next_text(&mut host).await?)?;
    match registration {
        HostCommand::AddListeners { filter, phases } => {
            assert_eq!(filter.urls, vec!["<all_urls>".to_string()]);
            assert_eq!(phases.len(), 4);
        }
        other => panic!("expected listener registration, got {:?}", other),
    }
    wait_for(&running, |s| s.listeners == ListenerState::Active).await?;

    send_json(
        &mut host,
        json!({
            "type": "before_request",
            "details": {
                "requestId": "101",
                "url": "https://example.com/api/login",
                "method": "POST",
                "type": "xmlhttprequest",
                "tabId": 4,
                "requestBody": { "formData": { "user": ["ada"], "remember": ["1"] } }
            }
        }),
    )
    .await?;
    send_json(
        &mut host,
        json!({
            "type": "before_send_headers",
            "details": {
                "requestId": "101",
                "requestHeaders": [{ "name": "Accept", "value": "application/json" }]
            }
        }),
    )
    .await?;
    send_json(
        &mut host,
        json!({
            "type": "completed",
            "details": {
                "requestId": "101",
                "statusCode": 200,
                "statusLine": "HTTP/1.1 200 OK",
                "responseHeaders": [{ "name": "Content-Type", "value": "application/json" }]
            }
        }),
    )
    .await?;

    for panel in [&mut panel_a, &mut panel_b] {
        let message: RelayMessage = serde_json::from_str(&next_text(panel).await?)?;
        let RelayMessage::CapturedRequest { data } = message else {
            panic!("expected a captured request, got {:?}", message);
        };
        assert_eq!(data.request_id, "101");
        assert_eq!(data.tab_id, 4);
        assert_eq!(data.request_body.as_deref(), Some("user=ada&remember=1"));
        assert_eq!(data.status_code, Some(200));
        assert!(data.request_headers.is_some());
    }

    running.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn permission_reply_goes_to_the_requesting_panel() -> anyhow::Result<()> {
    let running = start_relay().await?;
    let addr = running.server.local_addr;

    let mut panel_a = connect(addr, "/rep-panel").await?;
    let mut panel_b = connect(addr, "/rep-panel").await?;
    wait_for(&running, |s| s.sessions == 2).await?;
    let mut host = attach_host(addr, false).await?;

    let request = serde_json::to_value(SessionRequest::RequestPermissions)?;
    send_json(&mut panel_a, request).await?;

    let command: HostCommand = serde_json::from_str(&next_text(&mut host).await?)?;
    let HostCommand::Capability { id, op, scope } = command else {
        panic!("expected a capability command, got {:?}", command);
    };
    assert_eq!(op, CapabilityOp::Request);
    assert_eq!(scope.origins, vec!["<all_urls>".to_string()]);
    send_json(
        &mut host,
        json!({ "type": "capability_reply", "id": id, "error": "user dismissed prompt" }),
    )
    .await?;

    let reply: RelayMessage = serde_json::from_str(&next_text(&mut panel_a).await?)?;
    match reply {
        RelayMessage::PermissionsResult { op, result, error } => {
            assert_eq!(op, PermissionOp::Request);
            assert!(!result);
            assert!(error.unwrap_or_default().contains("user dismissed prompt"));
        }
        other => panic!("expected a permissions result, got {:?}", other),
    }

    let stray = timeout(Duration::from_millis(200), panel_b.next()).await;
    assert!(stray.is_err(), "bystander panel received {:?}", stray);

    running.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn closed_panel_is_unregistered() -> anyhow::Result<()> {
    let running = start_relay().await?;
    let addr = running.server.local_addr;

    let mut panel = connect(addr, "/rep-panel").await?;
    wait_for(&running, |s| s.sessions == 1).await?;
    panel.close(None).await?;
    wait_for(&running, |s| s.sessions == 0).await?;

    running.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn host_disconnect_deactivates_listeners() -> anyhow::Result<()> {
    let running = start_relay().await?;
    let addr = running.server.local_addr;

    let mut host = attach_host(addr, true).await?;
    wait_for(&running, |s| s.listeners == ListenerState::Active).await?;
    host.close(None).await?;
    wait_for(&running, |s| s.listeners == ListenerState::Inactive).await?;

    running.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn reconnecting_host_gets_listeners_registered_again() -> anyhow::Result<()> {
    let running = start_relay().await?;
    let addr = running.server.local_addr;

    let mut panel = connect(addr, "/rep-panel").await?;
    wait_for(&running, |s| s.sessions == 1).await?;

    let mut first = attach_host(addr, true).await?;
    let registration: HostCommand = serde_json::from_str(&next_text(&mut first).await?)?;
    assert!(matches!(registration, HostCommand::AddListeners { .. }));

    // The new shim arrives before the old socket has closed.
    let mut second = attach_host(addr, true).await?;
    let registration: HostCommand = serde_json::from_str(&next_text(&mut second).await?)?;
    assert!(
        matches!(registration, HostCommand::AddListeners { .. }),
        "replacement host got {:?}",
        registration
    );
    wait_for(&running, |s| s.listeners == ListenerState::Active).await?;

    let displaced = timeout(Duration::from_secs(5), first.next()).await?;
    assert!(matches!(
        displaced,
        None | Some(Ok(Message::Close(_))) | Some(Err(_))
    ));

    send_json(
        &mut second,
        json!({
            "type": "before_request",
            "details": { "requestId": "7", "url": "https://example.com/api/cart", "method": "GET", "tabId": 2 }
        }),
    )
    .await?;
    send_json(
        &mut second,
        json!({ "type": "completed", "details": { "requestId": "7", "statusCode": 204 } }),
    )
    .await?;

    let message: RelayMessage = serde_json::from_str(&next_text(&mut panel).await?)?;
    match message {
        RelayMessage::CapturedRequest { data } => assert_eq!(data.request_id, "7"),
        other => panic!("expected a captured request, got {:?}", other),
    }

    running.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_open_connections() -> anyhow::Result<()> {
    let running = start_relay().await?;
    let addr = running.server.local_addr;

    let mut panel = connect(addr, "/rep-panel").await?;
    let mut host = attach_host(addr, false).await?;
    wait_for(&running, |s| s.sessions == 1).await?;

    running.shutdown().await;

    for client in [&mut panel, &mut host] {
        let next = timeout(Duration::from_secs(5), client.next()).await?;
        assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    }
    assert!(connect_async(format!("ws://{}/rep-panel", addr)).await.is_err());
    Ok(())
}

#[tokio::test]
async fn unknown_path_is_closed() -> anyhow::Result<()> {
    let running = start_relay().await?;
    let mut stray = connect(running.server.local_addr, "/somewhere-else").await?;

    let next = timeout(Duration::from_secs(5), stray.next()).await?;
    assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));

    running.shutdown().await;
    Ok(())
}

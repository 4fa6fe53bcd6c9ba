//! ---
//! eagle_section: "01-core-functionality"
//! eagle_subsection: "module"
//! eagle_type: "source"
//! eagle_scope: "test"
//! eagle_description: "In-process gateway stand-in for integration tests."
//! eagle_version: "v0.1.0"
//! eagle_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use eagle_core::{BridgeEvent, GatewayEndpoint};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const CLOUD_ID: &str = "cloud123";
pub const INSTALL_CODE: &str = "code456";
pub const EXPECTED_AUTH: &str = "Basic Y2xvdWQxMjM6Y29kZTQ1Ng==";

pub const METER_A: &str = "0x0013500100abcdef";
pub const METER_B: &str = "0x0013500100ffee01";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub content_type: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

#[derive(Default)]
struct MockState {
    device_list: Mutex<String>,
    queries: Mutex<HashMap<String, String>>,
    query_delays: Mutex<HashMap<String, Duration>>,
    forced_status: Mutex<Option<StatusCode>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

/// Gateway stand-in serving `/cgi-bin/post_manager` on an ephemeral port.
pub struct MockGateway {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MockGateway {
    pub async fn spawn() -> Self {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/cgi-bin/post_manager", post(post_manager))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Endpoint for the `eagle.local / cloud123 / code456` gateway, pointed at this server.
    pub fn endpoint(&self) -> GatewayEndpoint {
        GatewayEndpoint::new(self.addr.to_string(), CLOUD_ID, INSTALL_CODE)
    }

    pub fn set_device_list(&self, xml: impl Into<String>) {
        *self.state.device_list.lock() = xml.into();
    }

    pub fn set_query(&self, address: &str, xml: impl Into<String>) {
        self.state
            .queries
            .lock()
            .insert(address.to_owned(), xml.into());
    }

    /// Hold every query for `address` for `delay` before answering.
    pub fn delay_query(&self, address: &str, delay: Duration) {
        self.state
            .query_delays
            .lock()
            .insert(address.to_owned(), delay);
    }

    /// Answer every request with `status` and an empty body until cleared.
    pub fn force_status(&self, status: Option<StatusCode>) {
        *self.state.forced_status.lock() = status;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    pub fn count_requests(&self, command: &str) -> usize {
        let marker = format!("<Name>{command}</Name>");
        self.state
            .requests
            .lock()
            .iter()
            .filter(|r| r.body.contains(&marker))
            .count()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

async fn post_manager(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let header_text = |name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };
    let authorization = header_text(header::AUTHORIZATION);
    state.requests.lock().push(RecordedRequest {
        content_type: header_text(header::CONTENT_TYPE),
        authorization: authorization.clone(),
        body: body.clone(),
    });

    if let Some(status) = *state.forced_status.lock() {
        return (status, String::new());
    }
    if authorization.as_deref() != Some(EXPECTED_AUTH) {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    if body.contains("<Name>device_list</Name>") {
        return (StatusCode::OK, state.device_list.lock().clone());
    }
    if body.contains("<Name>device_query</Name>") {
        let address = between(&body, "<HardwareAddress>", "</HardwareAddress>").unwrap_or("");
        let delay = state.query_delays.lock().get(address).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let xml = state.queries.lock().get(address).cloned();
        return match xml {
            Some(xml) => (StatusCode::OK, xml),
            None => (StatusCode::OK, "<Device></Device>".to_owned()),
        };
    }
    (StatusCode::BAD_REQUEST, String::new())
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)? + start;
    Some(&text[start..end])
}

pub fn device_list(meters: &[(&str, &str)]) -> String {
    let mut xml = String::from("<DeviceList>");
    for (address, model) in meters {
        xml.push_str(&format!(
            "<Device><HardwareAddress>{address}</HardwareAddress>\
             <Manufacturer>Generic</Manufacturer><ModelId>{model}</ModelId>\
             <Protocol>Zigbee</Protocol><ConnectionStatus>Connected</ConnectionStatus></Device>"
        ));
    }
    xml.push_str("</DeviceList>");
    xml
}

pub fn device_query(address: &str, variables: &[(&str, &str)]) -> String {
    let mut xml = format!(
        "<Device><DeviceDetails><HardwareAddress>{address}</HardwareAddress></DeviceDetails>\
         <Components><Component><Name>Main</Name><Variables>"
    );
    for (name, value) in variables {
        xml.push_str(&format!(
            "<Variable><Name>{name}</Name><Value>{value}</Value></Variable>"
        ));
    }
    xml.push_str("</Variables></Component></Components></Device>");
    xml
}

/// Wait for the next event matching `pred`, discarding others.
pub async fn next_matching<F>(rx: &mut UnboundedReceiver<BridgeEvent>, mut pred: F) -> BridgeEvent
where
    F: FnMut(&BridgeEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = rx.recv().await.expect("event stream open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event within timeout")
}

pub fn drain(rx: &mut UnboundedReceiver<BridgeEvent>) -> Vec<BridgeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::debug;
use waldo_reid::{
    OffsetReport, PanDirection, ReportSink, SessionHandle, SessionSnapshot, Steering, StopSignal,
};

/// One message on the telemetry stream.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "web", derive(serde::Serialize))]
#[cfg_attr(feature = "web", serde(tag = "type", rename_all = "snake_case"))]
pub enum TelemetryEvent {
    Offset {
        ts_millis: u64,
        report: OffsetReport,
        pan: PanDirection,
    },
    FeatureCount {
        ts_millis: u64,
        count: usize,
    },
    Snapshot {
        ts_millis: u64,
        snapshot: SessionSnapshot,
    },
}

/// Fan-out of session output to any number of subscribers. Sending never blocks and
/// never fails when nobody is listening.
#[derive(Clone)]
pub struct TelemetryBus {
    pub events_tx: broadcast::Sender<TelemetryEvent>,
    steering: Steering,
    started: Instant,
}

impl TelemetryBus {
    pub fn new(capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel::<TelemetryEvent>(capacity.max(1));
        Self { events_tx, steering: Steering::default(), started: Instant::now() }
    }

    pub fn with_steering(mut self, steering: Steering) -> Self {
        self.steering = steering;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.events_tx.subscribe()
    }

    fn ts_millis(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn send(&self, event: TelemetryEvent) {
        if self.events_tx.send(event).is_err() {
            debug!("no telemetry subscribers");
        }
    }

    pub fn publish_snapshot(&self, snapshot: SessionSnapshot) {
        self.send(TelemetryEvent::Snapshot { ts_millis: self.ts_millis(), snapshot });
    }
}

impl ReportSink for TelemetryBus {
    fn offset(&mut self, report: &OffsetReport) {
        let pan = self.steering.direction(report.offset);
        self.send(TelemetryEvent::Offset { ts_millis: self.ts_millis(), report: *report, pan });
    }

    fn feature_count(&mut self, count: usize) {
        self.send(TelemetryEvent::FeatureCount { ts_millis: self.ts_millis(), count });
    }
}

/// Publishes a session snapshot every `every` until the session's stop signal is raised.
pub fn spawn_snapshot_publisher(
    bus: TelemetryBus,
    handle: SessionHandle,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let stop = handle.stop_signal();
        let mut ticker = tokio::time::interval(every);
        while !stop.is_stopped() {
            ticker.tick().await;
            bus.publish_snapshot(handle.snapshot());
        }
    })
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: std::env::var("WR_BIND").unwrap_or_else(|_| "127.0.0.1:3001".to_string()),
        }
    }
}

/// Operator controls exposed by the server.
#[derive(Clone)]
pub struct ControlHandle {
    pub stop: StopSignal,
    pub session: Option<SessionHandle>,
}

#[cfg(feature = "web")]
pub async fn start_server(
    bus: TelemetryBus,
    cfg: ServerConfig,
    control: ControlHandle,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use tracing::{info, warn};

    fn ws_handler_with_bus(ws: WebSocketUpgrade, bus: TelemetryBus) -> impl IntoResponse {
        ws.on_upgrade(move |socket| ws_conn(socket, bus))
    }

    async fn ws_conn(socket: WebSocket, bus: TelemetryBus) {
        use futures_util::{SinkExt, StreamExt};
        let (mut ws_tx, mut ws_rx) = socket.split();
        let mut events = bus.subscribe();
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "telemetry client lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }
        debug!("telemetry client disconnected");
    }

    let bus_ws = bus.clone();
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/ws/telemetry", get(move |ws: WebSocketUpgrade| {
            let bus = bus_ws.clone();
            async move { ws_handler_with_bus(ws, bus) }
        }))
        .route("/snapshot", get({
            let session = control.session.clone();
            move || {
                let session = session.clone();
                async move {
                    match session {
                        Some(handle) => Json(handle.snapshot()).into_response(),
                        None => axum::http::StatusCode::NOT_FOUND.into_response(),
                    }
                }
            }
        }))
        .route("/control/stop", post({
            let stop = control.stop.clone();
            move || {
                let stop = stop.clone();
                async move {
                    info!("stop requested over HTTP");
                    stop.stop();
                    axum::http::StatusCode::NO_CONTENT
                }
            }
        }));

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!(addr = %cfg.bind_addr, "visualizer server listening");
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            warn!(error = %err, "visualizer server stopped");
        }
    });

    Ok(server)
}

#[cfg(not(feature = "web"))]
pub async fn start_server(
    _bus: TelemetryBus,
    _cfg: ServerConfig,
    _control: ControlHandle,
) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Err(anyhow::anyhow!("web feature not enabled for waldo_reid_visualizer"))
}

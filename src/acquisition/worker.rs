//! Acquisition Worker Module
//!
//! One dedicated thread owns the rig session end to end: it scans,
//! connects, writes commands, and feeds telemetry through the
//! notification pipeline. Front-ends talk to it over a request channel
//! and get everything back as [`RigEvent`]s, so they never block on
//! Bluetooth I/O.

use crate::acquisition::dispatcher::CommandDispatcher;
use crate::acquisition::pipeline::NotificationPipeline;
use crate::domain::models::{
    ConnectionStatus, MessageSeverity, RigEvent, RigRequest, StatusMessage,
};
use crate::domain::safety::SafetyLimit;
use crate::domain::tracker::PositionTracker;
use crate::infrastructure::bluetooth::link::DeviceConnector;
use crate::infrastructure::bluetooth::protocol::RigCommand;
use crate::infrastructure::store::ReadingStore;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub scan_seconds: u64,
    pub limit: SafetyLimit,
}

/// Front-end handle to the acquisition thread.
pub struct RigHandle {
    requests: mpsc::UnboundedSender<RigRequest>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl RigHandle {
    /// Queues a request for the worker. Never blocks.
    pub fn request(&self, request: RigRequest) {
        if self.requests.send(request).is_err() {
            warn!("Acquisition worker is gone; request dropped");
        }
    }

    /// Parks the carriage at the origin (best effort) and waits for the
    /// worker thread to finish.
    pub fn shutdown(mut self) {
        let _ = self.requests.send(RigRequest::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Acquisition worker panicked during shutdown");
            }
        }
    }
}

/// Starts the acquisition thread. All Bluetooth I/O and all position
/// tracking happen on that one thread; the returned receiver carries
/// every event the session produces.
pub fn spawn(
    connector: Box<dyn DeviceConnector + Send>,
    store: ReadingStore,
    config: WorkerConfig,
) -> (RigHandle, mpsc::UnboundedReceiver<RigEvent>) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let thread = std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Failed to create tokio runtime for the rig session");

        let worker = AcquisitionWorker::new(connector, store, config, event_tx);
        rt.block_on(worker.run(request_rx));
    });

    (
        RigHandle {
            requests: request_tx,
            thread: Some(thread),
        },
        event_rx,
    )
}

struct AcquisitionWorker {
    connector: Box<dyn DeviceConnector + Send>,
    dispatcher: Option<CommandDispatcher>,
    tracker: PositionTracker,
    pipeline: NotificationPipeline,
    events: mpsc::UnboundedSender<RigEvent>,
    scan_seconds: u64,
}

impl AcquisitionWorker {
    fn new(
        connector: Box<dyn DeviceConnector + Send>,
        store: ReadingStore,
        config: WorkerConfig,
        events: mpsc::UnboundedSender<RigEvent>,
    ) -> Self {
        Self {
            connector,
            dispatcher: None,
            tracker: PositionTracker::new(),
            pipeline: NotificationPipeline::new(config.limit, store, events.clone()),
            events,
            scan_seconds: config.scan_seconds,
        }
    }

    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<RigRequest>) {
        let (telemetry_tx, mut telemetry_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        loop {
            tokio::select! {
                request = requests.recv() => {
                    match request {
                        Some(RigRequest::Shutdown) | None => break,
                        Some(request) => self.handle_request(request, &telemetry_tx).await,
                    }
                }
                Some(payload) = telemetry_rx.recv() => {
                    self.on_telemetry(&payload).await;
                }
            }
        }

        self.park_carriage().await;
        info!("Acquisition worker stopped");
    }

    async fn handle_request(
        &mut self,
        request: RigRequest,
        telemetry: &mpsc::UnboundedSender<Vec<u8>>,
    ) {
        match request {
            RigRequest::Scan => self.scan().await,
            RigRequest::Connect(address) => self.connect(address, telemetry.clone()).await,
            RigRequest::MoveTo(target) => {
                if self.dispatcher.is_some() {
                    // The tracker advances even if the write below
                    // fails; without acknowledgements there is no way
                    // to know whether the rig saw the command.
                    let delta = self.tracker.advance_to(target);
                    self.send(RigCommand::Move(delta)).await;
                } else {
                    self.report_not_connected();
                }
            }
            RigRequest::Start => self.send(RigCommand::Start).await,
            RigRequest::Retract => self.send(RigCommand::Return).await,
            RigRequest::ReturnHome => {
                let delta = self.tracker.return_delta();
                self.send(RigCommand::Move(delta)).await;
            }
            RigRequest::Raw(text) => self.send(RigCommand::Raw(text)).await,
            // Handled by the run loop before getting here.
            RigRequest::Shutdown => {}
        }
    }

    async fn on_telemetry(&mut self, payload: &[u8]) {
        let Some(dispatcher) = self.dispatcher.as_mut() else {
            return;
        };
        self.pipeline
            .on_notification(payload, self.tracker.last_position(), dispatcher)
            .await;
    }

    async fn scan(&mut self) {
        self.send_log("Scanning for devices...", MessageSeverity::Info);
        match self.connector.discover(self.scan_seconds).await {
            Ok(devices) => {
                let _ = self.events.send(RigEvent::DevicesDiscovered(devices));
            }
            Err(e) => {
                error!("Scan failed: {e}");
                self.send_log(&format!("Scan failed: {e}"), MessageSeverity::Error);
            }
        }
    }

    async fn connect(&mut self, address: u64, telemetry: mpsc::UnboundedSender<Vec<u8>>) {
        let _ = self
            .events
            .send(RigEvent::ConnectionStatus(ConnectionStatus::Connecting));

        match self.connector.connect(address).await {
            Ok(mut link) => {
                if let Err(e) = link.subscribe(telemetry).await {
                    error!("Telemetry subscription failed: {e}");
                    self.send_log(
                        &format!("Telemetry subscription failed: {e}"),
                        MessageSeverity::Error,
                    );
                    let _ = self
                        .events
                        .send(RigEvent::ConnectionStatus(ConnectionStatus::Error));
                    return;
                }

                // Replaces any previous session; the old link closes on
                // drop.
                self.dispatcher = Some(CommandDispatcher::new(link));
                let _ = self
                    .events
                    .send(RigEvent::ConnectionStatus(ConnectionStatus::Connected));
                self.send_log(
                    "Connected; listening for telemetry",
                    MessageSeverity::Success,
                );
            }
            Err(e) => {
                error!("Connection failed: {e}");
                self.send_log(&format!("Connection failed: {e}"), MessageSeverity::Error);
                let _ = self
                    .events
                    .send(RigEvent::ConnectionStatus(ConnectionStatus::Disconnected));
            }
        }
    }

    /// Encodes and writes one command, reporting the outcome as events.
    /// Failures are surfaced and never retried.
    async fn send(&mut self, command: RigCommand) {
        let Some(dispatcher) = self.dispatcher.as_mut() else {
            self.report_not_connected();
            return;
        };
        match dispatcher.dispatch(command).await {
            Ok(text) => {
                let _ = self.events.send(RigEvent::CommandSent(text));
            }
            Err(e) => self.send_log(&format!("Send failed: {e}"), MessageSeverity::Error),
        }
    }

    /// Best-effort drive back to the origin before the session ends.
    async fn park_carriage(&mut self) {
        if self.dispatcher.is_none() {
            return;
        }
        info!("Parking carriage at the origin");
        let delta = self.tracker.return_delta();
        self.send(RigCommand::Move(delta)).await;
    }

    fn report_not_connected(&self) {
        self.send_log(
            "Not connected; scan for devices and connect first",
            MessageSeverity::Warning,
        );
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.events.send(RigEvent::Log(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{DiscoveredDevice, GridPosition};
    use crate::infrastructure::bluetooth::link::{ConnectionError, DeviceLink, TransportError};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    /// Shared state standing in for the physical rig: what was written
    /// to it, and the sink it pushes telemetry into.
    #[derive(Clone, Default)]
    struct MockRig {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        telemetry: Arc<Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>>,
    }

    impl MockRig {
        fn wire(&self) -> Vec<String> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .map(|w| String::from_utf8_lossy(w).into_owned())
                .collect()
        }

        fn push_telemetry(&self, payload: &[u8]) {
            self.telemetry
                .lock()
                .unwrap()
                .as_ref()
                .expect("no telemetry subscription")
                .send(payload.to_vec())
                .unwrap();
        }
    }

    struct MockConnector {
        rig: MockRig,
        refuse: bool,
    }

    #[async_trait]
    impl DeviceConnector for MockConnector {
        async fn discover(
            &self,
            _scan_seconds: u64,
        ) -> Result<Vec<DiscoveredDevice>, ConnectionError> {
            Ok(vec![DiscoveredDevice {
                name: "PROBE-RIG".to_string(),
                address: 0x7,
                signal_strength: -42,
            }])
        }

        async fn connect(
            &self,
            address: u64,
        ) -> Result<Box<dyn DeviceLink + Send>, ConnectionError> {
            if self.refuse {
                return Err(ConnectionError::DeviceUnreachable(address));
            }
            Ok(Box::new(MockLink {
                rig: self.rig.clone(),
            }))
        }
    }

    struct MockLink {
        rig: MockRig,
    }

    #[async_trait]
    impl DeviceLink for MockLink {
        async fn write_command(&mut self, payload: &[u8]) -> Result<(), TransportError> {
            self.rig.writes.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        async fn subscribe(
            &mut self,
            sink: mpsc::UnboundedSender<Vec<u8>>,
        ) -> Result<(), TransportError> {
            *self.rig.telemetry.lock().unwrap() = Some(sink);
            Ok(())
        }
    }

    struct Harness {
        requests: mpsc::UnboundedSender<RigRequest>,
        events: mpsc::UnboundedReceiver<RigEvent>,
        store: ReadingStore,
        rig: MockRig,
        worker: tokio::task::JoinHandle<()>,
    }

    fn start(refuse_connections: bool) -> Harness {
        let rig = MockRig::default();
        let store = ReadingStore::temporary().unwrap();
        let (event_tx, events) = mpsc::unbounded_channel();
        let (request_tx, request_rx) = mpsc::unbounded_channel();

        let worker = AcquisitionWorker::new(
            Box::new(MockConnector {
                rig: rig.clone(),
                refuse: refuse_connections,
            }),
            store.clone(),
            WorkerConfig {
                scan_seconds: 1,
                limit: SafetyLimit::default(),
            },
            event_tx,
        );
        let worker = tokio::spawn(worker.run(request_rx));

        Harness {
            requests: request_tx,
            events,
            store,
            rig,
            worker,
        }
    }

    impl Harness {
        async fn next_event(&mut self) -> RigEvent {
            self.events.recv().await.expect("event channel closed")
        }

        async fn wait_connected(&mut self) {
            loop {
                if let RigEvent::ConnectionStatus(ConnectionStatus::Connected) =
                    self.next_event().await
                {
                    return;
                }
            }
        }

        async fn wait_sent(&mut self) -> String {
            loop {
                if let RigEvent::CommandSent(text) = self.next_event().await {
                    return text;
                }
            }
        }
    }

    fn cell(x: i32, y: i32) -> GridPosition {
        GridPosition::new(x, y).unwrap()
    }

    #[tokio::test]
    async fn grid_requests_become_relative_moves_on_the_wire() {
        let mut h = start(false);
        h.requests.send(RigRequest::Connect(0x7)).unwrap();
        h.wait_connected().await;

        h.requests.send(RigRequest::MoveTo(cell(2, 1))).unwrap();
        assert_eq!(h.wait_sent().await, "move 2 1");

        h.requests.send(RigRequest::MoveTo(cell(0, 3))).unwrap();
        assert_eq!(h.wait_sent().await, "move -2 2");

        h.requests.send(RigRequest::Start).unwrap();
        assert_eq!(h.wait_sent().await, "start");

        assert_eq!(h.rig.wire(), vec!["move 2 1", "move -2 2", "start"]);
    }

    #[tokio::test]
    async fn telemetry_is_attributed_to_the_last_commanded_cell() {
        let mut h = start(false);
        h.requests.send(RigRequest::Connect(0x7)).unwrap();
        h.wait_connected().await;
        h.requests.send(RigRequest::MoveTo(cell(4, 5))).unwrap();
        h.wait_sent().await;

        h.rig.push_telemetry(b"1.5,90");

        let reading = loop {
            if let RigEvent::Reading(reading) = h.next_event().await {
                break reading;
            }
        };
        assert_eq!((reading.x, reading.y), (4, 5));
        assert_eq!(reading.measurement, 1.5);
        assert_eq!(reading.angle, 20.25);
        assert_eq!(h.store.readings_at(cell(4, 5)).unwrap(), vec![reading]);
    }

    #[tokio::test]
    async fn overforce_telemetry_retracts_the_probe_and_stores_nothing() {
        let mut h = start(false);
        h.requests.send(RigRequest::Connect(0x7)).unwrap();
        h.wait_connected().await;
        h.requests.send(RigRequest::MoveTo(cell(1, 1))).unwrap();
        h.wait_sent().await;

        h.rig.push_telemetry(b"2.0,90");

        loop {
            if let RigEvent::SafetyTripped { force_newtons } = h.next_event().await {
                assert!((force_newtons - 117.72).abs() < 1e-9);
                break;
            }
        }
        assert_eq!(h.rig.wire(), vec!["move 1 1", "return"]);
        assert!(h.store.readings_at(cell(1, 1)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_parks_the_carriage_at_the_origin() {
        let mut h = start(false);
        h.requests.send(RigRequest::Connect(0x7)).unwrap();
        h.wait_connected().await;
        h.requests.send(RigRequest::MoveTo(cell(2, 3))).unwrap();
        h.wait_sent().await;

        h.requests.send(RigRequest::Shutdown).unwrap();
        h.worker.await.unwrap();

        assert_eq!(h.rig.wire(), vec!["move 2 3", "move -2 -3"]);
    }

    #[tokio::test]
    async fn connect_failure_is_reported_and_the_worker_stays_up() {
        let mut h = start(true);
        h.requests.send(RigRequest::Connect(0x7)).unwrap();

        assert!(matches!(
            h.next_event().await,
            RigEvent::ConnectionStatus(ConnectionStatus::Connecting)
        ));
        let RigEvent::Log(msg) = h.next_event().await else {
            panic!("expected the failure log");
        };
        assert_eq!(msg.severity, MessageSeverity::Error);
        assert!(matches!(
            h.next_event().await,
            RigEvent::ConnectionStatus(ConnectionStatus::Disconnected)
        ));

        // Still alive and answering.
        h.requests.send(RigRequest::MoveTo(cell(1, 1))).unwrap();
        let RigEvent::Log(msg) = h.next_event().await else {
            panic!("expected the not-connected warning");
        };
        assert_eq!(msg.severity, MessageSeverity::Warning);
        assert!(h.rig.wire().is_empty());
    }

    #[tokio::test]
    async fn scan_reports_discovered_devices() {
        let mut h = start(false);
        h.requests.send(RigRequest::Scan).unwrap();

        let devices = loop {
            if let RigEvent::DevicesDiscovered(devices) = h.next_event().await {
                break devices;
            }
        };
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "PROBE-RIG");
        assert_eq!(devices[0].address, 0x7);
    }
}

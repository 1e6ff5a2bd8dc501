//! Notification Pipeline Module
//!
//! Handles every telemetry notification the rig pushes: parse, check
//! the force limit, persist. A reading over the limit aborts the
//! current motion with a `return` command instead of being stored.

use crate::acquisition::dispatcher::CommandDispatcher;
use crate::domain::models::{GridPosition, MessageSeverity, RigEvent, SensorReading, StatusMessage};
use crate::domain::safety::{self, SafetyLimit};
use crate::infrastructure::bluetooth::protocol::{self, RigCommand};
use crate::infrastructure::store::ReadingStore;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Per-notification processing. No state is kept between notifications;
/// each one is parsed, judged against the limit, and persisted (or not)
/// on its own.
pub struct NotificationPipeline {
    limit: SafetyLimit,
    store: ReadingStore,
    events: mpsc::UnboundedSender<RigEvent>,
}

impl NotificationPipeline {
    pub fn new(
        limit: SafetyLimit,
        store: ReadingStore,
        events: mpsc::UnboundedSender<RigEvent>,
    ) -> Self {
        Self {
            limit,
            store,
            events,
        }
    }

    /// Processes one raw notification payload.
    ///
    /// `position` is the last position the tracker commanded; readings
    /// are attributed to it on a best-effort basis, with no guarantee
    /// the carriage has finished moving there. Nothing here is fatal:
    /// bad payloads and sink failures are reported and the stream
    /// continues.
    pub async fn on_notification(
        &self,
        payload: &[u8],
        position: Option<GridPosition>,
        dispatcher: &mut CommandDispatcher,
    ) {
        let (measurement, angle) = match protocol::parse_telemetry(payload) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Dropping notification: {e}");
                self.send_log(&format!("Error processing notification: {e}"), MessageSeverity::Warning);
                return;
            }
        };

        let force_newtons = measurement * safety::MASS_TO_FORCE;
        if self.limit.is_exceeded(force_newtons) {
            warn!("Force {force_newtons:.2} N over limit, retracting probe");
            if let Err(e) = dispatcher.dispatch(RigCommand::Return).await {
                error!("Failed to send retraction: {e}");
                self.send_log(&format!("Failed to send retraction: {e}"), MessageSeverity::Error);
            }
            let _ = self.events.send(RigEvent::SafetyTripped { force_newtons });
            return;
        }

        let Some(position) = position else {
            warn!("Dropping reading: no position has been commanded yet");
            self.send_log(
                "Reading arrived before any motion command; dropped",
                MessageSeverity::Warning,
            );
            return;
        };

        let reading = SensorReading {
            timestamp: chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string(),
            x: position.x,
            y: position.y,
            measurement,
            angle: angle * safety::ANGLE_SCALE,
        };

        // The sink write blocks, so it runs on the blocking pool and is
        // not awaited here; the next notification can be handled while
        // this one is still being written.
        let store = self.store.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let stored = reading.clone();
            match tokio::task::spawn_blocking(move || store.append(&stored)).await {
                Ok(Ok(())) => {
                    let _ = events.send(RigEvent::Reading(reading));
                }
                Ok(Err(e)) => {
                    error!("Database error: {e}");
                    let _ = events.send(RigEvent::Log(StatusMessage {
                        message: format!("Database error: {e}"),
                        severity: MessageSeverity::Error,
                    }));
                }
                Err(e) => {
                    error!("Persistence task failed: {e}");
                }
            }
        });
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.events.send(RigEvent::Log(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

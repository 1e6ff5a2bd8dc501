use crate::domain::safety;
use serde::{Deserialize, Serialize};

/// Number of cells along each axis of the rig's working area.
pub const GRID_SIZE: i32 = 7;

/// A cell on the rig's working grid. The carriage home position is
/// `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPosition {
    pub x: i32,
    pub y: i32,
}

impl GridPosition {
    /// Builds a position, rejecting coordinates outside the grid.
    pub fn new(x: i32, y: i32) -> Option<Self> {
        if (0..GRID_SIZE).contains(&x) && (0..GRID_SIZE).contains(&y) {
            Some(Self { x, y })
        } else {
            None
        }
    }
}

/// Relative carriage motion in grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionCommand {
    pub dx: i32,
    pub dy: i32,
}

/// One persisted probe measurement.
///
/// `measurement` is the raw load cell value; `angle` is stored already
/// calibrated (raw encoder angle scaled by [`safety::ANGLE_SCALE`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub timestamp: String,
    pub x: i32,
    pub y: i32,
    pub measurement: f64,
    pub angle: f64,
}

impl SensorReading {
    /// Probe force in newtons derived from the raw measurement.
    pub fn force_newtons(&self) -> f64 {
        self.measurement * safety::MASS_TO_FORCE
    }

    /// Probe insertion depth in centimeters derived from the stored
    /// angle.
    pub fn depth_cm(&self) -> f64 {
        self.angle / 360.0 * safety::DEPTH_PER_REVOLUTION_CM
    }
}

/// A device seen during a scan.
#[derive(Debug, Clone)]
pub struct DiscoveredDevice {
    pub name: String,
    pub address: u64,
    pub signal_strength: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// Requests the front-end sends to the acquisition worker.
#[derive(Debug, Clone)]
pub enum RigRequest {
    Scan,
    Connect(u64),
    /// Move the carriage to a grid cell.
    MoveTo(GridPosition),
    /// Begin a measurement cycle at the current position.
    Start,
    /// Retract the probe.
    Retract,
    /// Drive the carriage back to the grid origin.
    ReturnHome,
    /// Verbatim text for the command characteristic.
    Raw(String),
    /// Park the carriage and stop the worker.
    Shutdown,
}

/// Events the acquisition worker sends back to the front-end.
#[derive(Debug, Clone)]
pub enum RigEvent {
    DevicesDiscovered(Vec<DiscoveredDevice>),
    ConnectionStatus(ConnectionStatus),
    /// A command payload was written to the rig.
    CommandSent(String),
    /// A reading was accepted and stored.
    Reading(SensorReading),
    /// A reading exceeded the force limit; the probe is retracting.
    SafetyTripped { force_newtons: f64 },
    Log(StatusMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_position_accepts_cells_inside_the_grid() {
        assert_eq!(GridPosition::new(0, 0), Some(GridPosition { x: 0, y: 0 }));
        assert_eq!(GridPosition::new(6, 6), Some(GridPosition { x: 6, y: 6 }));
    }

    #[test]
    fn grid_position_rejects_cells_outside_the_grid() {
        assert_eq!(GridPosition::new(7, 0), None);
        assert_eq!(GridPosition::new(0, 7), None);
        assert_eq!(GridPosition::new(-1, 3), None);
    }

    #[test]
    fn reading_derives_force_and_depth() {
        let reading = SensorReading {
            timestamp: "2026-08-21 10:00:00.000".to_string(),
            x: 1,
            y: 1,
            measurement: 1.5,
            angle: 20.25,
        };

        assert!((reading.force_newtons() - 88.29).abs() < 1e-9);
        assert!((reading.depth_cm() - 0.028125).abs() < 1e-9);
    }
}

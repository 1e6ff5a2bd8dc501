use crate::domain::models::{GridPosition, MotionCommand};

/// Converts grid targets into the relative motion the rig understands.
///
/// The firmware only accepts relative moves, so the tracker keeps the
/// last commanded position and emits deltas against it. The first
/// target of a session is taken relative to the home origin.
#[derive(Debug, Default)]
pub struct PositionTracker {
    last_position: Option<GridPosition>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self {
            last_position: None,
        }
    }

    /// Delta from the last commanded position to `target`. The target
    /// becomes the new last position whether or not the motion is
    /// actually sent.
    pub fn advance_to(&mut self, target: GridPosition) -> MotionCommand {
        let delta = match self.last_position {
            Some(last) => MotionCommand {
                dx: target.x - last.x,
                dy: target.y - last.y,
            },
            None => MotionCommand {
                dx: target.x,
                dy: target.y,
            },
        };
        self.last_position = Some(target);
        delta
    }

    /// Delta that brings the carriage back to the origin. The tracked
    /// position is left unchanged.
    pub fn return_delta(&self) -> MotionCommand {
        match self.last_position {
            Some(last) => MotionCommand {
                dx: -last.x,
                dy: -last.y,
            },
            None => MotionCommand { dx: 0, dy: 0 },
        }
    }

    /// Position of the most recent target, if any motion has been
    /// commanded this session.
    pub fn last_position(&self) -> Option<GridPosition> {
        self.last_position
    }
}

//! Command Dispatcher Module
//!
//! Owns the live device link and puts encoded commands on the wire.

use crate::infrastructure::bluetooth::link::{DeviceLink, TransportError};
use crate::infrastructure::bluetooth::protocol::RigCommand;
use tracing::{error, info};

/// Writes commands to the rig, send-and-forget. The firmware never
/// acknowledges, so a successful write only means the payload left this
/// machine. Failures are returned to the caller and never retried.
pub struct CommandDispatcher {
    link: Box<dyn DeviceLink + Send>,
}

impl CommandDispatcher {
    /// Takes ownership of an open link. Dropping the dispatcher drops
    /// the link and with it the connection.
    pub fn new(link: Box<dyn DeviceLink + Send>) -> Self {
        Self { link }
    }

    /// Encodes `command` and writes it to the command characteristic.
    /// Returns the ASCII text that went on the wire.
    pub async fn dispatch(&mut self, command: RigCommand) -> Result<String, TransportError> {
        let payload = command.encode();
        let text = String::from_utf8_lossy(&payload).into_owned();

        match self.link.write_command(&payload).await {
            Ok(()) => {
                info!("Sent: {text}");
                Ok(text)
            }
            Err(e) => {
                error!("Write failed for {text:?}: {e}");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::MotionCommand;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    struct RecordingLink {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        fail_writes: bool,
    }

    #[async_trait]
    impl DeviceLink for RecordingLink {
        async fn write_command(&mut self, payload: &[u8]) -> Result<(), TransportError> {
            if self.fail_writes {
                return Err(TransportError::WriteFailed("link is gone".to_string()));
            }
            self.writes.lock().unwrap().push(payload.to_vec());
            Ok(())
        }

        async fn subscribe(
            &mut self,
            _sink: mpsc::UnboundedSender<Vec<u8>>,
        ) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatch_writes_the_encoded_command() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = CommandDispatcher::new(Box::new(RecordingLink {
            writes: writes.clone(),
            fail_writes: false,
        }));

        let sent = dispatcher
            .dispatch(RigCommand::Move(MotionCommand { dx: 2, dy: -1 }))
            .await
            .unwrap();

        assert_eq!(sent, "move 2 -1");
        assert_eq!(*writes.lock().unwrap(), vec![b"move 2 -1".to_vec()]);
    }

    #[tokio::test]
    async fn dispatch_surfaces_write_failures_without_retrying() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = CommandDispatcher::new(Box::new(RecordingLink {
            writes: writes.clone(),
            fail_writes: true,
        }));

        let result = dispatcher.dispatch(RigCommand::Start).await;

        assert!(matches!(result, Err(TransportError::WriteFailed(_))));
        assert!(writes.lock().unwrap().is_empty());
    }
}

//! Transports for sync payloads.
//!
//! The platform messaging channel is consumed through [`DeviceMessenger`].
//! Delivery is best-effort; a refused send leaves the records queued.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::Utc;

use crate::sync::types::SyncError;

pub trait DeviceMessenger: Send + Sync {
    fn send(&self, peer_id: &str, payload: &[u8]) -> Result<(), SyncError>;
}

/// Writes each payload to `<dir>/<peer>-<timestamp>.json` for another
/// process to carry across.
#[derive(Debug, Clone)]
pub struct OutboxMessenger {
    dir: PathBuf,
}

impl OutboxMessenger {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl DeviceMessenger for OutboxMessenger {
    fn send(&self, peer_id: &str, payload: &[u8]) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.dir)?;
        let name = format!(
            "{peer_id}-{}.json",
            Utc::now().format("%Y%m%dT%H%M%S%.6fZ")
        );
        std::fs::write(self.dir.join(name), payload)?;
        Ok(())
    }
}

/// Keeps sent payloads in memory. Can be told to refuse sends.
#[derive(Debug, Default)]
pub struct MemoryMessenger {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    refuse: AtomicBool,
}

impl MemoryMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Everything accepted so far, as `(peer_id, payload)`.
    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn take_sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent
            .lock()
            .map(|mut sent| std::mem::take(&mut *sent))
            .unwrap_or_default()
    }
}

impl DeviceMessenger for MemoryMessenger {
    fn send(&self, peer_id: &str, payload: &[u8]) -> Result<(), SyncError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SyncError::Send {
                peer_id: peer_id.to_string(),
                message: "peer refused the message".into(),
            });
        }
        self.sent
            .lock()
            .map_err(|_| SyncError::Send {
                peer_id: peer_id.to_string(),
                message: "messenger lock poisoned".into(),
            })?
            .push((peer_id.to_string(), payload.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn outbox_writes_one_file_per_payload() {
        let temp_dir = TempDir::new().unwrap();
        let outbox = OutboxMessenger::new(temp_dir.path().join("outbox"));
        outbox.send("watch", b"{}").unwrap();

        let files: Vec<_> = std::fs::read_dir(temp_dir.path().join("outbox"))
            .unwrap()
            .collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn memory_messenger_records_and_refuses() {
        let messenger = MemoryMessenger::new();
        messenger.send("watch", b"one").unwrap();
        messenger.set_refusing(true);
        assert!(messenger.send("watch", b"two").is_err());
        assert_eq!(messenger.sent(), vec![("watch".to_string(), b"one".to_vec())]);
    }
}

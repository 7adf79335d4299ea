// Device identity for cross-device sync
// Format: "ruck-<uuid>"

use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

const DEVICE_ID_FILE: &str = "device_id.txt";
const DEVICE_ID_PREFIX: &str = "ruck-";

#[derive(Debug, thiserror::Error)]
pub enum DeviceIdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid device ID format: {0}")]
    InvalidFormat(String),
}

/// Read the device id stored under `dir`, minting one on first use.
///
/// The id stamps every outgoing sync message and keys the peer's cursor, so
/// it must survive restarts.
pub fn get_or_create_device_id_at(dir: &Path) -> Result<String, DeviceIdError> {
    let path = dir.join(DEVICE_ID_FILE);

    match fs::read_to_string(&path) {
        Ok(content) => {
            let device_id = content.trim();
            let uuid_part = device_id
                .strip_prefix(DEVICE_ID_PREFIX)
                .ok_or_else(|| DeviceIdError::InvalidFormat(device_id.to_string()))?;
            Uuid::parse_str(uuid_part)
                .map_err(|_| DeviceIdError::InvalidFormat(device_id.to_string()))?;
            return Ok(device_id.to_string());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let device_id = format!("{DEVICE_ID_PREFIX}{}", Uuid::new_v4());

    fs::create_dir_all(dir)?;
    let mut file = fs::File::create(&path)?;
    writeln!(file, "{device_id}")?;

    tracing::info!(%device_id, "Created device id");
    Ok(device_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_device_id_format() {
        let temp_dir = TempDir::new().unwrap();
        let device_id = get_or_create_device_id_at(temp_dir.path()).unwrap();

        assert!(device_id.starts_with(DEVICE_ID_PREFIX));
        assert_eq!(device_id.len(), DEVICE_ID_PREFIX.len() + 36);
    }

    #[test]
    fn test_device_id_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let first = get_or_create_device_id_at(temp_dir.path()).unwrap();
        let second = get_or_create_device_id_at(temp_dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_device_id_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("nested/path");

        let device_id = get_or_create_device_id_at(&nested).unwrap();

        assert!(nested.join(DEVICE_ID_FILE).exists());
        assert!(device_id.starts_with(DEVICE_ID_PREFIX));
    }

    #[test]
    fn test_device_id_invalid_format_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(DEVICE_ID_FILE), "device-123\n").unwrap();

        let result = get_or_create_device_id_at(temp_dir.path());
        assert!(matches!(result, Err(DeviceIdError::InvalidFormat(_))));
    }

    #[test]
    fn test_device_id_prefix_without_uuid_rejected() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(DEVICE_ID_FILE), "ruck-not-a-uuid\n").unwrap();

        let result = get_or_create_device_id_at(temp_dir.path());
        assert!(matches!(result, Err(DeviceIdError::InvalidFormat(_))));
    }

    #[test]
    fn test_device_id_valid_format_accepted() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(DEVICE_ID_FILE),
            "ruck-123e4567-e89b-12d3-a456-426614174000\n",
        )
        .unwrap();

        let device_id = get_or_create_device_id_at(temp_dir.path()).unwrap();
        assert_eq!(device_id, "ruck-123e4567-e89b-12d3-a456-426614174000");
    }
}

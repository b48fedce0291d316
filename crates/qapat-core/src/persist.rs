//! Session record persistence with integrity check.
//!
//! Layout: `<dir>/<session_id>/record.json` plus `record.digest` holding the
//! SHA-256 of the JSON bytes.

use std::path::{Path, PathBuf};

use crate::domain::digest::digest_bytes;
use crate::domain::{QapatError, Result, SessionId, SessionRecord};

const RECORD_FILE: &str = "record.json";

/// Persist a record and its digest. Returns the path of the JSON file.
pub fn write_session_record(record: &SessionRecord, dir: &Path) -> Result<PathBuf> {
    let session_dir = dir.join(record.session_id.to_string());
    std::fs::create_dir_all(&session_dir)?;

    let path = session_dir.join(RECORD_FILE);
    let json = serde_json::to_vec_pretty(record)?;
    let digest = digest_bytes(&json);

    std::fs::write(&path, &json)?;
    std::fs::write(path.with_extension("digest"), digest.as_bytes())?;

    tracing::debug!(
        session_id = %record.session_id,
        path = %path.display(),
        "session record written"
    );
    Ok(path)
}

/// Read and verify a record file written by [`write_session_record`].
pub fn read_session_record(path: &Path) -> Result<SessionRecord> {
    let json = std::fs::read(path)?;
    let expected = std::fs::read_to_string(path.with_extension("digest"))?;
    let actual = digest_bytes(&json);
    if expected.trim() != actual {
        return Err(QapatError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

/// Read `<dir>/<session_id>/record.json`.
pub fn load_session_record(session_id: SessionId, dir: &Path) -> Result<SessionRecord> {
    read_session_record(&dir.join(session_id.to_string()).join(RECORD_FILE))
}

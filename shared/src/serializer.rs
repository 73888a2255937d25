//! Default [`PayloadSerializer`] implementation (§6.1)
//!
//! Payloads are opaque byte blobs whose only structured content, from the
//! scheduler's point of view, is an optional `files` list for staging. This
//! crate has no business carrying a pickle-compatible decoder, so the
//! built-in implementation here treats payloads as JSON, which is what
//! every test fixture and the standalone binary actually send. Deployments
//! that need a different wire format inject their own [`PayloadSerializer`].

use serde::Deserialize;

use crate::ports::{FileReference, PayloadSerializer, TaskException, TaskResult};
use crate::{Result, SchedulerError};

#[derive(Debug, Deserialize)]
struct PayloadEnvelope {
    #[serde(default)]
    files: Vec<FileReference>,
}

/// Reference [`PayloadSerializer`] that reads/writes plain JSON. Shipped
/// for standalone operation and tests (§6.1).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPayloadSerializer;

impl PayloadSerializer for JsonPayloadSerializer {
    fn extract_files(&self, payload: &[u8]) -> Result<Vec<FileReference>> {
        if payload.is_empty() {
            return Ok(Vec::new());
        }
        let envelope: PayloadEnvelope = serde_json::from_slice(payload)
            .map_err(|e| SchedulerError::Serializer(format!("invalid task payload: {e}")))?;
        Ok(envelope.files)
    }

    fn decode_result(&self, payload: &[u8]) -> Result<TaskResult> {
        serde_json::from_slice(payload)
            .map_err(|e| SchedulerError::Serializer(format!("invalid result payload: {e}")).into())
    }

    fn decode_exception(&self, payload: &[u8]) -> Result<TaskException> {
        serde_json::from_slice(payload)
            .map_err(|e| SchedulerError::Serializer(format!("invalid exception payload: {e}")).into())
    }
}

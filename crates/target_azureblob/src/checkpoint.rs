use std::io::{self, Write};

use serde_json::Value;
use tracing::debug;

use crate::error::ProtocolError;

/// Holds the latest checkpoint that has not been invalidated by a record.
#[derive(Debug, Default)]
pub struct CheckpointTracker {
    current: Option<Value>,
}

impl CheckpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the tracked checkpoint and returns it.
    pub fn observe(&mut self, state: Value) -> &Value {
        debug!(state = %state, "setting state");
        self.current.insert(state)
    }

    /// Drops the pending checkpoint. Called for every RECORD so that a
    /// checkpoint is only emitted when no records follow it.
    pub fn reset(&mut self) {
        self.current = None;
    }

    pub fn current(&self) -> Option<&Value> {
        self.current.as_ref()
    }

    pub fn into_final(self) -> Option<Value> {
        self.current
    }
}

/// Reads the tap's `currently_syncing` marker.
///
/// Uses JSON truthiness: `null`, `false`, `0`, `""`, `[]` and `{}` all mean
/// that no stream is mid-sync.
pub fn is_currently_syncing(state: &Value) -> Result<bool, ProtocolError> {
    let marker = state
        .as_object()
        .and_then(|obj| obj.get("currently_syncing"))
        .ok_or(ProtocolError::MissingCurrentlySyncing)?;
    Ok(is_truthy(marker))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Writes the final checkpoint as one JSON line. Writes nothing for `None`.
pub fn emit_state<W: Write>(out: &mut W, state: Option<&Value>) -> io::Result<()> {
    let Some(state) = state else {
        return Ok(());
    };
    let line = serde_json::to_string(state)?;
    debug!("Emitting state {line}");
    writeln!(out, "{line}")?;
    out.flush()
}

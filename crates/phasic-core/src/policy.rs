// Field policies - reactive handlers attached to state field declarations
//
// A policy provides up to four optional callbacks. The synchronous pair runs
// inline on the get/set path in declaration order; the asynchronous pair is
// spawned detached after the synchronous phase commits and never affects the
// returned or stored value.
//
// A synchronous pre-write handler either transforms (Ok(Some(v))), passes
// (Ok(None)), or rejects (Err) - one of the three per invocation, never a
// combined transform-and-reject.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

use crate::event::{GetEvent, SetEvent};

/// Reactive handler bound to one state field declaration.
///
/// Policies persist across value changes; they may hold their own private
/// accumulator (e.g. an audit log) but must not re-enter the synchronous
/// write path of the field they are attached to.
#[async_trait]
pub trait Policy: Send + Sync {
    /// Policy name, used in logs and write-rejection errors
    fn name(&self) -> &str;

    /// Synchronous pre-read. Returning `Some(v)` substitutes the value for
    /// the remainder of the read. Reads cannot be aborted.
    fn on_get(&self, _event: &GetEvent) -> Option<Value> {
        None
    }

    /// Synchronous pre-write. Returning `Ok(Some(v))` replaces the proposed
    /// value for later handlers and for the commit; returning `Err` rejects
    /// the write and rolls it back entirely.
    fn on_set(&self, _event: &SetEvent) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }

    /// Detached post-read side effect. Never awaited by the read path.
    async fn background_get(&self, _event: GetEvent) {}

    /// Detached post-write side effect. Observes the committed value but can
    /// never change it. Never awaited by the write path.
    async fn background_set(&self, _event: SetEvent) {}
}

// ============================================================================
// Shipped policies
// ============================================================================

/// Records every committed write to its field in an in-memory audit log.
///
/// The log is appended from the detached post-write handler, so entries may
/// lag the write call that produced them.
#[derive(Debug, Default)]
pub struct AuditPolicy {
    entries: Mutex<Vec<AuditEntry>>,
}

/// One committed write observed by an [`AuditPolicy`]
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub field: String,
    pub previous: Value,
    pub value: Value,
}

impl AuditPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the entries recorded so far
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Policy for AuditPolicy {
    fn name(&self) -> &str {
        "audit"
    }

    async fn background_set(&self, event: SetEvent) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(AuditEntry {
                field: event.field,
                previous: event.previous,
                value: event.value,
            });
    }
}

/// Clamps numeric writes into `[min, max]`.
///
/// Non-numeric writes pass through untouched; clamping is a transform, never
/// a rejection.
#[derive(Debug, Clone)]
pub struct BoundsPolicy {
    min: f64,
    max: f64,
}

impl BoundsPolicy {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

#[async_trait]
impl Policy for BoundsPolicy {
    fn name(&self) -> &str {
        "bounds"
    }

    fn on_set(&self, event: &SetEvent) -> anyhow::Result<Option<Value>> {
        let Some(n) = event.value.as_f64() else {
            return Ok(None);
        };
        let clamped = n.clamp(self.min, self.max);
        if clamped == n {
            return Ok(None);
        }
        // Preserve integer representation only when the clamp lands on a
        // whole number; a fractional bound must not be truncated away.
        if (event.value.is_i64() || event.value.is_u64()) && clamped.fract() == 0.0 {
            Ok(Some(Value::from(clamped as i64)))
        } else {
            Ok(Some(Value::from(clamped)))
        }
    }
}

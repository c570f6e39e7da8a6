// Policy-mediated state container
//
// Fields are declared once (name, default, access mode, ordered policies) and
// frozen into a container. Every read and write flows through the field's
// policy pipeline. Writes to a field are serialized: the field's lock is held
// across the whole validate-then-commit sequence, so a rejected write can
// never leave a partial value behind and two racing writes cannot interleave
// their pipelines.
//
// Computed fields store nothing. They are recomputed on every read from the
// raw stored values and are never policy-gated.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::event::{GetEvent, SetEvent};
use crate::policy::Policy;

/// Who may touch a field through the container's public surface.
///
/// `Hidden` fields are readable and writable by tool handlers and policies
/// but are excluded from snapshots, so guards, conditions and choice
/// resolvers never observe them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldAccess {
    /// Readable only; writes are rejected
    Read,
    /// Writable only; reads are rejected
    Write,
    /// Readable and writable
    #[default]
    ReadWrite,
    /// Readable and writable, but absent from snapshots
    Hidden,
}

type FactoryFn = dyn Fn() -> Value + Send + Sync;
type ComputeFn = dyn Fn(&StateSnapshot) -> Value + Send + Sync;

#[derive(Clone)]
enum FieldDefault {
    Fixed(Value),
    Factory(Arc<FactoryFn>),
}

/// Declaration of one state field
#[derive(Clone)]
pub struct StateField {
    name: String,
    access: FieldAccess,
    default: FieldDefault,
    policies: Vec<Arc<dyn Policy>>,
    compute: Option<Arc<ComputeFn>>,
}

impl StateField {
    /// Stored field with a fixed default value
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            access: FieldAccess::default(),
            default: FieldDefault::Fixed(default.into()),
            policies: Vec::new(),
            compute: None,
        }
    }

    /// Stored field whose default is produced fresh per container
    pub fn with_factory(
        name: impl Into<String>,
        factory: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            access: FieldAccess::default(),
            default: FieldDefault::Factory(Arc::new(factory)),
            policies: Vec::new(),
            compute: None,
        }
    }

    /// Derived field, recomputed on every read from the stored fields.
    ///
    /// Computed fields cannot be written and carry no policies.
    pub fn computed(
        name: impl Into<String>,
        compute: impl Fn(&StateSnapshot) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            access: FieldAccess::Read,
            default: FieldDefault::Fixed(Value::Null),
            policies: Vec::new(),
            compute: Some(Arc::new(compute)),
        }
    }

    /// Set the access mode (default: read-write)
    pub fn access(mut self, access: FieldAccess) -> Self {
        self.access = access;
        self
    }

    /// Append a policy. Policies run in the order they were attached.
    pub fn policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    /// Append an already-shared policy (e.g. one the test keeps a handle to)
    pub fn policy_arc(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateField")
            .field("name", &self.name)
            .field("access", &self.access)
            .field("policies", &self.policies.len())
            .field("computed", &self.compute.is_some())
            .finish()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Immutable point-in-time view of the visible state, plus the current phase.
///
/// Snapshots carry raw stored values (no read-policy substitution applied)
/// and the values of computed fields; hidden fields are excluded. Guards,
/// eligibility conditions and choice resolvers all consume this type.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    values: BTreeMap<String, Value>,
    phase: Option<String>,
}

impl StateSnapshot {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// String value of a field, if present and a string
    pub fn str_of(&self, field: &str) -> Option<&str> {
        self.values.get(field).and_then(Value::as_str)
    }

    pub fn i64_of(&self, field: &str) -> Option<i64> {
        self.values.get(field).and_then(Value::as_i64)
    }

    pub fn f64_of(&self, field: &str) -> Option<f64> {
        self.values.get(field).and_then(Value::as_f64)
    }

    pub fn bool_of(&self, field: &str) -> Option<bool> {
        self.values.get(field).and_then(Value::as_bool)
    }

    /// Current phase name, if the agent declares phases
    pub fn phase(&self) -> Option<&str> {
        self.phase.as_deref()
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    // The phase name is also mirrored into the value map so prompt builders
    // and resolvers can read it like any other field.
    pub(crate) fn with_phase(mut self, phase: Option<String>) -> Self {
        if let Some(name) = &phase {
            self.values
                .insert("phase".to_string(), Value::String(name.clone()));
        }
        self.phase = phase;
        self
    }
}

// ============================================================================
// Container
// ============================================================================

enum SlotKind {
    Stored(Mutex<Value>),
    Computed(Arc<ComputeFn>),
}

struct FieldSlot {
    access: FieldAccess,
    policies: Vec<Arc<dyn Policy>>,
    kind: SlotKind,
}

/// Runtime store for one agent instance's state fields
pub struct StateContainer {
    order: Vec<String>,
    slots: HashMap<String, FieldSlot>,
}

impl StateContainer {
    /// Materialize a container from field declarations, applying defaults
    pub fn from_fields(fields: &[StateField]) -> Self {
        let mut order = Vec::with_capacity(fields.len());
        let mut slots = HashMap::with_capacity(fields.len());
        for field in fields {
            let kind = match &field.compute {
                Some(compute) => SlotKind::Computed(Arc::clone(compute)),
                None => {
                    let initial = match &field.default {
                        FieldDefault::Fixed(v) => v.clone(),
                        FieldDefault::Factory(f) => f(),
                    };
                    SlotKind::Stored(Mutex::new(initial))
                }
            };
            order.push(field.name.clone());
            slots.insert(
                field.name.clone(),
                FieldSlot {
                    access: field.access,
                    policies: field.policies.clone(),
                    kind,
                },
            );
        }
        Self { order, slots }
    }

    /// Read a field through its policy pipeline.
    ///
    /// Read handlers may substitute the returned value but cannot abort the
    /// read; detached post-read handlers are spawned with the final value.
    pub fn get(&self, field: &str) -> Result<Value> {
        let slot = self
            .slots
            .get(field)
            .ok_or_else(|| AgentError::UnknownField(field.to_string()))?;
        if slot.access == FieldAccess::Write {
            return Err(AgentError::FieldAccess {
                field: field.to_string(),
                mode: "read",
            });
        }

        let raw = match &slot.kind {
            SlotKind::Stored(cell) => cell.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            // Derived values bypass policies entirely
            SlotKind::Computed(compute) => return Ok(compute(&self.stored_snapshot())),
        };

        let mut event = GetEvent::new(field, raw);
        for policy in &slot.policies {
            if let Some(substituted) = policy.on_get(&event) {
                event = event.with_value(substituted);
            }
        }
        spawn_background(&slot.policies, BackgroundEvent::Get(event.clone()));
        Ok(event.value)
    }

    /// Write a field through its policy pipeline.
    ///
    /// The field's lock is held across validation and commit: a rejection
    /// leaves the stored value untouched, and concurrent writers serialize.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<()> {
        let slot = self
            .slots
            .get(field)
            .ok_or_else(|| AgentError::UnknownField(field.to_string()))?;
        if slot.access == FieldAccess::Read {
            return Err(AgentError::FieldAccess {
                field: field.to_string(),
                mode: "write",
            });
        }
        let SlotKind::Stored(cell) = &slot.kind else {
            return Err(AgentError::FieldAccess {
                field: field.to_string(),
                mode: "write",
            });
        };

        let mut stored = cell.lock().unwrap_or_else(|e| e.into_inner());
        let mut event = SetEvent::new(field, stored.clone(), value.into());
        for policy in &slot.policies {
            match policy.on_set(&event) {
                Ok(Some(transformed)) => event = event.with_value(transformed),
                Ok(None) => {}
                Err(reason) => {
                    return Err(AgentError::state_write(field, policy.name(), reason));
                }
            }
        }
        *stored = event.value.clone();
        drop(stored);

        spawn_background(&slot.policies, BackgroundEvent::Set(event));
        Ok(())
    }

    /// Visible state: raw stored values plus computed values, hidden fields
    /// excluded. The phase is attached by the engine.
    pub fn snapshot(&self) -> StateSnapshot {
        let stored = self.stored_snapshot();
        let mut values = stored.values.clone();
        for name in &self.order {
            let slot = &self.slots[name];
            if slot.access == FieldAccess::Hidden {
                continue;
            }
            if let SlotKind::Computed(compute) = &slot.kind {
                values.insert(name.clone(), compute(&stored));
            }
        }
        StateSnapshot {
            values,
            phase: None,
        }
    }

    /// Declared field names in declaration order
    pub fn field_names(&self) -> &[String] {
        &self.order
    }

    // Raw stored values only, hidden excluded. Input for compute functions,
    // so a computed field never observes another computed field.
    fn stored_snapshot(&self) -> StateSnapshot {
        let mut values = BTreeMap::new();
        for name in &self.order {
            let slot = &self.slots[name];
            if slot.access == FieldAccess::Hidden {
                continue;
            }
            if let SlotKind::Stored(cell) = &slot.kind {
                values.insert(
                    name.clone(),
                    cell.lock().unwrap_or_else(|e| e.into_inner()).clone(),
                );
            }
        }
        StateSnapshot {
            values,
            phase: None,
        }
    }
}

impl fmt::Debug for StateContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateContainer")
            .field("fields", &self.order)
            .finish()
    }
}

enum BackgroundEvent {
    Get(GetEvent),
    Set(SetEvent),
}

// Detached handlers run on the ambient runtime. Outside a runtime (plain
// sync callers in tests) they are skipped with a debug log rather than
// blocking the accessor.
fn spawn_background(policies: &[Arc<dyn Policy>], event: BackgroundEvent) {
    if policies.is_empty() {
        return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        let field = match &event {
            BackgroundEvent::Get(e) => &e.field,
            BackgroundEvent::Set(e) => &e.field,
        };
        debug!(field = %field, "no async runtime, skipping detached policy handlers");
        return;
    };
    for policy in policies {
        let policy = Arc::clone(policy);
        match &event {
            BackgroundEvent::Get(e) => {
                let e = e.clone();
                handle.spawn(async move { policy.background_get(e).await });
            }
            BackgroundEvent::Set(e) => {
                let e = e.clone();
                handle.spawn(async move { policy.background_set(e).await });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::BoundsPolicy;
    use serde_json::json;

    struct RejectNegative;

    #[async_trait::async_trait]
    impl Policy for RejectNegative {
        fn name(&self) -> &str {
            "reject_negative"
        }

        fn on_set(&self, event: &SetEvent) -> anyhow::Result<Option<Value>> {
            if event.value.as_f64().is_some_and(|n| n < 0.0) {
                anyhow::bail!("must be non-negative");
            }
            Ok(None)
        }
    }

    struct Doubler;

    #[async_trait::async_trait]
    impl Policy for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn on_set(&self, event: &SetEvent) -> anyhow::Result<Option<Value>> {
            Ok(event.value.as_i64().map(|n| json!(n * 2)))
        }
    }

    fn container(fields: Vec<StateField>) -> StateContainer {
        StateContainer::from_fields(&fields)
    }

    #[test]
    fn test_defaults_applied() {
        let state = container(vec![
            StateField::new("count", 0),
            StateField::with_factory("tags", || json!([])),
        ]);

        assert_eq!(state.get("count").unwrap(), json!(0));
        assert_eq!(state.get("tags").unwrap(), json!([]));
    }

    #[test]
    fn test_rejected_write_keeps_previous_value() {
        let state = container(vec![StateField::new("count", 5).policy(RejectNegative)]);

        let err = state.set("count", json!(-3)).unwrap_err();
        assert!(matches!(err, AgentError::StateWrite { .. }));
        assert_eq!(state.get("count").unwrap(), json!(5));
    }

    #[test]
    fn test_transforms_chain_in_declaration_order() {
        // doubler then clamp: 30 -> 60 -> 50
        let state = container(vec![StateField::new("count", 0)
            .policy(Doubler)
            .policy(BoundsPolicy::new(0.0, 50.0))]);

        state.set("count", json!(30)).unwrap();
        assert_eq!(state.get("count").unwrap(), json!(50));
    }

    #[test]
    fn test_computed_field_recomputes_per_read() {
        let state = container(vec![
            StateField::new("count", 2),
            StateField::computed("squared", |snap| {
                json!(snap.i64_of("count").unwrap_or(0).pow(2))
            }),
        ]);

        assert_eq!(state.get("squared").unwrap(), json!(4));
        state.set("count", json!(5)).unwrap();
        assert_eq!(state.get("squared").unwrap(), json!(25));
    }

    #[test]
    fn test_computed_field_rejects_writes() {
        let state = container(vec![StateField::computed("derived", |_| json!(1))]);

        assert!(matches!(
            state.set("derived", json!(9)),
            Err(AgentError::FieldAccess { .. })
        ));
    }

    #[test]
    fn test_access_modes_enforced() {
        let state = container(vec![
            StateField::new("ro", 1).access(FieldAccess::Read),
            StateField::new("wo", 1).access(FieldAccess::Write),
        ]);

        assert!(matches!(
            state.set("ro", json!(2)),
            Err(AgentError::FieldAccess { .. })
        ));
        assert!(matches!(
            state.get("wo"),
            Err(AgentError::FieldAccess { .. })
        ));
    }

    #[test]
    fn test_snapshot_excludes_hidden_and_includes_computed() {
        let state = container(vec![
            StateField::new("visible", 1),
            StateField::new("secret", 2).access(FieldAccess::Hidden),
            StateField::computed("double", |snap| {
                json!(snap.i64_of("visible").unwrap_or(0) * 2)
            }),
        ]);

        let snap = state.snapshot();
        assert_eq!(snap.get("visible"), Some(&json!(1)));
        assert_eq!(snap.get("secret"), None);
        assert_eq!(snap.get("double"), Some(&json!(2)));
    }

    #[test]
    fn test_unknown_field() {
        let state = container(vec![]);
        assert!(matches!(
            state.get("missing"),
            Err(AgentError::UnknownField(_))
        ));
    }

    #[tokio::test]
    async fn test_audit_policy_observes_committed_writes() {
        use crate::policy::AuditPolicy;

        let audit = Arc::new(AuditPolicy::new());
        let state = container(vec![StateField::new("count", 0)
            .policy(BoundsPolicy::new(0.0, 10.0))
            .policy_arc(audit.clone() as Arc<dyn Policy>)]);

        state.set("count", json!(99)).unwrap();
        // Detached handlers run on the runtime; yield until they land.
        for _ in 0..32 {
            if !audit.entries().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        let entries = audit.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].value, json!(10));
    }
}

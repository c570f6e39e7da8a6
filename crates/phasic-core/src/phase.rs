// Phase machine - declared transitions gating which actions are offered
//
// The machine is a flat list of transitions evaluated in declaration order.
// The initial phase is the source of the first declared transition. On each
// advance, the first transition out of the current phase whose guard passes
// fires; a guard that fails to evaluate is a configuration defect and aborts
// the invocation.

use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::state::StateSnapshot;

type GuardFn = dyn Fn(&StateSnapshot) -> anyhow::Result<bool> + Send + Sync;

/// One declared edge between phases
#[derive(Clone)]
pub struct Transition {
    from: String,
    to: String,
    guard: Option<Arc<GuardFn>>,
}

impl Transition {
    /// Unconditional transition; fires whenever the machine sits in `from`
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            guard: None,
        }
    }

    /// Guarded transition over an infallible predicate
    pub fn when(
        from: impl Into<String>,
        to: impl Into<String>,
        predicate: impl Fn(&StateSnapshot) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::new(from, to).guard(move |snapshot| Ok(predicate(snapshot)))
    }

    /// Guard this transition on the current state snapshot
    pub fn guard(
        mut self,
        guard: impl Fn(&StateSnapshot) -> anyhow::Result<bool> + Send + Sync + 'static,
    ) -> Self {
        self.guard = Some(Arc::new(guard));
        self
    }

    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn to(&self) -> &str {
        &self.to
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

/// Runtime phase tracker for one agent instance
pub struct PhaseMachine {
    transitions: Vec<Transition>,
    current: Mutex<String>,
}

impl PhaseMachine {
    /// Build a machine; the initial phase is the first transition's source
    pub fn new(transitions: Vec<Transition>) -> Result<Self> {
        let initial = transitions
            .first()
            .map(|t| t.from.clone())
            .ok_or_else(|| AgentError::config("phase machine declared with no transitions"))?;
        Ok(Self {
            transitions,
            current: Mutex::new(initial),
        })
    }

    /// Name of the phase the machine currently sits in
    pub fn current(&self) -> String {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Evaluate transitions out of the current phase in declaration order.
    ///
    /// The first one whose guard passes (or that has no guard) fires and its
    /// target becomes the current phase. Returns the new phase if the machine
    /// moved, `None` if no transition fired. A guard evaluation error is
    /// fatal.
    pub fn advance(&self, snapshot: &StateSnapshot) -> Result<Option<String>> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        for transition in &self.transitions {
            if transition.from != *current {
                continue;
            }
            let fires = match &transition.guard {
                None => true,
                Some(guard) => guard(snapshot).map_err(|source| AgentError::Guard {
                    from: transition.from.clone(),
                    to: transition.to.clone(),
                    source,
                })?,
            };
            if fires {
                debug!(from = %transition.from, to = %transition.to, "phase transition");
                *current = transition.to.clone();
                return Ok(Some(transition.to.clone()));
            }
        }
        Ok(None)
    }

    /// All declared transitions, in declaration order
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }
}

impl fmt::Debug for PhaseMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseMachine")
            .field("current", &self.current())
            .field("transitions", &self.transitions)
            .finish()
    }
}

// Action parameter schemas
//
// Parameter defaults and choice lists may be fixed values or resolvers over
// the current state snapshot. Resolvers are pure functions re-evaluated at
// every offer and every dispatch, so a choice list backed by a state field
// always reflects the field's value at that moment.

use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::{AgentError, Result};
use crate::state::StateSnapshot;

type ValueResolver = dyn Fn(&StateSnapshot) -> Value + Send + Sync;
type ChoicesResolver = dyn Fn(&StateSnapshot) -> Vec<Value> + Send + Sync;

/// JSON type a parameter accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    fn json_type(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Number => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }
}

#[derive(Clone, Default)]
enum ParamDefault {
    #[default]
    None,
    Fixed(Value),
    Resolved(Arc<ValueResolver>),
}

#[derive(Clone, Default)]
enum ParamChoices {
    #[default]
    None,
    Fixed(Vec<Value>),
    Resolved(Arc<ChoicesResolver>),
}

/// Declaration of one named action parameter
#[derive(Clone)]
pub struct ParamSpec {
    name: String,
    kind: ParamKind,
    description: String,
    required: bool,
    default: ParamDefault,
    choices: ParamChoices,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: String::new(),
            required: true,
            default: ParamDefault::None,
            choices: ParamChoices::None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::String)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Integer)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamKind::Boolean)
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Mark optional with a fixed default, filled in when the caller omits it
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = ParamDefault::Fixed(value.into());
        self.required = false;
        self
    }

    /// Mark optional with a default resolved from state at dispatch time
    pub fn default_from(
        mut self,
        resolver: impl Fn(&StateSnapshot) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.default = ParamDefault::Resolved(Arc::new(resolver));
        self.required = false;
        self
    }

    /// Mark optional without a default; absent means absent
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Restrict accepted values to a fixed list
    pub fn choices(mut self, choices: Vec<Value>) -> Self {
        self.choices = ParamChoices::Fixed(choices);
        self
    }

    /// Restrict accepted values to a list resolved from state at offer and
    /// dispatch time
    pub fn choices_from(
        mut self,
        resolver: impl Fn(&StateSnapshot) -> Vec<Value> + Send + Sync + 'static,
    ) -> Self {
        self.choices = ParamChoices::Resolved(Arc::new(resolver));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn resolved_choices(&self, snapshot: &StateSnapshot) -> Option<Vec<Value>> {
        match &self.choices {
            ParamChoices::None => None,
            ParamChoices::Fixed(choices) => Some(choices.clone()),
            ParamChoices::Resolved(resolver) => Some(resolver(snapshot)),
        }
    }

    fn resolved_default(&self, snapshot: &StateSnapshot) -> Option<Value> {
        match &self.default {
            ParamDefault::None => None,
            ParamDefault::Fixed(value) => Some(value.clone()),
            ParamDefault::Resolved(resolver) => Some(resolver(snapshot)),
        }
    }

    fn property_schema(&self, snapshot: &StateSnapshot) -> Value {
        let mut prop = Map::new();
        prop.insert("type".to_string(), json!(self.kind.json_type()));
        if !self.description.is_empty() {
            prop.insert("description".to_string(), json!(self.description));
        }
        if let Some(choices) = self.resolved_choices(snapshot) {
            prop.insert("enum".to_string(), Value::Array(choices));
        }
        if let Some(default) = self.resolved_default(snapshot) {
            prop.insert("default".to_string(), default);
        }
        Value::Object(prop)
    }
}

impl fmt::Debug for ParamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParamSpec")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .finish()
    }
}

/// Ordered parameter list for one action
#[derive(Debug, Clone, Default)]
pub struct ParamsSpec {
    params: Vec<ParamSpec>,
}

impl ParamsSpec {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// JSON-schema object rendered against the given snapshot. Resolver-backed
    /// choices and defaults are evaluated here, so the rendered schema is a
    /// point-in-time view.
    pub fn schema(&self, snapshot: &StateSnapshot) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.params {
            properties.insert(param.name.clone(), param.property_schema(snapshot));
            if param.required {
                required.push(json!(param.name));
            }
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Validate caller arguments and fill in defaults.
    ///
    /// Checks presence of required parameters, JSON types, and membership in
    /// the choice list resolved against the snapshot right now. Unknown keys
    /// are rejected.
    pub fn resolve_args(&self, args: &Value, snapshot: &StateSnapshot) -> Result<Map<String, Value>> {
        let supplied = match args {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(AgentError::invalid_arguments(format!(
                    "expected an argument object, got {other}"
                )))
            }
        };

        for key in supplied.keys() {
            if !self.params.iter().any(|p| p.name == *key) {
                return Err(AgentError::invalid_arguments(format!(
                    "unexpected argument `{key}`"
                )));
            }
        }

        let mut resolved = Map::new();
        for param in &self.params {
            let value = match supplied.get(&param.name) {
                Some(value) => value.clone(),
                None => match param.resolved_default(snapshot) {
                    Some(default) => default,
                    None if param.required => {
                        return Err(AgentError::invalid_arguments(format!(
                            "missing required argument `{}`",
                            param.name
                        )))
                    }
                    None => continue,
                },
            };

            if !param.kind.accepts(&value) {
                return Err(AgentError::invalid_arguments(format!(
                    "argument `{}` must be of type {}",
                    param.name,
                    param.kind.json_type()
                )));
            }
            if let Some(choices) = param.resolved_choices(snapshot) {
                if !choices.contains(&value) {
                    return Err(AgentError::invalid_arguments(format!(
                        "argument `{}` must be one of {}",
                        param.name,
                        Value::Array(choices)
                    )));
                }
            }
            resolved.insert(param.name.clone(), value);
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{StateContainer, StateField};

    fn snapshot() -> StateSnapshot {
        let state = StateContainer::from_fields(&[StateField::new(
            "topics",
            json!(["rust", "tokio"]),
        )]);
        state.snapshot()
    }

    fn topic_params() -> ParamsSpec {
        ParamsSpec::new(vec![
            ParamSpec::string("topic").choices_from(|snap| {
                snap.get("topics")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default()
            }),
            ParamSpec::integer("limit").default_value(10),
        ])
    }

    #[test]
    fn test_schema_renders_live_choices() {
        let schema = topic_params().schema(&snapshot());

        assert_eq!(schema["properties"]["topic"]["enum"], json!(["rust", "tokio"]));
        assert_eq!(schema["properties"]["limit"]["default"], json!(10));
        assert_eq!(schema["required"], json!(["topic"]));
    }

    #[test]
    fn test_resolve_args_fills_defaults() {
        let resolved = topic_params()
            .resolve_args(&json!({"topic": "rust"}), &snapshot())
            .unwrap();

        assert_eq!(resolved["topic"], json!("rust"));
        assert_eq!(resolved["limit"], json!(10));
    }

    #[test]
    fn test_resolve_args_enforces_choices() {
        let err = topic_params()
            .resolve_args(&json!({"topic": "cooking"}), &snapshot())
            .unwrap_err();

        assert!(matches!(err, AgentError::InvalidArguments(_)));
    }

    #[test]
    fn test_resolve_args_rejects_missing_required() {
        let err = topic_params()
            .resolve_args(&json!({}), &snapshot())
            .unwrap_err();

        assert!(matches!(err, AgentError::InvalidArguments(_)));
    }

    #[test]
    fn test_resolve_args_rejects_wrong_type_and_unknown_key() {
        let params = topic_params();

        assert!(params
            .resolve_args(&json!({"topic": "rust", "limit": "ten"}), &snapshot())
            .is_err());
        assert!(params
            .resolve_args(&json!({"topic": "rust", "bogus": 1}), &snapshot())
            .is_err());
    }

    #[test]
    fn test_default_resolved_from_state() {
        let params = ParamsSpec::new(vec![ParamSpec::string("topic")
            .default_from(|snap| {
                snap.get("topics")
                    .and_then(Value::as_array)
                    .and_then(|a| a.first().cloned())
                    .unwrap_or(Value::Null)
            })]);

        let resolved = params.resolve_args(&json!({}), &snapshot()).unwrap();
        assert_eq!(resolved["topic"], json!("rust"));
    }
}

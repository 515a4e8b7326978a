use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// An execution-scoped parameter visible to a step.
///
/// Values live on the execution; a parameter may inherit its value from a
/// parent execution's parameter, or compute it from an expression evaluated
/// immediately before the step runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub parameter_id: i64,
    pub name: String,
    pub value: Value,
    /// Parent-execution parameter this one mirrors, refreshed pre-flight.
    pub inherit_from_parameter_id: Option<i64>,
    /// When set, `expression` is evaluated pre-flight and the result is
    /// written back as the new value.
    pub use_expression: bool,
    pub expression: Option<String>,
}

impl Parameter {
    pub fn literal(parameter_id: i64, name: impl Into<String>, value: Value) -> Self {
        Self {
            parameter_id,
            name: name.into(),
            value,
            inherit_from_parameter_id: None,
            use_expression: false,
            expression: None,
        }
    }

    pub fn from_expression(
        parameter_id: i64,
        name: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            parameter_id,
            name: name.into(),
            value: Value::Null,
            inherit_from_parameter_id: None,
            use_expression: true,
            expression: Some(expression.into()),
        }
    }

    pub fn inherited(
        parameter_id: i64,
        name: impl Into<String>,
        inherit_from_parameter_id: i64,
    ) -> Self {
        Self {
            parameter_id,
            name: name.into(),
            value: Value::Null,
            inherit_from_parameter_id: Some(inherit_from_parameter_id),
            use_expression: false,
            expression: None,
        }
    }
}

/// Binds a name used inside an execution-condition expression to the
/// execution parameter supplying its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionParameter {
    pub name: String,
    pub execution_parameter_id: i64,
}

/// Name-to-value bindings handed to expression evaluation and to runners.
///
/// Serializes as the bare name/value object, matching the payload shape the
/// HTTP-function runner posts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterBindings {
    values: HashMap<String, Value>,
}

impl ParameterBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parameters<'a>(parameters: impl IntoIterator<Item = &'a Parameter>) -> Self {
        let mut bindings = Self::new();
        for parameter in parameters {
            bindings.set(parameter.name.clone(), parameter.value.clone());
        }
        bindings
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

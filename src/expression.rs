//! Expression evaluation contract.
//!
//! The engine never interprets expression text itself. Embedding applications
//! bring their own language and implement [`ConditionEvaluator`]; the engine
//! only routes bindings in and results back to the store.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::ParameterBindings;

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("failed to evaluate expression '{expression}': {reason}")]
    Evaluation { expression: String, reason: String },

    #[error("expression '{expression}' must produce a boolean, got {actual}")]
    NotBoolean { expression: String, actual: String },
}

impl ExpressionError {
    pub fn evaluation(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Evaluation {
            expression: expression.into(),
            reason: reason.into(),
        }
    }

    pub fn not_boolean(expression: impl Into<String>, actual: &Value) -> Self {
        Self::NotBoolean {
            expression: expression.into(),
            actual: actual.to_string(),
        }
    }
}

/// Evaluates expression text against parameter bindings.
///
/// Used pre-flight for `use_expression` parameters (any value) and for
/// execution conditions (boolean only).
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn evaluate_value(
        &self,
        expression: &str,
        bindings: &ParameterBindings,
    ) -> Result<Value, ExpressionError>;

    /// Evaluate an execution condition. Non-boolean results are an error, not
    /// a truthiness guess.
    async fn evaluate_bool(
        &self,
        expression: &str,
        bindings: &ParameterBindings,
    ) -> Result<bool, ExpressionError> {
        let value = self.evaluate_value(expression, bindings).await?;
        match value {
            Value::Bool(flag) => Ok(flag),
            other => Err(ExpressionError::not_boolean(expression, &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoBinding;

    #[async_trait]
    impl ConditionEvaluator for EchoBinding {
        async fn evaluate_value(
            &self,
            expression: &str,
            bindings: &ParameterBindings,
        ) -> Result<Value, ExpressionError> {
            bindings
                .get(expression)
                .cloned()
                .ok_or_else(|| ExpressionError::evaluation(expression, "unbound name"))
        }
    }

    #[tokio::test]
    async fn bool_evaluation_rejects_non_boolean_values() {
        let mut bindings = ParameterBindings::new();
        bindings.set("ready", json!(true));
        bindings.set("count", json!(3));

        let evaluator = EchoBinding;
        assert!(evaluator.evaluate_bool("ready", &bindings).await.unwrap());

        let err = evaluator.evaluate_bool("count", &bindings).await.unwrap_err();
        assert!(matches!(err, ExpressionError::NotBoolean { .. }));
    }
}

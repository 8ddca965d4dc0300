//! Jinja2-style templating over JSON variables.
//!
//! A single minijinja [`Environment`] is shared by the whole process. Missing
//! variables are chainable undefined values, so `result.stdout.missing` renders
//! as an empty string and evaluates to false instead of failing the host.

use minijinja::{Environment, Error, ErrorKind, UndefinedBehavior, Value};
use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;

use super::{JsonMap, VarsError, VarsResult};

static ENGINE: Lazy<TemplateEngine> = Lazy::new(TemplateEngine::new);

/// Template renderer and expression evaluator
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine").finish_non_exhaustive()
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Create an engine with the kubeplay filters installed
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        Self::add_filters(&mut env);
        Self { env }
    }

    /// The process-wide engine
    pub fn global() -> &'static TemplateEngine {
        &ENGINE
    }

    fn add_filters(env: &mut Environment<'static>) {
        env.add_filter("from_json", |s: String| -> Result<Value, Error> {
            serde_json::from_str::<JsonValue>(&s)
                .map(|v| Value::from_serialize(&v))
                .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
        });
        env.add_filter("to_json", |v: Value| -> Result<String, Error> {
            serde_json::to_string(&v)
                .map_err(|e| Error::new(ErrorKind::InvalidOperation, e.to_string()))
        });
        env.add_filter("bool", |v: Value| -> bool {
            match v.as_str() {
                Some(s) => matches!(s.trim().to_lowercase().as_str(), "true" | "yes" | "on" | "1"),
                None => v.is_true(),
            }
        });
        env.add_filter("split", |s: String, sep: Option<String>| -> Vec<String> {
            let sep = sep.unwrap_or_else(|| " ".to_string());
            s.split(&sep).map(|s| s.to_string()).collect()
        });
        env.add_filter("trim", |s: String| s.trim().to_string());
    }

    /// Check if a string contains template markup
    pub fn has_template(s: &str) -> bool {
        s.contains("{{") || s.contains("{%")
    }

    /// Render a template string against a host's variables.
    pub fn render_str(&self, template: &str, vars: &JsonMap) -> VarsResult<String> {
        if !Self::has_template(template) {
            return Ok(template.to_string());
        }
        Ok(self.env.render_str(template, vars)?)
    }

    /// Evaluate a bare expression and return its value as JSON.
    pub fn eval_expr(&self, expr: &str, vars: &JsonMap) -> VarsResult<JsonValue> {
        let compiled = self
            .env
            .compile_expression(expr)
            .map_err(|e| VarsError::Expression {
                expr: expr.to_string(),
                message: e.to_string(),
            })?;
        let value = compiled.eval(vars).map_err(|e| VarsError::Expression {
            expr: expr.to_string(),
            message: e.to_string(),
        })?;
        if value.is_undefined() {
            return Ok(JsonValue::Null);
        }
        Ok(serde_json::to_value(&value)?)
    }

    /// Render every string inside a JSON value.
    ///
    /// A string that consists of exactly one `{{ expr }}` keeps the native type
    /// of the expression, so `"{{ ports }}"` yields a list rather than its text.
    pub fn render_value(&self, value: &JsonValue, vars: &JsonMap) -> VarsResult<JsonValue> {
        match value {
            JsonValue::String(s) => {
                if let Some(expr) = single_expression(s) {
                    return self.eval_expr(expr, vars);
                }
                Ok(JsonValue::String(self.render_str(s, vars)?))
            }
            JsonValue::Array(items) => Ok(JsonValue::Array(
                items
                    .iter()
                    .map(|v| self.render_value(v, vars))
                    .collect::<VarsResult<Vec<_>>>()?,
            )),
            JsonValue::Object(map) => {
                let mut rendered = JsonMap::new();
                for (k, v) in map {
                    rendered.insert(self.render_str(k, vars)?, self.render_value(v, vars)?);
                }
                Ok(JsonValue::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    /// Evaluate a list of conditions; all of them must hold.
    pub fn eval_conditions(&self, conditions: &[String], vars: &JsonMap) -> VarsResult<bool> {
        for condition in conditions {
            let expr = strip_delimiters(condition);
            if expr.is_empty() {
                continue;
            }
            let compiled = self
                .env
                .compile_expression(expr)
                .map_err(|e| VarsError::Expression {
                    expr: condition.clone(),
                    message: e.to_string(),
                })?;
            let value = compiled.eval(vars).map_err(|e| VarsError::Expression {
                expr: condition.clone(),
                message: e.to_string(),
            })?;
            if !value.is_true() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Expand a `loop` value into its items.
    ///
    /// No loop yields a single `null` item. A list is rendered element-wise.
    /// A string is rendered; a list result (or text that parses as a JSON list)
    /// supplies the items, anything else is the only item.
    pub fn expand_loop(&self, spec: Option<&JsonValue>, vars: &JsonMap) -> VarsResult<Vec<JsonValue>> {
        match spec {
            None | Some(JsonValue::Null) => Ok(vec![JsonValue::Null]),
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|item| self.render_value(item, vars))
                .collect(),
            Some(JsonValue::String(s)) => match self.render_value(&JsonValue::String(s.clone()), vars)? {
                JsonValue::Array(items) => Ok(items),
                JsonValue::String(text) => match serde_json::from_str::<JsonValue>(&text) {
                    Ok(JsonValue::Array(items)) => Ok(items),
                    _ => Ok(vec![JsonValue::String(text)]),
                },
                other => Ok(vec![other]),
            },
            Some(other) => Ok(vec![other.clone()]),
        }
    }
}

/// Strip an optional surrounding `{{ }}` from a condition.
fn strip_delimiters(condition: &str) -> &str {
    single_expression(condition).unwrap_or_else(|| condition.trim())
}

/// The inner expression when `s` is exactly one `{{ ... }}` block.
fn single_expression(s: &str) -> Option<&str> {
    let inner = s.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

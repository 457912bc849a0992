//! Permission rules: pattern, conditions, decision.
//!
//! Rules are first-class data. They are evaluated in insertion order and
//! the first match decides; see the inspector for the surrounding policy.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tool::RiskLevel;

/// The decision a rule applies when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RuleDecision {
    /// Approve this call only.
    AllowOnce,
    /// Approve this call and remember the fingerprint.
    AllowAlways,
    /// Deny this call only.
    DenyOnce,
    /// Deny this call and remember the fingerprint.
    DenyAlways,
    /// Force a human decision regardless of mode.
    Ask,
}

/// Comparison operator for a rule condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOp {
    /// String equality.
    Eq,
    /// String inequality.
    Ne,
    /// Substring containment.
    Contains,
    /// String prefix.
    Prefix,
    /// String suffix.
    Suffix,
    /// Regular-expression match.
    Regex,
}

/// One predicate over a call's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Dot-separated path into the argument object.
    pub field: String,
    /// Comparison operator.
    pub op: ConditionOp,
    /// Right-hand value.
    pub value: String,
}

impl Condition {
    /// Create a condition.
    #[must_use]
    pub fn new(field: impl Into<String>, op: ConditionOp, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// Evaluate against the call's arguments.
    ///
    /// The value at the field path is coerced to a string before
    /// comparison; a missing field never matches (except under `Ne`).
    ///
    /// # Errors
    ///
    /// Returns the compile error message when the operator is `Regex` and
    /// the pattern is invalid.
    pub fn evaluate(&self, arguments: &Value) -> Result<bool, String> {
        let field_value = lookup(arguments, &self.field).map(coerce);
        let Some(actual) = field_value else {
            // Absent fields satisfy only "not equal".
            return Ok(self.op == ConditionOp::Ne);
        };

        match self.op {
            ConditionOp::Eq => Ok(actual == self.value),
            ConditionOp::Ne => Ok(actual != self.value),
            ConditionOp::Contains => Ok(actual.contains(&self.value)),
            ConditionOp::Prefix => Ok(actual.starts_with(&self.value)),
            ConditionOp::Suffix => Ok(actual.ends_with(&self.value)),
            ConditionOp::Regex => {
                let re = regex::Regex::new(&self.value)
                    .map_err(|e| format!("invalid regex '{}': {e}", self.value))?;
                Ok(re.is_match(&actual))
            }
        }
    }
}

/// Walk a dot-separated path into a JSON value.
fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Coerce a JSON value to the string form used in comparisons.
fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// An ordered permission rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Tool-name pattern: exact name or glob.
    pub pattern: String,

    /// What to do when the rule matches.
    pub decision: RuleDecision,

    /// Risk override recorded alongside the rule, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,

    /// Conditions that must all hold for the rule to match.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Free-form note, echoed in denial messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PermissionRule {
    /// Create a rule with no conditions.
    #[must_use]
    pub fn new(pattern: impl Into<String>, decision: RuleDecision) -> Self {
        Self {
            pattern: pattern.into(),
            decision,
            risk: None,
            conditions: Vec::new(),
            note: None,
        }
    }

    /// Add a condition.
    #[must_use]
    pub fn condition(mut self, field: impl Into<String>, op: ConditionOp, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::new(field, op, value));
        self
    }

    /// Set the note.
    #[must_use]
    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Set the risk override.
    #[must_use]
    pub const fn risk(mut self, risk: RiskLevel) -> Self {
        self.risk = Some(risk);
        self
    }

    /// Whether this rule matches the given call.
    ///
    /// # Errors
    ///
    /// Returns a description when the pattern or a condition fails to
    /// compile; the inspector treats that as a denial.
    pub fn matches(&self, tool_name: &str, arguments: &Value) -> Result<bool, String> {
        let pattern = Pattern::new(&self.pattern)
            .map_err(|e| format!("invalid pattern '{}': {e}", self.pattern))?;
        if !pattern.matches(tool_name) {
            return Ok(false);
        }
        for condition in &self.conditions {
            if !condition.evaluate(arguments)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn glob_pattern_matches() {
        let rule = PermissionRule::new("read_*", RuleDecision::AllowAlways);
        assert!(rule.matches("read_file", &json!({})).expect("valid"));
        assert!(!rule.matches("write_file", &json!({})).expect("valid"));

        let exact = PermissionRule::new("shell", RuleDecision::Ask);
        assert!(exact.matches("shell", &json!({})).expect("valid"));
        assert!(!exact.matches("shell2", &json!({})).expect("valid"));
    }

    #[test]
    fn conditions_must_all_hold() {
        let rule = PermissionRule::new("shell", RuleDecision::DenyAlways)
            .condition("cmd", ConditionOp::Prefix, "rm")
            .condition("cwd", ConditionOp::Eq, "/");

        assert!(
            rule.matches("shell", &json!({"cmd": "rm -rf x", "cwd": "/"}))
                .expect("valid")
        );
        assert!(
            !rule
                .matches("shell", &json!({"cmd": "rm -rf x", "cwd": "/tmp"}))
                .expect("valid")
        );
    }

    #[test]
    fn operators() {
        let args = json!({"path": "/etc/passwd", "count": 3});
        let eval = |op, field: &str, value: &str| {
            Condition::new(field, op, value).evaluate(&args).expect("valid")
        };

        assert!(eval(ConditionOp::Eq, "path", "/etc/passwd"));
        assert!(eval(ConditionOp::Ne, "path", "/tmp"));
        assert!(eval(ConditionOp::Contains, "path", "etc"));
        assert!(eval(ConditionOp::Prefix, "path", "/etc"));
        assert!(eval(ConditionOp::Suffix, "path", "passwd"));
        assert!(eval(ConditionOp::Regex, "path", r"^/etc/\w+$"));
        // Non-string values are coerced.
        assert!(eval(ConditionOp::Eq, "count", "3"));
        // Missing fields only satisfy Ne.
        assert!(eval(ConditionOp::Ne, "missing", "x"));
        assert!(!eval(ConditionOp::Eq, "missing", "x"));
    }

    #[test]
    fn nested_field_paths() {
        let args = json!({"request": {"target": {"host": "internal.example"}}});
        let cond = Condition::new("request.target.host", ConditionOp::Suffix, ".example");
        assert!(cond.evaluate(&args).expect("valid"));
    }

    #[test]
    fn invalid_regex_is_an_error() {
        let cond = Condition::new("path", ConditionOp::Regex, "(unclosed");
        let err = cond.evaluate(&json!({"path": "x"})).unwrap_err();
        assert!(err.contains("invalid regex"));
    }

    #[test]
    fn rules_serialize_round_trip() {
        let rule = PermissionRule::new("web_*", RuleDecision::Ask)
            .condition("url", ConditionOp::Prefix, "http://")
            .note("plaintext http");
        let raw = serde_json::to_string(&rule).expect("serialize");
        let back: PermissionRule = serde_json::from_str(&raw).expect("deserialize");
        assert_eq!(back.pattern, "web_*");
        assert_eq!(back.decision, RuleDecision::Ask);
        assert_eq!(back.conditions.len(), 1);
        assert_eq!(back.note.as_deref(), Some("plaintext http"));
    }
}

//! The permission inspector: a rule-evaluated risk gate for tool calls.
//!
//! Every tool call passes through [`Inspector::check`] before execution.
//! The outcome is one of three things: auto-approval, hard denial, or a
//! request for an out-of-band human decision. Remembered `*-always`
//! decisions are keyed by an exact-argument fingerprint and bypass future
//! checks until [`Inspector::reset`].

mod rule;

pub use rule::{Condition, ConditionOp, PermissionRule, RuleDecision};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::tool::{RiskLevel, ToolCallRecord, default_risk};

/// How the inspector treats calls no rule decides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    /// Every call is auto-approved.
    AutoApprove,
    /// Low-risk calls auto-approve; medium and high require a decision.
    #[default]
    SmartApprove,
    /// Every call requires a decision.
    AlwaysAsk,
}

/// A human's (or rule's) verdict on a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    /// Run the tool.
    Allow,
    /// Refuse the tool; an error result is synthesized.
    Deny,
}

/// An out-of-band reply to a `permission-required` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionReply {
    /// The verdict.
    pub decision: ApprovalDecision,
    /// Optional note, echoed into the denial message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// When set, install an `*-always` rule for this call's fingerprint.
    #[serde(default)]
    pub remember: bool,
}

impl PermissionReply {
    /// An approval.
    #[must_use]
    pub const fn allow() -> Self {
        Self {
            decision: ApprovalDecision::Allow,
            note: None,
            remember: false,
        }
    }

    /// A denial.
    #[must_use]
    pub const fn deny() -> Self {
        Self {
            decision: ApprovalDecision::Deny,
            note: None,
            remember: false,
        }
    }

    /// Attach a note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Remember this decision for identical future calls.
    #[must_use]
    pub const fn remembered(mut self) -> Self {
        self.remember = true;
        self
    }
}

/// The inspector's verdict for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Execute without asking.
    Allow,
    /// Suspend and wait for a human decision.
    Require {
        /// Why the call was gated.
        reason: String,
    },
    /// Refuse outright.
    Deny {
        /// Why the call was refused.
        reason: String,
    },
}

/// Persistence seam for rules. Errors are non-fatal to the inspector.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Load the persisted rule list.
    async fn load_rules(&self) -> Result<Vec<PermissionRule>, StoreError>;

    /// Persist the rule list.
    async fn save_rules(&self, rules: &[PermissionRule]) -> Result<(), StoreError>;
}

#[derive(Default)]
struct InspectorState {
    mode: PermissionMode,
    rules: Vec<PermissionRule>,
    remembered: HashMap<String, ApprovalDecision>,
}

/// The permission inspector.
///
/// Check order: remembered fingerprints, then rules in insertion order
/// (first match wins), then the mode policy. A rule that fails to
/// evaluate (bad glob, bad regex) denies the call with the failure as the
/// reason.
pub struct Inspector {
    state: Mutex<InspectorState>,
    store: Option<Arc<dyn RuleStore>>,
}

impl Inspector {
    /// Create an inspector with the given mode and no rules.
    #[must_use]
    pub fn new(mode: PermissionMode) -> Self {
        Self {
            state: Mutex::new(InspectorState {
                mode,
                ..InspectorState::default()
            }),
            store: None,
        }
    }

    /// Seed the rule list.
    #[must_use]
    pub fn with_rules(self, rules: impl IntoIterator<Item = PermissionRule>) -> Self {
        self.state
            .lock()
            .expect("inspector lock poisoned")
            .rules
            .extend(rules);
        self
    }

    /// Attach a rule store for persistence.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn RuleStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The current mode.
    #[must_use]
    pub fn mode(&self) -> PermissionMode {
        self.state.lock().expect("inspector lock poisoned").mode
    }

    /// Change the mode.
    pub fn set_mode(&self, mode: PermissionMode) {
        self.state.lock().expect("inspector lock poisoned").mode = mode;
    }

    /// Append a rule.
    pub fn add_rule(&self, rule: PermissionRule) {
        self.state
            .lock()
            .expect("inspector lock poisoned")
            .rules
            .push(rule);
    }

    /// Snapshot of the current rules.
    #[must_use]
    pub fn rules(&self) -> Vec<PermissionRule> {
        self.state
            .lock()
            .expect("inspector lock poisoned")
            .rules
            .clone()
    }

    /// The fingerprint used for remembered decisions: tool name plus
    /// canonical JSON of the arguments.
    #[must_use]
    pub fn fingerprint(call: &ToolCallRecord) -> String {
        format!("{}:{}", call.name, call.arguments)
    }

    /// Decide whether `call` may run.
    ///
    /// `declared_risk` is the tool's own classification, which wins over
    /// the built-in name table when present.
    #[must_use]
    pub fn check(&self, call: &ToolCallRecord, declared_risk: Option<RiskLevel>) -> CheckOutcome {
        let mut state = self.state.lock().expect("inspector lock poisoned");
        let fingerprint = Self::fingerprint(call);

        if let Some(decision) = state.remembered.get(&fingerprint) {
            return match decision {
                ApprovalDecision::Allow => CheckOutcome::Allow,
                ApprovalDecision::Deny => CheckOutcome::Deny {
                    reason: format!("'{}' was previously denied for these arguments", call.name),
                },
            };
        }

        // First matching rule wins. Collect its verdict before touching
        // the remembered map so the rule borrow ends here.
        let mut matched: Option<(RuleDecision, Option<String>)> = None;
        for rule in &state.rules {
            match rule.matches(&call.name, &call.arguments) {
                Err(reason) => {
                    debug!(tool = %call.name, %reason, "rule evaluation failed; denying");
                    return CheckOutcome::Deny {
                        reason: format!("permission rule error: {reason}"),
                    };
                }
                Ok(false) => {}
                Ok(true) => {
                    matched = Some((rule.decision, rule.note.clone()));
                    break;
                }
            }
        }

        if let Some((decision, note)) = matched {
            return match decision {
                RuleDecision::AllowOnce => CheckOutcome::Allow,
                RuleDecision::AllowAlways => {
                    state.remembered.insert(fingerprint, ApprovalDecision::Allow);
                    CheckOutcome::Allow
                }
                RuleDecision::DenyOnce => CheckOutcome::Deny {
                    reason: note.unwrap_or_else(|| format!("'{}' denied by rule", call.name)),
                },
                RuleDecision::DenyAlways => {
                    state.remembered.insert(fingerprint, ApprovalDecision::Deny);
                    CheckOutcome::Deny {
                        reason: note
                            .unwrap_or_else(|| format!("'{}' denied by rule", call.name)),
                    }
                }
                RuleDecision::Ask => CheckOutcome::Require {
                    reason: note
                        .unwrap_or_else(|| format!("rule requires approval for '{}'", call.name)),
                },
            };
        }

        match state.mode {
            PermissionMode::AutoApprove => CheckOutcome::Allow,
            PermissionMode::AlwaysAsk => CheckOutcome::Require {
                reason: format!("approval required for '{}'", call.name),
            },
            PermissionMode::SmartApprove => {
                let risk = declared_risk.unwrap_or_else(|| default_risk(&call.name));
                if risk == RiskLevel::Low {
                    CheckOutcome::Allow
                } else {
                    CheckOutcome::Require {
                        reason: format!("'{}' is {risk} risk", call.name),
                    }
                }
            }
        }
    }

    /// Record a human decision for this call's fingerprint.
    pub fn remember(&self, call: &ToolCallRecord, decision: ApprovalDecision) {
        self.state
            .lock()
            .expect("inspector lock poisoned")
            .remembered
            .insert(Self::fingerprint(call), decision);
    }

    /// Forget every remembered decision.
    pub fn reset(&self) {
        self.state
            .lock()
            .expect("inspector lock poisoned")
            .remembered
            .clear();
    }

    /// Load rules from the attached store, replacing the current list.
    /// A store with nothing persisted leaves the seeded rules in place.
    ///
    /// # Errors
    ///
    /// Propagates the store failure; callers treat it as non-fatal.
    pub async fn load_from_store(&self) -> Result<usize, StoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let rules = store.load_rules().await?;
        if rules.is_empty() {
            return Ok(0);
        }
        let count = rules.len();
        self.state.lock().expect("inspector lock poisoned").rules = rules;
        Ok(count)
    }

    /// Persist the current rules to the attached store.
    ///
    /// # Errors
    ///
    /// Propagates the store failure; callers treat it as non-fatal.
    pub async fn save_to_store(&self) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let rules = self.rules();
        store.save_rules(&rules).await
    }
}

impl std::fmt::Debug for Inspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect("inspector lock poisoned");
        f.debug_struct("Inspector")
            .field("mode", &state.mode)
            .field("rules", &state.rules.len())
            .field("remembered", &state.remembered.len())
            .finish()
    }
}

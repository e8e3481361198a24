//! The narrow surface the resolver uses to suspend a lookup pending an
//! external agent's reply, and the wire message shapes the (out-of-scope)
//! event loop exchanges with the registered agent.
//!
//! The engine does not dispatch to agents and does not track in-flight
//! deferrals — that state lives entirely in the event loop. What the
//! engine needs is: a way to say "I can't decide this without an agent"
//! ([`DeferredOutcome`]), and a way to resume a decision once the agent
//! has replied ([`crate::storage::Storage::resume_check`]).

use uuid::Uuid;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::types::{PolicyKey, PolicyMetadata, PolicyType};

/// Enough of the traversal state for [`crate::storage::Storage::resume_check`]
/// to tell whether the policy that triggered the deferral is still
/// present, unchanged, by the time the agent replies.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AgentContext {
    /// The bucket whose matching policy produced the agent-typed result.
    pub source_bucket: String,
    /// The policy type that triggered the deferral, for staleness checks.
    pub plugin_type: PolicyType,
    /// The metadata that triggered the deferral, for staleness checks.
    pub plugin_metadata: PolicyMetadata,
}

/// A `check` that cannot produce a verdict without consulting an
/// out-of-process agent plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredOutcome {
    /// The non-predefined policy type that requires an agent.
    pub plugin_type: PolicyType,
    /// The opaque token for the plugin, from the matching policy's result.
    pub metadata: PolicyMetadata,
    /// The query that produced this deferral — passed back unchanged to
    /// `resume_check`.
    pub original_key: PolicyKey,
    /// Context needed to detect a stale reply: the pointing policy may
    /// have been deleted or changed between the deferral and the agent's
    /// response, in which case the reply is a no-op.
    pub agent_context: AgentContext,
    /// A fresh identifier for this particular deferral, handed to the
    /// event loop to correlate with the eventual `AgentActionResponse`.
    pub request_id: Uuid,
}

/// What the resolver ultimately produces for one `check`/`resume_check`
/// call: either a verdict, or a fresh deferral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Verdict(crate::types::PolicyResult),
    Deferred(DeferredOutcome),
}

/// Sent by the event loop to the registered agent for `plugin_type`, once
/// it decides to dispatch a [`DeferredOutcome`]. Defined here because the
/// engine's `request_id`/`plugin_type`/`key`/`metadata` are exactly the
/// fields a `DeferredOutcome` carries — the adapter only needs to lift
/// them onto the wire, which is out of scope for this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AgentActionRequest {
    pub request_id: Uuid,
    pub plugin_type: PolicyType,
    pub key: PolicyKey,
    pub metadata: PolicyMetadata,
}

/// The agent's reply, as handed back to [`crate::storage::Storage::resume_check`]
/// after the event loop turns it into a [`crate::types::PolicyResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AgentActionResponse {
    pub request_id: Uuid,
    pub result_type: PolicyType,
    pub result_metadata: PolicyMetadata,
}

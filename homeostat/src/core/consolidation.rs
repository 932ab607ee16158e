//! Parsing and merging of consolidation proposals.
//!
//! The reasoner is asked for exactly one JSON object but may wrap it in
//! prose. Extraction takes the text between the first `{` and the last `}`;
//! anything that fails to parse or validate is discarded as a whole.
//!
//! Merging never overwrites history: new ids are inserted only when absent,
//! and existing records change only through the explicit
//! `updated_capabilities` and `confidence_adjustments` channels.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::registry::{AntiPattern, Capability, CapabilityRegistry};

const PROPOSAL_SCHEMA: &str = include_str!("../../schemas/consolidation.schema.json");

static PROPOSAL_VALIDATOR: LazyLock<Option<Validator>> = LazyLock::new(|| {
    let schema: Value = serde_json::from_str(PROPOSAL_SCHEMA).ok()?;
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .ok()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConsolidationProposal {
    pub new_capabilities: Vec<NewCapability>,
    pub updated_capabilities: Vec<CapabilityUpdate>,
    pub new_anti_patterns: Vec<NewAntiPattern>,
    pub confidence_adjustments: Vec<ConfidenceAdjustment>,
    pub insights: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCapability {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

/// Edits to an existing capability. Absent fields are left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityUpdate {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAntiPattern {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mitigation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceAdjustment {
    pub id: String,
    pub new_confidence: f64,
    #[serde(default)]
    pub reason: String,
}

/// What a merge changed, for logging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub capabilities_added: Vec<String>,
    pub capabilities_updated: Vec<String>,
    pub anti_patterns_added: Vec<String>,
    pub confidence_adjusted: Vec<String>,
    /// Proposal entries that referenced unknown ids or collided with existing ones.
    pub ignored: usize,
}

impl MergeSummary {
    pub fn is_empty(&self) -> bool {
        self.capabilities_added.is_empty()
            && self.capabilities_updated.is_empty()
            && self.anti_patterns_added.is_empty()
            && self.confidence_adjusted.is_empty()
    }
}

/// The substring from the first `{` to the last `}` inclusive, if any.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Why a response was discarded. Only used for debug logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalRejection {
    NoObject,
    InvalidJson(String),
    SchemaViolation(Vec<String>),
    SchemaUnavailable,
    Decode(String),
}

/// Extract, parse, validate, and decode a proposal from raw reasoner output.
pub fn parse_proposal(text: &str) -> Result<ConsolidationProposal, ProposalRejection> {
    let raw = extract_json_object(text.trim()).ok_or(ProposalRejection::NoObject)?;
    let value: Value =
        serde_json::from_str(raw).map_err(|err| ProposalRejection::InvalidJson(err.to_string()))?;

    let validator = PROPOSAL_VALIDATOR
        .as_ref()
        .ok_or(ProposalRejection::SchemaUnavailable)?;
    let violations: Vec<String> = validator
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !violations.is_empty() {
        return Err(ProposalRejection::SchemaViolation(violations));
    }

    serde_json::from_value(value).map_err(|err| ProposalRejection::Decode(err.to_string()))
}

/// Merge a validated proposal into the registry.
pub fn apply_proposal(
    registry: &mut CapabilityRegistry,
    proposal: &ConsolidationProposal,
    now: DateTime<Utc>,
) -> MergeSummary {
    let mut summary = MergeSummary::default();

    for cap in &proposal.new_capabilities {
        let id = cap.id.trim();
        if id.is_empty() || registry.capabilities.contains_key(id) {
            summary.ignored += 1;
            continue;
        }
        registry.capabilities.insert(
            id.to_string(),
            Capability::learned(&cap.description, cap.tags.iter().cloned(), &cap.notes, now),
        );
        summary.capabilities_added.push(id.to_string());
    }

    for update in &proposal.updated_capabilities {
        let Some(cap) = registry.capabilities.get_mut(update.id.trim()) else {
            summary.ignored += 1;
            continue;
        };
        if let Some(description) = &update.description {
            cap.description.clone_from(description);
        }
        if let Some(notes) = &update.notes {
            cap.notes.clone_from(notes);
        }
        if let Some(tags) = &update.tags {
            cap.tags = tags.iter().cloned().collect();
        }
        summary.capabilities_updated.push(update.id.trim().to_string());
    }

    for ap in &proposal.new_anti_patterns {
        let id = ap.id.trim();
        if id.is_empty() || registry.anti_patterns.contains_key(id) {
            summary.ignored += 1;
            continue;
        }
        registry.anti_patterns.insert(
            id.to_string(),
            AntiPattern {
                description: ap.description.clone(),
                mitigation: ap.mitigation.clone(),
                times_observed: 1,
                first_observed: now,
            },
        );
        summary.anti_patterns_added.push(id.to_string());
    }

    for adj in &proposal.confidence_adjustments {
        let Some(cap) = registry.capabilities.get_mut(adj.id.trim()) else {
            summary.ignored += 1;
            continue;
        };
        cap.confidence = adj.new_confidence.clamp(0.0, 1.0);
        summary.confidence_adjusted.push(adj.id.trim().to_string());
    }

    summary
}

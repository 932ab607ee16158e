//! Prompt rendering for cycle, consolidation, and self-improvement invocations.
//!
//! Only the data placed into a prompt is fixed here; the wording lives in
//! the templates under `prompts/`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::experience::Experience;
use crate::core::registry::{AntiPattern, Capability, CapabilityRegistry, ExplorationLog, Experiment};
use crate::core::types::{HealthSnapshot, truncate_chars};
use crate::io::backlog::BacklogItem;
use crate::io::cycle_log::CycleLogSummary;

const CYCLE_TEMPLATE: &str = include_str!("prompts/cycle.md");
const CONSOLIDATION_TEMPLATE: &str = include_str!("prompts/consolidation.md");
const AUDIT_TEMPLATE: &str = include_str!("prompts/audit.md");
const IMPROVE_TEMPLATE: &str = include_str!("prompts/improve.md");

/// Capabilities listed in a cycle prompt, highest confidence first.
pub const PROMPT_CAPABILITIES: usize = 15;
const NOTE_CHARS: usize = 120;

/// Everything a cycle prompt is built from.
#[derive(Debug, Clone)]
pub struct CyclePromptInputs<'a> {
    pub cycle_count: u64,
    pub criticality: f64,
    pub recent_errors: usize,
    pub health: &'a HealthSnapshot,
    pub backlog: &'a [BacklogItem],
    pub recent_logs: &'a [CycleLogSummary],
    pub registry: &'a CapabilityRegistry,
    pub is_exploration: bool,
}

#[derive(Debug, Serialize)]
struct CapabilityLine {
    id: String,
    confidence_pct: u32,
    times_used: u64,
    notes: String,
}

#[derive(Debug, Serialize)]
struct AntiPatternLine {
    id: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct ExplorationContext<'a> {
    recent_experiments: &'a [Experiment],
}

/// Registry snapshot shared by the audit and improvement prompts.
#[derive(Debug, Serialize)]
struct ImprovementSnapshot<'a> {
    cycle: u64,
    capabilities: &'a BTreeMap<String, Capability>,
    anti_patterns: &'a BTreeMap<String, AntiPattern>,
    recent_experiences: &'a [Experience],
    exploration_log: &'a ExplorationLog,
}

#[derive(Debug, Serialize)]
struct Situation {
    cycle: u64,
    criticality: f64,
    errors: usize,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("cycle", CYCLE_TEMPLATE)
            .context("load cycle template")?;
        env.add_template("consolidation", CONSOLIDATION_TEMPLATE)
            .context("load consolidation template")?;
        env.add_template("audit", AUDIT_TEMPLATE)
            .context("load audit template")?;
        env.add_template("improve", IMPROVE_TEMPLATE)
            .context("load improve template")?;
        Ok(Self { env })
    }

    pub fn render_cycle(&self, input: &CyclePromptInputs<'_>) -> Result<String> {
        let registry = input.registry;
        let capabilities: Vec<CapabilityLine> = registry
            .ids_by_confidence()
            .into_iter()
            .take(PROMPT_CAPABILITIES)
            .filter_map(|id| {
                let cap = registry.capabilities.get(id)?;
                let notes = if cap.notes.trim().is_empty() {
                    &cap.description
                } else {
                    &cap.notes
                };
                Some(CapabilityLine {
                    id: id.to_string(),
                    confidence_pct: (cap.confidence * 100.0).round() as u32,
                    times_used: cap.times_used,
                    notes: truncate_chars(notes, NOTE_CHARS),
                })
            })
            .collect();
        let anti_patterns: Vec<AntiPatternLine> = registry
            .anti_patterns
            .iter()
            .map(|(id, ap)| {
                let text = if ap.mitigation.trim().is_empty() {
                    &ap.description
                } else {
                    &ap.mitigation
                };
                AntiPatternLine {
                    id: id.clone(),
                    text: truncate_chars(text, NOTE_CHARS),
                }
            })
            .collect();
        let exploration = input.is_exploration.then(|| ExplorationContext {
            recent_experiments: &registry.exploration_log.recent_experiments,
        });

        let situation = serde_json::to_string(&Situation {
            cycle: input.cycle_count,
            criticality: input.criticality,
            errors: input.recent_errors,
        })?;
        let health = serde_json::to_string(input.health)?;
        let tasks = if input.backlog.is_empty() {
            None
        } else {
            Some(serde_json::to_string(input.backlog)?)
        };
        let recent = if input.recent_logs.is_empty() {
            None
        } else {
            Some(serde_json::to_string(input.recent_logs)?)
        };

        let mut instruction = if input.backlog.is_empty() {
            "No tasks. Follow HEARTBEAT.md.".to_string()
        } else {
            "Pick highest-value actionable task.".to_string()
        };
        if !capabilities.is_empty() && !input.is_exploration {
            instruction.push_str(" Prefer tasks matching high-confidence capabilities.");
        }

        let template = self.env.get_template("cycle")?;
        let rendered = template.render(context! {
            capabilities => capabilities,
            anti_patterns => anti_patterns,
            exploration => exploration,
            situation => situation,
            health => health,
            tasks => tasks,
            recent => recent,
            instruction => instruction,
        })?;
        debug!(bytes = rendered.len(), "rendered cycle prompt");
        Ok(rendered)
    }

    pub fn render_consolidation(
        &self,
        experiences: &[Experience],
        registry: &CapabilityRegistry,
    ) -> Result<String> {
        let template = self.env.get_template("consolidation")?;
        let rendered = template.render(context! {
            experience_count => experiences.len(),
            experiences => serde_json::to_string_pretty(experiences)?,
            capabilities => serde_json::to_string_pretty(&registry.capabilities)?,
            anti_patterns => serde_json::to_string_pretty(&registry.anti_patterns)?,
        })?;
        debug!(bytes = rendered.len(), "rendered consolidation prompt");
        Ok(rendered)
    }

    pub fn render_audit(
        &self,
        cycle: u64,
        experiences: &[Experience],
        registry: &CapabilityRegistry,
    ) -> Result<String> {
        let template = self.env.get_template("audit")?;
        let rendered = template.render(context! {
            cycle => cycle,
            context => improvement_context(cycle, experiences, registry)?,
        })?;
        debug!(bytes = rendered.len(), "rendered audit prompt");
        Ok(rendered)
    }

    pub fn render_improve(
        &self,
        cycle: u64,
        findings: &str,
        branch: &str,
        experiences: &[Experience],
        registry: &CapabilityRegistry,
    ) -> Result<String> {
        let template = self.env.get_template("improve")?;
        let rendered = template.render(context! {
            cycle => cycle,
            findings => findings,
            branch => branch,
            context => improvement_context(cycle, experiences, registry)?,
        })?;
        debug!(bytes = rendered.len(), "rendered improve prompt");
        Ok(rendered)
    }
}

fn improvement_context(
    cycle: u64,
    experiences: &[Experience],
    registry: &CapabilityRegistry,
) -> Result<String> {
    Ok(serde_json::to_string_pretty(&ImprovementSnapshot {
        cycle,
        capabilities: &registry.capabilities,
        anti_patterns: &registry.anti_patterns,
        recent_experiences: experiences,
        exploration_log: &registry.exploration_log,
    })?)
}

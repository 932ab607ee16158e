//! Cycle-level harness tests for full homeostat lifecycle scenarios.
//!
//! These tests drive `run_cycle_at` against an initialized temp workspace
//! with a scripted reasoner and fixed telemetry, then inspect the persisted
//! state, registry, experience log, and cycle logs.

use std::fs;

use chrono::{DateTime, TimeDelta, Utc};
use rand::rngs::mock::StepRng;

use homeostat::consolidate::{ConsolidationOutcome, run_consolidation};
use homeostat::core::experience::MAX_EXPERIENCES;
use homeostat::core::types::{ErrorRecord, HealthSnapshot};
use homeostat::cycle::{CycleStatus, run_cycle_at};
use homeostat::improve::ImprovementOutcome;
use homeostat::io::atomic::temp_path;
use homeostat::io::config::{load_config, write_config};
use homeostat::io::cycle_log::cycle_log_path;
use homeostat::io::experience_store::{append_experience, load_experiences};
use homeostat::io::lock::{CycleLock, CycleLockedError};
use homeostat::io::reasoner::ReasonerResponse;
use homeostat::io::registry_store::{load_registry, write_registry};
use homeostat::io::state_store::{load_state, write_state};
use homeostat::test_support::{
    FixedTelemetry, ScriptedReasoner, TestWorkspace, capability, experience, fixed_now,
};

/// Random source whose `gen_bool` always answers false (never explores).
fn never_explore() -> StepRng {
    StepRng::new(u64::MAX, 0)
}

/// Random source whose `gen_bool` always answers true for any positive rate.
fn always_explore() -> StepRng {
    StepRng::new(0, 0)
}

fn calm_health() -> FixedTelemetry {
    FixedTelemetry(HealthSnapshot {
        disk_used_pct: Some(50.0),
        mem_available_mb: Some(2000),
        pending_tasks: 2,
        scheduler_ok: true,
    })
}

fn at(minutes: i64) -> DateTime<Utc> {
    fixed_now() + TimeDelta::minutes(minutes)
}

/// Successful cycle: counter advances, session is carried forward, the
/// matching capability is credited, and the cycle log is written.
#[test]
fn successful_cycles_update_state_registry_and_logs() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.add_task("inbox-1", "Triage the inbox").expect("task");
    let mut registry = load_registry(&ws.paths.registry_path);
    registry
        .capabilities
        .insert("email-triage".to_string(), capability(&["inbox"], 0.5));
    write_registry(&ws.paths.registry_path, &registry).expect("write registry");

    let reasoner = ScriptedReasoner::new(vec![
        ScriptedReasoner::success("Processed the inbox and archived 12 threads"),
        ScriptedReasoner::success("Refactored the backup script"),
    ]);

    let first = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(1))
        .expect("cycle 1");
    assert_eq!(first.cycle_count, 1);
    assert_eq!(first.criticality, 0.5);
    match &first.status {
        CycleStatus::Completed {
            success,
            explored,
            credited,
            consolidation,
            ..
        } => {
            assert!(*success);
            assert!(!*explored);
            assert_eq!(credited.as_deref(), Some("email-triage"));
            assert!(consolidation.is_none());
        }
        other => panic!("unexpected status {other:?}"),
    }

    let second = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(6))
        .expect("cycle 2");
    assert_eq!(second.cycle_count, 2);

    let state = load_state(&ws.paths.state_path, at(6));
    assert_eq!(state.cycle_count, 2);
    assert!(state.errors.is_empty());
    assert_eq!(state.last_session_id.as_deref(), Some("session-1"));
    assert_eq!(state.updated, Some(at(6)));
    assert!(state.health.is_some());

    let requests = reasoner.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].resume_session.is_none());
    assert_eq!(requests[1].resume_session.as_deref(), Some("session-1"));
    assert_eq!(requests[0].model, "opus");
    assert!(requests[0].prompt.contains("Triage the inbox"));

    let registry = load_registry(&ws.paths.registry_path);
    let triage = &registry.capabilities["email-triage"];
    assert_eq!(triage.times_used, 1);
    assert_eq!(triage.times_succeeded, 1);
    assert!(triage.confidence > 0.5);

    let experiences = load_experiences(&ws.paths.experiences_path, MAX_EXPERIENCES);
    let cycles: Vec<u64> = experiences.iter().map(|e| e.cycle).collect();
    assert_eq!(cycles, vec![1, 2]);

    assert!(cycle_log_path(&ws.paths.logs_dir, 1).is_file());
    assert!(cycle_log_path(&ws.paths.logs_dir, 2).is_file());
    assert!(!ws.paths.lock_path.exists());
}

/// Two failures in a row trip backoff; the gate skips without invoking the
/// reasoner until the cooldown has elapsed.
#[test]
fn repeated_failures_trigger_backoff_then_recover() {
    let ws = TestWorkspace::new().expect("workspace");
    let reasoner = ScriptedReasoner::from_results(vec![
        Ok(ReasonerResponse::failure("opus", "Timeout (300s)")),
        Err(anyhow::anyhow!("spawn claude: No such file or directory")),
        Ok(ScriptedReasoner::success("recovered")),
    ]);

    for minutes in [0, 1] {
        let outcome =
            run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(minutes))
                .expect("failed cycle");
        assert!(matches!(
            outcome.status,
            CycleStatus::Completed { success: false, .. }
        ));
        assert_eq!(outcome.cycle_count, 0);
    }
    let state = load_state(&ws.paths.state_path, at(1));
    assert_eq!(state.errors.len(), 2);
    assert_eq!(state.errors[0].message, "Timeout (300s)");

    let skipped = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(5))
        .expect("skip");
    match skipped.status {
        CycleStatus::BackoffSkipped {
            recent_failures,
            remaining_secs,
        } => {
            assert_eq!(recent_failures, 2);
            assert_eq!(remaining_secs, 6 * 60);
        }
        other => panic!("expected backoff, got {other:?}"),
    }
    assert_eq!(reasoner.requests().len(), 2);

    let recovered =
        run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(12))
            .expect("recovered");
    assert_eq!(recovered.cycle_count, 1);
    let state = load_state(&ws.paths.state_path, at(12));
    assert!(state.errors.is_empty());

    // Failed attempts are still remembered as experiences for the attempted cycle.
    let experiences = load_experiences(&ws.paths.experiences_path, MAX_EXPERIENCES);
    let outcomes: Vec<(u64, bool)> = experiences.iter().map(|e| (e.cycle, e.success)).collect();
    assert_eq!(outcomes, vec![(1, false), (1, false), (1, true)]);
}

/// Reaching the consolidation interval triggers a review with the cheaper model.
#[test]
fn consolidation_runs_on_interval_boundary() {
    let ws = TestWorkspace::new().expect("workspace");
    let mut state = load_state(&ws.paths.state_path, fixed_now());
    state.cycle_count = 9;
    write_state(&ws.paths.state_path, &state).expect("write state");

    let reasoner = ScriptedReasoner::new(vec![
        ScriptedReasoner::success("Deployed the site with make deploy"),
        ScriptedReasoner::success(
            r#"{"new_capabilities": [{"id": "deploy-site", "description": "Deploy the static site", "tags": ["deploy"]}],
                "new_anti_patterns": [{"id": "force-push", "description": "force pushing main", "mitigation": "open a branch"}],
                "insights": "deploys are reliable"}"#,
        ),
    ]);

    let outcome = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(1))
        .expect("cycle");
    assert_eq!(outcome.cycle_count, 10);
    let CycleStatus::Completed {
        consolidation: Some(ConsolidationOutcome::Merged(summary)),
        ..
    } = &outcome.status
    else {
        panic!("expected merged consolidation, got {:?}", outcome.status);
    };
    assert_eq!(summary.capabilities_added, vec!["deploy-site"]);
    assert_eq!(summary.anti_patterns_added, vec!["force-push"]);

    let requests = reasoner.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].model, "haiku");
    assert!(requests[1].resume_session.is_none());

    let registry = load_registry(&ws.paths.registry_path);
    assert!(registry.capabilities.contains_key("deploy-site"));
    assert_eq!(registry.anti_patterns["force-push"].times_observed, 1);
}

/// A malformed consolidation response is dropped and the registry file is untouched.
#[test]
fn malformed_consolidation_leaves_registry_identical() {
    let ws = TestWorkspace::new().expect("workspace");
    let mut registry = load_registry(&ws.paths.registry_path);
    registry
        .capabilities
        .insert("email-triage".to_string(), capability(&["inbox"], 0.7));
    write_registry(&ws.paths.registry_path, &registry).expect("write registry");
    append_experience(&ws.paths.experiences_path, MAX_EXPERIENCES, experience(1, true, false))
        .expect("append");
    let before = fs::read_to_string(&ws.paths.registry_path).expect("read");

    let reasoner = ScriptedReasoner::new(vec![ScriptedReasoner::success(
        r#"{"new_capabilities": [{"id": "deploy-site", "description": "Deploy"}]"#,
    )]);
    let outcome = run_consolidation(ws.root(), &reasoner, at(1)).expect("consolidate");

    assert!(matches!(outcome, ConsolidationOutcome::Discarded { .. }));
    let after = fs::read_to_string(&ws.paths.registry_path).expect("read");
    assert_eq!(before, after);
}

/// Calm host, no errors, recent activity: criticality sits at 0.5.
#[test]
fn calm_host_estimates_viable_criticality() {
    let ws = TestWorkspace::new().expect("workspace");
    let mut state = load_state(&ws.paths.state_path, fixed_now());
    state.updated = Some(fixed_now());
    write_state(&ws.paths.state_path, &state).expect("write state");

    let reasoner = ScriptedReasoner::new(vec![ScriptedReasoner::success("checked disks")]);
    let outcome = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(1))
        .expect("cycle");
    assert_eq!(outcome.criticality, 0.5);
}

/// Saturated errors plus a missing scheduler push criticality to zero and
/// suppress exploration even with a random source that would explore.
#[test]
fn chaotic_host_pins_criticality_to_zero_and_never_explores() {
    let ws = TestWorkspace::new().expect("workspace");
    let mut state = load_state(&ws.paths.state_path, fixed_now());
    // Old enough that the backoff cooldown (5 min per failure) has elapsed.
    state.errors = (30..35)
        .map(|m| ErrorRecord::new(fixed_now() - TimeDelta::minutes(m), format!("err {m}")))
        .collect();
    write_state(&ws.paths.state_path, &state).expect("write state");

    let telemetry = FixedTelemetry(HealthSnapshot {
        scheduler_ok: false,
        ..calm_health().0
    });
    let reasoner = ScriptedReasoner::new(vec![ScriptedReasoner::success("restarted cron")]);
    let outcome = run_cycle_at(ws.root(), &reasoner, &telemetry, &mut always_explore(), fixed_now())
        .expect("cycle");

    assert_eq!(outcome.criticality, 0.0);
    assert!(matches!(
        outcome.status,
        CycleStatus::Completed {
            explored: false,
            ..
        }
    ));
    assert!(!reasoner.requests()[0].prompt.contains("Exploration Cycle"));
}

/// Exploration cycles log an experiment in the registry.
#[test]
fn exploration_cycle_records_experiment() {
    let ws = TestWorkspace::new().expect("workspace");
    let reasoner = ScriptedReasoner::new(vec![ScriptedReasoner::success(
        "Tried summarizing RSS feeds\nworked fine",
    )]);
    let outcome = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut always_explore(), at(1))
        .expect("cycle");
    assert!(matches!(
        outcome.status,
        CycleStatus::Completed { explored: true, .. }
    ));

    let registry = load_registry(&ws.paths.registry_path);
    let experiments = &registry.exploration_log.recent_experiments;
    assert_eq!(experiments.len(), 1);
    assert_eq!(experiments[0].cycle, 1);
    assert_eq!(experiments[0].hypothesis, "Tried summarizing RSS feeds");
    assert_eq!(experiments[0].result, "succeeded");
    assert!(reasoner.requests()[0].prompt.contains("Exploration Cycle"));
}

/// No tasks and no heartbeat: the cycle idles without calling the reasoner.
#[test]
fn empty_backlog_without_heartbeat_idles() {
    let ws = TestWorkspace::new().expect("workspace");
    ws.remove_heartbeat().expect("remove heartbeat");
    let reasoner = ScriptedReasoner::new(Vec::new());

    let outcome = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(1))
        .expect("cycle");

    assert_eq!(outcome.status, CycleStatus::Idle);
    assert!(reasoner.requests().is_empty());
    let state = load_state(&ws.paths.state_path, at(1));
    assert_eq!(state.cycle_count, 0);
    assert_eq!(state.updated, Some(at(1)));
}

/// A fresh lock held by another run refuses the cycle with a typed error.
#[test]
fn held_lock_refuses_cycle() {
    let ws = TestWorkspace::new().expect("workspace");
    let _held =
        CycleLock::acquire(&ws.paths.lock_path, TimeDelta::hours(1), fixed_now()).expect("lock");
    let reasoner = ScriptedReasoner::new(vec![ScriptedReasoner::success("unused")]);

    let err = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(1))
        .expect_err("locked");

    assert!(err.downcast_ref::<CycleLockedError>().is_some());
    assert!(reasoner.requests().is_empty());
    let state = load_state(&ws.paths.state_path, at(1));
    assert_eq!(state.updated, None);
}

/// A state file that cannot be written fails the cycle instead of being skipped.
#[test]
fn state_write_failure_is_an_error() {
    let ws = TestWorkspace::new().expect("workspace");
    // A directory where the temp file should go blocks the atomic write
    // even for root, which ignores read-only permissions.
    fs::create_dir(temp_path(&ws.paths.state_path)).expect("block temp path");

    let reasoner = ScriptedReasoner::new(vec![ScriptedReasoner::success("did the work")]);
    let err = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(1))
        .unwrap_err();

    assert!(format!("{err:#}").contains("state.json"));
    assert!(err.downcast_ref::<CycleLockedError>().is_none());
    assert!(!ws.paths.lock_path.exists());
}

/// Corrupt state and registry files fall back to defaults and are rewritten.
#[test]
fn corrupt_state_and_registry_start_from_defaults() {
    let ws = TestWorkspace::new().expect("workspace");
    fs::write(&ws.paths.state_path, "{\"cycle_count\": ").expect("corrupt state");
    fs::write(&ws.paths.registry_path, "not json at all").expect("corrupt registry");

    let reasoner = ScriptedReasoner::new(vec![ScriptedReasoner::success("did the work")]);
    let outcome = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(1))
        .expect("cycle");

    assert_eq!(outcome.cycle_count, 1);
    assert!(matches!(
        outcome.status,
        CycleStatus::Completed { success: true, .. }
    ));
    let state = load_state(&ws.paths.state_path, at(2));
    assert_eq!(state.cycle_count, 1);
    let registry_text = fs::read_to_string(&ws.paths.registry_path).expect("read registry");
    assert!(serde_json::from_str::<serde_json::Value>(&registry_text).is_ok());
}

/// A failure on an interval boundary does not consolidate.
#[test]
fn failed_cycle_on_interval_boundary_skips_consolidation() {
    let ws = TestWorkspace::new().expect("workspace");
    let mut state = load_state(&ws.paths.state_path, fixed_now());
    state.cycle_count = 10;
    write_state(&ws.paths.state_path, &state).expect("write state");

    let reasoner = ScriptedReasoner::new(vec![ReasonerResponse::failure("opus", "rate limited")]);
    let outcome = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(1))
        .expect("cycle");

    assert_eq!(outcome.cycle_count, 10);
    assert!(matches!(
        outcome.status,
        CycleStatus::Completed {
            success: false,
            consolidation: None,
            improvement: None,
            ..
        }
    ));
    assert_eq!(reasoner.requests().len(), 1);
}

/// Enabled self-improvement outside a git checkout is skipped without extra invocations.
#[test]
fn self_improvement_outside_git_is_skipped() {
    let ws = TestWorkspace::new().expect("workspace");
    let mut cfg = load_config(&ws.paths.config_path).expect("config");
    cfg.improve.enabled = true;
    write_config(&ws.paths.config_path, &cfg).expect("write config");
    let mut state = load_state(&ws.paths.state_path, fixed_now());
    state.cycle_count = 9;
    write_state(&ws.paths.state_path, &state).expect("write state");

    let reasoner = ScriptedReasoner::new(vec![
        ScriptedReasoner::success("did the work"),
        ScriptedReasoner::success(r#"{"insights": "steady"}"#),
    ]);
    let outcome = run_cycle_at(ws.root(), &reasoner, &calm_health(), &mut never_explore(), at(1))
        .expect("cycle");

    let CycleStatus::Completed {
        consolidation: Some(_),
        improvement: Some(ImprovementOutcome::Skipped { .. }),
        ..
    } = &outcome.status
    else {
        panic!("expected skipped improvement, got {:?}", outcome.status);
    };
    assert_eq!(reasoner.requests().len(), 2);
}

//! Tests for zone shutdown orchestration
//!
//! Bucket computation is pure and pinned exactly; plan execution is tested
//! with an injected stopper so no zones are harmed.

use crate::orchestrator::{
    calculate_shutdown_order, calculate_startup_order, execute_shutdown_plan, parse_priority_attr,
    priority_range, FailureAction, PlanConfig, PriorityGroup, Strategy, ZoneStopper,
    DEFAULT_ZONE_PRIORITY,
};
use crate::task_zone::parse_zoneadm_list;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn zones(list: &[(&str, i32)]) -> Vec<(String, String, i32)> {
    list.iter()
        .map(|(name, priority)| (name.to_string(), "running".to_string(), *priority))
        .collect()
}

fn group_summary(groups: &[PriorityGroup]) -> Vec<(i32, Vec<String>)> {
    groups
        .iter()
        .map(|g| {
            (
                g.range,
                g.zones.iter().map(|z| z.name.clone()).collect::<Vec<_>>(),
            )
        })
        .collect()
}

/// Stopper that records call order and fails on request.
#[derive(Clone)]
struct RecordingStopper {
    calls: Arc<Mutex<Vec<(String, tokio::time::Instant)>>>,
    failing: HashSet<String>,
}

impl RecordingStopper {
    fn new(failing: &[&str]) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            failing: failing.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn call_order(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn call_times(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }
}

impl ZoneStopper for RecordingStopper {
    async fn stop_zone(&self, zone: &str, _timeout: Duration) -> Result<(), String> {
        self.calls
            .lock()
            .unwrap()
            .push((zone.to_string(), tokio::time::Instant::now()));
        if self.failing.contains(zone) {
            Err(format!("simulated failure stopping {}", zone))
        } else {
            Ok(())
        }
    }
}

fn plan_config(strategy: Strategy, failure_action: FailureAction, delay_secs: u64) -> PlanConfig {
    PlanConfig {
        strategy,
        failure_action,
        priority_delay: Duration::from_secs(delay_secs),
        zone_timeout: Duration::from_secs(120),
    }
}

#[test]
fn test_priority_range_buckets() {
    assert_eq!(priority_range(1), 10);
    assert_eq!(priority_range(10), 10);
    assert_eq!(priority_range(11), 20);
    assert_eq!(priority_range(15), 20);
    assert_eq!(priority_range(95), 100);
    assert_eq!(priority_range(100), 100);
    // Out-of-range values clamp into [1, 100].
    assert_eq!(priority_range(0), 10);
    assert_eq!(priority_range(-3), 10);
    assert_eq!(priority_range(150), 100);
}

#[test]
fn test_shutdown_order_buckets_and_sorts() {
    let groups =
        calculate_shutdown_order(&zones(&[("a", 10), ("b", 15), ("c", 95), ("d", 95)]));
    assert_eq!(
        group_summary(&groups),
        vec![
            (10, vec!["a".to_string()]),
            (20, vec!["b".to_string()]),
            (100, vec!["c".to_string(), "d".to_string()]),
        ]
    );
}

#[test]
fn test_startup_order_is_reverse_of_shutdown() {
    let input = zones(&[("a", 10), ("b", 15), ("c", 95), ("d", 95)]);
    let shutdown = calculate_shutdown_order(&input);
    let startup = calculate_startup_order(&input);

    let mut reversed = shutdown.clone();
    reversed.reverse();
    assert_eq!(startup, reversed);
    assert_eq!(startup.first().unwrap().range, 100);
}

#[test]
fn test_priority_attr_parsing() {
    let output = "attr:\n\tname: boot_priority\n\ttype: string\n\tvalue: 30\n";
    assert_eq!(parse_priority_attr(output), Some(30));

    let quoted = "attr:\n\tname: boot_priority\n\ttype: string\n\tvalue: \"7\"\n";
    assert_eq!(parse_priority_attr(quoted), Some(7));

    // Out-of-range and garbage values mean "unset", which callers turn
    // into the default priority.
    let out_of_range = "attr:\n\tvalue: 150\n";
    assert_eq!(parse_priority_attr(out_of_range), None);
    assert_eq!(parse_priority_attr("attr:\n\tvalue: soon\n"), None);
    assert_eq!(parse_priority_attr(""), None);
    assert_eq!(DEFAULT_ZONE_PRIORITY, 95);
}

#[test]
fn test_parse_zoneadm_list() {
    let output = "\
0:global:running:/::ipkg:shared
1:web01:running:/zones/web01:abc-123:ipkg:excl
-:db01:installed:/zones/db01:def-456:lipkg:excl
garbage line without fields
";
    let records = parse_zoneadm_list(output);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].name, "global");
    assert_eq!(records[1].name, "web01");
    assert_eq!(records[1].state, "running");
    assert_eq!(records[1].brand, "ipkg");
    assert_eq!(records[2].state, "installed");
    assert_eq!(records[2].id, None);
}

#[tokio::test]
async fn test_plan_executes_buckets_in_order() {
    let stopper = RecordingStopper::new(&[]);
    let groups = calculate_shutdown_order(&zones(&[("a", 10), ("b", 50), ("c", 95)]));
    let config = plan_config(Strategy::ParallelByPriority, FailureAction::Continue, 0);

    let report = execute_shutdown_plan(&stopper, &groups, &config).await;
    assert!(report.success);
    assert_eq!(stopper.call_order(), vec!["a", "b", "c"]);
    assert_eq!(
        report.zones_stopped,
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    );
    assert!(report.zones_failed.is_empty());
}

#[tokio::test]
async fn test_abort_stops_before_later_buckets() {
    let stopper = RecordingStopper::new(&["a"]);
    let groups = calculate_shutdown_order(&zones(&[("a", 10), ("b", 50), ("c", 95)]));
    let config = plan_config(Strategy::ParallelByPriority, FailureAction::Abort, 0);

    let report = execute_shutdown_plan(&stopper, &groups, &config).await;
    assert!(!report.success);
    assert!(report.zones_stopped.is_empty());
    assert_eq!(report.zones_failed.len(), 1);
    assert_eq!(report.zones_failed[0].zone, "a");
    // b and c were never touched.
    assert_eq!(stopper.call_order(), vec!["a"]);
}

#[tokio::test]
async fn test_continue_keeps_stopping_after_failure() {
    let stopper = RecordingStopper::new(&["a"]);
    let groups = calculate_shutdown_order(&zones(&[("a", 10), ("b", 50), ("c", 95)]));
    let config = plan_config(Strategy::ParallelByPriority, FailureAction::Continue, 0);

    let report = execute_shutdown_plan(&stopper, &groups, &config).await;
    assert!(!report.success);
    assert_eq!(
        report.zones_stopped,
        vec!["b".to_string(), "c".to_string()]
    );
    assert_eq!(report.zones_failed[0].zone, "a");
    assert_eq!(stopper.call_order(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_same_bucket_zones_all_stopped() {
    let stopper = RecordingStopper::new(&[]);
    let groups = calculate_shutdown_order(&zones(&[("c", 95), ("d", 95)]));
    assert_eq!(groups.len(), 1);
    let config = plan_config(Strategy::ParallelByPriority, FailureAction::Continue, 0);

    let report = execute_shutdown_plan(&stopper, &groups, &config).await;
    assert!(report.success);
    let mut stopped = report.zones_stopped.clone();
    stopped.sort();
    assert_eq!(stopped, vec!["c".to_string(), "d".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_priority_delay_between_buckets() {
    let stopper = RecordingStopper::new(&[]);
    let groups = calculate_shutdown_order(&zones(&[("a", 10), ("b", 50), ("c", 95)]));
    let config = plan_config(Strategy::ParallelByPriority, FailureAction::Continue, 5);

    let report = execute_shutdown_plan(&stopper, &groups, &config).await;
    assert!(report.success);

    let times = stopper.call_times();
    assert_eq!(times.len(), 3);
    // No delay before the first bucket, five seconds before each later one.
    assert!(times[1] - times[0] >= Duration::from_secs(5));
    assert!(times[2] - times[1] >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_staggered_strategy_spaces_zones_within_bucket() {
    let stopper = RecordingStopper::new(&[]);
    let groups = calculate_shutdown_order(&zones(&[("c", 95), ("d", 95)]));
    let config = plan_config(Strategy::Staggered, FailureAction::Continue, 0);

    let report = execute_shutdown_plan(&stopper, &groups, &config).await;
    assert!(report.success);

    let times = stopper.call_times();
    assert_eq!(times.len(), 2);
    assert!(times[1] - times[0] >= Duration::from_secs(2));
}

#[tokio::test]
async fn test_sequential_abort_skips_rest_of_bucket() {
    let stopper = RecordingStopper::new(&["c"]);
    let groups = calculate_shutdown_order(&zones(&[("c", 95), ("d", 95)]));
    let config = plan_config(Strategy::Sequential, FailureAction::Abort, 0);

    let report = execute_shutdown_plan(&stopper, &groups, &config).await;
    assert!(!report.success);
    // Bucket order is insertion order: c first, and d is never reached.
    assert_eq!(stopper.call_order(), vec!["c"]);
    assert!(report.zones_stopped.is_empty());
}

#[test]
fn test_strategy_and_failure_action_parsing() {
    assert_eq!(Strategy::parse("sequential"), Some(Strategy::Sequential));
    assert_eq!(
        Strategy::parse("parallel_by_priority"),
        Some(Strategy::ParallelByPriority)
    );
    assert_eq!(Strategy::parse("staggered"), Some(Strategy::Staggered));
    assert_eq!(Strategy::parse("warp"), None);

    assert_eq!(FailureAction::parse("abort"), Some(FailureAction::Abort));
    assert_eq!(
        FailureAction::parse("continue"),
        Some(FailureAction::Continue)
    );
    assert_eq!(FailureAction::parse("retry"), None);
}

#[test]
fn test_plan_config_overrides_beat_section_defaults() {
    let section = shared::config::OrchestrationSection::default();
    let config = PlanConfig::from_section(&section, Some("sequential"), Some("abort"), Some(0), Some(30));
    assert_eq!(config.strategy, Strategy::Sequential);
    assert_eq!(config.failure_action, FailureAction::Abort);
    assert_eq!(config.priority_delay, Duration::from_secs(0));
    assert_eq!(config.zone_timeout, Duration::from_secs(30));

    let defaults = PlanConfig::from_section(&section, None, None, None, None);
    assert_eq!(defaults.strategy, Strategy::ParallelByPriority);
    assert_eq!(defaults.failure_action, FailureAction::Continue);
}

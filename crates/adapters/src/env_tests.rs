// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

fn get<'a>(env: &'a [(String, String)], name: &str) -> Option<&'a str> {
    env.iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
}

#[test]
fn base_vars_are_relayed() {
    // PATH is always set in a test environment
    let env = curated_env(&[], &BTreeMap::new());
    assert!(get(&env, "PATH").is_some());
}

#[test]
fn telemetry_suppression_is_always_set() {
    let env = curated_env(&[], &BTreeMap::new());
    assert_eq!(get(&env, "DISABLE_TELEMETRY"), Some("1"));
    assert_eq!(get(&env, "DO_NOT_TRACK"), Some("1"));
}

#[test]
#[serial]
fn host_env_is_dropped_by_default() {
    // Set a variable that is definitely in the host env of this test
    std::env::set_var("WAVE_TEST_LEAKY_VAR", "leak");
    let env = curated_env(&[], &BTreeMap::new());
    assert!(get(&env, "WAVE_TEST_LEAKY_VAR").is_none());
    std::env::remove_var("WAVE_TEST_LEAKY_VAR");
}

#[test]
#[serial]
fn passthrough_relays_only_present_vars() {
    std::env::set_var("WAVE_TEST_PASSED", "yes");
    let passthrough = vec![
        "WAVE_TEST_PASSED".to_string(),
        "WAVE_TEST_ABSENT".to_string(),
    ];
    let env = curated_env(&passthrough, &BTreeMap::new());
    assert_eq!(get(&env, "WAVE_TEST_PASSED"), Some("yes"));
    // Never fabricated when the host doesn't have it
    assert!(get(&env, "WAVE_TEST_ABSENT").is_none());
    std::env::remove_var("WAVE_TEST_PASSED");
}

#[test]
fn step_env_wins_over_everything() {
    let step_env: BTreeMap<String, String> =
        [("DISABLE_TELEMETRY".to_string(), "0".to_string())].into();
    let env = curated_env(&[], &step_env);
    assert_eq!(get(&env, "DISABLE_TELEMETRY"), Some("0"));
    // No duplicate entries
    assert_eq!(
        env.iter().filter(|(k, _)| k == "DISABLE_TELEMETRY").count(),
        1
    );
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn default_turn_config() {
    let config = TurnConfig::default();
    assert!(config.parallel_tools);
    assert_eq!(config.max_batch_size, 32);
    assert_eq!(config.exploratory_gentle, 3);
    assert_eq!(config.exploratory_stern, 5);
    assert!(config.todo_tools.contains("todo_write"));
    assert_eq!(config.main_agent, "main");
}

#[test]
fn permission_denied_display() {
    let denied = PermissionDenied::new("user rejected the write");
    assert_eq!(denied.to_string(), "Permission denied: user rejected the write");
}

#[test]
fn cycle_map_carries_global_slot() {
    let mut cycles = CycleMap::new();
    cycles.insert("call-1".to_string(), CycleInfo::new("same read repeated"));
    cycles.insert(GLOBAL_PATTERN_KEY.to_string(), CycleInfo::new("edit/revert loop"));
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles[GLOBAL_PATTERN_KEY].warning, "edit/revert loop");
}

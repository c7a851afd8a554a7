//! Shared imports for spec modules.

pub use axle_core::{EventKind, PluginName, ToolDescriptor};
pub use axle_orchestrator::support::{call, Harness, StaticPermissions, TestTool};
pub use std::time::Duration;

/// Poll until `check` passes or `max` elapses.
pub async fn wait_for(max: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + max;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

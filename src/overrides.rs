/// External-write override controller
///
/// Reconciles operator intent ("this register must hold the value the client
/// wrote") with continuous generators. The server calls `on_remote_write`
/// after every store write with `ValueSource::RemoteWrite`; simulation and
/// manual writes never arrive here.
///
/// Per-point state machine: `Idle -> HoldCounting(n) -> Idle`. A hold timer
/// is a small task tied to the device's root token; it exits promptly on
/// device stop, when a newer hold replaces it, or when the operator changes
/// the generator kind manually.

use std::sync::Arc;
use std::time::Duration;

use log::debug;
use tokio::time::sleep;

use crate::device::{DeviceRuntime, HoldHandle};
use crate::point::{GeneratorKind, OverrideMode, PointDefinition};

/// Fallback hold duration when the definition does not carry one
pub const DEFAULT_HOLD_SECONDS: u64 = 10;

/// Apply a point's override policy after a remote write
pub fn on_remote_write(runtime: &Arc<DeviceRuntime>, def: &PointDefinition) {
    match def.override_mode {
        OverrideMode::None => {}
        OverrideMode::ForceStatic => force_static(runtime, def),
        OverrideMode::HoldForSeconds => {
            let seconds = def.override_duration_seconds.unwrap_or(DEFAULT_HOLD_SECONDS);
            start_hold(runtime, def, seconds);
        }
    }
}

/// Flip the generator to static permanently
fn force_static(runtime: &Arc<DeviceRuntime>, def: &PointDefinition) {
    if let Some((_, handle)) = runtime.holds.remove(&def.key) {
        handle.token.cancel();
    }
    if let Some(mut state) = runtime.generators.get_mut(&def.key) {
        state.config.kind = GeneratorKind::Static;
        state.original_kind = None;
    }
    runtime.store.update_override_status(runtime.device_id, &def.key, None);
    debug!("override: '{}' forced static", def.key);
}

/// Hold the generator static for a bounded duration, then restore
///
/// Restarting a hold cancels the previous timer and keeps the originally
/// memoized generator kind, so a chain of holds restores the true
/// pre-override kind exactly once.
fn start_hold(runtime: &Arc<DeviceRuntime>, def: &PointDefinition, seconds: u64) {
    {
        let Some(mut state) = runtime.generators.get_mut(&def.key) else {
            return;
        };
        if state.original_kind.is_none() && state.config.kind != GeneratorKind::Static {
            state.original_kind = Some(state.config.kind);
        }
        state.config.kind = GeneratorKind::Static;
    }

    let generation = runtime.next_hold_generation();
    let handle = HoldHandle { token: runtime.cancel.child_token(), generation };
    if let Some(prev) = runtime.holds.insert(def.key.clone(), handle.clone()) {
        prev.token.cancel();
    }

    let runtime = runtime.clone();
    let key = def.key.clone();
    tokio::spawn(async move {
        let mut remaining = seconds.max(1);
        loop {
            runtime.store.update_override_status(
                runtime.device_id,
                &key,
                Some(format!("Override ({}s)", remaining)),
            );
            tokio::select! {
                _ = handle.token.cancelled() => {
                    debug!("override hold on '{}' cancelled", key);
                    return;
                }
                _ = sleep(Duration::from_secs(1)) => {}
            }
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }

        // Only the active hold may restore; a restarted hold bumped the
        // generation and cancelled this token.
        let still_active = runtime
            .holds
            .remove_if(&key, |_, h| h.generation == generation)
            .is_some();
        if !still_active || handle.token.is_cancelled() {
            return;
        }

        if let Some(mut state) = runtime.generators.get_mut(&key) {
            if state.config.kind == GeneratorKind::Static {
                if let Some(original) = state.original_kind.take() {
                    state.config.kind = original;
                    debug!("override hold on '{}' expired, restored {}", key, original);
                }
            } else {
                // Manually changed mid-hold: nothing to restore.
                state.original_kind = None;
            }
        }
        runtime.store.update_override_status(runtime.device_id, &key, None);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_map::AddressMap;
    use crate::point::{
        Access, GeneratorConfig, ModbusMapping, RegisterRegion, SemanticType,
    };
    use crate::store::PointStore;
    use uuid::Uuid;

    fn runtime_with(mode: OverrideMode, hold_secs: Option<u64>) -> (Arc<DeviceRuntime>, PointDefinition) {
        let mut def = PointDefinition::new(
            "target",
            SemanticType::Uint16,
            Access::ReadWrite,
            ModbusMapping {
                region: RegisterRegion::HoldingRegister,
                address: 30,
                scale: 1.0,
                bit_field: None,
            },
        );
        def.generator = GeneratorConfig {
            kind: GeneratorKind::Random,
            min: 0.0,
            max: 100.0,
            period_seconds: 60.0,
            step: 0.0,
        };
        def.override_mode = mode;
        def.override_duration_seconds = hold_secs;

        let points = vec![def.clone()];
        let map = Arc::new(AddressMap::build(points.clone()).unwrap());
        let store = Arc::new(PointStore::new());
        let device = Uuid::new_v4();
        store.initialize(device, &points);
        (Arc::new(DeviceRuntime::new(device, map, store)), def)
    }

    #[tokio::test]
    async fn test_none_mode_leaves_generator_running() {
        let (runtime, def) = runtime_with(OverrideMode::None, None);
        on_remote_write(&runtime, &def);
        assert_eq!(runtime.generator_kind("target"), Some(GeneratorKind::Random));
    }

    #[tokio::test]
    async fn test_force_static_is_permanent() {
        let (runtime, def) = runtime_with(OverrideMode::ForceStatic, None);
        on_remote_write(&runtime, &def);
        assert_eq!(runtime.generator_kind("target"), Some(GeneratorKind::Static));
        assert!(runtime.generators.get("target").unwrap().original_kind.is_none());
        assert!(runtime.holds.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_restores_original_kind_on_expiry() {
        let (runtime, def) = runtime_with(OverrideMode::HoldForSeconds, Some(2));
        on_remote_write(&runtime, &def);
        assert_eq!(runtime.generator_kind("target"), Some(GeneratorKind::Static));

        // Countdown status is visible while the hold runs
        tokio::time::sleep(Duration::from_millis(100)).await;
        let slot = runtime.store.get(runtime.device_id, "target");
        assert_eq!(slot.override_status.as_deref(), Some("Override (2s)"));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(runtime.generator_kind("target"), Some(GeneratorKind::Random));
        let slot = runtime.store.get(runtime.device_id, "target");
        assert!(slot.override_status.is_none());
        assert!(runtime.holds.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarted_hold_keeps_first_original() {
        let (runtime, def) = runtime_with(OverrideMode::HoldForSeconds, Some(2));
        on_remote_write(&runtime, &def);
        tokio::time::sleep(Duration::from_millis(1200)).await;

        // Second write restarts the countdown; the memoized kind survives
        on_remote_write(&runtime, &def);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(runtime.generator_kind("target"), Some(GeneratorKind::Static));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(runtime.generator_kind("target"), Some(GeneratorKind::Random));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_change_wins_over_hold() {
        let (runtime, def) = runtime_with(OverrideMode::HoldForSeconds, Some(2));
        on_remote_write(&runtime, &def);

        runtime.set_generator_kind("target", GeneratorKind::Sine);
        tokio::time::sleep(Duration::from_millis(3000)).await;

        // The cancelled timer must not restore Random over the manual choice
        assert_eq!(runtime.generator_kind("target"), Some(GeneratorKind::Sine));
        let slot = runtime.store.get(runtime.device_id, "target");
        assert!(slot.override_status.is_none());
    }
}

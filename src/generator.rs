/// Signal generators driving point values between external writes
///
/// Each running device owns one ticker task. On every tick, points whose
/// runtime generator kind is not static get a fresh value computed from the
/// wall clock and committed through the point store with
/// `ValueSource::Simulation`. Simulation writes never trip the override
/// controller; only remote writes do.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::debug;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::device::DeviceRuntime;
use crate::point::{GeneratorConfig, GeneratorKind, SemanticType, Value, ValueSource};

/// Sample a non-static generator at wall-clock time `t` (seconds)
///
/// - ramp: `min + progress * (max - min)` with `progress = (t mod period) /
///   period`, snapped to `step / (max - min)` granularity when a positive
///   step is configured
/// - sine: `(max + min) / 2 + (max - min) / 2 * sin(2π t / period)`
/// - random: uniform in `[min, max)`
pub fn sample(config: &GeneratorConfig, t: f64) -> f64 {
    let min = config.min;
    let max = config.max;
    let span = max - min;
    let period = if config.period_seconds > 0.0 { config.period_seconds } else { 1.0 };

    match config.kind {
        GeneratorKind::Static => min,
        GeneratorKind::Ramp => {
            let mut progress = (t % period) / period;
            if config.step > 0.0 && span.abs() > f64::EPSILON {
                let granularity = (config.step / span).abs();
                if granularity > 0.0 && granularity < 1.0 {
                    progress = (progress / granularity).floor() * granularity;
                }
            }
            min + progress * span
        }
        GeneratorKind::Sine => {
            (max + min) / 2.0 + span / 2.0 * (2.0 * std::f64::consts::PI * t / period).sin()
        }
        GeneratorKind::Random => min + rand::thread_rng().gen::<f64>() * span,
    }
}

/// Run one generator pass over a device's points
pub fn tick_once(runtime: &DeviceRuntime) {
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();

    for def in runtime.address_map.definitions() {
        let config = match runtime.generators.get(&def.key) {
            Some(state) => state.config.clone(),
            None => continue,
        };
        if config.kind == GeneratorKind::Static {
            continue;
        }

        let raw = sample(&config, t);
        let value = if def.semantic_type == SemanticType::Bool {
            Value::Bool(raw >= 0.5)
        } else {
            Value::Numeric(raw)
        };
        let display = def.format_display(&value);
        runtime
            .store
            .set(runtime.device_id, &def.key, value, ValueSource::Simulation, Some(display));
    }
}

/// Spawn the periodic generator loop for a device
///
/// The task exits promptly when the device's root token is cancelled.
pub fn spawn_generator_loop(runtime: Arc<DeviceRuntime>, tick: Duration) -> JoinHandle<()> {
    let cancel = runtime.cancel.child_token();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("generator loop for {} cancelled", runtime.device_id);
                    break;
                }
                _ = ticker.tick() => {
                    tick_once(&runtime);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address_map::AddressMap;
    use crate::point::{Access, ModbusMapping, PointDefinition, RegisterRegion};
    use crate::store::PointStore;
    use uuid::Uuid;

    fn config(kind: GeneratorKind) -> GeneratorConfig {
        GeneratorConfig { kind, min: 0.0, max: 100.0, period_seconds: 60.0, step: 0.0 }
    }

    #[test]
    fn test_ramp_is_linear_over_the_period() {
        let cfg = config(GeneratorKind::Ramp);
        assert!((sample(&cfg, 0.0) - 0.0).abs() < 1e-9);
        assert!((sample(&cfg, 15.0) - 25.0).abs() < 1e-9);
        assert!((sample(&cfg, 30.0) - 50.0).abs() < 1e-9);
        // Wraps at the period boundary
        assert!((sample(&cfg, 75.0) - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_ramp_step_snapping() {
        let cfg = GeneratorConfig { step: 25.0, ..config(GeneratorKind::Ramp) };
        // Progress snaps to multiples of step/(max-min) = 0.25
        assert!((sample(&cfg, 20.0) - 25.0).abs() < 1e-9);
        assert!((sample(&cfg, 29.0) - 25.0).abs() < 1e-9);
        assert!((sample(&cfg, 31.0) - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_sine_hits_midpoint_and_peak() {
        let cfg = config(GeneratorKind::Sine);
        assert!((sample(&cfg, 0.0) - 50.0).abs() < 1e-9);
        assert!((sample(&cfg, 15.0) - 100.0).abs() < 1e-6);
        assert!((sample(&cfg, 45.0) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_random_stays_in_bounds() {
        let cfg = config(GeneratorKind::Random);
        for _ in 0..100 {
            let v = sample(&cfg, 0.0);
            assert!((0.0..100.0).contains(&v));
        }
    }

    #[test]
    fn test_tick_writes_simulation_values() {
        let mut def = PointDefinition::new(
            "noise",
            crate::point::SemanticType::Uint16,
            Access::Read,
            ModbusMapping {
                region: RegisterRegion::InputRegister,
                address: 0,
                scale: 1.0,
                bit_field: None,
            },
        );
        def.generator = GeneratorConfig { min: 10.0, max: 20.0, ..config(GeneratorKind::Random) };

        let points = vec![def];
        let map = Arc::new(AddressMap::build(points.clone()).unwrap());
        let store = Arc::new(PointStore::new());
        let device = Uuid::new_v4();
        store.initialize(device, &points);
        let runtime = DeviceRuntime::new(device, map, store.clone());

        tick_once(&runtime);

        let slot = store.get(device, "noise");
        assert_eq!(slot.source, ValueSource::Simulation);
        let v = slot.value.as_f64();
        assert!((10.0..20.0).contains(&v));
        assert!(slot.display_value.is_some());
    }

    #[test]
    fn test_static_points_are_left_alone() {
        let def = PointDefinition::new(
            "setpoint",
            crate::point::SemanticType::Uint16,
            Access::ReadWrite,
            ModbusMapping {
                region: RegisterRegion::HoldingRegister,
                address: 0,
                scale: 1.0,
                bit_field: None,
            },
        );
        let points = vec![def];
        let map = Arc::new(AddressMap::build(points.clone()).unwrap());
        let store = Arc::new(PointStore::new());
        let device = Uuid::new_v4();
        store.initialize(device, &points);
        let runtime = DeviceRuntime::new(device, map, store.clone());

        store.set(device, "setpoint", Value::Numeric(55.0), ValueSource::Manual, None);
        tick_once(&runtime);

        let slot = store.get(device, "setpoint");
        assert_eq!(slot.value, Value::Numeric(55.0));
        assert_eq!(slot.source, ValueSource::Manual);
    }
}

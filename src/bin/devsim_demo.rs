/// Simulator demo
///
/// Builds a two-device simulator from inline configuration, starts it,
/// watches point store events, and polls one device with the bundled client.
///
/// Run with: cargo run --bin devsim_demo

use std::sync::Arc;
use std::time::Duration;

use voltage_devsim::{
    Access, DeviceConfig, DeviceManager, GeneratorConfig, GeneratorKind, ModbusClient,
    ModbusMapping, ModbusTcpClient, OverrideMode, PointDefinition, PointStore, RegisterRegion,
    SemanticType, SimulatorResult,
};

fn pump() -> DeviceConfig {
    let mut speed = PointDefinition::new(
        "speed_rpm",
        SemanticType::Uint16,
        Access::ReadWrite,
        ModbusMapping {
            region: RegisterRegion::HoldingRegister,
            address: 0,
            scale: 1.0,
            bit_field: None,
        },
    );
    speed.generator = GeneratorConfig {
        kind: GeneratorKind::Sine,
        min: 900.0,
        max: 1500.0,
        period_seconds: 20.0,
        step: 0.0,
    };
    speed.override_mode = OverrideMode::HoldForSeconds;
    speed.override_duration_seconds = Some(5);

    let running = PointDefinition::new(
        "running",
        SemanticType::Bool,
        Access::ReadWrite,
        ModbusMapping { region: RegisterRegion::Coil, address: 0, scale: 1.0, bit_field: None },
    );

    DeviceConfig::new("pump-1", 15020).with_point(speed).with_point(running)
}

fn meter() -> DeviceConfig {
    let mut energy = PointDefinition::new(
        "energy_kwh",
        SemanticType::Float,
        Access::Read,
        ModbusMapping {
            region: RegisterRegion::InputRegister,
            address: 0,
            scale: 1.0,
            bit_field: None,
        },
    );
    energy.generator = GeneratorConfig {
        kind: GeneratorKind::Ramp,
        min: 0.0,
        max: 1000.0,
        period_seconds: 60.0,
        step: 0.0,
    };

    DeviceConfig::new("meter-1", 15021).with_point(energy)
}

#[tokio::main]
async fn main() -> SimulatorResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("=== Voltage DevSim Demo ===");
    println!("{}", voltage_devsim::info());

    let store = Arc::new(PointStore::new());
    let manager = DeviceManager::new(store.clone());

    let pump = pump();
    let meter = meter();
    let pump_id = pump.id;
    let pump_port = pump.port;

    manager.add_device(pump)?;
    manager.add_device(meter.clone())?;
    manager.start(pump_id).await?;
    manager.start(meter.id).await?;

    // Print a handful of store changes as the generators tick
    let mut changes = store.subscribe();
    let watcher = tokio::spawn(async move {
        for _ in 0..6 {
            if let Ok(change) = changes.recv().await {
                println!(
                    "  store: {}/{} = {} ({})",
                    change.device_id,
                    change.key,
                    change.slot.value,
                    change.slot.display_value.unwrap_or_default()
                );
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(1200)).await;

    // Poll the pump over real Modbus TCP
    let mut client =
        ModbusTcpClient::from_address(&format!("127.0.0.1:{}", pump_port), Duration::from_secs(2)).await?;

    let speed = client.read_03(1, 0, 1).await?;
    println!("pump speed register: {:?}", speed);

    // A remote write pins the sine generator for 5 seconds
    client.write_06(1, 0, 1200).await?;
    let pinned = client.read_03(1, 0, 1).await?;
    println!("after override write: {:?} (held static for 5s)", pinned);

    client.write_05(1, 0, true).await?;
    let coil = client.read_01(1, 0, 1).await?;
    println!("pump running coil: {:?}", coil);

    client.close().await?;
    let _ = watcher.await;

    for snapshot in manager.list() {
        println!("device '{}' on port {}: {}", snapshot.name, snapshot.port, snapshot.state);
    }

    manager.stop_all().await;
    println!("=== Demo Completed ===");
    Ok(())
}

//! CloudLink protocol exerciser.
//!
//! Runs the protocol engine against the in-memory mock stack: performs a
//! handshake, feeds it a scripted batch of cloud traffic (ping, describe
//! request, time answer), and logs what the engine sent back.  Useful for
//! demonstrating the engine headlessly and for eyeballing wire traffic
//! during protocol work.  No cloud, no radio, no secrets involved.
//!
//! ```text
//! main()
//!  └─ load DeviceConfig (path from argv[1], defaults otherwise)
//!  └─ assemble Protocol over MockChannel/MockPlatform/MockDescriptor
//!       ├─ begin()           -- handshake (scripted: full establish)
//!       └─ event_loop() × N  -- dispatch the scripted traffic
//! ```

use std::path::Path;

use tracing::info;
use tracing_subscriber::EnvFilter;

use cloudlink_device::application::descriptor::VariableValue;
use cloudlink_device::application::engine::Protocol;
use cloudlink_device::infrastructure::channel::mock::MockChannel;
use cloudlink_device::infrastructure::descriptor::mock::{MockDescriptor, SharedAppState};
use cloudlink_device::infrastructure::platform::mock::MockPlatform;
use cloudlink_device::infrastructure::storage::config::load_config;

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "cloudlink.toml".to_string());
    let config = load_config(Path::new(&config_path))?;

    // Initialise structured logging.  `RUST_LOG` overrides the config level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.device.log_level.clone())),
        )
        .init();

    info!("CloudLink exerciser starting (config: {config_path})");

    let state = SharedAppState::new();
    let descriptor = MockDescriptor::new()
        .with_function("led", 1)
        .with_function("reboot", 0)
        .with_variable("temp", VariableValue::Double(21.5))
        .with_system_info("\"p\":12,\"fw\":\"1.5.2\"")
        .with_state(state.clone(), 0x1111_1111, 0x2222_2222);

    let mut channel = MockChannel::with_shared_state(state);

    // Scripted cloud traffic: a ping, a default describe request, and a
    // time answer.
    channel.push_incoming(&[0x40, 0x00, 0x12, 0x34]);
    channel.push_incoming(&[
        0x44, 0x01, 0x12, 0x35, 0xAA, 0xBB, 0xCC, 0xDD, 0xB1, b'd',
    ]);
    channel.push_incoming(&[0x61, 0x45, 0x12, 0x36, 0x07, 0xFF, 0x5E, 0x00, 0x00, 0x00]);

    let mut protocol = Protocol::new(
        channel,
        MockPlatform::new(),
        descriptor,
        config.protocol_config()?,
    );
    protocol.subscribe("demo");

    let outcome = protocol.begin()?;
    info!("session came up: {outcome:?}");

    // One turn per scripted frame plus one idle turn.
    for _ in 0..4 {
        let message_type = protocol.event_loop()?;
        info!("event loop turn processed: {message_type:?}");
        protocol.platform_mut().advance(100);
    }

    info!(
        "exerciser done: {} frames sent, time set to {:?}",
        protocol.channel().sent().len(),
        protocol.platform().time_sets()
    );
    Ok(())
}

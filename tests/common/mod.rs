#![allow(dead_code)]

pub mod mock_driver;
pub mod mock_tts;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use std::{fs, thread};
use tempfile::TempDir;

use callout::drivers::{DriverOptions, DriverRegistry};
use callout::endpoint::{EndpointConfig, EndpointStore, ProtocolKind};

pub use mock_driver::SpyDriver;
pub use mock_tts::{catalog, MockSynth};

/// Registry holding only the given drivers
pub fn registry_with(drivers: &[Arc<SpyDriver>]) -> DriverRegistry {
    registry_with_timeout(drivers, Duration::from_secs(5))
}

pub fn registry_with_timeout(drivers: &[Arc<SpyDriver>], timeout: Duration) -> DriverRegistry {
    let mut registry = DriverRegistry::new(DriverOptions::with_timeout(timeout));
    for driver in drivers {
        registry.register(driver.clone());
    }
    registry
}

/// In-memory endpoint store
pub fn store(endpoints: Vec<EndpointConfig>) -> Arc<dyn EndpointStore> {
    let map: HashMap<String, EndpointConfig> =
        endpoints.into_iter().map(|e| (e.id.clone(), e)).collect();
    Arc::new(map)
}

pub fn endpoint(id: &str, kind: ProtocolKind) -> EndpointConfig {
    EndpointConfig::new(id, "192.0.2.10", 80, kind)
}

/// A `callout serve` daemon isolated in a temp dir
pub struct TestContext {
    pub temp_dir: TempDir,
    pub child: Child,
    pub socket_path: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_endpoints(serde_json::json!([]))
    }

    /// Daemon configured with the given endpoint list
    pub fn with_endpoints(endpoints: serde_json::Value) -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let bin_path = env!("CARGO_BIN_EXE_callout");

        let config_dir = temp_dir.path().join("config");
        fs::create_dir_all(config_dir.join("callout")).expect("Failed to create config dir");

        // No local synthesizer keeps the daemon quiet
        let config = serde_json::json!({
            "endpoints": endpoints,
            "local_synth": {"command": ""},
            "check_before_announce": false
        });
        let config_path = config_dir.join("callout").join("config.json");
        fs::write(&config_path, config.to_string()).expect("Failed to write config");

        let socket_path = temp_dir.path().join("callout.sock");

        let child = Command::new(bin_path)
            .arg("--config")
            .arg(&config_path)
            .arg("serve")
            .env("XDG_CONFIG_HOME", &config_dir)
            .env("CALLOUT_SOCKET", &socket_path)
            .env_remove("RUST_LOG")
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .expect("Failed to spawn callout daemon");

        let ctx = TestContext {
            temp_dir,
            child,
            socket_path,
        };

        ctx.wait_for_socket();
        ctx
    }

    pub fn audit_log(&self) -> PathBuf {
        self.temp_dir.path().join("config/callout/audit.log")
    }

    fn wait_for_socket(&self) {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if self.socket_path.exists() {
                return;
            }
            thread::sleep(Duration::from_millis(100));
        }
        panic!("Timed out waiting for socket at {:?}", self.socket_path);
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

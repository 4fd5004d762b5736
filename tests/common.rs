//! Test utilities & fixtures.
//! An in-memory cloud, a capturing serial sink and temp-dir configuration.

use async_trait::async_trait;
use indexmap::IndexMap;
use lorabridge::cloud::{CloudApi, ProvisionedDevice, SharedAttributes};
use lorabridge::config::{CalendarZone, Config};
use lorabridge::error::CloudError;
use lorabridge::link::SharedWriter;
use lorabridge::registry::{DeviceRegistry, SharedRegistry};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// 2024-01-01 09:00 UTC
#[allow(dead_code)]
pub const NINE_AM: i64 = 1_704_099_600;
/// 2024-01-01 10:00 UTC
#[allow(dead_code)]
pub const TEN_AM: i64 = 1_704_103_200;

#[allow(dead_code)]
pub const WEEKLY_SYNC: &str = "Start: 2024-01-01 09:00\nEnd: 2024-01-01 10:00";

/// Cloud double. Attributes are keyed by access token; deletes remove the key
/// from every device, like the shared-scope delete of the real service.
#[derive(Default)]
pub struct FakeCloud {
    attributes: Mutex<HashMap<String, SharedAttributes>>,
    failing_tokens: Mutex<HashSet<String>>,
    pub fail_deletes: AtomicBool,
    pub fail_provision: AtomicBool,
    pub deleted: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<(String, f64, f64)>>,
    pub provisioned: Mutex<Vec<(String, String)>>,
}

#[allow(dead_code)]
impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_attribute(&self, token: &str, key: &str, value: Value) {
        self.attributes
            .lock()
            .unwrap()
            .entry(token.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn fail_fetch_for(&self, token: &str) {
        self.failing_tokens.lock().unwrap().insert(token.to_string());
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(String, f64, f64)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn provisioned(&self) -> Vec<(String, String)> {
        self.provisioned.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudApi for FakeCloud {
    async fn fetch_shared_attributes(
        &self,
        access_token: &str,
    ) -> Result<SharedAttributes, CloudError> {
        if self.failing_tokens.lock().unwrap().contains(access_token) {
            return Err(CloudError::Status {
                status: 503,
                url: format!("fake://{}/attributes", access_token),
            });
        }
        Ok(self
            .attributes
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_shared_attribute(&self, key: &str) -> Result<(), CloudError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(CloudError::Status {
                status: 500,
                url: format!("fake://delete/{}", key),
            });
        }
        for attrs in self.attributes.lock().unwrap().values_mut() {
            attrs.remove(key);
        }
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    async fn upload_telemetry(
        &self,
        access_token: &str,
        data: f64,
        battery: f64,
    ) -> Result<(), CloudError> {
        self.uploads
            .lock()
            .unwrap()
            .push((access_token.to_string(), data, battery));
        Ok(())
    }

    async fn provision_device(
        &self,
        mac: &str,
        display_name: &str,
    ) -> Result<ProvisionedDevice, CloudError> {
        if self.fail_provision.load(Ordering::SeqCst) {
            return Err(CloudError::MissingField("credentialsId"));
        }
        let mut provisioned = self.provisioned.lock().unwrap();
        provisioned.push((mac.to_string(), display_name.to_string()));
        Ok(ProvisionedDevice {
            device_id: format!("dev-{}", provisioned.len()),
            access_token: format!("token-{}", mac),
        })
    }
}

/// Configuration rooted in `dir`, calendar times read as UTC, no log file.
#[allow(dead_code)]
pub fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = dir.to_string_lossy().into_owned();
    config.schedule.timezone = CalendarZone::Utc;
    config.logging.file = None;
    config
}

/// Registry pre-populated with `(mac, token)` pairs in order.
#[allow(dead_code)]
pub fn registry_with(config: &Config, devices: &[(&str, &str)]) -> SharedRegistry {
    let map: IndexMap<String, String> = devices
        .iter()
        .map(|(mac, token)| (mac.to_string(), token.to_string()))
        .collect();
    let path = config.storage.device_map_path();
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, serde_json::to_string(&map).unwrap()).unwrap();
    let registry = DeviceRegistry::load(
        path,
        config.storage.counter_path(),
        &config.schedule.display_prefix,
    )
    .unwrap();
    Arc::new(tokio::sync::Mutex::new(registry))
}

pub type CaptureSink = SharedWriter<Vec<u8>>;

#[allow(dead_code)]
pub fn capture_sink() -> CaptureSink {
    SharedWriter::new(Vec::new())
}

/// Lines written so far, clearing the buffer.
#[allow(dead_code)]
pub fn take_lines(sink: &CaptureSink) -> Vec<String> {
    let mut guard = sink.lock().unwrap();
    let text = String::from_utf8(std::mem::take(&mut *guard)).unwrap();
    text.lines().map(str::to_string).collect()
}

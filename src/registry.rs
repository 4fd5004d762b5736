//! Device registry: physical MAC → cloud identity.
//!
//! The registry is the only place new cloud identities are created. Its
//! on-disk form is a flat JSON object `{ "<mac>": "<access token>" }` whose key
//! order is the order devices were first seen. That order matters: a device's
//! 1-based position in it is the number in the display name used to frame
//! one-shot messages (`lora_1`, `lora_2`, ...).

use crate::cloud::CloudApi;
use crate::storage::{read_optional, write_json_atomic, CounterFile};
use anyhow::{anyhow, Result};
use indexmap::IndexMap;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cloud identity of one physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub mac_address: String,
    pub access_token: String,
    pub display_name: String,
}

/// Registry handle shared by the foreground handler and the poller.
pub type SharedRegistry = Arc<Mutex<DeviceRegistry>>;

pub struct DeviceRegistry {
    map_path: PathBuf,
    counter: CounterFile,
    display_prefix: String,
    tokens: IndexMap<String, String>,
    names: IndexMap<String, String>,
}

impl DeviceRegistry {
    /// Load the persisted mapping (a missing file is an empty registry).
    pub fn load(
        map_path: impl Into<PathBuf>,
        counter_path: impl Into<PathBuf>,
        display_prefix: &str,
    ) -> Result<Self> {
        let map_path = map_path.into();
        let tokens: IndexMap<String, String> = match read_optional(&map_path)? {
            Some(text) if !text.trim().is_empty() => serde_json::from_str(&text)
                .map_err(|e| anyhow!("Corrupt device map {}: {}", map_path.display(), e))?,
            _ => IndexMap::new(),
        };
        // Original cloud names are not persisted; positional names stand in for them.
        let names = tokens
            .keys()
            .enumerate()
            .map(|(i, mac)| (mac.clone(), positional_name(display_prefix, i + 1)))
            .collect();
        info!(
            "Loaded {} device(s) from {}",
            tokens.len(),
            map_path.display()
        );
        Ok(Self {
            map_path,
            counter: CounterFile::new(counter_path),
            display_prefix: display_prefix.to_string(),
            tokens,
            names,
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, mac: &str) -> Option<DeviceIdentity> {
        let token = self.tokens.get(mac)?;
        Some(DeviceIdentity {
            mac_address: mac.to_string(),
            access_token: token.clone(),
            display_name: self.names.get(mac).cloned().unwrap_or_default(),
        })
    }

    /// 1-based position of `mac` in insertion order.
    pub fn position(&self, mac: &str) -> Option<usize> {
        self.tokens.get_index_of(mac).map(|i| i + 1)
    }

    /// `<prefix>_<position>` for `mac`.
    pub fn positional_display_name(&self, mac: &str) -> Option<String> {
        self.position(mac)
            .map(|position| positional_name(&self.display_prefix, position))
    }

    /// All identities in insertion order.
    pub fn snapshot(&self) -> Vec<DeviceIdentity> {
        self.tokens
            .keys()
            .filter_map(|mac| self.get(mac))
            .collect()
    }

    /// Return the identity for `mac`, provisioning and persisting a new one on
    /// first contact.
    ///
    /// A known MAC returns without side effects. For a new MAC the next display
    /// name is taken from the counter file, the device is provisioned, the
    /// counter is advanced and the mapping is written to disk before returning.
    pub async fn resolve(&mut self, mac: &str, cloud: &dyn CloudApi) -> Result<DeviceIdentity> {
        if let Some(identity) = self.get(mac) {
            return Ok(identity);
        }

        let number = self.counter.current();
        let display_name = format!("{}_{}", self.display_prefix, number);
        info!("New device {} seen, provisioning as {}", mac, display_name);

        let provisioned = cloud
            .provision_device(mac, &display_name)
            .await
            .map_err(|e| anyhow!("Provisioning {} failed: {}", mac, e))?;

        if let Err(e) = self.counter.store(number + 1) {
            warn!("Could not advance device counter: {}", e);
        }

        self.tokens
            .insert(mac.to_string(), provisioned.access_token.clone());
        self.names.insert(mac.to_string(), display_name.clone());
        self.persist()?;

        Ok(DeviceIdentity {
            mac_address: mac.to_string(),
            access_token: provisioned.access_token,
            display_name,
        })
    }

    fn persist(&self) -> Result<()> {
        write_json_atomic(&self.map_path, &self.tokens)
    }
}

fn positional_name(prefix: &str, position: usize) -> String {
    format!("{}_{}", prefix, position)
}

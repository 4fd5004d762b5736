//! # Cloud Module
//!
//! The bridge talks to the telemetry/attribute store only through [`CloudApi`].
//! Production uses [`thingsboard::ThingsBoardClient`]; tests plug in fakes that
//! record calls and serve canned attribute sets.
//!
//! All calls are best-effort from the caller's point of view: failures are
//! returned as [`CloudError`] and the caller decides whether to log and move on.

pub mod thingsboard;

use crate::error::CloudError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Shared attributes of one device, key → raw JSON value.
pub type SharedAttributes = serde_json::Map<String, serde_json::Value>;

/// Result of provisioning a brand-new device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedDevice {
    /// Remote device id (UUID on ThingsBoard).
    pub device_id: String,
    /// Device access token used for telemetry and attribute reads.
    pub access_token: String,
}

#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Current shared-attribute set of the device owning `access_token`.
    async fn fetch_shared_attributes(&self, access_token: &str)
        -> Result<SharedAttributes, CloudError>;

    /// Remove a shared attribute. Deleting a key that is already gone succeeds.
    async fn delete_shared_attribute(&self, key: &str) -> Result<(), CloudError>;

    /// Upload one measurement.
    async fn upload_telemetry(
        &self,
        access_token: &str,
        data: f64,
        battery: f64,
    ) -> Result<(), CloudError>;

    /// Create a remote identity named `display_name` for `mac`.
    async fn provision_device(
        &self,
        mac: &str,
        display_name: &str,
    ) -> Result<ProvisionedDevice, CloudError>;
}

#[derive(Debug, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntityId {
    pub id: String,
}

/// Response of device and dashboard creation calls.
#[derive(Debug, Deserialize)]
pub(crate) struct EntityResponse {
    pub id: EntityId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CredentialsResponse {
    pub credentials_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AttributesResponse {
    #[serde(default)]
    pub shared: SharedAttributes,
}

#[derive(Debug, Serialize)]
pub(crate) struct TelemetryPayload {
    pub data: f64,
    pub battery: f64,
}

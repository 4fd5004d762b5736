//! ThingsBoard REST client.
//!
//! Tenant calls (device creation, credentials, dashboards, attribute deletion)
//! use the JWT obtained by [`ThingsBoardClient::login`] in an
//! `X-Authorization: Bearer` header. Device-scoped calls (telemetry, attribute
//! reads) are addressed by access token in the URL and need no header.
//!
//! The JWT is fetched once at startup and never refreshed.

use super::{
    AttributesResponse, CloudApi, CredentialsResponse, EntityResponse, LoginRequest,
    LoginResponse, ProvisionedDevice, SharedAttributes, TelemetryPayload,
};
use crate::config::CloudConfig;
use crate::error::CloudError;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::json;
use std::time::Duration;

pub struct ThingsBoardClient {
    base_url: String,
    username: String,
    password: String,
    attribute_device_id: String,
    provision_dashboard: bool,
    client: reqwest::Client,
    jwt: Option<String>,
}

impl ThingsBoardClient {
    pub fn new(config: &CloudConfig) -> Result<Self, CloudError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            base_url: config.host.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            attribute_device_id: config.attribute_device_id.clone(),
            provision_dashboard: config.provision_dashboard,
            client,
            jwt: None,
        })
    }

    /// Obtain the tenant session token.
    pub async fn login(&mut self) -> Result<(), CloudError> {
        let url = format!("{}/api/auth/login", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&LoginRequest {
                username: &self.username,
                password: &self.password,
            })
            .send()
            .await?;
        let body: LoginResponse = check(response, &url).await?.json().await?;
        let token = body.token.ok_or(CloudError::MissingField("token"))?;
        self.jwt = Some(token);
        info!("Logged in to {} as {}", self.base_url, self.username);
        Ok(())
    }

    pub fn is_logged_in(&self) -> bool {
        self.jwt.is_some()
    }

    fn authorized(&self, builder: RequestBuilder) -> Result<RequestBuilder, CloudError> {
        let jwt = self.jwt.as_ref().ok_or(CloudError::NotLoggedIn)?;
        Ok(builder.header("X-Authorization", format!("Bearer {}", jwt)))
    }

    /// URL of the shared-scope delete call for `key`.
    pub fn delete_url(&self, key: &str) -> String {
        format!(
            "{}/api/plugins/telemetry/DEVICE/{}/SHARED_SCOPE?keys={}",
            self.base_url,
            self.attribute_device_id,
            urlencoding::encode(key)
        )
    }

    async fn create_device(&self, name: &str) -> Result<String, CloudError> {
        let url = format!("{}/api/device", self.base_url);
        let request = self.authorized(self.client.post(&url))?.json(&json!({ "name": name }));
        let created: EntityResponse = check(request.send().await?, &url).await?.json().await?;
        Ok(created.id.id)
    }

    async fn device_token(&self, device_id: &str) -> Result<String, CloudError> {
        let url = format!("{}/api/device/{}/credentials", self.base_url, device_id);
        let request = self.authorized(self.client.get(&url))?;
        let creds: CredentialsResponse = check(request.send().await?, &url).await?.json().await?;
        creds
            .credentials_id
            .ok_or(CloudError::MissingField("credentialsId"))
    }

    async fn publish_mac_attribute(&self, access_token: &str, mac: &str) -> Result<(), CloudError> {
        let url = format!("{}/api/v1/{}/attributes", self.base_url, access_token);
        let response = self
            .client
            .post(&url)
            .json(&json!({ "mac_address": mac }))
            .send()
            .await?;
        check(response, &url).await?;
        Ok(())
    }

    /// Dashboard with a time-series chart of `data` and the latest device ID.
    async fn create_dashboard(&self, device_id: &str, device_name: &str) -> Result<(), CloudError> {
        let url = format!("{}/api/dashboard", self.base_url);
        let body = json!({
            "title": format!("Dashboard {}", device_name),
            "configuration": {
                "widgets": {
                    "data_chart": {
                        "type": "timeseries",
                        "title": "Data Chart",
                        "datasources": [{
                            "type": "device",
                            "name": "${entityName}",
                            "dataKeys": [{ "name": "data", "type": "timeseries" }]
                        }],
                        "settings": { "showLegend": true },
                        "sizeX": 8, "sizeY": 4, "row": 0, "col": 0
                    },
                    "id_display": {
                        "type": "latest",
                        "title": "Device ID",
                        "datasources": [{
                            "type": "device",
                            "name": "${entityName}",
                            "dataKeys": [{ "name": "ID", "type": "attribute" }]
                        }],
                        "settings": {},
                        "sizeX": 4, "sizeY": 2, "row": 4, "col": 0
                    }
                },
                "layout": {}
            },
            "assignToCustomer": false
        });
        let request = self.authorized(self.client.post(&url))?.json(&body);
        let dashboard: EntityResponse = check(request.send().await?, &url).await?.json().await?;

        let assign_url = format!(
            "{}/api/dashboard/{}/assignToEntity?entityId={}",
            self.base_url, dashboard.id.id, device_id
        );
        let request = self.authorized(self.client.post(&assign_url))?;
        check(request.send().await?, &assign_url).await?;
        Ok(())
    }
}

#[async_trait]
impl CloudApi for ThingsBoardClient {
    async fn fetch_shared_attributes(
        &self,
        access_token: &str,
    ) -> Result<SharedAttributes, CloudError> {
        let url = format!(
            "{}/api/v1/{}/attributes?clientKeys=&sharedKeys=",
            self.base_url, access_token
        );
        let response = self.client.get(&url).send().await?;
        let body: AttributesResponse = check(response, &url).await?.json().await?;
        Ok(body.shared)
    }

    async fn delete_shared_attribute(&self, key: &str) -> Result<(), CloudError> {
        let url = self.delete_url(key);
        let response = self.authorized(self.client.delete(&url))?.send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Shared attribute '{}' already gone", key);
            return Ok(());
        }
        check(response, &url).await?;
        Ok(())
    }

    async fn upload_telemetry(
        &self,
        access_token: &str,
        data: f64,
        battery: f64,
    ) -> Result<(), CloudError> {
        let url = format!("{}/api/v1/{}/telemetry", self.base_url, access_token);
        let response = self
            .client
            .post(&url)
            .json(&TelemetryPayload { data, battery })
            .send()
            .await?;
        check(response, &url).await?;
        Ok(())
    }

    async fn provision_device(
        &self,
        mac: &str,
        display_name: &str,
    ) -> Result<ProvisionedDevice, CloudError> {
        let device_id = self.create_device(display_name).await?;
        let access_token = self.device_token(&device_id).await?;
        info!(
            "Provisioned device {} ({}) for MAC {}",
            display_name, device_id, mac
        );

        if let Err(e) = self.publish_mac_attribute(&access_token, mac).await {
            warn!("Could not set mac_address attribute on {}: {}", display_name, e);
        }
        if self.provision_dashboard {
            if let Err(e) = self.create_dashboard(&device_id, display_name).await {
                warn!("Dashboard creation for {} failed: {}", display_name, e);
            }
        }

        Ok(ProvisionedDevice {
            device_id,
            access_token,
        })
    }
}

async fn check(response: Response, url: &str) -> Result<Response, CloudError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        let body = response.text().await.unwrap_or_default();
        debug!(
            "{} -> {} {}",
            url,
            status,
            crate::logutil::escape_log(&body)
        );
        Err(CloudError::Status {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

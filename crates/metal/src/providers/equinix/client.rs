//! Equinix Metal API client implementation.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::models::{ActionRequest, CapacityResponse, CreateIpAssignmentRequest, Meta};
use crate::config::ClientConfig;
use crate::providers::resources::{
    CapacityReport, Device, Facility, IpAddress, OperatingSystem, Organization, Plan, Project,
    SshKey, User,
};
use crate::providers::traits::{
    CreateDeviceRequest, CreateProjectRequest, CreateSshKeyRequest, DeviceAction, Provider,
    ProviderError,
};

/// Page size for list endpoints.
const PER_PAGE: u32 = 100;

/// Equinix Metal API client.
#[derive(Clone)]
pub struct EquinixMetal {
    /// HTTP client.
    client: Client,
    /// API base URL.
    base_url: String,
    /// API token for authentication.
    api_token: String,
    /// Consumer token identifying the calling tool.
    consumer_token: Option<String>,
}

impl EquinixMetal {
    /// Create a new client from a validated configuration.
    ///
    /// # Errors
    /// Returns error if HTTP client cannot be created.
    pub fn new(config: &ClientConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("equinix-metal/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_token: config.api_token.clone(),
            consumer_token: config.consumer_token.clone(),
        })
    }

    /// Attach authentication headers.
    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("X-Auth-Token", &self.api_token);
        match &self.consumer_token {
            Some(token) => request.header("X-Consumer-Token", token),
            None => request,
        }
    }

    /// Make an authenticated GET request.
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, ?query, "GET request");

        let response = self
            .authed(self.client.get(&url))
            .query(query)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated POST request.
    async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "POST request");

        let response = self
            .authed(self.client.post(&url))
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Make an authenticated POST request that returns empty body.
    async fn post_empty<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), ProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "POST request (empty response)");

        let response = self
            .authed(self.client.post(&url))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Make an authenticated DELETE request.
    ///
    /// A resource that is already gone counts as deleted.
    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let url = format!("{}{path}", self.base_url);
        debug!(url = %url, "DELETE request");

        let response = self.authed(self.client.delete(&url)).send().await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Handle API response, parsing JSON or error.
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ProviderError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(|e| {
                warn!(error = %e, body = %text, "Failed to parse response");
                ProviderError::Serialization(e)
            })
        } else if status == StatusCode::NOT_FOUND {
            Err(ProviderError::NotFound(text))
        } else {
            Err(ProviderError::Api {
                status: status.as_u16(),
                message: text,
            })
        }
    }

    /// Fetch every page of a list endpoint.
    ///
    /// Items are read from the `key` field of each page; `meta` drives
    /// pagination.
    async fn list_all<T: DeserializeOwned>(
        &self,
        path: &str,
        key: &str,
        extra_query: &[(&str, String)],
    ) -> Result<Vec<T>, ProviderError> {
        let mut items = Vec::new();
        let mut page: u32 = 1;

        loop {
            let mut query = vec![("page", page.to_string()), ("per_page", PER_PAGE.to_string())];
            query.extend(extra_query.iter().cloned());

            let mut body: Map<String, Value> = self.get(path, &query).await?;

            if let Some(batch) = body.remove(key) {
                let batch: Vec<T> = serde_json::from_value(batch)?;
                items.extend(batch);
            }

            let meta: Meta = match body.remove("meta") {
                Some(meta) => serde_json::from_value(meta)?,
                None => Meta::default(),
            };

            if !meta.has_next() {
                break;
            }
            page += 1;
        }

        debug!(path, count = items.len(), "Listed resources");
        Ok(items)
    }
}

#[async_trait]
impl Provider for EquinixMetal {
    async fn list_projects(&self) -> Result<Vec<Project>, ProviderError> {
        self.list_all("/projects", "projects", &[]).await
    }

    async fn create_project(&self, req: CreateProjectRequest) -> Result<Project, ProviderError> {
        info!(name = %req.name, organization = ?req.organization_id, "Creating project");

        let path = match &req.organization_id {
            Some(org_id) => format!("/organizations/{org_id}/projects"),
            None => "/projects".to_string(),
        };
        let project: Project = self.post(&path, &req).await?;

        info!(project_id = %project.id, "Project created");
        Ok(project)
    }

    async fn delete_project(&self, id: &str) -> Result<(), ProviderError> {
        info!(project_id = %id, "Deleting project");
        self.delete(&format!("/projects/{id}")).await
    }

    async fn list_devices(&self, project_id: &str) -> Result<Vec<Device>, ProviderError> {
        self.list_all(&format!("/projects/{project_id}/devices"), "devices", &[])
            .await
    }

    async fn get_device(&self, id: &str) -> Result<Device, ProviderError> {
        self.get(&format!("/devices/{id}"), &[]).await
    }

    async fn create_device(
        &self,
        project_id: &str,
        req: CreateDeviceRequest,
    ) -> Result<Device, ProviderError> {
        info!(
            hostname = %req.hostname,
            plan = %req.plan,
            facility = ?req.facility,
            operating_system = %req.operating_system,
            "Creating device"
        );

        let device: Device = self
            .post(&format!("/projects/{project_id}/devices"), &req)
            .await?;

        info!(device_id = %device.id, state = %device.state, "Device created");
        Ok(device)
    }

    async fn delete_device(&self, id: &str) -> Result<(), ProviderError> {
        info!(device_id = %id, "Deleting device");
        self.delete(&format!("/devices/{id}")).await
    }

    async fn device_action(&self, id: &str, action: DeviceAction) -> Result<(), ProviderError> {
        info!(device_id = %id, %action, "Triggering device action");
        let body = ActionRequest {
            action_type: action.to_string(),
        };
        self.post_empty(&format!("/devices/{id}/actions"), &body)
            .await
    }

    async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, ProviderError> {
        self.list_all("/ssh-keys", "ssh_keys", &[]).await
    }

    async fn create_ssh_key(&self, req: CreateSshKeyRequest) -> Result<SshKey, ProviderError> {
        info!(label = %req.label, "Creating SSH key");
        self.post("/ssh-keys", &req).await
    }

    async fn delete_ssh_key(&self, id: &str) -> Result<(), ProviderError> {
        info!(key_id = %id, "Deleting SSH key");
        self.delete(&format!("/ssh-keys/{id}")).await
    }

    async fn list_project_ips(&self, project_id: &str) -> Result<Vec<IpAddress>, ProviderError> {
        self.list_all(&format!("/projects/{project_id}/ips"), "ip_addresses", &[])
            .await
    }

    async fn create_device_ip(
        &self,
        device_id: &str,
        cidr: &str,
    ) -> Result<IpAddress, ProviderError> {
        info!(device_id = %device_id, cidr = %cidr, "Assigning IP block");
        let body = CreateIpAssignmentRequest {
            address: cidr.to_string(),
        };
        self.post(&format!("/devices/{device_id}/ips"), &body).await
    }

    async fn delete_ip(&self, id: &str) -> Result<(), ProviderError> {
        info!(ip_id = %id, "Removing IP assignment");
        self.delete(&format!("/ips/{id}")).await
    }

    async fn list_facilities(&self) -> Result<Vec<Facility>, ProviderError> {
        self.list_all("/facilities", "facilities", &[]).await
    }

    async fn list_plans(&self) -> Result<Vec<Plan>, ProviderError> {
        self.list_all("/plans", "plans", &[("include", "available_in".to_string())])
            .await
    }

    async fn list_operating_systems(&self) -> Result<Vec<OperatingSystem>, ProviderError> {
        self.list_all("/operating-systems", "operating_systems", &[])
            .await
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>, ProviderError> {
        self.list_all("/organizations", "organizations", &[]).await
    }

    async fn get_user(&self) -> Result<User, ProviderError> {
        self.get("/user", &[]).await
    }

    async fn get_capacity(&self, include_legacy: bool) -> Result<CapacityReport, ProviderError> {
        let legacy = if include_legacy { "include" } else { "exclude" };
        let response: CapacityResponse = self
            .get("/capacity", &[("legacy", legacy.to_string())])
            .await?;
        Ok(response.capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_pagination() {
        let last: Meta =
            serde_json::from_value(serde_json::json!({"current_page": 2, "last_page": 2}))
                .unwrap();
        assert!(!last.has_next());

        let more: Meta = serde_json::from_value(
            serde_json::json!({"next": {"href": "/projects?page=2"}}),
        )
        .unwrap();
        assert!(more.has_next());

        assert!(!Meta::default().has_next());
    }

    #[test]
    fn test_action_names() {
        assert_eq!(DeviceAction::PowerOn.to_string(), "power_on");
        assert_eq!(DeviceAction::PowerOff.to_string(), "power_off");
        assert_eq!(DeviceAction::Reboot.to_string(), "reboot");
    }
}

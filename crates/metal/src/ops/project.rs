//! Project creation and removal.

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::{exclusive, Presence};
use crate::error::{api, OpError, OpResult};
use crate::providers::resources::Project;
use crate::providers::{CreateProjectRequest, Provider};

/// Parameters of a project operation.
#[derive(Debug, Clone, Default)]
pub struct ProjectParams {
    pub state: Presence,
    pub name: Option<String>,
    pub id: Option<String>,
    /// Organization to create the project in.
    pub org_id: Option<String>,
    pub payment_method: Option<String>,
    /// JSON document stored with the project.
    pub custom_data: Option<String>,
    pub check_mode: bool,
}

/// Outcome of a project operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectResult {
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ProjectResult {
    fn of(project: &Project, changed: bool) -> Self {
        Self {
            changed,
            name: Some(project.name.clone()),
            id: Some(project.id.clone()),
        }
    }
}

impl ProjectParams {
    fn validate(&self) -> OpResult<()> {
        exclusive(&[("name", self.name.is_some(), "id", self.id.is_some())])?;
        if self.name.is_none() && self.id.is_none() {
            return Err(OpError::invalid("one of the following is required: name, id"));
        }
        Ok(())
    }

    fn selects(&self, project: &Project) -> bool {
        match (&self.id, &self.name) {
            (Some(id), _) => &project.id == id,
            (None, Some(name)) => &project.name == name,
            (None, None) => false,
        }
    }

    fn create_request(&self) -> OpResult<CreateProjectRequest> {
        let name = self
            .name
            .clone()
            .ok_or_else(|| OpError::invalid("name is required to create a project"))?;
        let customdata = self
            .custom_data
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()
            .map_err(|e| OpError::invalid(format!("custom_data is not valid JSON: {e}")))?;
        Ok(CreateProjectRequest {
            name,
            organization_id: self.org_id.clone().filter(|o| !o.is_empty()),
            payment_method_id: self.payment_method.clone(),
            customdata,
        })
    }
}

/// Ensure the project named or identified by `params` is present or absent.
///
/// # Errors
/// Fails on invalid parameters, an ambiguous removal, or any API error.
pub async fn act_on_project(provider: &dyn Provider, params: &ProjectParams) -> OpResult<ProjectResult> {
    params.validate()?;

    if params.check_mode {
        return Ok(ProjectResult::default());
    }

    let mut matching: Vec<Project> = provider
        .list_projects()
        .await
        .map_err(api("failed to list projects"))?
        .into_iter()
        .filter(|p| params.selects(p))
        .collect();

    match params.state {
        Presence::Present => {
            if let Some(project) = matching.first() {
                return Ok(ProjectResult::of(project, false));
            }
            let req = params.create_request()?;
            let created = provider
                .create_project(req)
                .await
                .map_err(api("failed to create project"))?;
            info!(id = %created.id, name = %created.name, "Created project");
            Ok(ProjectResult::of(&created, true))
        }
        Presence::Absent => {
            if matching.len() > 1 {
                let ids: Vec<&str> = matching.iter().map(|p| p.id.as_str()).collect();
                return Err(OpError::invalid(format!(
                    "More than projects matched for module call with state = absent: {ids:?}"
                )));
            }
            let Some(project) = matching.pop() else {
                return Ok(ProjectResult::default());
            };
            provider.delete_project(&project.id).await.map_err(api(format!(
                "while trying to remove project {}, id {}, got error",
                project.name, project.id
            )))?;
            info!(id = %project.id, name = %project.name, "Removed project");
            Ok(ProjectResult::of(&project, true))
        }
    }
}

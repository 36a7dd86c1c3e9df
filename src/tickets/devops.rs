use crate::error::TicketError;
use crate::tickets::{TicketKind, TicketSystem};
use crate::BoxFuture;
use log::{debug, info};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_VERSION: &str = "7.0";
const JSON_PATCH: &str = "application/json-patch+json";

#[derive(Debug, Deserialize)]
struct WiqlResponse {
    #[serde(default, rename = "workItems")]
    work_items: Vec<WorkItemRef>,
}

#[derive(Debug, Deserialize)]
struct WorkItemRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WorkItem {
    id: u64,
    #[serde(default)]
    fields: WorkItemFields,
}

#[derive(Debug, Default, Deserialize)]
struct WorkItemFields {
    #[serde(default, rename = "System.Description")]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IterationList {
    #[serde(default)]
    value: Vec<Iteration>,
}

#[derive(Debug, Deserialize)]
struct Iteration {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Serialize)]
struct WiqlQuery {
    query: String,
}

#[derive(Debug, Serialize)]
struct PatchOperation<'a> {
    op: &'static str,
    path: &'static str,
    value: &'a str,
}

/// Ticket system backed by Azure DevOps work items
///
/// Boards are area paths. Tickets are found by exact title with a WIQL query
/// and new ones are filed into the current sprint of the board's team, which
/// is the last segment of the area path.
pub struct DevOpsTicketSystem {
    client: Client,
    organization_url: String,
    project: String,
    token: String,
}

impl DevOpsTicketSystem {
    /// Create a new Azure DevOps ticket system
    ///
    /// # Arguments
    /// * `organization_url` - e.g. `https://dev.azure.com/acme`
    /// * `project` - Team project holding the work items
    /// * `token` - Personal access token, sent with basic auth
    /// * `timeout` - Upper bound for one API call
    pub fn new(
        organization_url: &str,
        project: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, TicketError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            organization_url: organization_url.trim().trim_end_matches('/').to_string(),
            project: project.trim().to_string(),
            token: token.to_string(),
        })
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/{}/_apis/{}", self.organization_url, self.project, path)
    }

    fn iterations_url(&self, team: &str) -> String {
        format!(
            "{}/{}/{}/_apis/work/teamsettings/iterations",
            self.organization_url, self.project, team
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .basic_auth("", Some(&self.token))
            .query(&[("api-version", API_VERSION)])
    }

    /// Turn a non-success answer into a transport error carrying the body
    async fn success(response: Response, action: &str) -> Result<Response, TicketError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TicketError::Transport(format!(
            "{} failed with status {}: {}",
            action, status, body
        )))
    }

    /// Id of the first work item titled `title` under area path `board`
    async fn find_id(&self, board: &str, title: &str) -> Result<Option<u64>, TicketError> {
        let query = WiqlQuery {
            query: wiql_query(&self.project, board, title),
        };
        let response = self
            .authorized(self.client.post(self.api_url("wit/wiql")))
            .json(&query)
            .send()
            .await?;
        let result: WiqlResponse = Self::success(response, "work item query")
            .await?
            .json()
            .await?;
        Ok(result.work_items.first().map(|item| item.id))
    }

    /// Iteration path of the team's current sprint
    pub async fn current_iteration(&self, team: &str) -> Result<String, TicketError> {
        let response = self
            .authorized(self.client.get(self.iterations_url(team)))
            .query(&[("$timeframe", "current")])
            .send()
            .await?;
        let iterations: IterationList = Self::success(response, "sprint lookup")
            .await?
            .json()
            .await?;
        current_iteration_path(iterations, team)
    }
}

/// WIQL selecting work items by project, exact title and area path
fn wiql_query(project: &str, board: &str, title: &str) -> String {
    format!(
        "SELECT [System.Id] FROM WorkItems \
         WHERE [System.TeamProject] = '{}' \
         AND [System.Title] = '{}' \
         AND [System.AreaPath] = '{}'",
        escape_wiql(project),
        escape_wiql(title),
        escape_wiql(board)
    )
}

fn escape_wiql(value: &str) -> String {
    value.replace('\'', "''")
}

/// Team owning an area path: its last `\` segment
fn team_name(board: &str) -> &str {
    board.rsplit('\\').next().unwrap_or(board).trim()
}

fn current_iteration_path(iterations: IterationList, team: &str) -> Result<String, TicketError> {
    match iterations.value.into_iter().next() {
        Some(Iteration {
            path: Some(path), ..
        }) if !path.trim().is_empty() => Ok(path),
        Some(_) => Err(TicketError::Transport(format!(
            "current sprint of team {} has no iteration path",
            team
        ))),
        None => Err(TicketError::NotFound(format!(
            "no current sprint for team {}",
            team
        ))),
    }
}

fn create_operations<'a>(
    board: &'a str,
    title: &'a str,
    description: &'a str,
    iteration: &'a str,
) -> Vec<PatchOperation<'a>> {
    vec![
        PatchOperation {
            op: "add",
            path: "/fields/System.Title",
            value: title,
        },
        PatchOperation {
            op: "add",
            path: "/fields/System.Description",
            value: description,
        },
        PatchOperation {
            op: "add",
            path: "/fields/System.AreaPath",
            value: board,
        },
        PatchOperation {
            op: "add",
            path: "/fields/System.IterationPath",
            value: iteration,
        },
    ]
}

impl TicketSystem for DevOpsTicketSystem {
    fn ticket_exists<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<bool, TicketError>> {
        Box::pin(async move {
            let exists = self.find_id(board, title).await?.is_some();
            debug!("Work item '{}' on '{}' exists: {}", title, board, exists);
            Ok(exists)
        })
    }

    fn create_ticket<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
        description: &'a str,
        kind: TicketKind,
    ) -> BoxFuture<'a, Result<Option<String>, TicketError>> {
        Box::pin(async move {
            if board.trim().is_empty() {
                return Err(TicketError::InvalidArgument(
                    "board must not be empty".to_string(),
                ));
            }
            if self.find_id(board, title).await?.is_some() {
                debug!("Work item '{}' already exists on '{}'", title, board);
                return Ok(None);
            }

            let iteration = self.current_iteration(team_name(board)).await?;
            let body = serde_json::to_vec(&create_operations(board, title, description, &iteration))
                .map_err(|e| TicketError::InvalidArgument(e.to_string()))?;
            let response = self
                .authorized(
                    self.client
                        .post(self.api_url(&format!("wit/workitems/${}", kind))),
                )
                .header(CONTENT_TYPE, JSON_PATCH)
                .body(body)
                .send()
                .await?;
            let created: WorkItem = Self::success(response, "work item creation")
                .await?
                .json()
                .await?;

            info!(
                "Created {} #{} '{}' on '{}' in {}",
                kind, created.id, title, board, iteration
            );
            Ok(Some(created.id.to_string()))
        })
    }

    fn ticket_id<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, TicketError>> {
        Box::pin(async move {
            Ok(self
                .find_id(board, title)
                .await?
                .map(|id| id.to_string()))
        })
    }

    fn description<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, TicketError>> {
        Box::pin(async move {
            let Some(id) = self.find_id(board, title).await? else {
                return Ok(None);
            };
            let response = self
                .authorized(self.client.get(self.api_url(&format!("wit/workitems/{}", id))))
                .query(&[("fields", "System.Description")])
                .send()
                .await?;
            let item: WorkItem = Self::success(response, "work item lookup")
                .await?
                .json()
                .await?;
            Ok(Some(item.fields.description.unwrap_or_default()))
        })
    }

    fn update_description<'a>(
        &'a self,
        board: &'a str,
        title: &'a str,
        description: &'a str,
    ) -> BoxFuture<'a, Result<(), TicketError>> {
        Box::pin(async move {
            let Some(id) = self.find_id(board, title).await? else {
                return Err(TicketError::NotFound(format!("{} on board {}", title, board)));
            };
            let operations = [PatchOperation {
                op: "add",
                path: "/fields/System.Description",
                value: description,
            }];
            let body = serde_json::to_vec(&operations)
                .map_err(|e| TicketError::InvalidArgument(e.to_string()))?;
            let response = self
                .authorized(self.client.patch(self.api_url(&format!("wit/workitems/{}", id))))
                .header(CONTENT_TYPE, JSON_PATCH)
                .body(body)
                .send()
                .await?;
            Self::success(response, "work item update").await?;
            debug!("Updated description of work item #{}", id);
            Ok(())
        })
    }
}

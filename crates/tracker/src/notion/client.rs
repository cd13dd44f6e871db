use async_trait::async_trait;
use autopilot_core::{Task, TaskField, TaskId, TaskRef, TaskStatus, TaskUpdate};
use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::properties::{self as props, parse_timestamp};
use super::schema::NotionSchema;
use crate::error::{Result, TrackerError};
use crate::traits::TaskTracker;

const NOTION_API: &str = "https://api.notion.com/v1";
const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    results: Vec<Value>,
    #[serde(default)]
    has_more: bool,
    next_cursor: Option<String>,
}

/// Tracker backed by a Notion database, one page per task.
///
/// Notion has no conditional update, so [`TaskTracker::claim`] reads, checks,
/// writes the status together with a unique claim token, then reads the page
/// back and only reports success if its own token survived.
pub struct NotionTracker {
    base_url: String,
    token: String,
    database_id: String,
    schema: NotionSchema,
    client: Client,
}

impl NotionTracker {
    pub fn new(token: impl Into<String>, database_id: impl Into<String>) -> Self {
        Self {
            base_url: NOTION_API.to_string(),
            token: token.into(),
            database_id: database_id.into(),
            schema: NotionSchema::default(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_schema(mut self, schema: NotionSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn schema(&self) -> &NotionSchema {
        &self.schema
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
        resource: &str,
    ) -> Result<T> {
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TrackerError::NotFound(resource.to_string()));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(TrackerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    async fn fetch_page(&self, id: &TaskId) -> Result<Value> {
        let response = self
            .request(Method::GET, &format!("pages/{}", id))
            .send()
            .await?;
        self.handle_response(response, id.as_str()).await
    }

    async fn patch_page(&self, id: &TaskId, properties: Map<String, Value>) -> Result<()> {
        let response = self
            .request(Method::PATCH, &format!("pages/{}", id))
            .json(&json!({ "properties": properties }))
            .send()
            .await?;
        let _: Value = self.handle_response(response, id.as_str()).await?;
        Ok(())
    }

    fn page_to_task(&self, page: &Value) -> Result<Task> {
        let id = page
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| TrackerError::InvalidResponse("page without id".to_string()))?;
        let properties = page
            .get("properties")
            .and_then(Value::as_object)
            .ok_or_else(|| TrackerError::InvalidResponse(format!("page {} without properties", id)))?;

        let s = &self.schema;
        let status_name = props::read_status(properties, &s.status)
            .ok_or_else(|| TrackerError::InvalidResponse(format!("page {} has no status", id)))?;
        let status = s
            .status_names
            .status_of(&status_name)
            .ok_or(TrackerError::UnknownStatus(status_name))?;

        let last_transition_at = props::read_date(properties, &s.last_transition)
            .or_else(|| {
                page.get("last_edited_time")
                    .and_then(Value::as_str)
                    .and_then(parse_timestamp)
            })
            .unwrap_or_default();

        let mut task = Task::new(
            id,
            props::read_text(properties, &s.title).unwrap_or_default(),
            props::read_text(properties, &s.description).unwrap_or_default(),
        )
        .with_status(status)
        .with_last_transition_at(last_transition_at);

        task.spec = props::read_text(properties, &s.spec);
        task.mock_path = props::read_text(properties, &s.mock);
        task.pr_link = props::read_text(properties, &s.pr);
        task.test_report = props::read_text(properties, &s.test_report);
        task.user_doc = props::read_text(properties, &s.user_doc);
        task.notes = props::read_text(properties, &s.notes);
        task.branch = props::read_text(properties, &s.branch);
        task.commit_sha = props::read_text(properties, &s.commit);
        task.claim_token = props::read_text(properties, &s.claim);
        task.labels = props::read_multi_select(properties, &s.labels);

        Ok(task)
    }

    /// Properties touched by `update`, rendered from the already-merged task.
    fn properties_for(
        &self,
        merged: &Task,
        update: &TaskUpdate,
        now: DateTime<Utc>,
    ) -> Map<String, Value> {
        let mut out = Map::new();

        for write in &update.fields {
            let field = write.field();
            let value = merged.field(field).unwrap_or_default();
            out.insert(
                self.schema.property_for(field).to_string(),
                props::rich_text(value),
            );
        }

        if !update.add_labels.is_empty() {
            out.insert(
                self.schema.labels.clone(),
                props::multi_select(&merged.labels),
            );
        }

        if let Some(status) = update.status {
            out.insert(
                self.schema.status.clone(),
                props::status(self.schema.status_names.name_of(status)),
            );
            out.insert(self.schema.last_transition.clone(), props::date(now));
        }

        out
    }
}

#[async_trait]
impl TaskTracker for NotionTracker {
    fn name(&self) -> &'static str {
        "notion"
    }

    async fn list_tasks(&self, status: TaskStatus) -> Result<Vec<TaskRef>> {
        let mut refs = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut body = json!({
                "filter": {
                    "property": self.schema.status,
                    "status": { "equals": self.schema.status_names.name_of(status) }
                },
                "page_size": PAGE_SIZE,
            });
            if let Some(c) = &cursor {
                body["start_cursor"] = json!(c);
            }

            let response = self
                .request(Method::POST, &format!("databases/{}/query", self.database_id))
                .json(&body)
                .send()
                .await?;
            let page: QueryResponse = self.handle_response(response, &self.database_id).await?;

            for result in &page.results {
                match self.page_to_task(result) {
                    Ok(task) => refs.push(task.to_ref()),
                    Err(e) => warn!(error = %e, "Skipping unreadable tracker page"),
                }
            }

            match (page.has_more, page.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }

        debug!(status = %status, count = refs.len(), "Listed tracker tasks");
        Ok(refs)
    }

    async fn read_task(&self, id: &TaskId) -> Result<Task> {
        let page = self.fetch_page(id).await?;
        self.page_to_task(&page)
    }

    async fn write_fields(&self, id: &TaskId, update: &TaskUpdate) -> Result<()> {
        update.validate()?;
        if update.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut merged = self.read_task(id).await?;
        merged.apply(update, now)?;

        let properties = self.properties_for(&merged, update, now);
        self.patch_page(id, properties).await?;

        debug!(task_id = %id, status = ?update.status, fields = update.fields.len(), "Tracker fields written");
        Ok(())
    }

    async fn claim(&self, observed: &TaskRef, to: TaskStatus, token: &str) -> Result<bool> {
        let current = self.read_task(&observed.id).await?;
        if current.status != observed.status
            || current.last_transition_at > observed.last_transition_at
        {
            debug!(task_id = %observed.id, "Task moved before claim");
            return Ok(false);
        }

        let update = TaskUpdate::new()
            .status(to)
            .replace(TaskField::ClaimToken, token);
        let now = Utc::now();
        let mut merged = current;
        merged.apply(&update, now)?;
        self.patch_page(&observed.id, self.properties_for(&merged, &update, now))
            .await?;

        let confirmed = self.read_task(&observed.id).await?;
        let won = confirmed.status == to && confirmed.claim_token.as_deref() == Some(token);
        if won {
            info!(task_id = %observed.id, to = %to, "Claimed task");
        } else {
            info!(task_id = %observed.id, "Lost claim race");
        }
        Ok(won)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(status: &str) -> Value {
        json!({
            "id": "p-1",
            "last_edited_time": "2026-01-01T00:00:00.000Z",
            "properties": {
                "标题": { "title": [{ "plain_text": "Login" }] },
                "描述/复现步骤": { "rich_text": [{ "plain_text": "Add login" }] },
                "状态": { "status": { "name": status } },
                "Labels": { "multi_select": [{ "name": "backend" }] },
                "PR": { "rich_text": [] }
            }
        })
    }

    #[test]
    fn test_page_to_task() {
        let tracker = NotionTracker::new("secret", "db");
        let task = tracker.page_to_task(&page("开发中")).unwrap();

        assert_eq!(task.id, TaskId::new("p-1"));
        assert_eq!(task.title, "Login");
        assert_eq!(task.description, "Add login");
        assert_eq!(task.status, TaskStatus::Implementing);
        assert!(task.pr_link.is_none());
        assert!(task.labels.contains("backend"));
        assert_eq!(
            task.last_transition_at,
            parse_timestamp("2026-01-01T00:00:00.000Z").unwrap()
        );
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let tracker = NotionTracker::new("secret", "db");
        assert!(matches!(
            tracker.page_to_task(&page("进行中")),
            Err(TrackerError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_properties_for_status_update() {
        let tracker = NotionTracker::new("secret", "db");
        let mut task = tracker.page_to_task(&page("待处理")).unwrap();
        let update = TaskUpdate::new()
            .status(TaskStatus::Drafting)
            .append(TaskField::Spec, "Spec", "text")
            .label("agent");
        let now = Utc::now();
        task.apply(&update, now).unwrap();

        let props = tracker.properties_for(&task, &update, now);
        assert_eq!(props["状态"]["status"]["name"], "起草中");
        assert_eq!(
            props["验收标准/解决方案"]["rich_text"][0]["text"]["content"],
            "## Spec\ntext\n"
        );
        assert_eq!(props["Labels"]["multi_select"].as_array().unwrap().len(), 2);
        assert!(props.contains_key("Last Transition"));
    }
}

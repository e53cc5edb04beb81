//! HTTP implementation of the durable board backend
//!
//! Speaks the task REST API: every response is a
//! `{ success, message, data }` envelope and every request carries the
//! user's bearer token.

use std::collections::HashMap;

use async_trait::async_trait;
use board_core::{
    BoardBackend, BoardColumn, BoardTask, ColumnMeta, Error, TaskDraft, TaskMove, TaskRecord,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

type Result<T> = board_core::Result<T>;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    data: Option<T>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTaskRequest<'a> {
    project_id: &'a str,
    #[serde(flatten)]
    draft: &'a TaskDraft,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EditTaskRequest<'a> {
    project_id: &'a str,
    task_id: &'a str,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MoveTaskRequest<'a> {
    project_id: &'a str,
    #[serde(flatten)]
    movement: &'a TaskMove,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateColumnRequest<'a> {
    project_id: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateColumnRequest<'a> {
    column_id: &'a str,
    #[serde(flatten)]
    fields: &'a Map<String, Value>,
}

pub struct HttpBoardBackend {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBoardBackend {
    /// `base_url` is the task API root, e.g. `http://localhost:5000/api`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_envelope<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Backend(format!("Failed to reach backend: {}", e)))?;
        let status = response.status();

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("Invalid backend response ({}): {}", status, e)))?;

        if !status.is_success() || !envelope.success {
            let message = envelope
                .message
                .or(envelope.error)
                .unwrap_or_else(|| status.to_string());
            warn!("Backend request failed ({}): {}", status, message);
            return Err(match status {
                StatusCode::BAD_REQUEST => Error::InvalidInput(message),
                _ => Error::Backend(message),
            });
        }

        Ok(envelope.data)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send_envelope(request)
            .await?
            .ok_or_else(|| Error::Backend("Backend response carried no data".to_string()))
    }

    async fn send_empty(&self, request: RequestBuilder) -> Result<()> {
        self.send_envelope::<Value>(request).await.map(|_| ())
    }
}

/// Flatten the grouped `{ key: { ...column, tasks } }` listing
fn grouped_records(grouped: HashMap<String, BoardColumn>) -> Vec<TaskRecord> {
    grouped
        .into_iter()
        .flat_map(|(key, column)| {
            column
                .tasks
                .into_iter()
                .map(move |task| TaskRecord::new(key.clone(), task))
        })
        .collect()
}

#[async_trait]
impl BoardBackend for HttpBoardBackend {
    async fn fetch_columns(&self, board_id: &str) -> Result<Vec<ColumnMeta>> {
        let path = format!("/task/columns?projectId={}", urlencoding::encode(board_id));
        self.send(self.request(Method::GET, &path)).await
    }

    async fn fetch_tasks(&self, board_id: &str) -> Result<Vec<TaskRecord>> {
        let path = format!("/task?projectId={}", urlencoding::encode(board_id));
        let grouped: HashMap<String, BoardColumn> = self.send(self.request(Method::GET, &path)).await?;
        let records = grouped_records(grouped);
        debug!("Fetched {} task(s) for board {}", records.len(), board_id);
        Ok(records)
    }

    async fn create_task(&self, board_id: &str, draft: &TaskDraft) -> Result<BoardTask> {
        let body = CreateTaskRequest {
            project_id: board_id,
            draft,
        };
        self.send(self.request(Method::POST, "/task").json(&body))
            .await
    }

    async fn update_task(
        &self,
        board_id: &str,
        task_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<BoardTask> {
        let body = EditTaskRequest {
            project_id: board_id,
            task_id,
            fields: patch,
        };
        self.send(self.request(Method::PATCH, "/task").json(&body))
            .await
    }

    async fn move_task(&self, board_id: &str, movement: &TaskMove) -> Result<()> {
        let body = MoveTaskRequest {
            project_id: board_id,
            movement,
        };
        self.send_empty(self.request(Method::PATCH, "/task/move").json(&body))
            .await
    }

    async fn delete_task(&self, _board_id: &str, task_id: &str) -> Result<()> {
        let path = format!("/task/{}", urlencoding::encode(task_id));
        self.send_empty(self.request(Method::DELETE, &path)).await
    }

    async fn create_column(
        &self,
        board_id: &str,
        name: &str,
        color: Option<&str>,
    ) -> Result<ColumnMeta> {
        let body = CreateColumnRequest {
            project_id: board_id,
            name,
            color,
        };
        self.send(self.request(Method::POST, "/task/column").json(&body))
            .await
    }

    async fn update_column(
        &self,
        _board_id: &str,
        column_id: &str,
        patch: &Map<String, Value>,
    ) -> Result<ColumnMeta> {
        let body = UpdateColumnRequest {
            column_id,
            fields: patch,
        };
        self.send(self.request(Method::PATCH, "/task/column").json(&body))
            .await
    }

    async fn delete_column(
        &self,
        _board_id: &str,
        column_id: &str,
        move_tasks_to: Option<&str>,
    ) -> Result<()> {
        let mut path = format!("/task/column/{}", urlencoding::encode(column_id));
        if let Some(target) = move_tasks_to {
            path.push_str(&format!("?moveTasksTo={}", urlencoding::encode(target)));
        }
        self.send_empty(self.request(Method::DELETE, &path)).await
    }
}

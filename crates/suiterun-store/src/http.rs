//! HTTP client for the run/result store.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use suiterun_core::{Run, RunId, TaskRecord, TaskResult};

use crate::store::{ResultStore, RunStore, TaskStore};
use crate::StoreError;

/// HTTP client for the store's REST API.
#[derive(Clone)]
pub struct HttpStore {
    inner: reqwest::Client,
    base_url: String,
    authorization: Option<String>,
}

impl HttpStore {
    /// Create a new store client.
    pub fn new(base_url: &str) -> Self {
        Self {
            inner: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: None,
        }
    }

    /// Builder method to send an `Authorization` header with every request.
    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        debug!(method = %method, url = %url, "Store request");

        let builder = self.inner.request(method, url);
        match &self.authorization {
            Some(value) => builder.header(reqwest::header::AUTHORIZATION, value),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, StoreError> {
        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, StoreError> {
        self.send(self.request(Method::GET, path)).await
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, StoreError> {
        self.send(self.request(Method::POST, path).json(body)).await
    }
}

#[async_trait]
impl RunStore for HttpStore {
    async fn get_run(&self, id: RunId) -> Result<Run, StoreError> {
        self.get_json(&format!("run/{}", id)).await
    }

    async fn submit_change(&self, run: &Run) -> Result<Run, StoreError> {
        self.post_json(&format!("run/{}", run.id), run).await
    }
}

#[async_trait]
impl ResultStore for HttpStore {
    async fn commit_new(&self, result: &TaskResult) -> Result<TaskResult, StoreError> {
        self.post_json(&format!("run/{}/task", result.run_id), result)
            .await
    }

    async fn commit_changes(&self, result: &TaskResult) -> Result<TaskResult, StoreError> {
        let id = result.id.ok_or_else(|| {
            StoreError::Rejected("cannot patch a result that was never committed".to_string())
        })?;
        self.post_json(&format!("task/{}", id), result).await
    }
}

#[async_trait]
impl TaskStore for HttpStore {
    async fn list_tasks(&self, run_id: RunId) -> Result<Vec<TaskRecord>, StoreError> {
        self.get_json(&format!("run/{}/tasks", run_id)).await
    }
}

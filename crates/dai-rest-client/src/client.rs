//! Main REST API client implementation

use dai_api_contract::validation::{validate_outbound, validate_task_create};
use dai_api_contract::*;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client as HttpClient, Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{RestClientError, RestClientResult};
use crate::sse::TaskEventStream;

/// REST API client for the Dai task service
#[derive(Debug, Clone)]
pub struct RestClient {
    http_client: HttpClient,
    config: ClientConfig,
}

impl RestClient {
    /// Create a new REST client
    pub fn new(config: ClientConfig) -> RestClientResult<Self> {
        let http_client = HttpClient::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Create a client from a base URL string
    pub fn from_url(base_url: &str) -> RestClientResult<Self> {
        Self::new(ClientConfig::from_url(base_url)?)
    }

    /// Get the base URL
    pub fn base_url(&self) -> &Url {
        &self.config.base_url
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// List the tasks of a workspace, one page at a time
    pub async fn list_tasks(
        &self,
        workspace_id: i64,
        page: u32,
        per_page: u32,
    ) -> RestClientResult<TaskPage> {
        let mut url = self.url("/tasks")?;
        url.query_pairs_mut()
            .append_pair("workspace_id", &workspace_id.to_string())
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &per_page.to_string());
        self.request(Method::GET, url, None::<&()>).await
    }

    /// Get a task with its full transcript
    pub async fn fetch_task(&self, task_id: TaskId) -> RestClientResult<Task> {
        let url = self.url(&format!("/tasks/{}", task_id))?;
        self.request(Method::GET, url, None::<&()>).await
    }

    /// Create a task
    pub async fn create_task(&self, request: &TaskCreate) -> RestClientResult<Task> {
        validate_task_create(request)?;
        let url = self.url("/tasks/")?;
        self.request(Method::POST, url, Some(request)).await
    }

    /// Ask the server to pause a running task
    pub async fn pause_task(&self, task_id: TaskId) -> RestClientResult<()> {
        let url = self.url(&format!("/tasks/pause/{}", task_id))?;
        self.request_empty(Method::POST, url).await
    }

    /// Delete a task
    pub async fn delete_task(&self, task_id: TaskId) -> RestClientResult<()> {
        let url = self.url(&format!("/tasks/{}", task_id))?;
        self.request_empty(Method::DELETE, url).await
    }

    /// Resume a task and stream its run events
    pub async fn resume_task(
        &self,
        task_id: TaskId,
        message: Option<&Outbound>,
    ) -> RestClientResult<TaskEventStream> {
        if let Some(outbound) = message {
            validate_outbound(outbound)?;
        }
        let url = self.url(&format!("/tasks/resume/{}", task_id))?;
        let body = ResumeRequest {
            message: message.cloned(),
        };
        self.open_stream(url, &body).await
    }

    /// Answer a tool call and stream the run that follows
    pub async fn answer_tool(
        &self,
        task_id: TaskId,
        tool_call_id: &str,
        answer: &serde_json::Value,
    ) -> RestClientResult<TaskEventStream> {
        let url = self.url(&format!("/tasks/answer/{}", task_id))?;
        let body = ToolAnswerRequest {
            tool_call_id: tool_call_id.to_string(),
            answer: answer.clone(),
        };
        self.open_stream(url, &body).await
    }

    // Private helper methods

    fn url(&self, path: &str) -> RestClientResult<Url> {
        Ok(self.config.base_url.join(path)?)
    }

    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> RestClientResult<T> {
        let mut request = self.http_client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    async fn request_empty(&self, method: Method, url: Url) -> RestClientResult<()> {
        let response = self
            .http_client
            .request(method, url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn open_stream<B: Serialize>(&self, url: Url, body: &B) -> RestClientResult<TaskEventStream> {
        debug!(%url, "opening task stream");
        let response = self
            .http_client
            .post(url)
            .header(ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(TaskEventStream::from_response(response))
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> RestClientResult<T> {
        if response.status().is_success() {
            let text = response.text().await?;
            serde_json::from_str(&text).map_err(RestClientError::from)
        } else {
            Err(error_from_response(response).await)
        }
    }
}

/// Build the error for a non-2xx response.
///
/// The message comes from the body's `error` field, falling back to the
/// status text and then to `HTTP_<code>`.
async fn error_from_response(response: Response) -> RestClientError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.error)
        .or_else(|| status.canonical_reason().map(str::to_string))
        .unwrap_or_else(|| format!("HTTP_{}", status.as_u16()));

    RestClientError::ServerError { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let base_url = "http://localhost:1450";
        let client = RestClient::from_url(base_url).unwrap();

        assert_eq!(client.base_url().to_string(), format!("{}/", base_url));
    }

    #[test]
    fn test_paths_are_rooted_at_base_url() {
        let client = RestClient::from_url("http://localhost:1450/ignored").unwrap();
        assert_eq!(
            client.url("/tasks/resume/7").unwrap().as_str(),
            "http://localhost:1450/tasks/resume/7"
        );
    }
}

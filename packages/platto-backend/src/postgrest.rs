/// ProgramService over the hosted table's PostgREST endpoint.
///
///   GET    /rest/v1/{table}?select=*&order=created_at.desc
///   POST   /rest/v1/{table}                 (return=representation)
///   PATCH  /rest/v1/{table}?id=eq.{id}      (return=representation)
///   DELETE /rest/v1/{table}?id=eq.{id}
///
/// The change feed comes from the realtime socket, not from here.
use async_trait::async_trait;
use platto_core::{NewProgram, Program, ProgramId, ProgramPatch, ProgramService, RemoteError, Subscription};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::config::SupabaseConfig;
use crate::realtime::RealtimeFeed;

#[derive(Debug, Clone)]
pub struct PostgrestService {
    client: reqwest::Client,
    base_url: String,
    table: String,
    anon_key: String,
    access_token: String,
    feed: RealtimeFeed,
}

/// Error body PostgREST returns for failed requests.
#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

impl PostgrestService {
    pub fn new(config: &SupabaseConfig, access_token: &str) -> Self {
        let base_url = config.url.trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            feed: RealtimeFeed::new(&base_url, &config.anon_key, access_token, &config.table, &config.channel),
            base_url,
            table: config.table.clone(),
            anon_key: config.anon_key.clone(),
            access_token: access_token.to_string(),
        }
    }

    fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    fn row_url(&self, id: ProgramId) -> String {
        format!("{}?id=eq.{}", self.table_url(), id)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(key) = HeaderValue::from_str(&self.anon_key) {
            headers.insert("apikey", key);
        }
        if let Ok(bearer) = HeaderValue::from_str(&format!("Bearer {}", self.access_token)) {
            headers.insert(AUTHORIZATION, bearer);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn returning(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .headers(self.headers())
            .header("Prefer", "return=representation")
    }

    async fn send(request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(error_from_body(status, &body))
    }

    async fn rows(response: Response) -> Result<Vec<Program>, RemoteError> {
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::transport(e.to_string()))?;
        serde_json::from_str(&body).map_err(|e| RemoteError::decode(e.to_string()))
    }
}

/// Map a failed response to a RemoteError, preferring PostgREST's own code.
fn error_from_body(status: StatusCode, body: &str) -> RemoteError {
    match serde_json::from_str::<PostgrestErrorBody>(body) {
        Ok(parsed) => {
            let code = parsed.code.unwrap_or_else(|| status.as_u16().to_string());
            let mut message = parsed
                .message
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
            if let Some(details) = parsed.details.filter(|d| !d.is_empty()) {
                message = format!("{}: {}", message, details);
            }
            if let Some(hint) = parsed.hint.filter(|h| !h.is_empty()) {
                message = format!("{} (hint: {})", message, hint);
            }
            RemoteError::new(code, message)
        }
        Err(_) => {
            let text = body.trim();
            let message = if text.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text.to_string()
            };
            RemoteError::new(status.as_u16().to_string(), message)
        }
    }
}

/// A representation response for a single-row write.
fn single_row(rows: Vec<Program>, id: Option<ProgramId>) -> Result<Program, RemoteError> {
    match (rows.into_iter().next(), id) {
        (Some(row), _) => Ok(row),
        (None, Some(id)) => Err(RemoteError::not_found(id)),
        (None, None) => Err(RemoteError::decode("Empty representation")),
    }
}

#[async_trait]
impl ProgramService for PostgrestService {
    async fn fetch_all(&self) -> Result<Vec<Program>, RemoteError> {
        let request = self
            .client
            .get(format!("{}?select=*&order=created_at.desc", self.table_url()))
            .headers(self.headers());
        let rows = Self::rows(Self::send(request).await?).await?;
        log::debug!(target: "platto.postgrest", "Fetched {} programs", rows.len());
        Ok(rows)
    }

    async fn create(&self, program: &NewProgram) -> Result<Program, RemoteError> {
        let request = self.returning(self.client.post(self.table_url()).json(program));
        single_row(Self::rows(Self::send(request).await?).await?, None)
    }

    async fn update(&self, id: ProgramId, patch: &ProgramPatch) -> Result<Program, RemoteError> {
        let request = self.returning(self.client.patch(self.row_url(id)).json(patch));
        single_row(Self::rows(Self::send(request).await?).await?, Some(id))
    }

    async fn delete(&self, id: ProgramId) -> Result<(), RemoteError> {
        let request = self.client.delete(self.row_url(id)).headers(self.headers());
        Self::send(request).await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, RemoteError> {
        Ok(self.feed.subscribe())
    }
}

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;
use crate::models::internal::SearchDocument;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Search API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("Empty query embedding")]
    EmptyEmbedding,
}

#[async_trait]
pub trait DocumentSearchClient: Send + Sync {
    /// Returns up to `k` documents ranked by similarity to `embedding`.
    async fn search_documents(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchDocument>, SearchError>;
}

#[derive(Debug, Serialize)]
struct MatchDocumentsRequest<'a> {
    query_embedding: &'a [f32],
    match_count: usize,
}

#[derive(Debug, Deserialize)]
struct MatchedDocument {
    id: Value,
    #[serde(default)]
    content: String,
    #[serde(default)]
    metadata: Value,
    #[serde(default)]
    similarity: f32,
}

impl From<MatchedDocument> for SearchDocument {
    fn from(doc: MatchedDocument) -> Self {
        let id = match doc.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        SearchDocument {
            id,
            content: doc.content,
            metadata: if doc.metadata.is_null() {
                Value::Object(Default::default())
            } else {
                doc.metadata
            },
            similarity: doc.similarity.clamp(0.0, 1.0),
        }
    }
}

/// Client for the document store's vector-similarity RPC
/// (`POST /rest/v1/rpc/<function>`).
pub struct RpcDocumentSearchClient {
    base_url: String,
    client: Client,
    service_key: String,
    function: String,
}

impl RpcDocumentSearchClient {
    pub fn new(base_url: String, service_key: String, function: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            service_key,
            function,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.document_search_url.clone(),
            cfg.document_search_key.clone(),
            cfg.document_search_function.clone(),
        )
    }

    fn rpc_url(&self) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, self.function)
    }
}

#[async_trait]
impl DocumentSearchClient for RpcDocumentSearchClient {
    async fn search_documents(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchDocument>, SearchError> {
        if embedding.is_empty() {
            return Err(SearchError::EmptyEmbedding);
        }

        let body = MatchDocumentsRequest {
            query_embedding: embedding,
            match_count: k,
        };

        let response = self
            .client
            .post(self.rpc_url())
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .json(&body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let matches: Vec<MatchedDocument> = response.json().await?;
                tracing::debug!("Similarity search returned {} documents", matches.len());
                let mut documents: Vec<SearchDocument> =
                    matches.into_iter().map(SearchDocument::from).collect();
                documents.truncate(k);
                Ok(documents)
            }
            status => {
                let message = response.text().await?;
                Err(SearchError::ApiError {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}

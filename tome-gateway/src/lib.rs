//! HTTP adapter implementing [`ModelGateway`] against the model-gateway
//! service. One POST endpoint per operation, JSON in and out; the overview
//! endpoint streams raw token chunks which are forwarded to the caller's
//! token sink. No retries here; retry policy belongs to the stage
//! handlers and to operators.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use tome_core::{
    AnalysisDraft, FolderAssignment, FolderCandidate, LinkVerdict, ModelGateway, Note, NoteDraft,
    Result, SourceKind, StructuredSummary, Summary, TokenSink, TomeError, WorkKind,
};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    /// Connect-level timeout only; generation deadlines are the gateway's
    /// own responsibility.
    pub connect_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), connect_timeout: Duration::from_secs(10) }
    }
}

pub struct HttpGateway {
    client: Client,
    base_url: String,
}

fn model_err(e: impl std::fmt::Display) -> TomeError {
    TomeError::Model(e.to_string())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OverviewRequest<'a> {
    text: &'a str,
    kind: WorkKind,
    source_kind: SourceKind,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryRequest<'a> {
    text: &'a str,
    kind: WorkKind,
}

#[derive(Serialize)]
struct NotesRequest<'a> {
    summary: &'a Summary,
}

#[derive(Deserialize)]
struct NotesResponse {
    notes: Vec<NoteDraft>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisRequest<'a> {
    summaries: &'a [Summary],
    kind: WorkKind,
    source_kind: SourceKind,
}

#[derive(Serialize)]
struct FolderNamesRequest<'a> {
    titles: &'a [String],
}

#[derive(Deserialize)]
struct FolderNamesResponse {
    names: Vec<String>,
}

#[derive(Serialize)]
struct FolderAssignRequest<'a> {
    notes: &'a [FolderCandidate],
    taxonomy: &'a [String],
}

#[derive(Deserialize)]
struct FolderAssignResponse {
    assignments: Vec<FolderAssignment>,
}

#[derive(Serialize)]
struct LinkRequest<'a> {
    a: &'a Note,
    b: &'a Note,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(model_err)?;
        Ok(Self { client, base_url: config.base_url.trim_end_matches('/').to_string() })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn post_json<Req: Serialize + Sync, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(model_err)?
            .error_for_status()
            .map_err(model_err)?;
        response.json().await.map_err(model_err)
    }
}

#[async_trait]
impl ModelGateway for HttpGateway {
    async fn generate_overview(
        &self,
        text: &str,
        kind: WorkKind,
        source_kind: SourceKind,
        on_token: Option<&TokenSink>,
    ) -> Result<String> {
        let response = self
            .client
            .post(self.url("v1/overview"))
            .json(&OverviewRequest { text, kind, source_kind })
            .send()
            .await
            .map_err(model_err)?
            .error_for_status()
            .map_err(model_err)?;

        let mut body = response.bytes_stream();
        let mut overview = String::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(model_err)?;
            let token = String::from_utf8_lossy(&chunk);
            if let Some(sink) = on_token {
                sink(&token);
            }
            overview.push_str(&token);
        }
        Ok(overview)
    }

    async fn generate_structured_summary(
        &self,
        text: &str,
        kind: WorkKind,
    ) -> Result<StructuredSummary> {
        self.post_json("v1/summary", &SummaryRequest { text, kind }).await
    }

    async fn generate_atomic_notes(&self, summary: &Summary) -> Result<Vec<NoteDraft>> {
        let response: NotesResponse =
            self.post_json("v1/notes", &NotesRequest { summary }).await?;
        Ok(response.notes)
    }

    async fn generate_overall_analysis(
        &self,
        summaries: &[Summary],
        kind: WorkKind,
        source_kind: SourceKind,
    ) -> Result<AnalysisDraft> {
        self.post_json("v1/analysis", &AnalysisRequest { summaries, kind, source_kind }).await
    }

    async fn suggest_folder_names(&self, sample_titles: &[String]) -> Result<Vec<String>> {
        let response: FolderNamesResponse =
            self.post_json("v1/folders/names", &FolderNamesRequest { titles: sample_titles }).await?;
        Ok(response.names)
    }

    async fn assign_folder_batch(
        &self,
        notes: &[FolderCandidate],
        taxonomy: &[String],
    ) -> Result<Vec<FolderAssignment>> {
        let response: FolderAssignResponse =
            self.post_json("v1/folders/assign", &FolderAssignRequest { notes, taxonomy }).await?;
        Ok(response.assignments)
    }

    async fn explain_link_relationship(&self, a: &Note, b: &Note) -> Result<LinkVerdict> {
        self.post_json("v1/links/explain", &LinkRequest { a, b }).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let response: std::result::Result<EmbedResponse, TomeError> =
            self.post_json("v1/embed", &EmbedRequest { text }).await;
        match response {
            Ok(r) => Ok(r.embedding),
            Err(TomeError::Model(msg)) => Err(TomeError::Embedding(msg)),
            Err(e) => Err(e),
        }
    }
}

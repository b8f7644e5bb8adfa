//! CryoET Data Portal client.
//!
//! The portal is consumed through the [`DataPortal`] trait; the concrete
//! [`CryoEtPortalClient`] talks to the portal's public GraphQL endpoint.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::ToolError;

pub const DEFAULT_PORTAL_URL: &str = "https://graphql.cryoetdataportal.cziscience.com/graphql";

/// Browse page handed to the agents as the starting point for browser work.
pub const PORTAL_BROWSE_URL: &str = "https://cryoetdataportal.czscience.com/browse-data/datasets";

const DEFAULT_SEARCH_LIMIT: u32 = 25;

/// Voxel-spacing (resolution) range in Ångström, parsed from `"min-max"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolutionRange {
    pub min: f64,
    pub max: f64,
}

impl Default for ResolutionRange {
    fn default() -> Self {
        Self { min: 0.0, max: 5.0 }
    }
}

impl FromStr for ResolutionRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (min, max) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| format!("expected a range like '0-5', got '{}'", s))?;
        let min: f64 = min
            .trim()
            .parse()
            .map_err(|_| format!("invalid range minimum: '{}'", min.trim()))?;
        let max: f64 = max
            .trim()
            .parse()
            .map_err(|_| format!("invalid range maximum: '{}'", max.trim()))?;
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(format!("invalid range: {} > {}", min, max));
        }
        Ok(Self { min, max })
    }
}

impl std::fmt::Display for ResolutionRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.min, self.max)
    }
}

/// Search parameters for datasets.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchCriteria {
    pub query: String,
    pub range_min: f64,
    pub range_max: f64,
    pub limit: u32,
}

impl SearchCriteria {
    pub fn new(query: impl Into<String>, range: ResolutionRange) -> Self {
        Self {
            query: query.into(),
            range_min: range.min,
            range_max: range.max,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

/// One dataset in a search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub authors: Vec<String>,
    pub release_date: Option<String>,
    pub runs_count: u64,
}

/// A tomogram inside a dataset; the downloadable artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TomogramInfo {
    pub id: String,
    pub name: String,
    pub voxel_spacing: Option<f64>,
    pub download_url: Option<String>,
}

/// Full dataset record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordDetail {
    pub id: String,
    pub name: String,
    pub description: String,
    pub authors: Vec<String>,
    pub release_date: Option<String>,
    pub tomograms: Vec<TomogramInfo>,
}

impl RecordDetail {
    pub fn tomogram(&self, artifact_id: &str) -> Option<&TomogramInfo> {
        self.tomograms.iter().find(|t| t.id == artifact_id)
    }
}

/// Query surface of a scientific data portal.
#[async_trait]
pub trait DataPortal: Send + Sync {
    async fn search(&self, criteria: &SearchCriteria) -> anyhow::Result<Vec<RecordSummary>>;

    async fn get_details(&self, record_id: &str) -> anyhow::Result<RecordDetail>;

    /// Download one artifact of a record into `dest_dir`, returning the file path.
    async fn download_artifact(
        &self,
        record_id: &str,
        artifact_id: &str,
        dest_dir: &Path,
    ) -> anyhow::Result<PathBuf>;
}

/// File name used for a downloaded tomogram.
pub fn artifact_file_name(artifact_id: &str) -> String {
    let safe: String = artifact_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("tomogram_{}.mrc", safe)
}

const SEARCH_QUERY: &str = r#"
query SearchDatasets($title: String!, $minSpacing: Float!, $maxSpacing: Float!, $limit: Int!) {
  datasets(
    where: {
      title: { _ilike: $title }
      runs: { tomogramVoxelSpacings: { voxelSpacing: { _gte: $minSpacing, _lte: $maxSpacing } } }
    }
    limitOffset: { limit: $limit }
  ) {
    id
    title
    description
    releaseDate
    authors { edges { node { name } } }
    runsAggregate { aggregate { count } }
  }
}
"#;

const DETAIL_QUERY: &str = r#"
query DatasetDetails($id: Int!) {
  datasets(where: { id: { _eq: $id } }) {
    id
    title
    description
    releaseDate
    authors { edges { node { name } } }
    runs {
      edges {
        node {
          tomograms { edges { node { id name voxelSpacing httpsMrcFile } } }
        }
      }
    }
  }
}
"#;

#[derive(Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Deserialize)]
struct Connection<T> {
    #[serde(default = "Vec::new")]
    edges: Vec<Edge<T>>,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self { edges: Vec::new() }
    }
}

#[derive(Deserialize)]
struct Edge<T> {
    node: T,
}

impl<T> Connection<T> {
    fn into_nodes(self) -> impl Iterator<Item = T> {
        self.edges.into_iter().map(|e| e.node)
    }
}

#[derive(Deserialize)]
struct AuthorNode {
    #[serde(default)]
    name: String,
}

#[derive(Deserialize, Default)]
struct Aggregate {
    #[serde(default)]
    aggregate: Vec<AggregateCount>,
}

#[derive(Deserialize)]
struct AggregateCount {
    #[serde(default)]
    count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatasetNode {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    authors: Connection<AuthorNode>,
    #[serde(default)]
    runs_aggregate: Option<Aggregate>,
    #[serde(default)]
    runs: Connection<RunNode>,
}

#[derive(Deserialize)]
struct RunNode {
    #[serde(default)]
    tomograms: Connection<TomogramNode>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TomogramNode {
    #[serde(deserialize_with = "id_string")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    voxel_spacing: Option<f64>,
    #[serde(default)]
    https_mrc_file: Option<String>,
}

#[derive(Deserialize)]
struct DatasetsData {
    #[serde(default)]
    datasets: Vec<DatasetNode>,
}

/// Portal ids are integers on the wire; the rest of the crate treats them as
/// opaque strings.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected id: {}", other))),
    }
}

impl DatasetNode {
    fn authors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.authors)
            .into_nodes()
            .map(|a| a.name)
            .filter(|n| !n.is_empty())
            .collect()
    }

    fn into_summary(mut self) -> RecordSummary {
        let authors = self.authors();
        let runs_count = self
            .runs_aggregate
            .as_ref()
            .and_then(|a| a.aggregate.first())
            .map(|c| c.count)
            .unwrap_or(0);
        RecordSummary {
            id: self.id,
            name: self.title,
            description: self.description.unwrap_or_default(),
            authors,
            release_date: self.release_date,
            runs_count,
        }
    }

    fn into_detail(mut self) -> RecordDetail {
        let authors = self.authors();
        let tomograms = self
            .runs
            .into_nodes()
            .flat_map(|run| run.tomograms.into_nodes())
            .map(|t| TomogramInfo {
                name: t.name.unwrap_or_else(|| format!("tomogram {}", t.id)),
                id: t.id,
                voxel_spacing: t.voxel_spacing,
                download_url: t.https_mrc_file,
            })
            .collect();
        RecordDetail {
            id: self.id,
            name: self.title,
            description: self.description.unwrap_or_default(),
            authors,
            release_date: self.release_date,
            tomograms,
        }
    }
}

/// GraphQL client for the CryoET Data Portal.
pub struct CryoEtPortalClient {
    client: reqwest::Client,
    endpoint: String,
}

impl CryoEtPortalClient {
    pub fn new(endpoint: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (compatible; cryoet-scout/0.1)")
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> anyhow::Result<T> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .context("portal request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("portal returned {}: {}", status, body);
        }

        let parsed: GraphQlResponse<T> = response
            .json()
            .await
            .context("failed to parse portal response")?;

        if !parsed.errors.is_empty() {
            let messages: Vec<String> = parsed.errors.into_iter().map(|e| e.message).collect();
            anyhow::bail!("portal query failed: {}", messages.join("; "));
        }
        parsed
            .data
            .ok_or_else(|| anyhow::anyhow!("portal response carried no data"))
    }

    async fn fetch_dataset(&self, record_id: &str) -> anyhow::Result<DatasetNode> {
        let id: i64 = record_id.trim().parse().map_err(|_| {
            ToolError::InvalidArguments(format!("dataset id must be numeric, got '{}'", record_id))
        })?;
        let data: DatasetsData = self.graphql(DETAIL_QUERY, json!({ "id": id })).await?;
        data.datasets
            .into_iter()
            .next()
            .ok_or_else(|| ToolError::NotFound(format!("dataset {}", record_id)).into())
    }
}

#[async_trait]
impl DataPortal for CryoEtPortalClient {
    async fn search(&self, criteria: &SearchCriteria) -> anyhow::Result<Vec<RecordSummary>> {
        debug!(query = %criteria.query, min = criteria.range_min, max = criteria.range_max, "Searching portal");
        let data: DatasetsData = self
            .graphql(
                SEARCH_QUERY,
                json!({
                    "title": format!("%{}%", criteria.query),
                    "minSpacing": criteria.range_min,
                    "maxSpacing": criteria.range_max,
                    "limit": criteria.limit,
                }),
            )
            .await?;
        Ok(data
            .datasets
            .into_iter()
            .map(DatasetNode::into_summary)
            .collect())
    }

    async fn get_details(&self, record_id: &str) -> anyhow::Result<RecordDetail> {
        Ok(self.fetch_dataset(record_id).await?.into_detail())
    }

    async fn download_artifact(
        &self,
        record_id: &str,
        artifact_id: &str,
        dest_dir: &Path,
    ) -> anyhow::Result<PathBuf> {
        let detail = self.get_details(record_id).await?;
        let tomogram = detail.tomogram(artifact_id).ok_or_else(|| {
            ToolError::NotFound(format!(
                "tomogram {} not found in dataset {}",
                artifact_id, record_id
            ))
        })?;
        let url = tomogram.download_url.as_deref().ok_or_else(|| {
            ToolError::NotFound(format!("tomogram {} has no downloadable file", artifact_id))
        })?;

        tokio::fs::create_dir_all(dest_dir)
            .await
            .with_context(|| format!("failed to create {}", dest_dir.display()))?;
        let path = dest_dir.join(artifact_file_name(artifact_id));
        let partial = path.with_extension("mrc.part");

        info!(url = %url, path = %path.display(), "Downloading tomogram");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("download request failed")?;
        if !response.status().is_success() {
            anyhow::bail!("download returned {}", response.status());
        }

        let mut file = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("failed to create {}", partial.display()))?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("download interrupted")?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, &path).await?;

        info!(bytes = written, path = %path.display(), "Download complete");
        Ok(path)
    }
}

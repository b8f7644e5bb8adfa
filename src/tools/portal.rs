//! Data-portal tools: dataset search, detail lookup and tomogram download.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{optional_f64, required_id, required_str, Tool, ToolEffect};
use crate::error::ToolError;
use crate::portal::{DataPortal, SearchCriteria};

/// All portal tools sharing one client.
pub fn portal_tools(portal: Arc<dyn DataPortal>, output_dir: PathBuf) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(SearchRecords::new(portal.clone())) as Arc<dyn Tool>,
        Arc::new(GetDetails::new(portal.clone())),
        Arc::new(DownloadArtifact::new(portal, output_dir)),
    ]
}

/// Search datasets by name and voxel-spacing range.
pub struct SearchRecords {
    portal: Arc<dyn DataPortal>,
}

impl SearchRecords {
    pub fn new(portal: Arc<dyn DataPortal>) -> Self {
        Self { portal }
    }
}

#[async_trait]
impl Tool for SearchRecords {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search CryoET Data Portal datasets whose name matches a query and that contain tomograms with a voxel spacing inside [range_min, range_max] Å. Returns the match count and dataset summaries (id, name, description, authors, release date, run count)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to match against dataset names, e.g. 'spike protein'"
                },
                "range_min": {
                    "type": "number",
                    "description": "Minimum voxel spacing in Å"
                },
                "range_max": {
                    "type": "number",
                    "description": "Maximum voxel spacing in Å"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of datasets to return (default: 25)"
                }
            },
            "required": ["query", "range_min", "range_max"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let query = required_str(&args, "query")?;
        let range_min = required_number(&args, "range_min")?;
        let range_max = required_number(&args, "range_max")?;
        if range_min > range_max {
            return Err(ToolError::InvalidArguments(format!(
                "range_min ({}) is greater than range_max ({})",
                range_min, range_max
            ))
            .into());
        }

        let mut criteria = SearchCriteria::new(query, Default::default());
        criteria.range_min = range_min;
        criteria.range_max = range_max;
        if let Some(limit) = args["limit"].as_u64() {
            criteria.limit = limit.clamp(1, 100) as u32;
        }

        let records = self.portal.search(&criteria).await?;
        Ok(json!({
            "count": records.len(),
            "records": records,
        }))
    }
}

/// Fetch one dataset with its tomograms.
pub struct GetDetails {
    portal: Arc<dyn DataPortal>,
}

impl GetDetails {
    pub fn new(portal: Arc<dyn DataPortal>) -> Self {
        Self { portal }
    }
}

#[async_trait]
impl Tool for GetDetails {
    fn name(&self) -> &str {
        "get_details"
    }

    fn description(&self) -> &str {
        "Get detailed information about one dataset, including its tomograms (id, name, voxel spacing, download URL)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "record_id": {
                    "type": "string",
                    "description": "Dataset id as returned by search"
                }
            },
            "required": ["record_id"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let record_id = required_id(&args, "record_id")?;
        let detail = self.portal.get_details(&record_id).await?;
        Ok(serde_json::to_value(detail)?)
    }
}

/// Download a tomogram to the output directory.
pub struct DownloadArtifact {
    portal: Arc<dyn DataPortal>,
    output_dir: PathBuf,
}

impl DownloadArtifact {
    pub fn new(portal: Arc<dyn DataPortal>, output_dir: PathBuf) -> Self {
        Self { portal, output_dir }
    }
}

#[async_trait]
impl Tool for DownloadArtifact {
    fn name(&self) -> &str {
        "download_artifact"
    }

    fn description(&self) -> &str {
        "Download one tomogram (MRC file) of a dataset to the local results directory. Large files; only download when explicitly required. Returns the local file path."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "record_id": {
                    "type": "string",
                    "description": "Dataset id"
                },
                "artifact_id": {
                    "type": "string",
                    "description": "Tomogram id from get_details"
                }
            },
            "required": ["record_id", "artifact_id"]
        })
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::Write
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let record_id = required_id(&args, "record_id")?;
        let artifact_id = required_id(&args, "artifact_id")?;
        let path = self
            .portal
            .download_artifact(&record_id, &artifact_id, &self.output_dir)
            .await?;
        Ok(json!({ "file_path": path.to_string_lossy() }))
    }
}

fn required_number(args: &Value, key: &str) -> anyhow::Result<f64> {
    optional_f64(args, key)?
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing '{}' argument", key)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use crate::testing::FakePortal;

    #[tokio::test]
    async fn search_returns_count_and_records() {
        let portal = Arc::new(FakePortal::with_datasets(&[("1", "Spike protein"), ("2", "Ribosome")]));
        let tool = SearchRecords::new(portal.clone());
        let out = tool
            .execute(json!({"query": "spike", "range_min": 0, "range_max": 5}))
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        assert_eq!(out["records"][0]["name"], "Spike protein");
        assert_eq!(portal.last_criteria().unwrap().range_max, 5.0);
    }

    #[tokio::test]
    async fn search_rejects_inverted_range() {
        let tool = SearchRecords::new(Arc::new(FakePortal::default()));
        let err = tool
            .execute(json!({"query": "spike", "range_min": 9, "range_max": 1}))
            .await
            .unwrap_err();
        assert_eq!(ToolErrorKind::classify(&err), ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn search_requires_range() {
        let tool = SearchRecords::new(Arc::new(FakePortal::default()));
        let err = tool.execute(json!({"query": "spike"})).await.unwrap_err();
        assert_eq!(ToolErrorKind::classify(&err), ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn details_for_missing_record_is_not_found() {
        let tool = GetDetails::new(Arc::new(FakePortal::default()));
        let err = tool.execute(json!({"record_id": 99})).await.unwrap_err();
        assert_eq!(ToolErrorKind::classify(&err), ToolErrorKind::NotFound);
    }

    #[tokio::test]
    async fn download_writes_into_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let portal = Arc::new(FakePortal::with_datasets(&[("1", "Spike protein")]));
        let tool = DownloadArtifact::new(portal, dir.path().to_path_buf());
        assert_eq!(tool.effect(), ToolEffect::Write);

        let out = tool
            .execute(json!({"record_id": "1", "artifact_id": "1-t0"}))
            .await
            .unwrap();
        let path = PathBuf::from(out["file_path"].as_str().unwrap());
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
    }
}

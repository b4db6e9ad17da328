//! Workflow definition staging
//!
//! Copies the configured definition files into the directory the workload
//! imports from, and summarises what ended up there.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use shared::{component_debug, component_warn, ComponentId, DefinitionSummary};

use crate::error::{SupervisorError, SupervisorResult};
use crate::traits::{FileStager, StagingPlan, StagingReport};

pub const DEFAULT_WORKFLOW_FILES: [&str; 3] = [
    "youtube_automation_source.json",
    "youtube_automation_game.json",
    "youtube_automation_trend.json",
];

/// Real file stager on the local filesystem
#[derive(Debug, Default, Clone)]
pub struct RealFileStager;

impl RealFileStager {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileStager for RealFileStager {
    async fn stage(&self, plan: &StagingPlan) -> SupervisorResult<StagingReport> {
        tokio::fs::create_dir_all(&plan.dest_dir)
            .await
            .map_err(|e| SupervisorError::staging("create directory", &plan.dest_dir, e))?;

        let mut report = StagingReport::default();
        for file in &plan.files {
            let source = plan.source_dir.join(file);
            if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
                component_warn!(ComponentId::current(), "⚠️  Workflow file not found: {}", source.display());
                report.missing.push(file.clone());
                continue;
            }

            let dest = plan.dest_dir.join(file);
            tokio::fs::copy(&source, &dest)
                .await
                .map_err(|e| SupervisorError::staging("copy", &source, e))?;
            component_debug!(ComponentId::current(), "📄 Staged {} -> {}", source.display(), dest.display());
            report.copied.push(file.clone());
        }

        Ok(report)
    }

    async fn inspect(&self, plan: &StagingPlan) -> Vec<DefinitionSummary> {
        let mut summaries = Vec::with_capacity(plan.files.len());
        for file in &plan.files {
            summaries.push(summarize(file, &plan.dest_dir.join(file)).await);
        }
        summaries
    }
}

async fn summarize(name: &str, path: &Path) -> DefinitionSummary {
    let mut summary = DefinitionSummary {
        name: name.to_string(),
        exists: false,
        active: false,
        nodes: 0,
        triggers: 0,
        error: None,
    };

    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return summary,
        Err(e) => {
            summary.error = Some(e.to_string());
            return summary;
        }
    };
    summary.exists = true;

    match serde_json::from_str::<Value>(&content) {
        Ok(definition) => {
            let nodes = definition["nodes"].as_array().map(Vec::as_slice).unwrap_or_default();
            summary.active = definition["active"].as_bool().unwrap_or(false);
            summary.nodes = nodes.len();
            summary.triggers = nodes.iter().filter(|node| is_trigger(node)).count();
        }
        Err(e) => summary.error = Some(e.to_string()),
    }

    summary
}

fn is_trigger(node: &Value) -> bool {
    node["type"]
        .as_str()
        .map(|kind| {
            let kind = kind.to_lowercase();
            kind.contains("cron") || kind.contains("trigger")
        })
        .unwrap_or(false)
}

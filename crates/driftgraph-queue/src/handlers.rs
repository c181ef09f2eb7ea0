use crate::job::{ChangedFile, Job, JobPayload};
use crate::worker::JobHandler;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use driftgraph_core::{
    CodebaseConnection, ConnectionDirectory, EntityType, ExpiringStore, FileContentReader,
    FileEntityResolver,
};
use driftgraph_graph::{
    AlertGenerationSummary, AlertGenerator, GraphService, PropagationEvent, PropagationResult,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Collaborators needed to re-sync changed code files.
pub struct CodebaseSources {
    reader: Arc<dyn FileContentReader>,
    resolver: Arc<dyn FileEntityResolver>,
    connections: Arc<dyn ConnectionDirectory>,
    cache: ExpiringStore<String, CodebaseConnection>,
}

impl CodebaseSources {
    pub fn new(
        reader: Arc<dyn FileContentReader>,
        resolver: Arc<dyn FileEntityResolver>,
        connections: Arc<dyn ConnectionDirectory>,
        cache: ExpiringStore<String, CodebaseConnection>,
    ) -> Self {
        Self {
            reader,
            resolver,
            connections,
            cache,
        }
    }

    async fn connection(&self, connection_id: &str) -> Result<CodebaseConnection> {
        let key = connection_id.to_string();
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }
        let connection = self
            .connections
            .connection(connection_id)
            .await?
            .ok_or_else(|| anyhow!("unknown codebase connection {connection_id}"))?;
        self.cache.insert(key, connection.clone());
        Ok(connection)
    }

    pub fn cache(&self) -> &ExpiringStore<String, CodebaseConnection> {
        &self.cache
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropagateChangeOutcome {
    pub event: PropagationEvent,
    /// Follow-up pass; absent when the content was unchanged.
    pub deep: Option<PropagationResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeDriftOutcome {
    pub synced: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub alerts_created: usize,
}

/// Dispatches graph jobs to the detector, generator, service and propagator.
pub struct GraphJobHandler {
    service: Arc<GraphService>,
    codebase: Option<CodebaseSources>,
}

impl GraphJobHandler {
    pub fn new(service: Arc<GraphService>) -> Self {
        Self {
            service,
            codebase: None,
        }
    }

    pub fn with_codebase(mut self, sources: CodebaseSources) -> Self {
        self.codebase = Some(sources);
        self
    }

    #[instrument(skip(self))]
    pub async fn full_scan(&self, project_id: &str) -> Result<AlertGenerationSummary> {
        let report = self
            .service
            .detector()
            .scan_project(project_id)
            .await
            .context("scanning project for drift")?;
        let summary = AlertGenerator::new(self.service.repository())
            .generate(&report)
            .await
            .context("generating drift alerts")?;
        Ok(summary)
    }

    #[instrument(skip(self, new_content))]
    pub async fn propagate_change(
        &self,
        project_id: &str,
        entity_type: EntityType,
        entity_id: &str,
        new_content: &str,
    ) -> Result<PropagateChangeOutcome> {
        let event = self
            .service
            .propagate_change(project_id, entity_type, entity_id, new_content)
            .await
            .context("propagating change")?;
        if event.is_noop() {
            return Ok(PropagateChangeOutcome { event, deep: None });
        }

        let deep = self
            .service
            .propagator(true)
            .propagate_with_depth(
                project_id,
                event.changed_node.id,
                self.service.config().deep_propagation_depth,
            )
            .await
            .context("deep propagation pass")?;
        Ok(PropagateChangeOutcome {
            event,
            deep: Some(deep),
        })
    }

    #[instrument(skip(self, changed_files), fields(files = changed_files.len()))]
    pub async fn code_drift_check(
        &self,
        project_id: &str,
        connection_id: &str,
        changed_files: &[ChangedFile],
    ) -> Result<CodeDriftOutcome> {
        let sources = self
            .codebase
            .as_ref()
            .context("code drift checks need codebase sources")?;
        let mut outcome = CodeDriftOutcome::default();

        for file in changed_files {
            let Some(entity_id) = sources
                .resolver
                .resolve_file_entity_id(project_id, connection_id, &file.path)
                .await
                .with_context(|| format!("resolving {}", file.path))?
            else {
                debug!(path = %file.path, "file has no graph entity, skipping");
                outcome.skipped += 1;
                continue;
            };

            let content = match &file.content {
                Some(content) => content.clone(),
                None => {
                    let connection = sources.connection(connection_id).await?;
                    match sources
                        .reader
                        .get_file_content(
                            connection_id,
                            &connection.owner,
                            &connection.repo,
                            &file.path,
                            &connection.git_ref,
                        )
                        .await
                        .with_context(|| format!("reading {}", file.path))?
                    {
                        Some(content) => content,
                        None => {
                            warn!(path = %file.path, "file content unavailable, skipping");
                            outcome.skipped += 1;
                            continue;
                        }
                    }
                }
            };

            match self
                .service
                .propagate_change(project_id, EntityType::CodebaseFile, &entity_id, &content)
                .await
            {
                Ok(event) if event.is_noop() => outcome.unchanged += 1,
                Ok(event) => {
                    outcome.synced += 1;
                    outcome.alerts_created += event.alerts.len();
                }
                Err(e) if e.is_not_found() => {
                    debug!(path = %file.path, %entity_id, "entity has no graph node, skipping");
                    outcome.skipped += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("syncing {}", file.path));
                }
            }
        }

        info!(
            synced = outcome.synced,
            unchanged = outcome.unchanged,
            skipped = outcome.skipped,
            "code drift check finished"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl JobHandler for GraphJobHandler {
    async fn handle(&self, job: &Job) -> Result<()> {
        match &job.payload {
            JobPayload::FullScan { project_id } => {
                self.full_scan(project_id).await?;
            }
            JobPayload::PropagateChange {
                project_id,
                entity_type,
                entity_id,
                new_content,
            } => {
                self.propagate_change(project_id, *entity_type, entity_id, new_content)
                    .await?;
            }
            JobPayload::CodeDriftCheck {
                project_id,
                connection_id,
                changed_files,
            } => {
                self.code_drift_check(project_id, connection_id, changed_files)
                    .await?;
            }
        }
        Ok(())
    }
}

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bddbench_client::UserClient;
use bddbench_core::{
    aggregate, aggregate_kind, BenchError, BenchResult, OperationKind, Sample, StopCondition,
};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::{dominant_status_class, BenchEnv, ScenarioOutcome};
use crate::kpi::user_record;
use crate::pool::{WorkerOperation, WorkerPool};
use crate::report::ScenarioReport;

/// Create `num_users` users concurrently, list them once, then delete every
/// user that was created.
#[derive(Debug, Clone)]
pub struct UserScenario {
    pub scenario_id: String,
    pub num_users: usize,
    pub workers: usize,
    /// Users are named `{prefix}-{8 hex chars}`.
    pub name_prefix: String,
}

/// Records the created user id as the sample target.
struct CreateUser {
    client: UserClient,
    prefix: String,
}

#[async_trait]
impl WorkerOperation for CreateUser {
    async fn execute(&mut self, _sequence: u64) -> Sample {
        let suffix = Uuid::new_v4().simple().to_string();
        let name = format!("{}-{}", self.prefix, &suffix[..8]);
        match self.client.create(&name).await {
            (sample, Some(id)) => sample.with_target(id),
            (sample, None) => sample,
        }
    }
}

struct DeleteUsers {
    client: UserClient,
    ids: VecDeque<String>,
}

#[async_trait]
impl WorkerOperation for DeleteUsers {
    async fn execute(&mut self, _sequence: u64) -> Sample {
        match self.ids.pop_front() {
            Some(id) => self.client.delete(&id).await,
            None => Sample::skipped(OperationKind::UserDelete),
        }
    }
}

impl UserScenario {
    pub fn new(scenario_id: impl Into<String>, num_users: usize, workers: usize) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            num_users,
            workers,
            name_prefix: "bddbench-user".to_string(),
        }
    }

    /// # Errors
    ///
    /// Returns `BenchError::Validation` for zero users or workers. Rejected
    /// calls (401, 403, ...) are counted as errors, not returned.
    pub async fn run(&self, env: &BenchEnv) -> BenchResult<ScenarioOutcome> {
        if self.num_users == 0 {
            return Err(BenchError::validation("num_users must be > 0"));
        }
        let client = UserClient::new(Arc::clone(&env.api));
        let started = std::time::Instant::now();

        info!(
            scenario_id = %self.scenario_id,
            num_users = self.num_users,
            workers = self.workers,
            "Starting user lifecycle benchmark"
        );

        let create = WorkerPool::new(
            self.workers,
            StopCondition::Count {
                total: self.num_users as u64,
            },
        )?
        .run(|_| CreateUser {
            client: client.clone(),
            prefix: self.name_prefix.clone(),
        })
        .await?;
        let created: Vec<String> = create
            .samples
            .iter()
            .filter(|s| s.is_success())
            .filter_map(|s| s.target.clone())
            .collect();
        if created.len() < self.num_users {
            warn!(
                requested = self.num_users,
                created = created.len(),
                status_class = %dominant_status_class(&create.samples),
                "Not every user could be created"
            );
        }

        let list_started = std::time::Instant::now();
        let list = client.list().await;
        let list_wall = list_started.elapsed();

        let (delete_samples, delete_wall) = if created.is_empty() {
            (Vec::new(), Duration::ZERO)
        } else {
            let workers = self.workers.min(created.len());
            let mut ids = created.iter().cloned();
            let operations = WorkerPool::shares(created.len() as u64, workers)
                .into_iter()
                .map(|share| DeleteUsers {
                    client: client.clone(),
                    ids: ids.by_ref().take(share as usize).collect(),
                })
                .collect();
            let run = WorkerPool::new(
                workers,
                StopCondition::Count {
                    total: created.len() as u64,
                },
            )?
            .run_operations(operations)
            .await?;
            (run.samples, run.wall_clock)
        };

        let create_stats =
            aggregate_kind(&create.samples, OperationKind::UserCreate, create.wall_clock);
        let list_stats = aggregate(std::slice::from_ref(&list), list_wall);
        let delete_stats = aggregate(&delete_samples, delete_wall);

        let mut samples = create.samples;
        samples.push(list);
        samples.extend(delete_samples);
        let stats = aggregate(&samples, started.elapsed());

        let dimensions = env
            .dimensions(&self.scenario_id, env.target_url.as_str())
            .with("status_class", dominant_status_class(&samples));
        let record = user_record(
            &dimensions,
            self.num_users,
            &create_stats,
            &list_stats,
            &delete_stats,
        );
        let report = ScenarioReport::new(
            &self.scenario_id,
            &json!({
                "num_users": self.num_users,
                "workers": self.workers,
                "name_prefix": self.name_prefix,
            }),
            &json!({
                "create": create_stats,
                "list": list_stats,
                "delete": delete_stats,
            }),
            samples.len(),
        )?
        .with_extra(json!({ "created": created.len() }));
        let published = env.reports.publish(&report, &record).await?;

        info!(
            created = created.len(),
            create_errors = create_stats.error_count,
            delete_errors = delete_stats.error_count,
            "User lifecycle benchmark finished"
        );

        Ok(ScenarioOutcome {
            run_id: env.run_id,
            stats,
            record,
            published,
            context: None,
        })
    }
}

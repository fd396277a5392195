// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed store implementation.

use std::path::Path;

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::entities::{
    ActivityInstanceEntity, ByteArrayEntity, EntityLinkEntity, EventSubscriptionEntity,
    ExecutionEntity, IdentityLinkEntity, JobEntity, JobKind, SuspensionState, TaskEntity,
    VariableInstanceEntity,
};
use crate::error::EngineError;

use super::RuntimeStore;

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool and ensure the schema.
    pub async fn new(pool: SqlitePool) -> Result<Self, EngineError> {
        let store = Self { pool };
        store.create_schema().await?;
        Ok(store)
    }

    /// Create and initialize a store from a file path.
    ///
    /// Creates parent directories and the database file as needed,
    /// connects with sensible defaults, and bootstraps the schema.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::Storage {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .map_err(|e| EngineError::Storage {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        Self::new(pool).await
    }

    async fn create_schema(&self) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                revision INTEGER NOT NULL,
                process_definition_id TEXT NOT NULL,
                process_definition_key TEXT,
                process_instance_id TEXT NOT NULL,
                root_process_instance_id TEXT NOT NULL,
                parent_id TEXT REFERENCES executions(id),
                super_execution_id TEXT REFERENCES executions(id),
                sub_process_instance_id TEXT,
                current_activity_id TEXT,
                is_active INTEGER NOT NULL,
                is_ended INTEGER NOT NULL,
                is_scope INTEGER NOT NULL,
                is_concurrent INTEGER NOT NULL,
                is_event_scope INTEGER NOT NULL,
                is_multi_instance_root INTEGER NOT NULL,
                suspension_state TEXT NOT NULL,
                business_key TEXT,
                tenant_id TEXT,
                start_time TEXT NOT NULL,
                start_user_id TEXT,
                start_activity_id TEXT,
                callback_id TEXT,
                callback_type TEXT,
                reference_id TEXT,
                reference_type TEXT,
                propagated_stage_instance_id TEXT,
                lock_time TEXT,
                lock_owner TEXT,
                count_enabled INTEGER NOT NULL,
                event_subscription_count INTEGER NOT NULL DEFAULT 0,
                task_count INTEGER NOT NULL DEFAULT 0,
                job_count INTEGER NOT NULL DEFAULT 0,
                timer_job_count INTEGER NOT NULL DEFAULT 0,
                suspended_job_count INTEGER NOT NULL DEFAULT 0,
                dead_letter_job_count INTEGER NOT NULL DEFAULT 0,
                external_worker_job_count INTEGER NOT NULL DEFAULT 0,
                variable_count INTEGER NOT NULL DEFAULT 0,
                identity_link_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes for tree walks and cascading deletes
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_executions_parent ON executions(parent_id)",
            "CREATE INDEX IF NOT EXISTS idx_executions_proc_inst ON executions(process_instance_id)",
            "CREATE INDEX IF NOT EXISTS idx_executions_root ON executions(root_process_instance_id)",
            "CREATE INDEX IF NOT EXISTS idx_executions_super ON executions(super_execution_id)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                revision INTEGER NOT NULL,
                name TEXT,
                task_definition_key TEXT,
                execution_id TEXT,
                process_instance_id TEXT,
                process_definition_id TEXT,
                assignee TEXT,
                owner TEXT,
                priority INTEGER NOT NULL,
                create_time TEXT NOT NULL,
                due_date TEXT,
                tenant_id TEXT,
                delete_reason TEXT,
                count_enabled INTEGER NOT NULL,
                identity_link_count INTEGER NOT NULL DEFAULT 0,
                variable_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_execution ON tasks(execution_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_proc_inst ON tasks(process_instance_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                revision INTEGER NOT NULL,
                kind TEXT NOT NULL,
                execution_id TEXT,
                process_instance_id TEXT,
                process_definition_id TEXT,
                element_id TEXT,
                handler_type TEXT,
                handler_config TEXT,
                retries INTEGER NOT NULL,
                exclusive INTEGER NOT NULL,
                due_date TEXT,
                created_at TEXT NOT NULL,
                tenant_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_execution ON jobs(execution_id, kind)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS variables (
                id TEXT PRIMARY KEY,
                revision INTEGER NOT NULL,
                name TEXT NOT NULL,
                execution_id TEXT,
                task_id TEXT,
                process_instance_id TEXT,
                value_json TEXT NOT NULL,
                byte_array_id TEXT,
                tenant_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_variables_execution ON variables(execution_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_variables_task ON variables(task_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS byte_arrays (
                id TEXT PRIMARY KEY,
                name TEXT,
                bytes BLOB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS event_subscriptions (
                id TEXT PRIMARY KEY,
                revision INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                event_name TEXT,
                execution_id TEXT,
                process_instance_id TEXT,
                activity_id TEXT,
                process_definition_id TEXT,
                created TEXT NOT NULL,
                tenant_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_execution ON event_subscriptions(execution_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS identity_links (
                id TEXT PRIMARY KEY,
                link_type TEXT NOT NULL,
                user_id TEXT,
                group_id TEXT,
                task_id TEXT,
                process_instance_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity_links (
                id TEXT PRIMARY KEY,
                link_type TEXT NOT NULL,
                scope_id TEXT NOT NULL,
                scope_type TEXT NOT NULL,
                reference_scope_id TEXT NOT NULL,
                reference_scope_type TEXT NOT NULL,
                root_scope_id TEXT NOT NULL,
                create_time TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activity_instances (
                id TEXT PRIMARY KEY,
                revision INTEGER NOT NULL,
                process_definition_id TEXT NOT NULL,
                process_instance_id TEXT NOT NULL,
                execution_id TEXT NOT NULL,
                activity_id TEXT NOT NULL,
                activity_name TEXT,
                activity_type TEXT NOT NULL,
                assignee TEXT,
                task_id TEXT,
                start_time TEXT NOT NULL,
                end_time TEXT,
                duration_ms INTEGER,
                delete_reason TEXT,
                tenant_id TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_activity_instances_execution ON activity_instances(execution_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn map_execution(row: &SqliteRow) -> Result<ExecutionEntity, EngineError> {
    let mut execution = ExecutionEntity::new(
        row.try_get::<String, _>("id")?,
        row.try_get::<String, _>("process_definition_id")?,
    );
    execution.revision = row.try_get("revision")?;
    execution.process_definition_key = row.try_get("process_definition_key")?;
    execution.process_instance_id = row.try_get("process_instance_id")?;
    execution.root_process_instance_id = row.try_get("root_process_instance_id")?;
    execution.parent_id = row.try_get("parent_id")?;
    execution.super_execution_id = row.try_get("super_execution_id")?;
    execution.sub_process_instance_id = row.try_get("sub_process_instance_id")?;
    execution.current_activity_id = row.try_get("current_activity_id")?;
    execution.is_active = row.try_get("is_active")?;
    execution.is_ended = row.try_get("is_ended")?;
    execution.is_scope = row.try_get("is_scope")?;
    execution.is_concurrent = row.try_get("is_concurrent")?;
    execution.is_event_scope = row.try_get("is_event_scope")?;
    execution.is_multi_instance_root = row.try_get("is_multi_instance_root")?;
    execution.suspension_state =
        SuspensionState::parse(&row.try_get::<String, _>("suspension_state")?);
    execution.business_key = row.try_get("business_key")?;
    execution.tenant_id = row.try_get("tenant_id")?;
    execution.start_time = row.try_get("start_time")?;
    execution.start_user_id = row.try_get("start_user_id")?;
    execution.start_activity_id = row.try_get("start_activity_id")?;
    execution.callback_id = row.try_get("callback_id")?;
    execution.callback_type = row.try_get("callback_type")?;
    execution.reference_id = row.try_get("reference_id")?;
    execution.reference_type = row.try_get("reference_type")?;
    execution.propagated_stage_instance_id = row.try_get("propagated_stage_instance_id")?;
    execution.lock_time = row.try_get("lock_time")?;
    execution.lock_owner = row.try_get("lock_owner")?;
    execution.count_enabled = row.try_get("count_enabled")?;
    execution.counts.event_subscriptions = row.try_get("event_subscription_count")?;
    execution.counts.tasks = row.try_get("task_count")?;
    execution.counts.jobs = row.try_get("job_count")?;
    execution.counts.timer_jobs = row.try_get("timer_job_count")?;
    execution.counts.suspended_jobs = row.try_get("suspended_job_count")?;
    execution.counts.dead_letter_jobs = row.try_get("dead_letter_job_count")?;
    execution.counts.external_worker_jobs = row.try_get("external_worker_job_count")?;
    execution.counts.variables = row.try_get("variable_count")?;
    execution.counts.identity_links = row.try_get("identity_link_count")?;
    Ok(execution)
}

fn map_task(row: &SqliteRow) -> Result<TaskEntity, EngineError> {
    let mut task = TaskEntity::new(row.try_get::<String, _>("id")?);
    task.revision = row.try_get("revision")?;
    task.name = row.try_get("name")?;
    task.task_definition_key = row.try_get("task_definition_key")?;
    task.execution_id = row.try_get("execution_id")?;
    task.process_instance_id = row.try_get("process_instance_id")?;
    task.process_definition_id = row.try_get("process_definition_id")?;
    task.assignee = row.try_get("assignee")?;
    task.owner = row.try_get("owner")?;
    task.priority = row.try_get("priority")?;
    task.create_time = row.try_get("create_time")?;
    task.due_date = row.try_get("due_date")?;
    task.tenant_id = row.try_get("tenant_id")?;
    task.delete_reason = row.try_get("delete_reason")?;
    task.count_enabled = row.try_get("count_enabled")?;
    task.identity_link_count = row.try_get("identity_link_count")?;
    task.variable_count = row.try_get("variable_count")?;
    Ok(task)
}

fn map_job(row: &SqliteRow) -> Result<JobEntity, EngineError> {
    let kind = JobKind::parse(&row.try_get::<String, _>("kind")?);
    let mut job = JobEntity::new(row.try_get::<String, _>("id")?, kind);
    job.revision = row.try_get("revision")?;
    job.execution_id = row.try_get("execution_id")?;
    job.process_instance_id = row.try_get("process_instance_id")?;
    job.process_definition_id = row.try_get("process_definition_id")?;
    job.element_id = row.try_get("element_id")?;
    job.handler_type = row.try_get("handler_type")?;
    job.handler_config = row.try_get("handler_config")?;
    job.retries = row.try_get("retries")?;
    job.exclusive = row.try_get("exclusive")?;
    job.due_date = row.try_get("due_date")?;
    job.created_at = row.try_get("created_at")?;
    job.tenant_id = row.try_get("tenant_id")?;
    Ok(job)
}

fn map_variable(row: &SqliteRow) -> Result<VariableInstanceEntity, EngineError> {
    let mut variable = VariableInstanceEntity::new(
        row.try_get::<String, _>("id")?,
        row.try_get::<String, _>("name")?,
    );
    variable.revision = row.try_get("revision")?;
    variable.execution_id = row.try_get("execution_id")?;
    variable.task_id = row.try_get("task_id")?;
    variable.process_instance_id = row.try_get("process_instance_id")?;
    variable.value = serde_json::from_str(&row.try_get::<String, _>("value_json")?)?;
    variable.byte_array_id = row.try_get("byte_array_id")?;
    variable.tenant_id = row.try_get("tenant_id")?;
    Ok(variable)
}

fn map_subscription(row: &SqliteRow) -> Result<EventSubscriptionEntity, EngineError> {
    let mut subscription = EventSubscriptionEntity::new(
        row.try_get::<String, _>("id")?,
        row.try_get::<String, _>("event_type")?,
    );
    subscription.revision = row.try_get("revision")?;
    subscription.event_name = row.try_get("event_name")?;
    subscription.execution_id = row.try_get("execution_id")?;
    subscription.process_instance_id = row.try_get("process_instance_id")?;
    subscription.activity_id = row.try_get("activity_id")?;
    subscription.process_definition_id = row.try_get("process_definition_id")?;
    subscription.created = row.try_get("created")?;
    subscription.tenant_id = row.try_get("tenant_id")?;
    Ok(subscription)
}

fn map_identity_link(row: &SqliteRow) -> Result<IdentityLinkEntity, EngineError> {
    Ok(IdentityLinkEntity {
        id: row.try_get("id")?,
        link_type: row.try_get("link_type")?,
        user_id: row.try_get("user_id")?,
        group_id: row.try_get("group_id")?,
        task_id: row.try_get("task_id")?,
        process_instance_id: row.try_get("process_instance_id")?,
    })
}

fn map_entity_link(row: &SqliteRow) -> Result<EntityLinkEntity, EngineError> {
    Ok(EntityLinkEntity {
        id: row.try_get("id")?,
        link_type: row.try_get("link_type")?,
        scope_id: row.try_get("scope_id")?,
        scope_type: row.try_get("scope_type")?,
        reference_scope_id: row.try_get("reference_scope_id")?,
        reference_scope_type: row.try_get("reference_scope_type")?,
        root_scope_id: row.try_get("root_scope_id")?,
        create_time: row.try_get("create_time")?,
    })
}

fn map_activity_instance(row: &SqliteRow) -> Result<ActivityInstanceEntity, EngineError> {
    Ok(ActivityInstanceEntity {
        id: row.try_get("id")?,
        revision: row.try_get("revision")?,
        process_definition_id: row.try_get("process_definition_id")?,
        process_instance_id: row.try_get("process_instance_id")?,
        execution_id: row.try_get("execution_id")?,
        activity_id: row.try_get("activity_id")?,
        activity_name: row.try_get("activity_name")?,
        activity_type: row.try_get("activity_type")?,
        assignee: row.try_get("assignee")?,
        task_id: row.try_get("task_id")?,
        start_time: row.try_get("start_time")?,
        end_time: row.try_get("end_time")?,
        duration_ms: row.try_get("duration_ms")?,
        delete_reason: row.try_get("delete_reason")?,
        tenant_id: row.try_get("tenant_id")?,
    })
}

#[async_trait]
impl RuntimeStore for SqliteStore {
    async fn insert_execution(&self, execution: &ExecutionEntity) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO executions (
                id, revision, process_definition_id, process_definition_key,
                process_instance_id, root_process_instance_id, parent_id,
                super_execution_id, sub_process_instance_id, current_activity_id,
                is_active, is_ended, is_scope, is_concurrent, is_event_scope,
                is_multi_instance_root, suspension_state, business_key, tenant_id,
                start_time, start_user_id, start_activity_id, callback_id,
                callback_type, reference_id, reference_type,
                propagated_stage_instance_id, lock_time, lock_owner, count_enabled,
                event_subscription_count, task_count, job_count, timer_job_count,
                suspended_job_count, dead_letter_job_count,
                external_worker_job_count, variable_count, identity_link_count
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                    ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(execution.id.as_str())
        .bind(execution.revision)
        .bind(execution.process_definition_id.as_str())
        .bind(execution.process_definition_key.as_deref())
        .bind(execution.process_instance_id.as_str())
        .bind(execution.root_process_instance_id.as_str())
        .bind(execution.parent_id.as_deref())
        .bind(execution.super_execution_id.as_deref())
        .bind(execution.sub_process_instance_id.as_deref())
        .bind(execution.current_activity_id.as_deref())
        .bind(execution.is_active)
        .bind(execution.is_ended)
        .bind(execution.is_scope)
        .bind(execution.is_concurrent)
        .bind(execution.is_event_scope)
        .bind(execution.is_multi_instance_root)
        .bind(execution.suspension_state.as_str())
        .bind(execution.business_key.as_deref())
        .bind(execution.tenant_id.as_deref())
        .bind(execution.start_time)
        .bind(execution.start_user_id.as_deref())
        .bind(execution.start_activity_id.as_deref())
        .bind(execution.callback_id.as_deref())
        .bind(execution.callback_type.as_deref())
        .bind(execution.reference_id.as_deref())
        .bind(execution.reference_type.as_deref())
        .bind(execution.propagated_stage_instance_id.as_deref())
        .bind(execution.lock_time)
        .bind(execution.lock_owner.as_deref())
        .bind(execution.count_enabled)
        .bind(execution.counts.event_subscriptions)
        .bind(execution.counts.tasks)
        .bind(execution.counts.jobs)
        .bind(execution.counts.timer_jobs)
        .bind(execution.counts.suspended_jobs)
        .bind(execution.counts.dead_letter_jobs)
        .bind(execution.counts.external_worker_jobs)
        .bind(execution.counts.variables)
        .bind(execution.counts.identity_links)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_execution(&self, execution: &ExecutionEntity) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET revision = ?1, parent_id = ?2, super_execution_id = ?3,
                sub_process_instance_id = ?4, current_activity_id = ?5,
                is_active = ?6, is_ended = ?7, is_scope = ?8, is_concurrent = ?9,
                is_event_scope = ?10, is_multi_instance_root = ?11,
                suspension_state = ?12, business_key = ?13, lock_time = ?14,
                lock_owner = ?15, count_enabled = ?16,
                event_subscription_count = ?17, task_count = ?18, job_count = ?19,
                timer_job_count = ?20, suspended_job_count = ?21,
                dead_letter_job_count = ?22, external_worker_job_count = ?23,
                variable_count = ?24, identity_link_count = ?25
            WHERE id = ?26
              AND revision = ?27
            "#,
        )
        .bind(execution.revision)
        .bind(execution.parent_id.as_deref())
        .bind(execution.super_execution_id.as_deref())
        .bind(execution.sub_process_instance_id.as_deref())
        .bind(execution.current_activity_id.as_deref())
        .bind(execution.is_active)
        .bind(execution.is_ended)
        .bind(execution.is_scope)
        .bind(execution.is_concurrent)
        .bind(execution.is_event_scope)
        .bind(execution.is_multi_instance_root)
        .bind(execution.suspension_state.as_str())
        .bind(execution.business_key.as_deref())
        .bind(execution.lock_time)
        .bind(execution.lock_owner.as_deref())
        .bind(execution.count_enabled)
        .bind(execution.counts.event_subscriptions)
        .bind(execution.counts.tasks)
        .bind(execution.counts.jobs)
        .bind(execution.counts.timer_jobs)
        .bind(execution.counts.suspended_jobs)
        .bind(execution.counts.dead_letter_jobs)
        .bind(execution.counts.external_worker_jobs)
        .bind(execution.counts.variables)
        .bind(execution.counts.identity_links)
        .bind(execution.id.as_str())
        .bind(execution.revision - 1)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict {
                kind: "execution",
                id: execution.id.clone(),
            });
        }
        Ok(())
    }

    async fn delete_execution(&self, execution_id: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM executions WHERE id = ?")
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_execution_by_id(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionEntity>, EngineError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_execution).transpose()
    }

    async fn find_child_executions_by_parent_execution_id(
        &self,
        parent_execution_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError> {
        let rows = sqlx::query("SELECT * FROM executions WHERE parent_id = ?")
            .bind(parent_execution_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_execution).collect()
    }

    async fn find_executions_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError> {
        let rows = sqlx::query("SELECT * FROM executions WHERE process_instance_id = ?")
            .bind(process_instance_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_execution).collect()
    }

    async fn find_executions_by_root_process_instance_id(
        &self,
        root_process_instance_id: &str,
    ) -> Result<Vec<ExecutionEntity>, EngineError> {
        let rows = sqlx::query("SELECT * FROM executions WHERE root_process_instance_id = ?")
            .bind(root_process_instance_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_execution).collect()
    }

    async fn find_sub_process_instance_by_super_execution_id(
        &self,
        super_execution_id: &str,
    ) -> Result<Option<ExecutionEntity>, EngineError> {
        let row = sqlx::query("SELECT * FROM executions WHERE super_execution_id = ?")
            .bind(super_execution_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_execution).transpose()
    }

    async fn insert_task(&self, task: &TaskEntity) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, revision, name, task_definition_key, execution_id,
                process_instance_id, process_definition_id, assignee, owner,
                priority, create_time, due_date, tenant_id, delete_reason,
                count_enabled, identity_link_count, variable_count
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task.id.as_str())
        .bind(task.revision)
        .bind(task.name.as_deref())
        .bind(task.task_definition_key.as_deref())
        .bind(task.execution_id.as_deref())
        .bind(task.process_instance_id.as_deref())
        .bind(task.process_definition_id.as_deref())
        .bind(task.assignee.as_deref())
        .bind(task.owner.as_deref())
        .bind(task.priority)
        .bind(task.create_time)
        .bind(task.due_date)
        .bind(task.tenant_id.as_deref())
        .bind(task.delete_reason.as_deref())
        .bind(task.count_enabled)
        .bind(task.identity_link_count)
        .bind(task.variable_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_task(&self, task: &TaskEntity) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET revision = ?1, name = ?2, execution_id = ?3, assignee = ?4,
                owner = ?5, priority = ?6, due_date = ?7, delete_reason = ?8,
                count_enabled = ?9, identity_link_count = ?10, variable_count = ?11
            WHERE id = ?12
              AND revision = ?13
            "#,
        )
        .bind(task.revision)
        .bind(task.name.as_deref())
        .bind(task.execution_id.as_deref())
        .bind(task.assignee.as_deref())
        .bind(task.owner.as_deref())
        .bind(task.priority)
        .bind(task.due_date)
        .bind(task.delete_reason.as_deref())
        .bind(task.count_enabled)
        .bind(task.identity_link_count)
        .bind(task.variable_count)
        .bind(task.id.as_str())
        .bind(task.revision - 1)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict {
                kind: "task",
                id: task.id.clone(),
            });
        }
        Ok(())
    }

    async fn delete_task(&self, task_id: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_task_by_id(&self, task_id: &str) -> Result<Option<TaskEntity>, EngineError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_task).transpose()
    }

    async fn find_tasks_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<TaskEntity>, EngineError> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_task).collect()
    }

    async fn find_tasks_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<TaskEntity>, EngineError> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE process_instance_id = ?")
            .bind(process_instance_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_task).collect()
    }

    async fn insert_job(&self, job: &JobEntity) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, revision, kind, execution_id, process_instance_id,
                process_definition_id, element_id, handler_type, handler_config,
                retries, exclusive, due_date, created_at, tenant_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.as_str())
        .bind(job.revision)
        .bind(job.kind.as_str())
        .bind(job.execution_id.as_deref())
        .bind(job.process_instance_id.as_deref())
        .bind(job.process_definition_id.as_deref())
        .bind(job.element_id.as_deref())
        .bind(job.handler_type.as_deref())
        .bind(job.handler_config.as_deref())
        .bind(job.retries)
        .bind(job.exclusive)
        .bind(job.due_date)
        .bind(job.created_at)
        .bind(job.tenant_id.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_job_by_id(&self, job_id: &str) -> Result<Option<JobEntity>, EngineError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_job).transpose()
    }

    async fn find_jobs_by_execution_id(
        &self,
        kind: JobKind,
        execution_id: &str,
    ) -> Result<Vec<JobEntity>, EngineError> {
        let rows = sqlx::query("SELECT * FROM jobs WHERE execution_id = ? AND kind = ?")
            .bind(execution_id)
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_job).collect()
    }

    async fn bulk_delete_jobs_by_execution_id(
        &self,
        kind: JobKind,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM jobs WHERE execution_id = ? AND kind = ?")
            .bind(execution_id)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_variable(&self, variable: &VariableInstanceEntity) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO variables (
                id, revision, name, execution_id, task_id, process_instance_id,
                value_json, byte_array_id, tenant_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(variable.id.as_str())
        .bind(variable.revision)
        .bind(variable.name.as_str())
        .bind(variable.execution_id.as_deref())
        .bind(variable.task_id.as_deref())
        .bind(variable.process_instance_id.as_deref())
        .bind(serde_json::to_string(&variable.value)?)
        .bind(variable.byte_array_id.as_deref())
        .bind(variable.tenant_id.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_variable(&self, variable: &VariableInstanceEntity) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE variables
            SET revision = ?1, execution_id = ?2, task_id = ?3, value_json = ?4,
                byte_array_id = ?5
            WHERE id = ?6
              AND revision = ?7
            "#,
        )
        .bind(variable.revision)
        .bind(variable.execution_id.as_deref())
        .bind(variable.task_id.as_deref())
        .bind(serde_json::to_string(&variable.value)?)
        .bind(variable.byte_array_id.as_deref())
        .bind(variable.id.as_str())
        .bind(variable.revision - 1)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict {
                kind: "variable instance",
                id: variable.id.clone(),
            });
        }
        Ok(())
    }

    async fn delete_variable(&self, variable_id: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM variables WHERE id = ?")
            .bind(variable_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_variable_by_id(
        &self,
        variable_id: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError> {
        let row = sqlx::query("SELECT * FROM variables WHERE id = ?")
            .bind(variable_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_variable).transpose()
    }

    async fn find_variables_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<VariableInstanceEntity>, EngineError> {
        let rows =
            sqlx::query("SELECT * FROM variables WHERE execution_id = ? AND task_id IS NULL")
                .bind(execution_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(map_variable).collect()
    }

    async fn find_variables_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<Vec<VariableInstanceEntity>, EngineError> {
        let rows = sqlx::query("SELECT * FROM variables WHERE task_id = ?")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_variable).collect()
    }

    async fn find_variable_by_execution_and_name(
        &self,
        execution_id: &str,
        name: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError> {
        let row = sqlx::query(
            "SELECT * FROM variables WHERE execution_id = ? AND task_id IS NULL AND name = ?",
        )
        .bind(execution_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_variable).transpose()
    }

    async fn find_variable_by_task_and_name(
        &self,
        task_id: &str,
        name: &str,
    ) -> Result<Option<VariableInstanceEntity>, EngineError> {
        let row = sqlx::query("SELECT * FROM variables WHERE task_id = ? AND name = ?")
            .bind(task_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(map_variable).transpose()
    }

    async fn bulk_delete_variables_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM variables WHERE execution_id = ?")
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_byte_array(&self, byte_array: &ByteArrayEntity) -> Result<(), EngineError> {
        sqlx::query("INSERT INTO byte_arrays (id, name, bytes) VALUES (?, ?, ?)")
            .bind(byte_array.id.as_str())
            .bind(byte_array.name.as_deref())
            .bind(byte_array.bytes.as_slice())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_byte_array_by_id(
        &self,
        byte_array_id: &str,
    ) -> Result<Option<ByteArrayEntity>, EngineError> {
        let row = sqlx::query("SELECT id, name, bytes FROM byte_arrays WHERE id = ?")
            .bind(byte_array_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(ByteArrayEntity {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                bytes: row.try_get("bytes")?,
            })),
            None => Ok(None),
        }
    }

    async fn delete_byte_array(&self, byte_array_id: &str) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM byte_arrays WHERE id = ?")
            .bind(byte_array_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_event_subscription(
        &self,
        subscription: &EventSubscriptionEntity,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO event_subscriptions (
                id, revision, event_type, event_name, execution_id,
                process_instance_id, activity_id, process_definition_id,
                created, tenant_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(subscription.id.as_str())
        .bind(subscription.revision)
        .bind(subscription.event_type.as_str())
        .bind(subscription.event_name.as_deref())
        .bind(subscription.execution_id.as_deref())
        .bind(subscription.process_instance_id.as_deref())
        .bind(subscription.activity_id.as_deref())
        .bind(subscription.process_definition_id.as_deref())
        .bind(subscription.created)
        .bind(subscription.tenant_id.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_event_subscriptions_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<EventSubscriptionEntity>, EngineError> {
        let rows = sqlx::query("SELECT * FROM event_subscriptions WHERE execution_id = ?")
            .bind(execution_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_subscription).collect()
    }

    async fn bulk_delete_event_subscriptions_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM event_subscriptions WHERE execution_id = ?")
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_identity_link(&self, link: &IdentityLinkEntity) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO identity_links (
                id, link_type, user_id, group_id, task_id, process_instance_id
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(link.id.as_str())
        .bind(link.link_type.as_str())
        .bind(link.user_id.as_deref())
        .bind(link.group_id.as_deref())
        .bind(link.task_id.as_deref())
        .bind(link.process_instance_id.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_identity_links_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<Vec<IdentityLinkEntity>, EngineError> {
        let rows = sqlx::query("SELECT * FROM identity_links WHERE task_id = ?")
            .bind(task_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_identity_link).collect()
    }

    async fn find_identity_links_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<IdentityLinkEntity>, EngineError> {
        let rows = sqlx::query("SELECT * FROM identity_links WHERE process_instance_id = ?")
            .bind(process_instance_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_identity_link).collect()
    }

    async fn bulk_delete_identity_links_by_task_id(
        &self,
        task_id: &str,
    ) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM identity_links WHERE task_id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn bulk_delete_identity_links_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM identity_links WHERE process_instance_id = ?")
            .bind(process_instance_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_entity_link(&self, link: &EntityLinkEntity) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO entity_links (
                id, link_type, scope_id, scope_type, reference_scope_id,
                reference_scope_type, root_scope_id, create_time
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(link.id.as_str())
        .bind(link.link_type.as_str())
        .bind(link.scope_id.as_str())
        .bind(link.scope_type.as_str())
        .bind(link.reference_scope_id.as_str())
        .bind(link.reference_scope_type.as_str())
        .bind(link.root_scope_id.as_str())
        .bind(link.create_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_entity_links_by_root_scope_id(
        &self,
        root_scope_id: &str,
    ) -> Result<Vec<EntityLinkEntity>, EngineError> {
        let rows = sqlx::query("SELECT * FROM entity_links WHERE root_scope_id = ?")
            .bind(root_scope_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(map_entity_link).collect()
    }

    async fn bulk_delete_entity_links_by_root_scope_id(
        &self,
        root_scope_id: &str,
    ) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM entity_links WHERE root_scope_id = ?")
            .bind(root_scope_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_activity_instance(
        &self,
        activity: &ActivityInstanceEntity,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            INSERT INTO activity_instances (
                id, revision, process_definition_id, process_instance_id,
                execution_id, activity_id, activity_name, activity_type,
                assignee, task_id, start_time, end_time, duration_ms,
                delete_reason, tenant_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(activity.id.as_str())
        .bind(activity.revision)
        .bind(activity.process_definition_id.as_str())
        .bind(activity.process_instance_id.as_str())
        .bind(activity.execution_id.as_str())
        .bind(activity.activity_id.as_str())
        .bind(activity.activity_name.as_deref())
        .bind(activity.activity_type.as_str())
        .bind(activity.assignee.as_deref())
        .bind(activity.task_id.as_deref())
        .bind(activity.start_time)
        .bind(activity.end_time)
        .bind(activity.duration_ms)
        .bind(activity.delete_reason.as_deref())
        .bind(activity.tenant_id.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_activity_instance(
        &self,
        activity: &ActivityInstanceEntity,
    ) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE activity_instances
            SET revision = ?1, execution_id = ?2, assignee = ?3, task_id = ?4,
                end_time = ?5, duration_ms = ?6, delete_reason = ?7
            WHERE id = ?8
              AND revision = ?9
            "#,
        )
        .bind(activity.revision)
        .bind(activity.execution_id.as_str())
        .bind(activity.assignee.as_deref())
        .bind(activity.task_id.as_deref())
        .bind(activity.end_time)
        .bind(activity.duration_ms)
        .bind(activity.delete_reason.as_deref())
        .bind(activity.id.as_str())
        .bind(activity.revision - 1)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ConcurrencyConflict {
                kind: "activity instance",
                id: activity.id.clone(),
            });
        }
        Ok(())
    }

    async fn find_unfinished_activity_instances_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Vec<ActivityInstanceEntity>, EngineError> {
        let rows = sqlx::query(
            "SELECT * FROM activity_instances WHERE execution_id = ? AND end_time IS NULL",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_activity_instance).collect()
    }

    async fn bulk_delete_activity_instances_by_process_instance_id(
        &self,
        process_instance_id: &str,
    ) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM activity_instances WHERE process_instance_id = ?")
            .bind(process_instance_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn bulk_delete_activity_instances_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<(), EngineError> {
        sqlx::query("DELETE FROM activity_instances WHERE execution_id = ?")
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, EngineError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> SqliteStore {
        let path = std::env::temp_dir().join(format!("meander-test-{}.db", uuid::Uuid::new_v4()));
        SqliteStore::from_path(&path).await.expect("store")
    }

    #[tokio::test]
    async fn test_execution_roundtrip() {
        let store = store().await;
        let mut execution = ExecutionEntity::new("e1", "def:1");
        execution.business_key = Some("order-42".to_string());
        execution.count_enabled = true;
        execution.counts.jobs = 3;

        store.insert_execution(&execution).await.unwrap();
        let loaded = store
            .find_execution_by_id("e1")
            .await
            .unwrap()
            .expect("inserted row");
        assert_eq!(loaded.business_key.as_deref(), Some("order-42"));
        assert_eq!(loaded.counts.jobs, 3);
        assert!(loaded.count_enabled);
    }

    #[tokio::test]
    async fn test_update_execution_rejects_stale_revision() {
        let store = store().await;
        let mut execution = ExecutionEntity::new("e1", "def:1");
        store.insert_execution(&execution).await.unwrap();

        execution.revision = 2;
        store.update_execution(&execution).await.unwrap();

        // Same revision again: stored row is already at 2.
        let err = store.update_execution(&execution).await.unwrap_err();
        assert_eq!(err.error_code(), "CONCURRENCY_CONFLICT");
    }

    #[tokio::test]
    async fn test_job_queries_filter_by_kind() {
        let store = store().await;
        let mut timer = JobEntity::new("j1", JobKind::Timer);
        timer.execution_id = Some("e1".to_string());
        let mut message = JobEntity::new("j2", JobKind::Message);
        message.execution_id = Some("e1".to_string());
        store.insert_job(&timer).await.unwrap();
        store.insert_job(&message).await.unwrap();

        let timers = store
            .find_jobs_by_execution_id(JobKind::Timer, "e1")
            .await
            .unwrap();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].id, "j1");

        store
            .bulk_delete_jobs_by_execution_id(JobKind::Message, "e1")
            .await
            .unwrap();
        assert!(store.find_job_by_id("j2").await.unwrap().is_none());
        assert!(store.find_job_by_id("j1").await.unwrap().is_some());
    }
}

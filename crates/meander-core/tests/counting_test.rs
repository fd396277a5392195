// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the counting-optimization layer.

mod common;

use common::*;
use meander_core::behavior::BehaviorRegistry;
use meander_core::config::EngineConfig;
use meander_core::entities::JobKind;
use meander_core::jobs::{self, JobCreateParams};
use meander_core::store::RuntimeStore;
use meander_core::tree;

fn job_params(execution_id: &str) -> JobCreateParams {
    JobCreateParams {
        execution_id: Some(execution_id.to_string()),
        handler_type: Some("async-continuation".to_string()),
        ..JobCreateParams::default()
    }
}

#[tokio::test]
async fn test_insert_then_delete_leaves_a_zero_delta() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let mut job_ids = Vec::new();
    for _ in 0..3 {
        job_ids.push(
            jobs::create_job(&mut ctx, JobKind::Message, job_params(&pi))
                .await
                .unwrap(),
        );
    }
    for job_id in &job_ids {
        jobs::delete_job(&mut ctx, job_id).await.unwrap();
    }

    // Within the unit of work the effective count is back to zero.
    let execution = ctx.find_execution(&pi).await.unwrap().unwrap();
    assert_eq!(execution.job_count(JobKind::Message), 0);

    // After flush the persisted base count matches the store.
    ctx.flush().await.unwrap();
    let stored = test
        .store
        .find_execution_by_id(&pi)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.counts.jobs, 0);
    assert_eq!(test.memory.job_count().await, 0);
}

#[tokio::test]
async fn test_flushed_count_matches_store_contents() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    for _ in 0..4 {
        jobs::create_job(&mut ctx, JobKind::Message, job_params(&pi))
            .await
            .unwrap();
    }
    let timer = jobs::create_job(&mut ctx, JobKind::Timer, job_params(&pi))
        .await
        .unwrap();
    jobs::delete_job(&mut ctx, &timer).await.unwrap();
    ctx.flush().await.unwrap();

    let stored = test
        .store
        .find_execution_by_id(&pi)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.counts.jobs, 4);
    assert_eq!(stored.counts.timer_jobs, 0, "timer delta stays independent");
    assert_eq!(test.memory.job_count().await, 4);
    assert_eq!(stored.job_count(JobKind::Message), 4);
}

#[tokio::test]
async fn test_counting_disabled_executions_never_trust_counters() {
    let mut config = EngineConfig::default();
    config.execution_related_entities_count_enabled = false;
    let test = TestContext::with(config, BehaviorRegistry::new());
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let execution = ctx.find_execution(&pi).await.unwrap().unwrap();
    assert!(!execution.count_enabled, "flag is inherited from the engine at creation");

    // Jobs exist but no counter tracked them.
    jobs::create_job(&mut ctx, JobKind::Message, job_params(&pi))
        .await
        .unwrap();
    ctx.flush().await.unwrap();
    let stored = test.store.find_execution_by_id(&pi).await.unwrap().unwrap();
    assert_eq!(stored.counts.jobs, 0);

    // Deletion must therefore consult the job tables regardless.
    test.store.reset();
    tree::delete_process_instance(&mut ctx, &pi, Some("test"), false)
        .await
        .unwrap();
    assert!(
        test.store.operation_count("bulk_delete_jobs_by_execution_id") >= 1,
        "without trusted counts the cascade cannot skip job deletion"
    );
    assert_eq!(test.memory.job_count().await, 0);
}

#[tokio::test]
async fn test_counting_flag_survives_into_children_and_subprocesses() {
    let mut config = EngineConfig::default();
    config.execution_related_entities_count_enabled = false;
    let test = TestContext::with(config, BehaviorRegistry::new());
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let child = tree::create_child_execution(&mut ctx, &pi).await.unwrap();
    let child_entity = ctx.find_execution(&child).await.unwrap().unwrap();
    assert!(
        !child_entity.count_enabled,
        "children inherit the parent's disabled flag, never re-enable"
    );
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for cascading process-instance deletion.

mod common;

use std::collections::HashSet;

use common::*;
use meander_core::entities::{EntityLinkEntity, JobKind};
use meander_core::events::EngineEvent;
use meander_core::store::RuntimeStore;
use meander_core::tasks::{self, TaskCreateParams};
use meander_core::tree;

async fn seed_task(ctx: &mut meander_core::context::CommandContext, execution_id: &str) -> String {
    tasks::create_task(
        ctx,
        TaskCreateParams {
            name: Some("Review order".to_string()),
            task_definition_key: Some("reviewOrder".to_string()),
            execution_id: Some(execution_id.to_string()),
            assignee: Some("kermit".to_string()),
            ..TaskCreateParams::default()
        },
    )
    .await
    .expect("task should be created")
}

#[tokio::test]
async fn test_simple_cascade_deletes_tasks_children_and_instance() {
    let test = TestContext::new();
    let mut ctx = test.command();

    // 1. PI1 with two active children, one task each (E1 started first).
    let pi = start_order_instance(&mut ctx).await;
    let e1 = start_child_at(&mut ctx, &pi, "reviewOrder").await;
    let e2 = start_child_at(&mut ctx, &pi, "reviewOrder").await;
    seed_task(&mut ctx, &e1).await;
    seed_task(&mut ctx, &e2).await;
    ctx.flush().await.unwrap();
    assert_eq!(test.memory.task_count().await, 2);
    test.dispatcher.clear();

    // 2. Administrative delete with history cascade.
    tree::delete_process_instance(&mut ctx, &pi, Some("test"), true)
        .await
        .unwrap();

    // 3. Both tasks are gone and every execution row is gone.
    assert_eq!(test.memory.task_count().await, 0);
    assert_eq!(test.memory.execution_count().await, 0);

    // 4. One cancelled event per active child, later child first
    // (deletion runs leaf-to-root in reverse start order).
    let cancelled = test.dispatcher.events_of_type("activity-cancelled");
    assert_eq!(cancelled.len(), 2);
    let ids: Vec<String> = cancelled
        .iter()
        .map(|e| match e {
            EngineEvent::ActivityCancelled { execution_id, .. } => execution_id.clone(),
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
    assert_eq!(ids, vec![e2.clone(), e1.clone()]);

    // 5. One process-level cancelled event for the whole deletion.
    assert_eq!(test.dispatcher.events_of_type("process-cancelled").len(), 1);

    // 6. The instance is tombstoned and its history was purged and
    // closed out.
    let instance = ctx.find_execution(&pi).await.unwrap().unwrap();
    assert!(instance.is_deleted());
    let entries = test.history.entries();
    assert!(entries.iter().any(|e| matches!(
        e,
        meander_core::history::HistoryEntry::HistoryPurged { process_instance_id } if *process_instance_id == pi
    )));
    assert!(entries.iter().any(|e| matches!(
        e,
        meander_core::history::HistoryEntry::ProcessInstanceEnd { process_instance_id, delete_reason, .. }
            if *process_instance_id == pi && delete_reason.as_deref() == Some("test")
    )));
}

#[tokio::test]
async fn test_deletion_order_never_orphans_rows() {
    let test = TestContext::new();
    let mut ctx = test.command();

    // A three-level tree with related data everywhere. The in-memory
    // store rejects any delete that would orphan a row, so a wrong
    // deletion order fails this test loudly.
    let pi = start_order_instance(&mut ctx).await;
    let e1 = start_child_at(&mut ctx, &pi, "reviewOrder").await;
    let e1a = start_child_at(&mut ctx, &e1, "shipOrder").await;
    let e1b = start_child_at(&mut ctx, &e1, "shipOrder").await;
    let e2 = start_child_at(&mut ctx, &pi, "reviewOrder").await;
    seed_task(&mut ctx, &e1a).await;
    seed_task(&mut ctx, &e2).await;
    for execution_id in [&e1, &e1a, &e1b, &e2] {
        meander_core::jobs::create_job(
            &mut ctx,
            JobKind::Timer,
            meander_core::jobs::JobCreateParams {
                execution_id: Some(execution_id.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }
    // Entity links rooted at the instance are purged by the cascade.
    test.store
        .insert_entity_link(&EntityLinkEntity {
            id: "link-1".to_string(),
            link_type: "child".to_string(),
            scope_id: pi.clone(),
            scope_type: "bpmn".to_string(),
            reference_scope_id: e1.clone(),
            reference_scope_type: "bpmn".to_string(),
            root_scope_id: pi.clone(),
            create_time: chrono::Utc::now(),
        })
        .await
        .unwrap();
    ctx.flush().await.unwrap();

    tree::delete_process_instance(&mut ctx, &pi, Some("order obsolete"), false)
        .await
        .unwrap();

    assert_eq!(test.memory.execution_count().await, 0);
    assert_eq!(test.memory.task_count().await, 0);
    assert_eq!(test.memory.job_count().await, 0);
    assert!(
        test.store
            .find_entity_links_by_root_scope_id(&pi)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_delete_unknown_process_instance_is_not_found() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let err = tree::delete_process_instance(&mut ctx, "does-not-exist", Some("test"), false)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_FOUND");
    assert!(err.to_string().contains("process instance"));
    assert!(err.to_string().contains("does-not-exist"));
}

#[tokio::test]
async fn test_completion_delete_is_idempotent() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    start_child_at(&mut ctx, &pi, "shipOrder").await;
    ctx.flush().await.unwrap();
    test.dispatcher.clear();

    tree::delete_process_instance_execution_entity(
        &mut ctx,
        &pi,
        Some("shipOrder"),
        None,
        false,
        false,
        true,
    )
    .await
    .unwrap();
    assert_eq!(test.dispatcher.events_of_type("process-completed").len(), 1);

    // The second call is a no-op: no error, no duplicate events.
    tree::delete_process_instance_execution_entity(
        &mut ctx,
        &pi,
        Some("shipOrder"),
        None,
        false,
        false,
        true,
    )
    .await
    .unwrap();
    assert_eq!(test.dispatcher.events_of_type("process-completed").len(), 1);
    assert_eq!(test.memory.execution_count().await, 0);
}

#[tokio::test]
async fn test_counting_skips_job_queries_when_count_is_zero() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let e1 = start_child_at(&mut ctx, &pi, "shipOrder").await;
    ctx.flush().await.unwrap();

    let counting = {
        let execution = ctx.find_execution(&e1).await.unwrap().unwrap();
        execution.count_enabled && execution.job_count(JobKind::Message) == 0
    };
    assert!(counting, "counting should be trusted with zero jobs");

    test.store.reset();
    tree::delete_process_instance(&mut ctx, &pi, Some("test"), false)
        .await
        .unwrap();

    // No job table was consulted at any point of the cascade.
    assert_eq!(test.store.operation_count("find_jobs_by_execution_id"), 0);
    assert_eq!(
        test.store.operation_count("bulk_delete_jobs_by_execution_id"),
        0
    );
    // Variables and identity links were equally skippable here.
    assert_eq!(
        test.store.operation_count("find_variables_by_execution_id"),
        0
    );
}

#[tokio::test]
async fn test_excluded_children_survive_partial_deletion() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let keeper = start_child_at(&mut ctx, &pi, "reviewOrder").await;
    let victim = start_child_at(&mut ctx, &pi, "reviewOrder").await;
    ctx.flush().await.unwrap();

    let mut exclude = HashSet::new();
    exclude.insert(keeper.clone());
    tree::delete_child_executions(
        &mut ctx,
        &pi,
        &exclude,
        &HashSet::new(),
        Some("multi instance completed"),
        true,
        None,
    )
    .await
    .unwrap();

    let keeper_entity = ctx.find_execution(&keeper).await.unwrap().unwrap();
    assert!(!keeper_entity.is_deleted());
    let victim_entity = ctx.find_execution(&victim).await.unwrap().unwrap();
    assert!(victim_entity.is_deleted());

    let cancelled = test.dispatcher.events_of_type("activity-cancelled");
    assert_eq!(cancelled.len(), 1, "only the deleted active child is cancelled");
}

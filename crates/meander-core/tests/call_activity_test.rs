// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for call-activity (super/sub execution) lifecycle.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::*;
use meander_core::behavior::{BehaviorRegistry, SubProcessActivityBehavior};
use meander_core::config::EngineConfig;
use meander_core::entities::ExecutionEntity;
use meander_core::error::{EngineError, Result};
use meander_core::tree;

#[derive(Default)]
struct RecordingCallActivityBehavior {
    calls: Mutex<Vec<String>>,
    fail_on_completing: bool,
}

impl RecordingCallActivityBehavior {
    fn failing() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_on_completing: true,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubProcessActivityBehavior for RecordingCallActivityBehavior {
    async fn completing(
        &self,
        execution: &ExecutionEntity,
        sub_process_instance: &ExecutionEntity,
    ) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("completing:{}:{}", execution.id, sub_process_instance.id));
        if self.fail_on_completing {
            return Err(EngineError::Storage {
                operation: "output mapping".to_string(),
                details: "boom".to_string(),
            });
        }
        Ok(())
    }

    async fn completed(&self, execution: &ExecutionEntity) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("completed:{}", execution.id));
        Ok(())
    }
}

fn registry_with(behavior: Arc<RecordingCallActivityBehavior>) -> BehaviorRegistry {
    let mut registry = BehaviorRegistry::new();
    registry.register_sub_process(ORDER_DEFINITION_ID, "callBilling", behavior);
    registry
}

#[tokio::test]
async fn test_deleting_called_instance_resumes_the_caller() {
    let behavior = Arc::new(RecordingCallActivityBehavior::default());
    let test = TestContext::with(EngineConfig::default(), registry_with(behavior.clone()));
    let mut ctx = test.command();

    // 1. Order instance with a call activity running billing.
    let pi1 = start_order_instance(&mut ctx).await;
    let ce = start_child_at(&mut ctx, &pi1, "callBilling").await;
    let pi2 = tree::create_subprocess_instance(&mut ctx, BILLING_DEFINITION_ID, &ce, None, None)
        .await
        .unwrap();
    start_child_at(&mut ctx, &pi2, "chargeCard").await;
    ctx.flush().await.unwrap();

    // 2. Deleting the called instance directly completes the caller.
    tree::delete_process_instance(&mut ctx, &pi2, Some("billing aborted"), false)
        .await
        .unwrap();

    let calls = behavior.calls();
    assert_eq!(
        calls,
        vec![
            format!("completing:{}:{}", ce, pi2),
            format!("completed:{}", ce),
        ]
    );

    // 3. The pair is unlinked on both sides; the caller survives.
    let caller = ctx.find_execution(&ce).await.unwrap().unwrap();
    assert!(caller.sub_process_instance_id.is_none());
    assert!(!caller.is_deleted());
    let called = ctx.find_execution(&pi2).await.unwrap().unwrap();
    assert!(called.is_deleted());
    assert!(called.super_execution_id.is_none());

    // 4. The caller's instance is untouched.
    let root = ctx.find_execution(&pi1).await.unwrap().unwrap();
    assert!(!root.is_deleted());
}

#[tokio::test]
async fn test_caller_completion_failure_is_a_consistency_error() {
    let behavior = Arc::new(RecordingCallActivityBehavior::failing());
    let test = TestContext::with(EngineConfig::default(), registry_with(behavior.clone()));
    let mut ctx = test.command();

    let pi1 = start_order_instance(&mut ctx).await;
    let ce = start_child_at(&mut ctx, &pi1, "callBilling").await;
    let pi2 = tree::create_subprocess_instance(&mut ctx, BILLING_DEFINITION_ID, &ce, None, None)
        .await
        .unwrap();
    ctx.flush().await.unwrap();

    let err = tree::delete_process_instance(&mut ctx, &pi2, Some("billing aborted"), false)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "CONSISTENCY_VIOLATION");
    assert!(!err.is_retriable(), "caller-completion failures are fatal");
    assert!(err.to_string().contains(&pi2));
}

#[tokio::test]
async fn test_deleting_caller_cascades_into_called_instance() {
    let behavior = Arc::new(RecordingCallActivityBehavior::default());
    let test = TestContext::with(EngineConfig::default(), registry_with(behavior.clone()));
    let mut ctx = test.command();

    let pi1 = start_order_instance(&mut ctx).await;
    let ce = start_child_at(&mut ctx, &pi1, "callBilling").await;
    let pi2 = tree::create_subprocess_instance(&mut ctx, BILLING_DEFINITION_ID, &ce, None, None)
        .await
        .unwrap();
    start_child_at(&mut ctx, &pi2, "chargeCard").await;
    ctx.flush().await.unwrap();
    test.dispatcher.clear();

    tree::delete_process_instance(&mut ctx, &pi1, Some("order cancelled"), false)
        .await
        .unwrap();

    // Everything is gone, both instances included.
    assert_eq!(test.memory.execution_count().await, 0);
    let called = ctx.find_execution(&pi2).await.unwrap().unwrap();
    assert!(called.is_deleted());

    // The caller was deleted, not completed: the call-activity behavior
    // must not have run.
    assert!(behavior.calls().is_empty());

    // One cancelled event per cancelled instance.
    let process_cancelled = test.dispatcher.events_of_type("process-cancelled");
    assert_eq!(process_cancelled.len(), 2);
}

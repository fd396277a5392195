// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for hierarchical variable scope resolution.

mod common;

use common::*;
use meander_core::scope::{self, VariableScopeRef};
use meander_core::tasks::{self, TaskCreateParams};
use meander_core::tree;
use serde_json::json;

#[tokio::test]
async fn test_existing_parent_variable_wins_over_child_scope() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let child = tree::create_child_execution(&mut ctx, &pi).await.unwrap();
    let parent_scope = VariableScopeRef::execution(&pi);
    let child_scope = VariableScopeRef::execution(&child);

    scope::create_variable_local(&mut ctx, &parent_scope, "orderTotal", json!(100))
        .await
        .unwrap();

    // Writing through the child must update the parent's definition.
    scope::set_variable(&mut ctx, &child_scope, "orderTotal", json!(250), true)
        .await
        .unwrap();

    assert_eq!(
        scope::get_variable_local(&mut ctx, &parent_scope, "orderTotal")
            .await
            .unwrap(),
        Some(json!(250))
    );
    assert_eq!(
        scope::get_variable_local(&mut ctx, &child_scope, "orderTotal")
            .await
            .unwrap(),
        None,
        "the child scope must not get its own copy"
    );
    assert_eq!(
        scope::get_variable(&mut ctx, &child_scope, "orderTotal")
            .await
            .unwrap(),
        Some(json!(250)),
        "the child still sees the value through the chain"
    );
}

#[tokio::test]
async fn test_unknown_variable_is_created_at_the_topmost_scope() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let mid = tree::create_child_execution(&mut ctx, &pi).await.unwrap();
    let leaf = tree::create_child_execution(&mut ctx, &mid).await.unwrap();

    scope::set_variable(
        &mut ctx,
        &VariableScopeRef::execution(&leaf),
        "customer",
        json!("acme"),
        true,
    )
    .await
    .unwrap();

    assert_eq!(
        scope::get_variable_local(&mut ctx, &VariableScopeRef::execution(&pi), "customer")
            .await
            .unwrap(),
        Some(json!("acme"))
    );
    for scope_id in [&mid, &leaf] {
        assert_eq!(
            scope::get_variable_local(
                &mut ctx,
                &VariableScopeRef::execution(scope_id),
                "customer"
            )
            .await
            .unwrap(),
            None
        );
    }
}

#[tokio::test]
async fn test_lazy_mode_finds_the_owning_scope_through_the_store() {
    let test = TestContext::new();

    let (pi, leaf) = {
        let mut ctx = test.command();
        let pi = start_order_instance(&mut ctx).await;
        let leaf = tree::create_child_execution(&mut ctx, &pi).await.unwrap();
        scope::create_variable_local(
            &mut ctx,
            &VariableScopeRef::execution(&pi),
            "approved",
            json!(false),
        )
        .await
        .unwrap();
        ctx.close().await.unwrap();
        (pi, leaf)
    };

    // Fresh command: nothing cached, lazy mode must locate the parent's
    // variable with scope-specific store queries.
    let mut ctx = test.command();
    scope::set_variable(
        &mut ctx,
        &VariableScopeRef::execution(&leaf),
        "approved",
        json!(true),
        false,
    )
    .await
    .unwrap();

    assert_eq!(
        scope::get_variable_local(&mut ctx, &VariableScopeRef::execution(&pi), "approved")
            .await
            .unwrap(),
        Some(json!(true))
    );
}

#[tokio::test]
async fn test_create_variable_local_rejects_duplicates() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let scope_ref = VariableScopeRef::execution(&pi);

    scope::create_variable_local(&mut ctx, &scope_ref, "orderId", json!("o-1"))
        .await
        .unwrap();
    let err = scope::create_variable_local(&mut ctx, &scope_ref, "orderId", json!("o-2"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DUPLICATE_VARIABLE");

    // The original value survives the rejected create.
    assert_eq!(
        scope::get_variable_local(&mut ctx, &scope_ref, "orderId")
            .await
            .unwrap(),
        Some(json!("o-1"))
    );
}

#[tokio::test]
async fn test_task_variables_fall_back_to_the_execution_chain() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let execution = start_child_at(&mut ctx, &pi, "reviewOrder").await;
    let task_id = tasks::create_task(
        &mut ctx,
        TaskCreateParams {
            execution_id: Some(execution.clone()),
            ..TaskCreateParams::default()
        },
    )
    .await
    .unwrap();

    scope::create_variable_local(
        &mut ctx,
        &VariableScopeRef::execution(&pi),
        "reviewer",
        json!("gonzo"),
    )
    .await
    .unwrap();

    let task_scope = VariableScopeRef::task(&task_id);
    assert_eq!(
        scope::get_variable(&mut ctx, &task_scope, "reviewer")
            .await
            .unwrap(),
        Some(json!("gonzo")),
        "reads resolve task -> execution -> process instance"
    );

    // A task-local write shadows the chain without touching it.
    scope::set_variable_local(&mut ctx, &task_scope, "reviewer", json!("scooter"))
        .await
        .unwrap();
    assert_eq!(
        scope::get_variable(&mut ctx, &task_scope, "reviewer")
            .await
            .unwrap(),
        Some(json!("scooter"))
    );
    assert_eq!(
        scope::get_variable_local(&mut ctx, &VariableScopeRef::execution(&pi), "reviewer")
            .await
            .unwrap(),
        Some(json!("gonzo"))
    );
}

#[tokio::test]
async fn test_variable_touched_in_command_is_updated_in_place() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let child = tree::create_child_execution(&mut ctx, &pi).await.unwrap();
    let child_scope = VariableScopeRef::execution(&child);

    // First write creates at the top (nothing owns the name yet).
    scope::set_variable(&mut ctx, &child_scope, "attempts", json!(1), true)
        .await
        .unwrap();
    // Later writes in the same command hit the same instance even when
    // addressed from a different point of the chain.
    scope::set_variable(&mut ctx, &VariableScopeRef::execution(&pi), "attempts", json!(2), true)
        .await
        .unwrap();

    let all = scope::get_variables(&mut ctx, &child_scope).await.unwrap();
    assert_eq!(all.get("attempts"), Some(&json!(2)));

    // Still exactly one variable row.
    ctx.flush().await.unwrap();
    assert_eq!(test.memory.variable_count().await, 1);
}

#[tokio::test]
async fn test_large_values_spill_to_byte_arrays_and_read_back() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let scope_ref = VariableScopeRef::execution(&pi);
    let large = json!("x".repeat(5000));

    scope::create_variable_local(&mut ctx, &scope_ref, "payload", large.clone())
        .await
        .unwrap();
    assert_eq!(
        scope::get_variable(&mut ctx, &scope_ref, "payload")
            .await
            .unwrap(),
        Some(large)
    );

    // Shrinking the value moves it back inline.
    scope::set_variable_local(&mut ctx, &scope_ref, "payload", json!("small"))
        .await
        .unwrap();
    assert_eq!(
        scope::get_variable(&mut ctx, &scope_ref, "payload")
            .await
            .unwrap(),
        Some(json!("small"))
    );

    scope::remove_variable(&mut ctx, &scope_ref, "payload")
        .await
        .unwrap();
    assert_eq!(
        scope::get_variable(&mut ctx, &scope_ref, "payload")
            .await
            .unwrap(),
        None
    );
    ctx.flush().await.unwrap();
    assert_eq!(test.memory.variable_count().await, 0);
}

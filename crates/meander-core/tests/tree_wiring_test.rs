// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for execution tree construction and reconstruction.

mod common;

use std::collections::HashSet;

use common::*;
use meander_core::tree;

#[tokio::test]
async fn test_process_instance_is_its_own_root() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let execution = ctx.find_execution(&pi).await.unwrap().unwrap();

    assert_eq!(execution.process_instance_id, pi);
    assert_eq!(execution.root_process_instance_id, pi);
    assert!(execution.parent_id.is_none());
    assert!(execution.is_scope);
    assert!(execution.count_enabled);
}

#[tokio::test]
async fn test_child_execution_inherits_from_parent() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let child = tree::create_child_execution(&mut ctx, &pi).await.unwrap();

    let execution = ctx.find_execution(&child).await.unwrap().unwrap();
    assert_eq!(execution.parent_id.as_deref(), Some(pi.as_str()));
    assert_eq!(execution.process_instance_id, pi);
    assert_eq!(execution.root_process_instance_id, pi);
    assert_eq!(execution.process_definition_id, ORDER_DEFINITION_ID);
    assert!(!execution.is_scope);
    assert!(execution.count_enabled);

    // The parent's loaded children collection sees the child exactly once.
    let parent = ctx.find_execution(&pi).await.unwrap().unwrap();
    let children = parent.children.get().expect("children loaded");
    assert_eq!(children.iter().filter(|id| **id == child).count(), 1);
}

#[tokio::test]
async fn test_tree_reconstruction_by_root_id() {
    let test = TestContext::new();

    // Build: PI ── E1 ── E1a
    //           └─ E2
    //           └─ CE ══ sub process instance PI2 ── S1
    let (pi, e1, e1a, e2, ce, pi2, s1) = {
        let mut ctx = test.command();
        let pi = start_order_instance(&mut ctx).await;
        let e1 = tree::create_child_execution(&mut ctx, &pi).await.unwrap();
        let e1a = tree::create_child_execution(&mut ctx, &e1).await.unwrap();
        let e2 = tree::create_child_execution(&mut ctx, &pi).await.unwrap();
        let ce = start_child_at(&mut ctx, &pi, "callBilling").await;
        let pi2 = tree::create_subprocess_instance(
            &mut ctx,
            BILLING_DEFINITION_ID,
            &ce,
            Some("order-77"),
            None,
        )
        .await
        .unwrap();
        let s1 = tree::create_child_execution(&mut ctx, &pi2).await.unwrap();
        ctx.close().await.unwrap();
        (pi, e1, e1a, e2, ce, pi2, s1)
    };

    // Reconstruct in a fresh command: one query, fully wired tree.
    let mut ctx = test.command();
    let root = tree::find_by_root_process_instance_id(&mut ctx, &pi)
        .await
        .unwrap()
        .expect("root should be found");
    assert_eq!(root, pi);
    assert_eq!(test.store.operation_count("find_executions_by_root_process_instance_id"), 1);

    // Every execution's children collection is loaded and contains each
    // child exactly once.
    for (parent, child) in [(&pi, &e1), (&e1, &e1a), (&pi, &e2), (&pi, &ce), (&pi2, &s1)] {
        let parent_entity = ctx.find_execution(parent).await.unwrap().unwrap();
        let children = parent_entity.children.get().expect("children loaded");
        assert_eq!(
            children.iter().filter(|id| *id == child).count(),
            1,
            "{} should appear once under {}",
            child,
            parent
        );
    }

    // Super and sub are mutual inverses after reconstruction.
    let caller = ctx.find_execution(&ce).await.unwrap().unwrap();
    assert_eq!(caller.sub_process_instance_id.as_deref(), Some(pi2.as_str()));
    let sub = ctx.find_execution(&pi2).await.unwrap().unwrap();
    assert_eq!(sub.super_execution_id.as_deref(), Some(ce.as_str()));
    assert_eq!(sub.root_process_instance_id, pi, "called instance joins the caller's chain");

    // No further store round-trips were needed to walk the whole tree.
    assert_eq!(
        test.store.operation_count("find_child_executions_by_parent_execution_id"),
        0
    );
}

#[tokio::test]
async fn test_collect_children_is_ancestor_first() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let e1 = tree::create_child_execution(&mut ctx, &pi).await.unwrap();
    let e1a = tree::create_child_execution(&mut ctx, &e1).await.unwrap();
    let e1b = tree::create_child_execution(&mut ctx, &e1).await.unwrap();
    let e2 = tree::create_child_execution(&mut ctx, &pi).await.unwrap();

    let collected = tree::collect_children(&mut ctx, &pi, &HashSet::new())
        .await
        .unwrap();
    assert_eq!(collected.len(), 4);

    let position = |id: &str| collected.iter().position(|c| c == id).unwrap();
    assert!(position(&e1) < position(&e1a), "ancestors come first");
    assert!(position(&e1) < position(&e1b));
    assert!(position(&e1) < position(&e2), "siblings follow start order");
    assert!(position(&e1b) < position(&e2), "subtree completes before the next sibling");
}

#[tokio::test]
async fn test_find_first_scope_walks_parents_and_super() {
    let test = TestContext::new();
    let mut ctx = test.command();

    let pi = start_order_instance(&mut ctx).await;
    let e1 = tree::create_child_execution(&mut ctx, &pi).await.unwrap();
    let e1a = tree::create_child_execution(&mut ctx, &e1).await.unwrap();

    // Non-scope chain resolves to the process instance.
    assert_eq!(
        tree::find_first_scope(&mut ctx, &e1a).await.unwrap(),
        Some(pi.clone())
    );

    // From a called instance's child, the walk crosses the super link.
    let ce = start_child_at(&mut ctx, &pi, "callBilling").await;
    let pi2 = tree::create_subprocess_instance(&mut ctx, BILLING_DEFINITION_ID, &ce, None, None)
        .await
        .unwrap();
    let s1 = tree::create_child_execution(&mut ctx, &pi2).await.unwrap();
    assert_eq!(
        tree::find_first_scope(&mut ctx, &s1).await.unwrap(),
        Some(pi2.clone()),
        "the called instance root is the nearest scope"
    );
    assert_eq!(
        tree::find_first_multi_instance_root(&mut ctx, &s1).await.unwrap(),
        None,
        "no multi-instance root anywhere in this chain"
    );
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for meander-core integration tests.
//!
//! Provides a TestContext wiring an instrumented in-memory store, a
//! collecting event dispatcher and a recording history manager into an
//! engine runtime with two small definitions deployed.

#![allow(dead_code)]

use std::sync::Arc;

use meander_core::behavior::BehaviorRegistry;
use meander_core::config::EngineConfig;
use meander_core::context::CommandContext;
use meander_core::engine::EngineRuntime;
use meander_core::events::CollectingDispatcher;
use meander_core::history::RecordingHistoryManager;
use meander_core::model::{FlowElement, ProcessDefinition};
use meander_core::store::{InstrumentedStore, MemoryStore};
use meander_core::tree::{self, ProcessInstanceStartParams};

/// The definition id used by [`order_definition`].
pub const ORDER_DEFINITION_ID: &str = "order:1:deploy-1";
/// The definition id used by [`billing_definition`].
pub const BILLING_DEFINITION_ID: &str = "billing:1:deploy-1";

/// Test context bundling the runtime with its observable collaborators.
pub struct TestContext {
    pub runtime: Arc<EngineRuntime>,
    pub memory: Arc<MemoryStore>,
    pub store: Arc<InstrumentedStore>,
    pub dispatcher: Arc<CollectingDispatcher>,
    pub history: Arc<RecordingHistoryManager>,
}

impl TestContext {
    /// Default configuration, no behaviors.
    pub fn new() -> Self {
        Self::with(EngineConfig::default(), BehaviorRegistry::new())
    }

    /// Custom configuration and behavior registry.
    pub fn with(config: EngineConfig, behaviors: BehaviorRegistry) -> Self {
        init_tracing();
        let memory = Arc::new(MemoryStore::new());
        let store = Arc::new(InstrumentedStore::new(memory.clone()));
        let dispatcher = Arc::new(CollectingDispatcher::new());
        let history = Arc::new(RecordingHistoryManager::new());

        let runtime = Arc::new(
            EngineRuntime::builder()
                .config(config)
                .store(store.clone())
                .dispatcher(dispatcher.clone())
                .history(history.clone())
                .behaviors(behaviors)
                .definition(order_definition())
                .definition(billing_definition())
                .build()
                .expect("engine runtime should build"),
        );

        Self {
            runtime,
            memory,
            store,
            dispatcher,
            history,
        }
    }

    /// Open a fresh command context.
    pub fn command(&self) -> CommandContext {
        CommandContext::new(self.runtime.clone())
    }
}

/// Install a log subscriber honoring RUST_LOG. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A definition with a user task, a service task and a call activity.
pub fn order_definition() -> ProcessDefinition {
    ProcessDefinition::new(ORDER_DEFINITION_ID, "order")
        .with_flow_element(FlowElement::node("reviewOrder", "UserTask").with_name("Review order"))
        .with_flow_element(FlowElement::node("shipOrder", "ServiceTask"))
        .with_flow_element(FlowElement::node("callBilling", "CallActivity"))
        .with_flow_element(FlowElement::sequence_flow("flow1"))
}

/// The definition called by the order process.
pub fn billing_definition() -> ProcessDefinition {
    ProcessDefinition::new(BILLING_DEFINITION_ID, "billing")
        .with_flow_element(FlowElement::node("chargeCard", "ServiceTask"))
}

/// Start an order process instance.
pub async fn start_order_instance(ctx: &mut CommandContext) -> String {
    tree::create_process_instance_execution(
        ctx,
        ProcessInstanceStartParams::new(ORDER_DEFINITION_ID),
    )
    .await
    .expect("process instance should start")
}

/// Create an active child execution positioned at `activity_id`.
pub async fn start_child_at(
    ctx: &mut CommandContext,
    parent_execution_id: &str,
    activity_id: &str,
) -> String {
    let child_id = tree::create_child_execution(ctx, parent_execution_id)
        .await
        .expect("child execution should be created");
    tree::set_current_activity(ctx, &child_id, Some(activity_id))
        .await
        .expect("activity should be set");
    child_id
}

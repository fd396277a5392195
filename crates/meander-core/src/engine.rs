// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable engine runtime.
//!
//! [`EngineRuntime`] wires the store, dispatcher, history manager,
//! behavior registry and definition registry together. It is built once
//! and shared; per-request state lives in
//! [`CommandContext`](crate::context::CommandContext)s opened from it.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use meander_core::context::CommandContext;
//! use meander_core::engine::EngineRuntime;
//! use meander_core::store::MemoryStore;
//!
//! let runtime = Arc::new(
//!     EngineRuntime::builder()
//!         .store(Arc::new(MemoryStore::new()))
//!         .build()?,
//! );
//! let mut ctx = CommandContext::new(runtime.clone());
//! // ... run tree-manager operations against ctx ...
//! ctx.close().await?;
//! ```

use std::sync::Arc;

use anyhow::Result;

use crate::behavior::{
    BehaviorRegistry, CaseInstanceService, NoopCaseInstanceService, ProcessInstanceLifecycleHook,
};
use crate::config::EngineConfig;
use crate::events::{EventDispatcher, NoopDispatcher};
use crate::history::{HistoryManager, NoopHistoryManager};
use crate::model::{DefinitionRegistry, ProcessDefinition};
use crate::store::RuntimeStore;

/// Builder for creating an [`EngineRuntime`].
pub struct EngineRuntimeBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn RuntimeStore>>,
    dispatcher: Arc<dyn EventDispatcher>,
    history: Arc<dyn HistoryManager>,
    behaviors: BehaviorRegistry,
    definitions: DefinitionRegistry,
    lifecycle_hook: Option<Arc<dyn ProcessInstanceLifecycleHook>>,
    case_instances: Arc<dyn CaseInstanceService>,
}

impl std::fmt::Debug for EngineRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntimeBuilder")
            .field("config", &self.config)
            .field("store", &self.store.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Default for EngineRuntimeBuilder {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
            dispatcher: Arc::new(NoopDispatcher),
            history: Arc::new(NoopHistoryManager),
            behaviors: BehaviorRegistry::new(),
            definitions: DefinitionRegistry::new(),
            lifecycle_hook: None,
            case_instances: Arc::new(NoopCaseInstanceService),
        }
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the store (required).
    pub fn store(mut self, store: Arc<dyn RuntimeStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the event dispatcher. Default: disabled.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn EventDispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Set the history manager. Default: no-op.
    pub fn history(mut self, history: Arc<dyn HistoryManager>) -> Self {
        self.history = history;
        self
    }

    /// Set the behavior registry. Default: empty.
    pub fn behaviors(mut self, behaviors: BehaviorRegistry) -> Self {
        self.behaviors = behaviors;
        self
    }

    /// Register a process definition.
    pub fn definition(mut self, definition: ProcessDefinition) -> Self {
        self.definitions.register(definition);
        self
    }

    /// Set the process-instance lifecycle hook.
    pub fn lifecycle_hook(mut self, hook: Arc<dyn ProcessInstanceLifecycleHook>) -> Self {
        self.lifecycle_hook = Some(hook);
        self
    }

    /// Set the cross-engine case-instance service. Default: no-op.
    pub fn case_instances(mut self, service: Arc<dyn CaseInstanceService>) -> Self {
        self.case_instances = service;
        self
    }

    /// Build the runtime.
    ///
    /// Returns an error if required collaborators are missing.
    pub fn build(self) -> Result<EngineRuntime> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;

        Ok(EngineRuntime {
            config: self.config,
            store,
            dispatcher: self.dispatcher,
            history: self.history,
            behaviors: Arc::new(self.behaviors),
            definitions: self.definitions,
            lifecycle_hook: self.lifecycle_hook,
            case_instances: self.case_instances,
        })
    }
}

/// The shared engine runtime: configuration plus every collaborator the
/// command modules need. Cheap to share behind an [`Arc`].
pub struct EngineRuntime {
    pub(crate) config: EngineConfig,
    pub(crate) store: Arc<dyn RuntimeStore>,
    pub(crate) dispatcher: Arc<dyn EventDispatcher>,
    pub(crate) history: Arc<dyn HistoryManager>,
    pub(crate) behaviors: Arc<BehaviorRegistry>,
    pub(crate) definitions: DefinitionRegistry,
    pub(crate) lifecycle_hook: Option<Arc<dyn ProcessInstanceLifecycleHook>>,
    pub(crate) case_instances: Arc<dyn CaseInstanceService>,
}

impl std::fmt::Debug for EngineRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntime")
            .field("config", &self.config)
            .field("behaviors", &self.behaviors)
            .finish()
    }
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The backing store.
    pub fn store(&self) -> Arc<dyn RuntimeStore> {
        self.store.clone()
    }

    /// The definition registry.
    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }
}

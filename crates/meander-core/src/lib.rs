// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Meander Core - Process Engine Runtime State
//!
//! This crate is the persistence and runtime-state core of the meander
//! process engine: it manages the lifecycle of executions (the process
//! instance tree), their tasks, jobs, variables and audit records,
//! against a pluggable store, within explicit units of work.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    BPMN Execution Layer                         │
//! │        (parser, activity behaviors, job executor - external)    │
//! └─────────────────────────────────────────────────────────────────┘
//!                 │ behavior contracts        │ commands
//!                 ▼                           ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        meander-core                             │
//! │  (This Crate)                                                   │
//! │  Execution Tree · Variable Scopes · Counting · Audit Records    │
//! └─────────────────────────────────────────────────────────────────┘
//!                 │ RuntimeStore contract
//!                 ▼
//! ┌───────────────────────┐   ┌───────────────────────┐
//! │        SQLite         │   │       In-memory       │
//! │   (durable storage)   │   │  (embedded / tests)   │
//! └───────────────────────┘   └───────────────────────┘
//! ```
//!
//! # Units of work
//!
//! Every operation runs inside a [`context::CommandContext`] opened
//! from the shared [`engine::EngineRuntime`]. The context caches every
//! entity it touches, so reads observe the command's own writes before
//! any flush; relationship loads are explicit; and dirty entities are
//! written back once, at flush, under an optimistic revision check.
//! Conflicts between concurrent commands surface as retriable
//! concurrency errors - retry policy belongs to the caller.
//!
//! # Operations
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`tree`] | Execution tree: creation, wiring, queries, cascade delete |
//! | [`scope`] | Hierarchical variable read/write resolution |
//! | [`recorder`] | Activity-instance audit records |
//! | [`tasks`] | User tasks and the cascade's task teardown |
//! | [`jobs`] | Job rows with per-kind counting |
//!
//! # Counting optimization
//!
//! Executions carry per-kind counters of their related entities
//! (tasks, jobs per job kind, variables, event subscriptions, identity
//! links). While counting is trusted, a zero counter lets the cascade
//! skip the store entirely for that entity kind. In-command changes
//! accumulate in atomic deltas and are folded into the persisted base
//! at flush.

#![deny(missing_docs)]

/// Contracts toward activity behaviors and embedding collaborators.
pub mod behavior;

/// Engine configuration from environment variables.
pub mod config;

/// The command context: per-command entity cache and flush.
pub mod context;

/// Counting-optimization gates.
pub mod counting;

/// The embeddable engine runtime and its builder.
pub mod engine;

/// Runtime entity types and capability traits.
pub mod entities;

/// Error types with stable error codes.
pub mod error;

/// Lifecycle events and the dispatcher contract.
pub mod events;

/// History manager contract.
pub mod history;

/// Job management with per-kind counting.
pub mod jobs;

/// Read-only process-model surface.
pub mod model;

/// Activity-instance recording glue.
pub mod recorder;

/// Hierarchical variable scope resolution.
pub mod scope;

/// Store contract and backends (memory, sqlite, instrumented).
pub mod store;

/// User tasks and the cascade's task teardown.
pub mod tasks;

/// Execution tree management and cascading deletion.
pub mod tree;

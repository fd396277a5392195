// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Read-only process-model surface consumed by the runtime core.
//!
//! The model producer (parser, deployer) lives outside this crate. The
//! core only needs enough of the model to know which flow element an
//! execution currently occupies, whether that element is a flow node,
//! and which event-subprocess start events a definition declares.

use std::collections::HashMap;
use std::sync::Arc;

/// How a flow element participates in the process graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowElementKind {
    /// An activity, gateway or event - occupies an execution and is
    /// mirrored into activity-instance records.
    FlowNode,
    /// A transition between flow nodes - never recorded as an activity.
    SequenceFlow,
}

/// One element of a process definition's flow graph.
#[derive(Debug, Clone)]
pub struct FlowElement {
    /// Element id, unique within the definition.
    pub id: String,
    /// Display name, if modelled.
    pub name: Option<String>,
    /// Node or sequence flow.
    pub kind: FlowElementKind,
    /// Concrete element type name as the model layer reports it
    /// (e.g. "UserTask", "CallActivity", "BoundaryEvent").
    pub type_name: String,
}

impl FlowElement {
    /// Create a flow node element.
    pub fn node(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind: FlowElementKind::FlowNode,
            type_name: type_name.into(),
        }
    }

    /// Create a sequence flow element.
    pub fn sequence_flow(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind: FlowElementKind::SequenceFlow,
            type_name: "SequenceFlow".to_string(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether this element is a flow node (vs. a sequence flow).
    pub fn is_flow_node(&self) -> bool {
        self.kind == FlowElementKind::FlowNode
    }

    /// The activity type recorded into activity-instance rows: the
    /// element type name with a lower-cased first character.
    pub fn activity_type(&self) -> String {
        lower_camel(&self.type_name)
    }
}

/// An event-subprocess start event declared by a definition, resolved
/// into an event subscription when a process instance starts.
#[derive(Debug, Clone)]
pub struct EventSubprocessStart {
    /// The start-event activity id.
    pub activity_id: String,
    /// Event type ("signal", "message", ...).
    pub event_type: String,
    /// Event name to subscribe on, if the event carries one.
    pub event_name: Option<String>,
}

/// A deployed process definition, as much of it as the runtime core
/// consumes.
#[derive(Debug, Clone)]
pub struct ProcessDefinition {
    /// Definition id (unique per deployed version).
    pub id: String,
    /// Definition key (stable across versions).
    pub key: String,
    /// Version number.
    pub version: i32,
    /// Display name.
    pub name: Option<String>,
    /// Tenant the definition was deployed for.
    pub tenant_id: Option<String>,
    /// Event-subprocess start events available at instance start.
    pub event_subprocess_starts: Vec<EventSubprocessStart>,
    flow_elements: HashMap<String, FlowElement>,
}

impl ProcessDefinition {
    /// Create an empty definition.
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            version: 1,
            name: None,
            tenant_id: None,
            event_subprocess_starts: Vec::new(),
            flow_elements: HashMap::new(),
        }
    }

    /// Add a flow element.
    pub fn with_flow_element(mut self, element: FlowElement) -> Self {
        self.flow_elements.insert(element.id.clone(), element);
        self
    }

    /// Add an event-subprocess start event.
    pub fn with_event_subprocess_start(mut self, start: EventSubprocessStart) -> Self {
        self.event_subprocess_starts.push(start);
        self
    }

    /// Look up a flow element by id.
    pub fn find_flow_element(&self, id: &str) -> Option<&FlowElement> {
        self.flow_elements.get(id)
    }
}

/// Immutable registry of deployed definitions, built once at engine
/// startup and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct DefinitionRegistry {
    by_id: HashMap<String, Arc<ProcessDefinition>>,
}

impl DefinitionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Intended for engine build time only.
    pub fn register(&mut self, definition: ProcessDefinition) {
        self.by_id
            .insert(definition.id.clone(), Arc::new(definition));
    }

    /// Look up a definition by id.
    pub fn find(&self, definition_id: &str) -> Option<Arc<ProcessDefinition>> {
        self.by_id.get(definition_id).cloned()
    }
}

fn lower_camel(type_name: &str) -> String {
    let mut chars = type_name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_type_is_lower_camel_cased() {
        assert_eq!(FlowElement::node("t1", "UserTask").activity_type(), "userTask");
        assert_eq!(
            FlowElement::node("e1", "BoundaryEvent").activity_type(),
            "boundaryEvent"
        );
        assert_eq!(
            FlowElement::node("c1", "CallActivity").activity_type(),
            "callActivity"
        );
    }

    #[test]
    fn test_sequence_flows_are_not_flow_nodes() {
        assert!(!FlowElement::sequence_flow("f1").is_flow_node());
        assert!(FlowElement::node("t1", "ServiceTask").is_flow_node());
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = DefinitionRegistry::new();
        registry.register(
            ProcessDefinition::new("order:1:abc", "order")
                .with_flow_element(FlowElement::node("t1", "UserTask")),
        );

        let definition = registry.find("order:1:abc").expect("definition registered");
        assert_eq!(definition.key, "order");
        assert!(definition.find_flow_element("t1").is_some());
        assert!(registry.find("missing").is_none());
    }
}

//! Intermediate representation for operator graphs.
//!
//! The IR is a directed graph where:
//! - **Nodes** (`Node`) are operators from the source or target vocabulary
//! - **Values** (`ValueId`) are immutable SSA tensors, each produced by exactly
//!   one node or supplied as a graph input
//! - **Uses** (`Use`) record which operand slot of which node reads a value
//!
//! Use lists are owned by the graph and only change through its mutation
//! methods (`add_node`, `erase_node`, `set_operand`, `swap_operands`,
//! `replace_all_uses`), so they always agree with the nodes' operand lists.

use crate::attribute::{AttributeValue, Attributes};
use crate::op::{OpKind, TargetOp};
use crate::types::{TensorType, TensorValue};
use crate::{Error, Result};
use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::Topo;

use std::collections::HashMap;
use std::fmt;

/// Type alias for node identifiers (backed by petgraph NodeIndex).
pub type NodeId = NodeIndex;

/// Unique identifier for an SSA tensor value.
///
/// Identifiers are never reused, so a stale `ValueId` of an erased node's
/// output simply fails lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

impl ValueId {
    /// Create a new value ID.
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// One operand slot reading a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Use {
    /// The consuming node.
    pub node: NodeId,

    /// Index into the consumer's operand list.
    pub operand: usize,
}

/// Metadata of an SSA value.
#[derive(Debug, Clone)]
pub struct Value {
    /// Debug name (graph inputs keep the name they were declared with).
    pub name: String,

    /// Element type and shape, fixed at creation.
    pub ty: TensorType,
}

// ──────────────────────────────── Graph ─────────────────────────────────

/// Operator graph with producer and use-list tables.
///
/// Nodes live in a petgraph `StableGraph`; petgraph edges (one per operand
/// slot, producer to consumer) exist solely for topological ordering.
#[derive(Clone)]
pub struct Graph {
    /// The graph structure.
    graph: StableGraph<Node, ()>,

    /// Value metadata side-table.
    values: HashMap<ValueId, Value>,

    /// Next value identifier to hand out.
    next_value: usize,

    /// Lookup table: value -> producing node.
    producers: HashMap<ValueId, NodeId>,

    /// Lookup table: value -> operand slots reading it.
    uses: HashMap<ValueId, Vec<Use>>,

    /// Graph input values (no producer).
    inputs: Vec<ValueId>,

    /// Graph output values (kept alive regardless of uses).
    outputs: Vec<ValueId>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            graph: StableGraph::new(),
            values: HashMap::new(),
            next_value: 0,
            producers: HashMap::new(),
            uses: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    // ── Node access ──

    /// Get an immutable reference to a node.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} not found", id)))
    }

    /// Check whether a node is still present.
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.graph.node_weight(id).is_some()
    }

    /// Iterate over all nodes in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.graph
            .node_indices()
            .filter_map(|id| self.graph.node_weight(id).map(|node| (id, node)))
    }

    /// Get the number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    // ── Value access ──

    /// Get the metadata of a value.
    pub fn value(&self, id: ValueId) -> Result<&Value> {
        self.values
            .get(&id)
            .ok_or_else(|| Error::InvalidGraph(format!("Value {} not found", id)))
    }

    /// Get the type of a value.
    pub fn value_type(&self, id: ValueId) -> Result<&TensorType> {
        Ok(&self.value(id)?.ty)
    }

    /// Get the number of live values in the graph.
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Get the node that produces a value, if any.
    pub fn producer(&self, id: ValueId) -> Option<NodeId> {
        self.producers.get(&id).copied()
    }

    /// Get the operand slots that read a value.
    pub fn uses(&self, id: ValueId) -> &[Use] {
        self.uses.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Get the distinct nodes that read a value, in use order.
    pub fn users(&self, id: ValueId) -> Vec<NodeId> {
        let mut users: Vec<NodeId> = Vec::new();
        for u in self.uses(id) {
            if !users.contains(&u.node) {
                users.push(u.node);
            }
        }
        users
    }

    /// Check whether a value is read by any node or is a graph output.
    pub fn is_live(&self, id: ValueId) -> bool {
        !self.uses(id).is_empty() || self.outputs.contains(&id)
    }

    /// Get the literal of a value produced by a target `const` node.
    pub fn constant_value(&self, id: ValueId) -> Option<&TensorValue> {
        let node = self.node(self.producer(id)?).ok()?;
        if node.kind != OpKind::Target(TargetOp::Const) {
            return None;
        }
        node.attr("value").and_then(AttributeValue::as_tensor)
    }

    /// Graph input values.
    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Graph output values.
    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    // ── Graph mutation ──

    /// Declare a graph input and return its value ID.
    pub fn add_input(&mut self, name: impl Into<String>, ty: TensorType) -> ValueId {
        let id = self.allocate_value(name.into(), ty);
        self.inputs.push(id);
        id
    }

    /// Mark a value as a graph output.
    pub fn mark_output(&mut self, id: ValueId) -> Result<()> {
        self.value(id)?;
        self.outputs.push(id);
        Ok(())
    }

    /// Add a node to the graph, creating one output value per entry of
    /// `output_types`.
    ///
    /// Registers the node's operand slots in the use lists and adds petgraph
    /// edges for topological ordering.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand refers to a value not in the graph.
    pub fn add_node(&mut self, mut node: Node, output_types: Vec<TensorType>) -> Result<NodeId> {
        for &input in &node.inputs {
            if !self.values.contains_key(&input) {
                return Err(Error::InvalidGraph(format!(
                    "Node '{}' references unknown operand {}",
                    node.display_name(),
                    input
                )));
            }
        }

        node.outputs.clear();
        let inputs = node.inputs.clone();
        let node_id = self.graph.add_node(node);

        let mut outputs = Vec::with_capacity(output_types.len());
        for ty in output_types {
            let id = ValueId::new(self.next_value);
            let value = self.allocate_value(id.to_string(), ty);
            self.producers.insert(value, node_id);
            outputs.push(value);
        }

        for (operand, input) in inputs.into_iter().enumerate() {
            self.uses.entry(input).or_default().push(Use {
                node: node_id,
                operand,
            });
            self.add_dependency(input, node_id);
        }

        self.node_weight_mut(node_id)?.outputs = outputs;
        Ok(node_id)
    }

    /// Redirect one operand slot of a node to another value.
    ///
    /// Updates the node's operand list, the use lists of both the old and the
    /// new value, and the ordering edges in a single step.
    pub fn set_operand(&mut self, node_id: NodeId, operand: usize, value: ValueId) -> Result<()> {
        self.value(value)?;
        if let Some(producer) = self.producer(value) {
            // The producer must not depend on this node, directly or transitively
            if producer == node_id || has_path_connecting(&self.graph, node_id, producer, None) {
                return Err(Error::InvalidGraph(format!(
                    "Redirecting operand {} of node {:?} to {} would form a cycle",
                    operand, node_id, value
                )));
            }
        }

        let old = self.node(node_id)?.input(operand)?;
        if old == value {
            return Ok(());
        }

        let slot = Use {
            node: node_id,
            operand,
        };
        self.remove_use(old, slot)?;
        self.uses.entry(value).or_default().push(slot);
        self.node_weight_mut(node_id)?.inputs[operand] = value;
        self.remove_dependency(old, node_id);
        self.add_dependency(value, node_id);

        Ok(())
    }

    /// Swap two operand slots of a node, keeping the use lists in sync.
    pub fn swap_operands(&mut self, node_id: NodeId, a: usize, b: usize) -> Result<()> {
        let node = self.node(node_id)?;
        let value_a = node.input(a)?;
        let value_b = node.input(b)?;
        if a == b || value_a == value_b {
            return Ok(());
        }

        self.retarget_use(value_a, node_id, a, b)?;
        self.retarget_use(value_b, node_id, b, a)?;
        self.node_weight_mut(node_id)?.inputs.swap(a, b);

        Ok(())
    }

    /// Replace every use of `from` (including graph outputs) with `to`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShapeInference` if the two values have different types:
    /// a replacement must never change what consumers observe.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) -> Result<()> {
        if from == to {
            return Ok(());
        }

        let from_ty = self.value_type(from)?;
        let to_ty = self.value_type(to)?;
        if from_ty != to_ty {
            return Err(Error::ShapeInference(format!(
                "Cannot replace {} of type {} with {} of type {}",
                from, from_ty, to, to_ty
            )));
        }

        let snapshot = self.uses(from).to_vec();
        tracing::trace!(%from, %to, uses = snapshot.len(), "replace_all_uses");
        for u in snapshot {
            self.set_operand(u.node, u.operand, to)?;
        }

        for output in &mut self.outputs {
            if *output == from {
                *output = to;
            }
        }

        Ok(())
    }

    /// Erase a node and destroy its output values.
    ///
    /// # Errors
    ///
    /// Returns an error if any output still has uses or is a graph output;
    /// uses must be redirected before erasure.
    pub fn erase_node(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        for &output in &node.outputs {
            if self.is_live(output) {
                return Err(Error::InvalidGraph(format!(
                    "Attempting to erase node '{}' whose output {} is still live",
                    node.display_name(),
                    output
                )));
            }
        }

        let inputs = node.inputs.clone();
        let outputs = node.outputs.clone();

        for (operand, input) in inputs.into_iter().enumerate() {
            self.remove_use(input, Use { node: id, operand })?;
        }

        for output in outputs {
            self.values.remove(&output);
            self.producers.remove(&output);
            self.uses.remove(&output);
        }

        // Removing the node also removes its petgraph edges
        if let Some(node) = self.graph.remove_node(id) {
            tracing::trace!(node = %node.display_name(), "erased node");
        }

        Ok(())
    }

    // ── Graph queries ──

    /// Get the topological order of nodes in the graph.
    ///
    /// Returns nodes in an order such that all operands of a node are produced
    /// before the node itself.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut topo = Topo::new(&self.graph);
        let mut order = Vec::new();

        while let Some(id) = topo.next(&self.graph) {
            order.push(id);
        }

        order
    }

    /// Check the structural invariants of the graph.
    ///
    /// - every operand refers to a live value
    /// - every value has exactly one producer or is a graph input
    /// - the use lists match the nodes' operand lists exactly
    /// - graph inputs and outputs refer to live values
    pub fn verify(&self) -> Result<()> {
        let mut expected: HashMap<ValueId, Vec<Use>> = HashMap::new();

        for (id, node) in self.nodes() {
            for (operand, &input) in node.inputs.iter().enumerate() {
                if !self.values.contains_key(&input) {
                    return Err(Error::InvalidGraph(format!(
                        "Node '{}' reads erased value {}",
                        node.display_name(),
                        input
                    )));
                }
                expected.entry(input).or_default().push(Use { node: id, operand });
            }
            for &output in &node.outputs {
                if self.producer(output) != Some(id) {
                    return Err(Error::InvalidGraph(format!(
                        "Output {} of node '{}' has an inconsistent producer entry",
                        output,
                        node.display_name()
                    )));
                }
            }
        }

        for &id in self.values.keys() {
            let is_input = self.inputs.contains(&id);
            let has_producer = self.producers.contains_key(&id);
            if is_input == has_producer {
                return Err(Error::InvalidGraph(format!(
                    "Value {} must have exactly one producer or be a graph input",
                    id
                )));
            }

            let mut recorded = self.uses(id).to_vec();
            let mut actual = expected.remove(&id).unwrap_or_default();
            recorded.sort();
            actual.sort();
            if recorded != actual {
                return Err(Error::InvalidGraph(format!(
                    "Use list of {} is out of sync: recorded {:?}, operands {:?}",
                    id, recorded, actual
                )));
            }
        }

        if let Some(&stray) = self.uses.keys().find(|id| !self.values.contains_key(id)) {
            return Err(Error::InvalidGraph(format!(
                "Use list recorded for erased value {}",
                stray
            )));
        }

        for &id in self.inputs.iter().chain(&self.outputs) {
            self.value(id)?;
        }

        Ok(())
    }

    // ── Internal helpers ──

    fn allocate_value(&mut self, name: String, ty: TensorType) -> ValueId {
        let id = ValueId::new(self.next_value);
        self.next_value += 1;
        self.values.insert(id, Value { name, ty });
        id
    }

    fn node_weight_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.graph
            .node_weight_mut(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Node {:?} not found", id)))
    }

    fn remove_use(&mut self, value: ValueId, slot: Use) -> Result<()> {
        let uses = self.uses.entry(value).or_default();
        let position = uses.iter().position(|u| *u == slot).ok_or_else(|| {
            Error::InvalidGraph(format!(
                "Use list of {} is missing operand {} of node {:?}",
                value, slot.operand, slot.node
            ))
        })?;
        uses.swap_remove(position);
        if uses.is_empty() {
            self.uses.remove(&value);
        }
        Ok(())
    }

    fn retarget_use(&mut self, value: ValueId, node: NodeId, from: usize, to: usize) -> Result<()> {
        let slot = self
            .uses
            .get_mut(&value)
            .and_then(|uses| {
                uses.iter_mut()
                    .find(|u| u.node == node && u.operand == from)
            })
            .ok_or_else(|| {
                Error::InvalidGraph(format!(
                    "Use list of {} is missing operand {} of node {:?}",
                    value, from, node
                ))
            })?;
        slot.operand = to;
        Ok(())
    }

    fn add_dependency(&mut self, value: ValueId, consumer: NodeId) {
        if let Some(producer) = self.producer(value) {
            self.graph.add_edge(producer, consumer, ());
        }
    }

    fn remove_dependency(&mut self, value: ValueId, consumer: NodeId) {
        if let Some(producer) = self.producer(value) {
            if let Some(edge) = self.graph.find_edge(producer, consumer) {
                self.graph.remove_edge(edge);
            }
        }
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────────────────── Node ──────────────────────────────────

/// A node in the graph: one operator applied to operand values.
///
/// A node's operand list is only writable through `Graph` once the node has
/// been added, which keeps the use lists authoritative.
#[derive(Debug, Clone)]
pub struct Node {
    /// Node name (may be empty).
    pub name: String,

    /// Operator kind.
    pub kind: OpKind,

    /// Operand value IDs.
    inputs: Vec<ValueId>,

    /// Output value IDs (assigned by `Graph::add_node`).
    outputs: Vec<ValueId>,

    /// Operator attributes (e.g., axis, padding, pass-through hints).
    pub attributes: Attributes,
}

impl Node {
    /// Create a new node of the given kind.
    pub fn new(kind: impl Into<OpKind>) -> Self {
        Self {
            name: String::new(),
            kind: kind.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attributes: Attributes::new(),
        }
    }

    /// Set the node name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Append an operand.
    pub fn with_input(mut self, value: ValueId) -> Self {
        self.inputs.push(value);
        self
    }

    /// Append several operands.
    pub fn with_inputs(mut self, values: impl IntoIterator<Item = ValueId>) -> Self {
        self.inputs.extend(values);
        self
    }

    /// Set an attribute.
    pub fn with_attribute(mut self, key: &str, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Name for diagnostics: the node name, or the op kind when unnamed.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.kind.to_string()
        } else {
            self.name.clone()
        }
    }

    /// Get operand value IDs.
    pub fn inputs(&self) -> &[ValueId] {
        &self.inputs
    }

    /// Get output value IDs.
    pub fn outputs(&self) -> &[ValueId] {
        &self.outputs
    }

    /// Get one operand.
    pub fn input(&self, index: usize) -> Result<ValueId> {
        self.inputs.get(index).copied().ok_or_else(|| {
            Error::InvalidGraph(format!(
                "Node '{}' has no operand {} ({} operands)",
                self.display_name(),
                index,
                self.inputs.len()
            ))
        })
    }

    /// Get the single output of a single-result node.
    pub fn output(&self) -> Result<ValueId> {
        match self.outputs.as_slice() {
            [output] => Ok(*output),
            outputs => Err(Error::InvalidGraph(format!(
                "Node '{}' has {} outputs, expected exactly 1",
                self.display_name(),
                outputs.len()
            ))),
        }
    }

    /// Get an attribute.
    pub fn attr(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Get a required integer attribute.
    pub fn attr_i64(&self, key: &str) -> Result<i64> {
        let attr = self.required_attr(key)?;
        attr.as_int().ok_or_else(|| self.attr_type_error(key, "int", attr))
    }

    /// Get a required integer-list attribute.
    pub fn attr_ints(&self, key: &str) -> Result<&[i64]> {
        let attr = self.required_attr(key)?;
        attr.as_ints()
            .ok_or_else(|| self.attr_type_error(key, "ints", attr))
    }

    fn required_attr(&self, key: &str) -> Result<&AttributeValue> {
        self.attr(key).ok_or_else(|| {
            Error::Attribute(format!(
                "Node '{}' is missing required attribute '{}'",
                self.display_name(),
                key
            ))
        })
    }

    fn attr_type_error(&self, key: &str, expected: &str, actual: &AttributeValue) -> Error {
        Error::Attribute(format!(
            "Attribute '{}' of node '{}' must be {}, got {}",
            key,
            self.display_name(),
            expected,
            actual.kind_name()
        ))
    }
}

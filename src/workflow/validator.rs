//! Workflow validation.
//!
//! Definitions are validated when stored, so a run never has to discover a
//! structurally broken graph or an unknown node kind mid-flight.

use std::collections::HashSet;

use super::types::Workflow;
use crate::error::{Error, Result};
use crate::nodes::ExecutorRegistry;

/// Validate a workflow definition against the executor registry.
///
/// Checks:
/// - name present and well-formed
/// - at least one node, unique non-empty node ids
/// - every edge references existing nodes
/// - the entry node (explicit or implied) exists
/// - per-source edges are either one unlabelled edge or labelled branch edges
/// - every node kind resolves to a registered executor
pub fn validate_workflow(workflow: &Workflow, registry: &ExecutorRegistry) -> Result<()> {
    if workflow.name.is_empty() {
        return Err(Error::Configuration("Workflow name is required".into()));
    }

    if !workflow
        .name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Configuration(
            "Workflow name must contain only alphanumeric characters, hyphens, and underscores"
                .into(),
        ));
    }

    if workflow.nodes.is_empty() {
        return Err(Error::Configuration(
            "Workflow must have at least one node".into(),
        ));
    }

    let mut ids = HashSet::new();
    for node in &workflow.nodes {
        if node.id.is_empty() {
            return Err(Error::Configuration("Node ID cannot be empty".into()));
        }
        if !ids.insert(node.id.as_str()) {
            return Err(Error::Configuration(format!(
                "Duplicate node ID: {}",
                node.id
            )));
        }
    }

    for edge in &workflow.edges {
        if !ids.contains(edge.from.as_str()) {
            return Err(Error::Configuration(format!(
                "Edge references non-existent node '{}'",
                edge.from
            )));
        }
        if !ids.contains(edge.to.as_str()) {
            return Err(Error::Configuration(format!(
                "Edge references non-existent node '{}'",
                edge.to
            )));
        }
    }

    if let Some(entry) = &workflow.entry {
        if !ids.contains(entry.as_str()) {
            return Err(Error::Configuration(format!(
                "Entry node '{}' does not exist",
                entry
            )));
        }
    }

    // A node either branches (all outgoing edges labelled) or it does not
    // (exactly one unlabelled edge, or none at a terminal).
    for node in &workflow.nodes {
        let outgoing = workflow.outgoing(&node.id);
        let unlabelled = outgoing.iter().filter(|e| e.branch.is_none()).count();
        let labelled = outgoing.len() - unlabelled;

        if labelled > 0 && unlabelled > 0 {
            return Err(Error::Configuration(format!(
                "Node '{}' mixes branch-labelled and unlabelled outgoing edges",
                node.id
            )));
        }
        if unlabelled > 1 {
            return Err(Error::Configuration(format!(
                "Node '{}' has multiple unlabelled outgoing edges",
                node.id
            )));
        }
    }

    // Unknown node kind is a configuration error now, not at run time.
    for node in &workflow.nodes {
        if node.kind.is_empty() {
            return Err(Error::Configuration(format!(
                "Node '{}' has empty kind",
                node.id
            )));
        }
        if registry.get(&node.kind).is_none() {
            return Err(Error::Configuration(format!(
                "Unknown node kind '{}' on node '{}'",
                node.kind, node.id
            )));
        }
    }

    Ok(())
}

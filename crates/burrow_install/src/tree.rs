//! Traversal of the logical dependency tree.
//!
//! The installer visits nodes asynchronously with bounded concurrency, and
//! the reclaimer needs explicit pre- and post-order walks; both live here so
//! iteration order is spelled out at the call site rather than implied by a
//! walker default.

use std::sync::Arc;

use burrow_types::DepNode;
use futures::{future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt};
use tokio::sync::Semaphore;

use crate::InstallerError;

/// The number of dependency visitors allowed in flight at once.
pub const DEFAULT_VISIT_CONCURRENCY: usize = 50;

/// A visitor's verdict on a node's subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Continue into the node's children.
    Descend,
    /// Do not visit the node's children.
    Skip,
}

/// Visits every node of the tree with an async visitor, capping the number
/// of in-flight visitors at the semaphore's capacity. A visitor that returns
/// [`Visit::Skip`] prunes its subtree; the first visitor error aborts the
/// walk and is returned as-is.
///
/// The permit is held only while the visitor itself runs, never across the
/// descent into children, so a deep tree cannot deadlock the walk.
pub fn walk_concurrent<'a, F>(
    node: &'a DepNode,
    semaphore: Arc<Semaphore>,
    visitor: &'a F,
) -> BoxFuture<'a, Result<(), InstallerError>>
where
    F: Fn(&'a DepNode) -> BoxFuture<'a, Result<Visit, InstallerError>> + Send + Sync,
{
    async move {
        let permit = semaphore.clone().acquire_owned().await?;
        let decision = visitor(node).await?;
        drop(permit);

        if decision == Visit::Skip {
            return Ok(());
        }

        let mut children: FuturesUnordered<_> = node
            .children
            .iter()
            .map(|child| walk_concurrent(child, semaphore.clone(), visitor))
            .collect();
        while let Some(result) = children.next().await {
            result?;
        }
        Ok(())
    }
    .boxed()
}

/// Walks the tree pre-order. The callback's return value decides whether the
/// walk descends into the node's children.
pub fn walk_pre_order<'a>(node: &'a DepNode, f: &mut impl FnMut(&'a DepNode) -> bool) {
    if !f(node) {
        return;
    }
    for child in &node.children {
        walk_pre_order(child, f);
    }
}

/// Walks the tree post-order, visiting every node.
pub fn walk_post_order<'a>(node: &'a DepNode, f: &mut impl FnMut(&'a DepNode)) {
    for child in &node.children {
        walk_post_order(child, f);
    }
    f(node);
}

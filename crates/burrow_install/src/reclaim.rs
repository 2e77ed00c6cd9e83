//! Mark-and-sweep reclamation of failed optional-dependency subtrees.

use std::{collections::HashSet, path::Path};

use burrow_types::{Address, DepNode};

use crate::tree::{walk_post_order, walk_pre_order};

/// Removes the install directories of every subtree rooted at a failed
/// optional dependency.
///
/// The *mark* pass walks the tree pre-order without descending into failed
/// nodes; everything reached that way is live. The *sweep* pass walks
/// post-order and removes the install directory of every non-root node that
/// is neither live nor already purged.
///
/// Returns the purged addresses; the set is disjoint from the live set and
/// never contains the root.
pub async fn reclaim(
    root: &DepNode,
    failed: &HashSet<Address>,
    prefix: &Path,
) -> std::io::Result<HashSet<Address>> {
    // Mark.
    let mut live: HashSet<Address> = HashSet::new();
    walk_pre_order(root, &mut |node| {
        if failed.contains(&node.address) {
            return false;
        }
        live.insert(node.address.clone());
        true
    });

    // Sweep.
    let mut purged: HashSet<Address> = HashSet::new();
    let mut dead_paths = Vec::new();
    walk_post_order(root, &mut |node| {
        if node.is_root || live.contains(&node.address) || purged.contains(&node.address) {
            return;
        }
        purged.insert(node.address.clone());
        dead_paths.push(node.install_path(prefix));
    });

    for path in dead_paths {
        tracing::debug!("reclaiming failed optional subtree at {}", path.display());
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {}
            // Never materialized on disk; nothing to reclaim.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }

    Ok(purged)
}

//! Folding per-package documents into the project-wide package map.

use std::collections::HashMap;

use burrow_digest::Integrity;
use burrow_types::{
    Address, DepNode, PackageDocument, PackageMap, PackageMapEntry, PackageScope,
};
use indexmap::IndexMap;

use crate::tree::walk_pre_order;

/// Folds the documents of every installed dependency into a [`PackageMap`].
///
/// Nodes are folded in tree order, which makes the map's key order (and
/// therefore its serialized form) deterministic across runs. Each node's
/// address decides where it lands: the segments between the root and the
/// leaf select nested scopes, the leaf names the package entry, and the
/// document is merged into that entry with a shallow replace.
pub fn build_package_map(
    root: &DepNode,
    documents: &HashMap<Address, PackageDocument>,
    lockfile_integrity: Option<Integrity>,
) -> PackageMap {
    let mut map = PackageMap::new(lockfile_integrity);

    walk_pre_order(root, &mut |node| {
        if node.is_root {
            return true;
        }
        let Some(document) = documents.get(&node.address) else {
            // Bundled deps, local links and filtered nodes carry no
            // document; their children may still.
            return true;
        };
        let Some(leaf) = node.address.leaf() else {
            return true;
        };

        // Navigate (creating on demand) down the scope chain.
        let mut packages = &mut map.packages;
        let mut scopes = &mut map.scopes;
        for name in node.address.scope_chain() {
            let scope: &mut PackageScope = scopes
                .get_or_insert_with(IndexMap::new)
                .entry(name.clone())
                .or_default();
            packages = &mut scope.packages;
            scopes = &mut scope.scopes;
        }

        packages
            .entry(leaf.to_string())
            .or_insert_with(PackageMapEntry::default)
            .merge_document(document);
        true
    });

    map
}

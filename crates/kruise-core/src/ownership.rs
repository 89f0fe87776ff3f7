//! Ownership Matcher: does a child belong to a given parent?
//!
//! UID is authoritative and survives renames. Kind + name is the
//! fallback for objects that carry no UID (synthetic or test objects).

use crate::document::{Document, OwnerReference};

/// The candidate parent a child's owner references are compared against.
#[derive(Debug, Clone, Copy)]
pub struct OwnerKey<'a> {
    pub kind: &'a str,
    pub name: &'a str,
    pub uid: Option<&'a str>,
}

impl<'a> OwnerKey<'a> {
    /// Key for a parent document of the given kind.
    pub fn of(kind: &'a str, parent: &'a Document) -> Self {
        Self {
            kind,
            name: parent.name().unwrap_or_default(),
            uid: parent.uid().filter(|uid| !uid.is_empty()),
        }
    }
}

/// True iff any owner reference matches the parent by UID, or by kind and
/// name when the UIDs do not match. Empty owner lists never match.
pub fn is_owned_by(owners: &[OwnerReference], parent: OwnerKey<'_>) -> bool {
    owners.iter().any(|owner| {
        let uid_match = matches!(
            (owner.uid.as_deref(), parent.uid),
            (Some(child), Some(parent_uid)) if child == parent_uid
        );
        uid_match || (!parent.name.is_empty() && owner.kind == parent.kind && owner.name == parent.name)
    })
}

/// Convenience wrapper over a child document.
pub fn document_owned_by(child: &Document, parent: OwnerKey<'_>) -> bool {
    is_owned_by(&child.owner_references(), parent)
}

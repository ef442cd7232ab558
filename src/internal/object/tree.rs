//! Tree objects: ordered directory listings of further trees and blobs.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::{ObjectTrait, types::ObjectType};

/// File mode restricted to the values git recognizes for tree entries (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeItemMode {
    Tree,
    Blob,
    BlobExecutable,
    Link,
    Commit,
}

impl TreeItemMode {
    pub fn as_octal_str(&self) -> &'static str {
        match self {
            TreeItemMode::Tree => "40000",
            TreeItemMode::Blob => "100644",
            TreeItemMode::BlobExecutable => "100755",
            TreeItemMode::Link => "120000",
            TreeItemMode::Commit => "160000",
        }
    }

    pub fn from_octal_str(s: &str) -> Result<Self, GitError> {
        match s {
            "40000" | "040000" => Ok(TreeItemMode::Tree),
            "100644" => Ok(TreeItemMode::Blob),
            "100755" => Ok(TreeItemMode::BlobExecutable),
            "120000" => Ok(TreeItemMode::Link),
            "160000" => Ok(TreeItemMode::Commit),
            other => Err(GitError::InvalidTreeItem(other.to_string())),
        }
    }

    pub fn is_tree(&self) -> bool {
        matches!(self, TreeItemMode::Tree)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> Self {
        TreeItem { mode, id, name }
    }

    /// Collation key: directories sort as if their name carried a trailing `/`, per spec §3.
    fn sort_key(&self) -> String {
        if self.mode.is_tree() {
            format!("{}/", self.name)
        } else {
            self.name.clone()
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for item in &self.tree_items {
            writeln!(f, "{} {} {}", item.mode.as_octal_str(), item.id, item.name)?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build a tree from entries, enforcing the §3 invariants: unique names, entries sorted by
    /// the directory-aware collation key.
    pub fn from_tree_items(mut items: Vec<TreeItem>) -> Result<Self, GitError> {
        items.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        for pair in items.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(GitError::InvalidTreeItem(format!(
                    "duplicate entry name: {}",
                    pair[0].name
                )));
            }
        }
        let mut tree = Tree {
            id: ObjectHash::default(),
            tree_items: items,
        };
        let data = tree.to_data()?;
        tree.id = ObjectHash::from_type_and_data(ObjectType::Tree, &data);
        Ok(tree)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&TreeItem> {
        self.tree_items.iter().find(|i| i.name == name)
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError> {
        let mut items = Vec::new();
        let mut cursor = data;
        let hash_len = hash.size();
        while !cursor.is_empty() {
            let space = cursor
                .iter()
                .position(|&b| b == b' ')
                .ok_or(GitError::InvalidTreeObject)?;
            let mode_str =
                std::str::from_utf8(&cursor[..space]).map_err(|_| GitError::InvalidTreeObject)?;
            let mode = TreeItemMode::from_octal_str(mode_str)?;
            cursor = &cursor[space + 1..];

            let nul = cursor
                .iter()
                .position(|&b| b == 0)
                .ok_or(GitError::InvalidTreeObject)?;
            let name = std::str::from_utf8(&cursor[..nul])
                .map_err(|_| GitError::InvalidTreeObject)?
                .to_string();
            cursor = &cursor[nul + 1..];

            if cursor.len() < hash_len {
                return Err(GitError::InvalidTreeObject);
            }
            let id = ObjectHash::from_bytes(&cursor[..hash_len])
                .map_err(GitError::InvalidHashValue)?;
            cursor = &cursor[hash_len..];

            items.push(TreeItem { mode, id, name });
        }
        Ok(Tree {
            id: hash,
            tree_items: items,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn get_size(&self) -> usize {
        0
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend(item.mode.as_octal_str().as_bytes());
            data.push(b' ');
            data.extend(item.name.as_bytes());
            data.push(0);
            data.extend(item.id.as_ref());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, set_hash_kind_for_test};

    #[test]
    fn identical_entry_sets_hash_identically_regardless_of_input_order() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let a = TreeItem::new(TreeItemMode::Blob, ObjectHash::new(b"a"), "a.txt".into());
        let b = TreeItem::new(TreeItemMode::Blob, ObjectHash::new(b"b"), "b.txt".into());

        let t1 = Tree::from_tree_items(vec![a.clone(), b.clone()]).unwrap();
        let t2 = Tree::from_tree_items(vec![b, a]).unwrap();
        assert_eq!(t1.id, t2.id);
    }

    #[test]
    fn directory_collation_sorts_as_name_plus_slash() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        // "lib.rs" < "lib/" is false lexically ('.' < '/'), but git sorts "lib" as "lib/"
        // which then sorts after "lib.rs" because '.' (0x2e) < '/' (0x2f).
        let file = TreeItem::new(TreeItemMode::Blob, ObjectHash::new(b"f"), "lib.rs".into());
        let dir = TreeItem::new(TreeItemMode::Tree, ObjectHash::new(b"d"), "lib".into());
        let tree = Tree::from_tree_items(vec![dir.clone(), file.clone()]).unwrap();
        assert_eq!(tree.tree_items[0].name, "lib.rs");
        assert_eq!(tree.tree_items[1].name, "lib");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let a = TreeItem::new(TreeItemMode::Blob, ObjectHash::new(b"a"), "x".into());
        let b = TreeItem::new(TreeItemMode::Blob, ObjectHash::new(b"b"), "x".into());
        assert!(Tree::from_tree_items(vec![a, b]).is_err());
    }

    #[test]
    fn round_trips_through_bytes() {
        let _guard = set_hash_kind_for_test(HashKind::Sha1);
        let a = TreeItem::new(TreeItemMode::Blob, ObjectHash::new(b"a"), "a.txt".into());
        let tree = Tree::from_tree_items(vec![a]).unwrap();
        let data = tree.to_data().unwrap();
        let parsed = Tree::from_bytes(&data, tree.id).unwrap();
        assert_eq!(parsed, tree);
    }
}

//! Exact on-disk checkpoint format for a [`BPlusTree`].
//!
//! Hand-rolled rather than routed through a generic serializer: the layout
//! is fixed down to the byte (a magic number, a small fixed header, then a
//! self-describing record per node) so a checkpoint written by one build can
//! be sanity-checked by a completely different reader.
//!
//! ```text
//! header:
//!   magic          u32  0x42504C55 ("BPLU")
//!   order          i32
//!   total_nodes    i32
//!   tree_depth     i32
//!   next_node_id   u32
//!   root_id        u32
//! node record, repeated total_nodes times:
//!   kind           u8      0 = internal, 1 = leaf
//!   node_id        u32
//!   num_keys       u16
//!   is_root        u8      0 or 1
//!   keys           [f32; num_keys]
//!   -- internal only --
//!   num_children   u32
//!   children       [u32; num_children]
//!   -- leaf only --
//!   next_leaf      u32     0 if none
//!   per key i in 0..num_keys:
//!     bucket_count u32
//!     bucket       [(block_id: u32, slot: u16); bucket_count]
//! ```
//! All integers little-endian.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Result, StorageError};
use crate::storage::Locator;

use super::btree::BPlusTree;
use super::node::{Node, NodeId};

const MAGIC: u32 = 0x42504C55;

const KIND_INTERNAL: u8 = 0;
const KIND_LEAF: u8 = 1;

pub fn save(tree: &BPlusTree, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut buf = Vec::new();

    buf.extend_from_slice(&MAGIC.to_le_bytes());
    buf.extend_from_slice(&(tree.order() as i32).to_le_bytes());
    buf.extend_from_slice(&(tree.node_count() as i32).to_le_bytes());
    buf.extend_from_slice(&(tree.depth() as i32).to_le_bytes());
    buf.extend_from_slice(&tree.next_id().to_le_bytes());
    buf.extend_from_slice(&tree.root_id().to_le_bytes());

    let root_id = tree.root_id();
    for (&node_id, node) in tree.nodes() {
        let is_root = if node_id == root_id { 1u8 } else { 0u8 };
        match node {
            Node::Internal { keys, children } => {
                buf.push(KIND_INTERNAL);
                buf.extend_from_slice(&node_id.to_le_bytes());
                buf.extend_from_slice(&(keys.len() as u16).to_le_bytes());
                buf.push(is_root);
                for k in keys {
                    buf.extend_from_slice(&k.to_le_bytes());
                }
                buf.extend_from_slice(&(children.len() as u32).to_le_bytes());
                for c in children {
                    buf.extend_from_slice(&c.to_le_bytes());
                }
            }
            Node::Leaf { keys, buckets, next_leaf } => {
                buf.push(KIND_LEAF);
                buf.extend_from_slice(&node_id.to_le_bytes());
                buf.extend_from_slice(&(keys.len() as u16).to_le_bytes());
                buf.push(is_root);
                for k in keys {
                    buf.extend_from_slice(&k.to_le_bytes());
                }
                buf.extend_from_slice(&next_leaf.to_le_bytes());
                for bucket in buckets {
                    buf.extend_from_slice(&(bucket.len() as u32).to_le_bytes());
                    for loc in bucket {
                        buf.extend_from_slice(&loc.block_id.to_le_bytes());
                        buf.extend_from_slice(&loc.slot.to_le_bytes());
                    }
                }
            }
        }
    }

    let sibling = sibling_path(path);
    {
        let mut tmp = File::create(&sibling)?;
        tmp.write_all(&buf)?;
        tmp.sync_all()?;
    }
    fs::rename(&sibling, path)?;
    Ok(())
}

pub fn load(path: impl AsRef<Path>) -> Result<BPlusTree> {
    let mut file = File::open(path.as_ref())?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let mut cur = Cursor::new(&buf);

    let magic = cur.u32()?;
    if magic != MAGIC {
        return Err(StorageError::CorruptIndex(format!("bad magic 0x{magic:08X}")));
    }
    let order = cur.i32()? as usize;
    let total_nodes = cur.i32()?;
    let tree_depth = cur.i32()? as usize;
    let next_node_id = cur.u32()?;
    let root_id = cur.u32()?;

    if total_nodes < 0 {
        return Err(StorageError::CorruptIndex("negative total_nodes".to_string()));
    }

    let mut nodes: HashMap<NodeId, Node> = HashMap::with_capacity(total_nodes as usize);
    for _ in 0..total_nodes {
        let kind = cur.u8()?;
        let node_id = cur.u32()?;
        let num_keys = cur.u16()? as usize;
        let _is_root = cur.u8()?;
        let mut keys = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            keys.push(cur.f32()?);
        }
        let node = match kind {
            KIND_INTERNAL => {
                let num_children = cur.u32()? as usize;
                let mut children = Vec::with_capacity(num_children);
                for _ in 0..num_children {
                    children.push(cur.u32()?);
                }
                Node::Internal { keys, children }
            }
            KIND_LEAF => {
                let next_leaf = cur.u32()?;
                let mut buckets = Vec::with_capacity(num_keys);
                for _ in 0..num_keys {
                    let bucket_count = cur.u32()? as usize;
                    let mut bucket = Vec::with_capacity(bucket_count);
                    for _ in 0..bucket_count {
                        let block_id = cur.u32()?;
                        let slot = cur.u16()?;
                        bucket.push(Locator::new(block_id, slot));
                    }
                    buckets.push(bucket);
                }
                Node::Leaf { keys, buckets, next_leaf }
            }
            other => return Err(StorageError::CorruptIndex(format!("unknown node kind {other}"))),
        };
        nodes.insert(node_id, node);
    }

    Ok(BPlusTree::from_parts(order, nodes, next_node_id, root_id, tree_depth))
}

fn sibling_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().map(|n| n.to_owned()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Tiny cursor over a byte slice; every read that runs past the end turns
/// into a [`StorageError::CorruptIndex`] instead of a panic.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(StorageError::CorruptIndex(format!(
                "unexpected end of file at offset {} wanting {n} bytes",
                self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trips_a_small_tree() {
        let mut tree = BPlusTree::new(4);
        for i in 0..50 {
            tree.insert(i as f32, Locator::new(i, 0)).unwrap();
        }
        tree.insert(10.0, Locator::new(999, 1)).unwrap(); // duplicate key, second locator

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        save(&tree, &path).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.order(), tree.order());
        assert_eq!(loaded.depth(), tree.depth());
        assert_eq!(loaded.distinct_key_count(), tree.distinct_key_count());
        for i in 0..50 {
            assert_eq!(loaded.search(i as f32).unwrap(), tree.search(i as f32).unwrap());
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        fs::write(&path, [0u8; 32]).unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn rejects_truncated_file() {
        let mut tree = BPlusTree::new(4);
        tree.insert(1.0, Locator::new(0, 0)).unwrap();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        save(&tree, &path).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&path, bytes).unwrap();
        assert!(load(&path).is_err());
    }
}

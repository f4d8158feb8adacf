use super::{pmt::Pmt, registry::BlockId};
use std::collections::BTreeMap;

/// Metadata attached to the item with absolute index `offset` of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    pub offset: u64,
    pub key: String,
    pub value: Pmt,
    pub source: Option<BlockId>,
}

impl Tag {
    pub fn new(offset: u64, key: impl Into<String>, value: impl Into<Pmt>) -> Tag {
        Tag {
            offset,
            key: key.into(),
            value: value.into(),
            source: None,
        }
    }
}

/// Tags of one buffer, indexed by absolute item offset.
#[derive(Debug, Default)]
pub struct TagTable {
    tags: BTreeMap<u64, Vec<Tag>>,
    len: usize,
}

impl TagTable {
    pub fn new() -> TagTable {
        TagTable::default()
    }

    pub fn insert(&mut self, tag: Tag) {
        self.tags.entry(tag.offset).or_default().push(tag);
        self.len += 1;
    }

    /// Tags with offset in `[lo, hi)`, in offset order, then insertion order.
    pub fn range(&self, lo: u64, hi: u64) -> Vec<Tag> {
        if lo >= hi {
            return Vec::new();
        }
        self.tags
            .range(lo..hi)
            .flat_map(|(_, tags)| tags.iter().cloned())
            .collect()
    }

    /// Drops every tag with offset strictly below `offset`.
    pub fn prune_before(&mut self, offset: u64) -> usize {
        let kept = self.tags.split_off(&offset);
        let pruned = std::mem::replace(&mut self.tags, kept);
        let count = pruned.values().map(Vec::len).sum::<usize>();
        self.len -= count;
        count
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

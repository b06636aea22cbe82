//! RID bags.
//!
//! A bag of record ids comes in two physical shapes, told apart by the low
//! bit of the leading mode byte:
//!
//! ```text
//! embedded: | mode (bit0 = 1) | size: i32 | (cluster: i16, position: i64) * size |
//! tree:     | mode (bit0 = 0) | uuid: 16 | file_id: i64 | page_index: i64 |
//!           | page_offset: i32 | size: i32 | change_size: i32 | changes ... |
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{Buf, BufMut};
use uuid::Uuid;

use crate::error::{RecordError, RecordResult};
use crate::rid::Rid;

const MODE_EMBEDDED: u8 = 1;
const EMBEDDED_ENTRY_SIZE: usize = 10;
const TREE_HEADER_SIZE: usize = 1 + 16 + 8 + 8 + 4 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RidBagType {
    Embedded,
    Tree,
}

/// Pointer to a bag stored in a remote tree structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreePointer {
    pub uuid: Uuid,
    pub file_id: i64,
    pub page_index: i64,
    pub page_offset: i32,
    pub size: i32,
    pub change_size: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Contents {
    Embedded(Vec<Rid>),
    Tree(TreePointer),
}

/// A collection of record ids, either inline or backed by a remote tree.
#[derive(Debug, Clone)]
pub struct RidBag {
    contents: Contents,
    /// Bytes the bag was decoded from, kept so it re-encodes losslessly.
    raw: Option<Vec<u8>>,
}

impl RidBag {
    /// Build an embedded bag holding `rids`.
    pub fn embedded(rids: Vec<Rid>) -> Self {
        Self {
            contents: Contents::Embedded(rids),
            raw: None,
        }
    }

    /// Decode a bag from its binary form.
    pub fn from_bytes(data: &[u8]) -> RecordResult<Self> {
        let mode = *data
            .first()
            .ok_or_else(|| RecordError::InvalidBag("empty bag".to_string()))?;

        let contents = if mode & 1 == MODE_EMBEDDED {
            Contents::Embedded(parse_embedded(&data[1..])?)
        } else {
            Contents::Tree(parse_tree(data)?)
        };

        Ok(Self {
            contents,
            raw: Some(data.to_vec()),
        })
    }

    /// Decode a bag from the base64 text carried inside `%...;` markers.
    pub fn from_base64(encoded: &str) -> RecordResult<Self> {
        let data = STANDARD
            .decode(encoded.trim())
            .map_err(|e| RecordError::InvalidBag(format!("base64: {}", e)))?;
        Self::from_bytes(&data)
    }

    pub fn bag_type(&self) -> RidBagType {
        match self.contents {
            Contents::Embedded(_) => RidBagType::Embedded,
            Contents::Tree(_) => RidBagType::Tree,
        }
    }

    pub fn size(&self) -> usize {
        match &self.contents {
            Contents::Embedded(rids) => rids.len(),
            Contents::Tree(pointer) => pointer.size.max(0) as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// The tree uuid; `None` for embedded bags.
    pub fn uuid(&self) -> Option<Uuid> {
        self.tree().map(|p| p.uuid)
    }

    pub fn tree(&self) -> Option<&TreePointer> {
        match &self.contents {
            Contents::Tree(pointer) => Some(pointer),
            Contents::Embedded(_) => None,
        }
    }

    /// Inline record ids. Tree bags hold none locally.
    pub fn rids(&self) -> &[Rid] {
        match &self.contents {
            Contents::Embedded(rids) => rids,
            Contents::Tree(_) => &[],
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rid> {
        self.rids().iter()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        if let Some(raw) = &self.raw {
            return raw.clone();
        }
        match &self.contents {
            Contents::Embedded(rids) => {
                let mut buf = Vec::with_capacity(5 + rids.len() * EMBEDDED_ENTRY_SIZE);
                buf.put_u8(MODE_EMBEDDED);
                buf.put_i32(rids.len() as i32);
                for rid in rids {
                    buf.put_i16(rid.cluster);
                    buf.put_i64(rid.position);
                }
                buf
            }
            Contents::Tree(pointer) => {
                let mut buf = Vec::with_capacity(TREE_HEADER_SIZE);
                buf.put_u8(0);
                buf.put_slice(pointer.uuid.as_bytes());
                buf.put_i64(pointer.file_id);
                buf.put_i64(pointer.page_index);
                buf.put_i32(pointer.page_offset);
                buf.put_i32(pointer.size);
                buf.put_i32(pointer.change_size);
                buf
            }
        }
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }
}

impl PartialEq for RidBag {
    fn eq(&self, other: &Self) -> bool {
        self.contents == other.contents
    }
}

impl Eq for RidBag {}

impl<'a> IntoIterator for &'a RidBag {
    type Item = &'a Rid;
    type IntoIter = std::slice::Iter<'a, Rid>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn parse_embedded(mut buf: &[u8]) -> RecordResult<Vec<Rid>> {
    if buf.remaining() < 4 {
        return Err(RecordError::InvalidBag("missing embedded size".to_string()));
    }
    let size = buf.get_i32();
    if size < 0 {
        return Err(RecordError::InvalidBag(format!("negative size {}", size)));
    }
    let size = size as usize;
    if buf.remaining() < size * EMBEDDED_ENTRY_SIZE {
        return Err(RecordError::InvalidBag(format!(
            "expected {} entries, found {} bytes",
            size,
            buf.remaining()
        )));
    }

    let mut rids = Vec::with_capacity(size);
    for _ in 0..size {
        let cluster = buf.get_i16();
        let position = buf.get_i64();
        rids.push(Rid::new(cluster, position));
    }
    Ok(rids)
}

fn parse_tree(data: &[u8]) -> RecordResult<TreePointer> {
    if data.len() < TREE_HEADER_SIZE {
        return Err(RecordError::InvalidBag(format!(
            "tree pointer needs {} bytes, found {}",
            TREE_HEADER_SIZE,
            data.len()
        )));
    }
    let mut buf = &data[1..];
    let mut uuid = [0u8; 16];
    buf.copy_to_slice(&mut uuid);

    Ok(TreePointer {
        uuid: Uuid::from_bytes(uuid),
        file_id: buf.get_i64(),
        page_index: buf.get_i64(),
        page_offset: buf.get_i32(),
        size: buf.get_i32(),
        change_size: buf.get_i32(),
    })
}

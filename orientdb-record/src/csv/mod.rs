//! CSV record format (`ORecordDocument2csv`).
//!
//! The textual record encoding carried inside binary payloads:
//!
//! ```text
//! OUser@name:"admin",roles:[#4:0,#4:1],created:1412179200000t,meta:{"k":1}
//! ```
//!
//! Type markers: `"..."` string, `(...)` embedded document, `{...}` map,
//! `[...]` list, `<...>` set, `%...;` RID bag, `#c:p` link, and the numeric
//! suffixes `b s l f d c a t`.

mod deserializer;
mod serializer;

pub use deserializer::{deserialize, deserialize_value, find_comma_index, split_list};
pub use serializer::{serialize, serialize_map, serialize_value};

/// Class name advertised by clients using this format during the handshake.
pub const SERIALIZATION_NAME: &str = "ORecordDocument2csv";

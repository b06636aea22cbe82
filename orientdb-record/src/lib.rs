//! Record model for the OrientDB driver, independent of any transport.
//!
//! This crate holds the data types every transport agrees on and the record
//! formats used to move them:
//!
//! - **Rid**: record identifiers (`#cluster:position`)
//! - **Value / Document**: typed, insertion-ordered documents
//! - **RidBag**: embedded and tree-backed link bags
//! - **csv**: the textual record format embedded in binary payloads
//! - **json**: the REST record format with its `@fieldTypes` sidecar
//!
//! # Example
//!
//! ```rust
//! use orientdb_record::{csv, Document, Rid, Value};
//!
//! let doc = csv::deserialize(r#"OUser@name:"admin",roles:[#4:0]"#).unwrap();
//! assert_eq!(doc.class(), Some("OUser"));
//! assert_eq!(doc.get("roles"), Some(&Value::List(vec![Value::Link(Rid::new(4, 0))])));
//! assert_eq!(csv::serialize(&doc), r#"OUser@name:"admin",roles:[#4:0]"#);
//! # let _ = Document::new();
//! ```

pub mod csv;
pub mod document;
pub mod error;
pub mod json;
pub mod registry;
pub mod rid;
pub mod rid_bag;
pub mod value;

pub use document::{is_metadata_field, Document, METADATA_MARKER};
pub use error::{RecordError, RecordResult};
pub use registry::ClassRegistry;
pub use rid::Rid;
pub use rid_bag::{RidBag, RidBagType, TreePointer};
pub use value::Value;

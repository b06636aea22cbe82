use indexmap::IndexMap;
use orientdb_record::{Document, Rid, Value};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A record as carried by `Record` frames.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Null,
    /// Only the identity was sent.
    Rid(Rid),
    /// A `d` record; the document carries its rid and version.
    Document(Document),
    /// Any other record type, content left as bytes.
    Raw(RawRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub record_type: char,
    pub rid: Rid,
    pub version: i32,
    pub content: Option<Vec<u8>>,
}

impl Record {
    pub fn rid(&self) -> Option<Rid> {
        match self {
            Record::Null => None,
            Record::Rid(rid) => Some(*rid),
            Record::Document(doc) => doc.rid(),
            Record::Raw(raw) => Some(raw.rid),
        }
    }

    pub fn version(&self) -> Option<i32> {
        match self {
            Record::Document(doc) => doc.version(),
            Record::Raw(raw) => Some(raw.version),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Record::Null)
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Record::Document(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            Record::Document(doc) => Some(doc),
            _ => None,
        }
    }
}

/// One entry of a command response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandItem {
    /// Status `110`.
    Null,
    /// Status `1` or `114`.
    Record(Record),
    /// Status `2`: a record pulled in by the fetch plan.
    Prefetched(Record),
    /// Status `97`: a serialized scalar or document.
    Flat(Value),
    /// Status `108`.
    Collection(Vec<Record>),
}

/// A reassembled command response.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Collection(Vec<CommandItem>),
    /// Several results. Collections appear as their rid list followed by
    /// their records; prefetched records appear as plain records.
    ResultSet(Vec<CommandItem>),
}

impl CommandResult {
    /// Fold raw stream entries into a result.
    pub fn assemble(mut items: Vec<CommandItem>) -> Self {
        if items.len() == 1 {
            return match items.remove(0) {
                CommandItem::Collection(records) => {
                    CommandResult::Collection(records.into_iter().map(CommandItem::Record).collect())
                }
                CommandItem::Record(record) if !record.is_null() => {
                    CommandResult::Collection(vec![CommandItem::Record(record)])
                }
                other => CommandResult::Collection(vec![other]),
            };
        }

        let mut graph = Vec::with_capacity(items.len());
        for item in items {
            match item {
                CommandItem::Collection(records) => {
                    let links = records
                        .iter()
                        .map(|r| r.rid().map(Record::Rid).unwrap_or(Record::Null))
                        .collect();
                    graph.push(CommandItem::Collection(links));
                    graph.extend(records.into_iter().map(CommandItem::Record));
                }
                CommandItem::Prefetched(record) => graph.push(CommandItem::Record(record)),
                other => graph.push(other),
            }
        }
        CommandResult::ResultSet(graph)
    }

    pub fn items(&self) -> &[CommandItem] {
        match self {
            CommandResult::Collection(items) | CommandResult::ResultSet(items) => items,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }

    /// Records in result order, skipping rid lists and scalars.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.items().iter().filter_map(|item| match item {
            CommandItem::Record(r) | CommandItem::Prefetched(r) => Some(r),
            _ => None,
        })
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.records().filter_map(Record::as_document)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub id: i16,
}

/// Cluster entry as returned by `DbReload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterDescriptor {
    pub name: String,
    pub id: i16,
    #[serde(rename = "type")]
    pub cluster_type: String,
    pub segment: i16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: i32,
    pub token: Option<Vec<u8>>,
}

/// What `DbOpen` reports about the database.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenInfo {
    pub session: SessionInfo,
    pub clusters: Vec<ClusterInfo>,
    pub server: Option<Document>,
    pub release: Option<String>,
}

impl OpenInfo {
    pub fn cluster(&self, name: &str) -> Option<&ClusterInfo> {
        self.clusters.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeChange {
    pub uuid: Uuid,
    pub file_id: i64,
    pub page_index: i64,
    pub page_offset: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitResult {
    /// `(temporary rid, assigned rid)` for created records.
    pub created: Vec<(Rid, Rid)>,
    /// `(rid, new version)` for updated records.
    pub updated: Vec<(Rid, i32)>,
    pub changes: Vec<TreeChange>,
}

impl CommitResult {
    pub fn assigned(&self, temporary: Rid) -> Option<Rid> {
        self.created
            .iter()
            .find(|(tmp, _)| *tmp == temporary)
            .map(|(_, rid)| *rid)
    }
}

/// Server configuration value; keys listed more than once collect their
/// values in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigEntry {
    Single(String),
    Multiple(Vec<String>),
}

impl ConfigEntry {
    pub fn push(&mut self, value: String) {
        match self {
            ConfigEntry::Single(first) => {
                *self = ConfigEntry::Multiple(vec![std::mem::take(first), value]);
            }
            ConfigEntry::Multiple(values) => values.push(value),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            ConfigEntry::Single(v) => vec![v.as_str()],
            ConfigEntry::Multiple(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

pub type ConfigList = IndexMap<String, ConfigEntry>;

/// Out-of-band notification pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub session_id: i32,
    pub command: u8,
    pub content: Option<Document>,
}

/// Decoded body of a completed request.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Nothing beyond the header, or no response at all (`DbClose`).
    Unit,
    Session(SessionInfo),
    Open(OpenInfo),
    Bool(bool),
    Short(i16),
    Long(i64),
    Databases(Vec<String>),
    Clusters(Vec<ClusterDescriptor>),
    Range { begin: i64, end: i64 },
    Metadata { rid: Rid, version: i32 },
    Records(Vec<Record>),
    Created { rid: Rid, version: i32 },
    Version(i32),
    Command(CommandResult),
    Commit(CommitResult),
    ConfigValue(Option<String>),
    ConfigList(ConfigList),
}

impl Response {
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Unit => "unit",
            Response::Session(_) => "session",
            Response::Open(_) => "open",
            Response::Bool(_) => "bool",
            Response::Short(_) => "short",
            Response::Long(_) => "long",
            Response::Databases(_) => "databases",
            Response::Clusters(_) => "clusters",
            Response::Range { .. } => "range",
            Response::Metadata { .. } => "metadata",
            Response::Records(_) => "records",
            Response::Created { .. } => "created",
            Response::Version(_) => "version",
            Response::Command(_) => "command",
            Response::Commit(_) => "commit",
            Response::ConfigValue(_) => "config value",
            Response::ConfigList(_) => "config list",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(rid: Rid) -> Record {
        Record::Document(Document::with_class("V").with_identity(rid, 1))
    }

    #[test]
    fn test_single_collection_is_returned_as_is() {
        let result = CommandResult::assemble(vec![CommandItem::Collection(vec![
            doc(Rid::new(9, 0)),
            doc(Rid::new(9, 1)),
        ])]);
        match &result {
            CommandResult::Collection(items) => assert_eq!(items.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(result.documents().count(), 2);
    }

    #[test]
    fn test_single_record_becomes_collection() {
        let result = CommandResult::assemble(vec![CommandItem::Record(doc(Rid::new(9, 3)))]);
        assert_eq!(result, CommandResult::Collection(vec![CommandItem::Record(doc(Rid::new(9, 3)))]));
    }

    #[test]
    fn test_single_null_or_flat_is_wrapped() {
        let result = CommandResult::assemble(vec![CommandItem::Record(Record::Null)]);
        assert_eq!(result, CommandResult::Collection(vec![CommandItem::Record(Record::Null)]));

        let result = CommandResult::assemble(vec![CommandItem::Flat(Value::Integer(3))]);
        assert_eq!(result, CommandResult::Collection(vec![CommandItem::Flat(Value::Integer(3))]));
    }

    #[test]
    fn test_result_graph_with_prefetched_records() {
        let result = CommandResult::assemble(vec![
            CommandItem::Collection(vec![doc(Rid::new(9, 0))]),
            CommandItem::Prefetched(doc(Rid::new(4, 2))),
        ]);
        assert_eq!(
            result,
            CommandResult::ResultSet(vec![
                CommandItem::Collection(vec![Record::Rid(Rid::new(9, 0))]),
                CommandItem::Record(doc(Rid::new(9, 0))),
                CommandItem::Record(doc(Rid::new(4, 2))),
            ])
        );
    }

    #[test]
    fn test_empty_stream_is_empty_result_set() {
        let result = CommandResult::assemble(vec![]);
        assert_eq!(result, CommandResult::ResultSet(vec![]));
        assert!(result.is_empty());
    }

    #[test]
    fn test_config_entry_collapses_repeats() {
        let mut entry = ConfigEntry::Single("a".into());
        entry.push("b".into());
        entry.push("c".into());
        assert_eq!(entry.values(), vec!["a", "b", "c"]);
    }
}

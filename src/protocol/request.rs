//! Requests and their wire encoding.

use indexmap::IndexMap;
use orientdb_record::{csv, Document, Rid, Value};

use super::codec::Writer;
use super::{DATABASE_TYPE, DEFAULT_STORAGE, PROTOCOL_VERSION, SERIALIZATION_NAME};

/// Session fields written into every request header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHeader {
    pub session_id: i32,
    pub token: Option<Vec<u8>>,
    pub use_token: bool,
}

impl SessionHeader {
    pub fn anonymous(use_token: bool) -> Self {
        Self {
            session_id: -1,
            token: None,
            use_token,
        }
    }
}

/// Options written by the session-opening requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub driver_name: String,
    pub driver_version: String,
}

/// Payload of a record write.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordContent {
    Document(Document),
    /// Raw `b` record.
    Bytes(Vec<u8>),
    /// Flat `f` record.
    Flat(String),
}

impl RecordContent {
    pub fn record_type(&self) -> char {
        match self {
            RecordContent::Document(_) => 'd',
            RecordContent::Bytes(_) => 'b',
            RecordContent::Flat(_) => 'f',
        }
    }

    fn write(&self, w: &mut Writer) {
        match self {
            RecordContent::Document(doc) => w.object(doc),
            RecordContent::Bytes(data) => w.bytes(Some(data)),
            RecordContent::Flat(text) => w.string(text),
        };
    }
}

impl From<Document> for RecordContent {
    fn from(doc: Document) -> Self {
        RecordContent::Document(doc)
    }
}

impl From<Vec<u8>> for RecordContent {
    fn from(data: Vec<u8>) -> Self {
        RecordContent::Bytes(data)
    }
}

/// Synchronous requests block the server until all results are sent;
/// asynchronous ones stream them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandMode {
    #[default]
    Sync,
    Async,
}

/// A query, command or script.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// `q` (query), `c` (command), `s` (script) or a full server class name.
    pub class: String,
    pub text: String,
    pub language: String,
    pub params: IndexMap<String, Value>,
    pub limit: i32,
    pub fetch_plan: String,
    pub mode: CommandMode,
}

impl CommandRequest {
    pub fn new(class: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            text: text.into(),
            language: "sql".to_string(),
            params: IndexMap::new(),
            limit: -1,
            fetch_plan: String::new(),
            mode: CommandMode::Sync,
        }
    }

    pub fn query(text: impl Into<String>) -> Self {
        Self::new("q", text)
    }

    pub fn command(text: impl Into<String>) -> Self {
        Self::new("c", text)
    }

    pub fn script(language: impl Into<String>, text: impl Into<String>) -> Self {
        let mut req = Self::new("s", text);
        req.language = language.into();
        req
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = limit;
        self
    }

    pub fn fetch_plan(mut self, plan: impl Into<String>) -> Self {
        self.fetch_plan = plan.into();
        self
    }

    pub fn mode(mut self, mode: CommandMode) -> Self {
        self.mode = mode;
        self
    }

    fn is_query(&self) -> bool {
        self.class == "q"
            || self.class.ends_with("OSQLSynchQuery")
            || self.class.ends_with("OSQLAsynchQuery")
    }

    fn is_script(&self) -> bool {
        self.class == "s" || self.class == "OCommandScript"
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.string(&self.class);
        let params = (!self.params.is_empty()).then(|| serialize_params(&self.params));

        if self.is_query() {
            w.string(&self.text).int(self.limit).string(&self.fetch_plan);
            match &params {
                Some(p) => w.string(p),
                None => w.int(0),
            };
        } else {
            if self.is_script() {
                w.string(&self.language);
            }
            w.string(&self.text);
            match &params {
                Some(p) => w.boolean(true).string(p),
                None => w.boolean(false),
            };
            w.boolean(false);
        }
        w.finish()
    }
}

/// The server re-parses string parameters, so strings that would read as a
/// link, collection, document or number travel wrapped in an extra pair of
/// quotes.
pub fn serialize_params(params: &IndexMap<String, Value>) -> String {
    let quoted = params
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) if needs_quoting(s) => Value::String(format!("\"{}\"", s)),
                other => other.clone(),
            };
            (name.clone(), value)
        })
        .collect();
    csv::serialize(&Document::new().with("params", Value::Map(quoted)))
}

fn needs_quoting(s: &str) -> bool {
    match s.chars().next() {
        Some(c) => matches!(c, '#' | '<' | '[' | '(' | '{') || c.is_ascii_digit(),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TxEntry {
    Create { rid: Rid, record: RecordContent },
    Update { rid: Rid, version: i32, record: RecordContent },
    Delete { rid: Rid, version: i32, record_type: char },
}

/// A batch of record changes applied by one `Commit`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: i32,
    pub use_log: bool,
    entries: Vec<TxEntry>,
    next_temporary: i64,
}

impl Transaction {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            use_log: true,
            entries: Vec::new(),
            next_temporary: -2,
        }
    }

    /// Stage a new record in `cluster`. The returned temporary id resolves
    /// through [`CommitResult::assigned`](super::CommitResult::assigned).
    pub fn create(&mut self, cluster: i16, record: impl Into<RecordContent>) -> Rid {
        let rid = Rid::new(cluster, self.next_temporary);
        self.next_temporary -= 1;
        self.entries.push(TxEntry::Create {
            rid,
            record: record.into(),
        });
        rid
    }

    pub fn update(&mut self, rid: Rid, version: i32, record: impl Into<RecordContent>) -> &mut Self {
        self.entries.push(TxEntry::Update {
            rid,
            version,
            record: record.into(),
        });
        self
    }

    pub fn delete(&mut self, rid: Rid, version: i32) -> &mut Self {
        self.entries.push(TxEntry::Delete {
            rid,
            version,
            record_type: 'd',
        });
        self
    }

    pub fn entries(&self) -> &[TxEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn write(&self, w: &mut Writer) {
        w.int(self.id).boolean(self.use_log);
        for entry in &self.entries {
            w.byte(1);
            match entry {
                TxEntry::Create { rid, record } => {
                    w.byte(3).rid(rid);
                    record.write(w);
                    w.char(record.record_type());
                }
                TxEntry::Update { rid, version, record } => {
                    w.byte(1).rid(rid).char(record.record_type()).int(*version);
                    record.write(w);
                }
                TxEntry::Delete {
                    rid,
                    version,
                    record_type,
                } => {
                    w.byte(2).rid(rid).char(*record_type).int(*version);
                }
            }
        }
        w.byte(0);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Connect(Credentials),
    DbOpen { database: String, credentials: Credentials },
    DbClose,
    DbCreate { name: String, storage: String },
    DbExists { name: String, storage: String },
    DbDrop { name: String, storage: String },
    DbFreeze { name: String, storage: String },
    DbRelease { name: String, storage: String },
    DbList,
    DbSize,
    DbCountRecords,
    DbReload,
    ClusterAdd {
        cluster_type: String,
        name: String,
        location: Option<String>,
        segment: Option<String>,
        id: i16,
    },
    ClusterDrop { id: i16 },
    ClusterCount { ids: Vec<i16>, tombstones: bool },
    ClusterRange { id: i16 },
    RecordMetadata { rid: Rid },
    RecordLoad {
        rid: Rid,
        fetch_plan: String,
        ignore_cache: bool,
        tombstones: bool,
    },
    RecordCreate {
        cluster: i16,
        record: RecordContent,
        mode: u8,
    },
    RecordUpdate {
        rid: Rid,
        record: RecordContent,
        version: i32,
        mode: u8,
    },
    RecordDelete { rid: Rid, version: i32, mode: u8 },
    RecordCleanOut { rid: Rid, version: i32, mode: u8 },
    Command(CommandRequest),
    /// `storage` decides whether the response carries tree changes.
    Commit { transaction: Transaction, storage: String },
    ConfigGet { key: String },
    ConfigSet { key: String, value: String },
    ConfigList,
}

impl Request {
    pub fn load(rid: Rid) -> Self {
        Request::RecordLoad {
            rid,
            fetch_plan: String::new(),
            ignore_cache: false,
            tombstones: false,
        }
    }

    pub fn db_exists(name: impl Into<String>) -> Self {
        Request::DbExists {
            name: name.into(),
            storage: DEFAULT_STORAGE.to_string(),
        }
    }

    pub fn opcode(&self) -> u8 {
        match self {
            Request::Connect(_) => 2,
            Request::DbOpen { .. } => 3,
            Request::DbCreate { .. } => 4,
            Request::DbClose => 5,
            Request::DbExists { .. } => 6,
            Request::DbDrop { .. } => 7,
            Request::DbSize => 8,
            Request::DbCountRecords => 9,
            Request::ClusterAdd { .. } => 10,
            Request::ClusterDrop { .. } => 11,
            Request::ClusterCount { .. } => 12,
            Request::ClusterRange { .. } => 13,
            Request::RecordMetadata { .. } => 29,
            Request::RecordLoad { .. } => 30,
            Request::RecordCreate { .. } => 31,
            Request::RecordUpdate { .. } => 32,
            Request::RecordDelete { .. } => 33,
            Request::RecordCleanOut { .. } => 38,
            Request::Command(_) => 41,
            Request::Commit { .. } => 60,
            Request::ConfigGet { .. } => 70,
            Request::ConfigSet { .. } => 71,
            Request::ConfigList => 72,
            Request::DbReload => 73,
            Request::DbList => 74,
            Request::DbFreeze { .. } => 94,
            Request::DbRelease { .. } => 95,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::Connect(_) => "Connect",
            Request::DbOpen { .. } => "DbOpen",
            Request::DbCreate { .. } => "DbCreate",
            Request::DbClose => "DbClose",
            Request::DbExists { .. } => "DbExists",
            Request::DbDrop { .. } => "DbDrop",
            Request::DbSize => "DbSize",
            Request::DbCountRecords => "DbCountRecords",
            Request::ClusterAdd { .. } => "ClusterAdd",
            Request::ClusterDrop { .. } => "ClusterDrop",
            Request::ClusterCount { .. } => "ClusterCount",
            Request::ClusterRange { .. } => "ClusterRange",
            Request::RecordMetadata { .. } => "RecordMetadata",
            Request::RecordLoad { .. } => "RecordLoad",
            Request::RecordCreate { .. } => "RecordCreate",
            Request::RecordUpdate { .. } => "RecordUpdate",
            Request::RecordDelete { .. } => "RecordDelete",
            Request::RecordCleanOut { .. } => "RecordCleanOut",
            Request::Command(_) => "Command",
            Request::Commit { .. } => "Commit",
            Request::ConfigGet { .. } => "ConfigGet",
            Request::ConfigSet { .. } => "ConfigSet",
            Request::ConfigList => "ConfigList",
            Request::DbReload => "DbReload",
            Request::DbList => "DbList",
            Request::DbFreeze { .. } => "DbFreeze",
            Request::DbRelease { .. } => "DbRelease",
        }
    }

    /// Requests that open a session carry no session token and answer with
    /// session fields in their body.
    pub fn opens_session(&self) -> bool {
        matches!(self, Request::Connect(_) | Request::DbOpen { .. })
    }

    /// `DbClose` gets no answer; the server drops the socket instead.
    pub fn expects_response(&self) -> bool {
        !matches!(self, Request::DbClose)
    }

    pub fn encode(&self, header: &SessionHeader) -> Vec<u8> {
        let mut w = Writer::new();
        w.byte(self.opcode());
        if self.opens_session() {
            w.int(-1);
        } else {
            w.int(header.session_id);
            if header.use_token {
                w.bytes(header.token.as_deref());
            }
        }

        match self {
            Request::Connect(creds) => {
                write_handshake(&mut w, creds, header.use_token);
                w.string(&creds.username).string(&creds.password);
            }
            Request::DbOpen {
                database,
                credentials,
            } => {
                write_handshake(&mut w, credentials, header.use_token);
                w.string(database)
                    .string(DATABASE_TYPE)
                    .string(&credentials.username)
                    .string(&credentials.password);
            }
            Request::DbCreate { name, storage } => {
                w.string(name).string(DATABASE_TYPE).string(storage);
            }
            Request::DbExists { name, storage }
            | Request::DbDrop { name, storage }
            | Request::DbFreeze { name, storage }
            | Request::DbRelease { name, storage } => {
                w.string(name).string(storage);
            }
            Request::DbClose
            | Request::DbList
            | Request::DbSize
            | Request::DbCountRecords
            | Request::DbReload
            | Request::ConfigList => {}
            Request::ClusterAdd {
                cluster_type,
                name,
                location,
                segment,
                id,
            } => {
                w.string(cluster_type)
                    .string(name)
                    .opt_string(location.as_deref())
                    .opt_string(segment.as_deref())
                    .short(*id);
            }
            Request::ClusterDrop { id } | Request::ClusterRange { id } => {
                w.short(*id);
            }
            Request::ClusterCount { ids, tombstones } => {
                w.short(ids.len() as i16);
                for id in ids {
                    w.short(*id);
                }
                w.boolean(*tombstones);
            }
            Request::RecordMetadata { rid } => {
                w.rid(rid);
            }
            Request::RecordLoad {
                rid,
                fetch_plan,
                ignore_cache,
                tombstones,
            } => {
                w.rid(rid)
                    .string(fetch_plan)
                    .boolean(*ignore_cache)
                    .boolean(*tombstones);
            }
            Request::RecordCreate {
                cluster,
                record,
                mode,
            } => {
                w.int(-1).short(*cluster);
                record.write(&mut w);
                w.char(record.record_type()).byte(*mode);
            }
            Request::RecordUpdate {
                rid,
                record,
                version,
                mode,
            } => {
                w.rid(rid);
                record.write(&mut w);
                w.int(*version).char(record.record_type()).byte(*mode);
            }
            Request::RecordDelete { rid, version, mode }
            | Request::RecordCleanOut { rid, version, mode } => {
                w.rid(rid).int(*version).byte(*mode);
            }
            Request::Command(command) => {
                let mode = match command.mode {
                    CommandMode::Sync => 's',
                    CommandMode::Async => 'a',
                };
                w.char(mode).bytes(Some(&command.encode_body()));
            }
            Request::Commit { transaction, .. } => transaction.write(&mut w),
            Request::ConfigGet { key } => {
                w.string(key);
            }
            Request::ConfigSet { key, value } => {
                w.string(key).string(value);
            }
        }
        w.finish()
    }
}

fn write_handshake(w: &mut Writer, creds: &Credentials, use_token: bool) {
    w.string(&creds.driver_name)
        .string(&creds.driver_version)
        .short(PROTOCOL_VERSION)
        .string("")
        .string(SERIALIZATION_NAME)
        .boolean(use_token);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::Reader;

    fn header() -> SessionHeader {
        SessionHeader {
            session_id: 7,
            token: None,
            use_token: false,
        }
    }

    #[test]
    fn test_record_load_layout() {
        let data = Request::load(Rid::new(5, 0)).encode(&header());
        let mut r = Reader::new(&data);
        assert_eq!(r.byte().unwrap(), 30);
        assert_eq!(r.int().unwrap(), 7);
        assert_eq!(r.short().unwrap(), 5);
        assert_eq!(r.long().unwrap(), 0);
        assert_eq!(r.text().unwrap(), "");
        assert!(!r.boolean().unwrap());
        assert!(!r.boolean().unwrap());
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_token_follows_session_id() {
        let header = SessionHeader {
            session_id: 3,
            token: Some(vec![9, 9]),
            use_token: true,
        };
        let data = Request::DbSize.encode(&header);
        assert_eq!(data, vec![8, 0, 0, 0, 3, 0, 0, 0, 2, 9, 9]);
    }

    #[test]
    fn test_db_open_layout() {
        let creds = Credentials {
            username: "admin".into(),
            password: "secret".into(),
            driver_name: "drv".into(),
            driver_version: "1.0".into(),
        };
        let req = Request::DbOpen {
            database: "demo".into(),
            credentials: creds,
        };
        let data = req.encode(&SessionHeader::anonymous(true));
        let mut r = Reader::new(&data);
        assert_eq!(r.byte().unwrap(), 3);
        assert_eq!(r.int().unwrap(), -1);
        assert_eq!(r.text().unwrap(), "drv");
        assert_eq!(r.text().unwrap(), "1.0");
        assert_eq!(r.short().unwrap(), 28);
        assert_eq!(r.text().unwrap(), "");
        assert_eq!(r.text().unwrap(), "ORecordDocument2csv");
        assert!(r.boolean().unwrap());
        assert_eq!(r.text().unwrap(), "demo");
        assert_eq!(r.text().unwrap(), "graph");
        assert_eq!(r.text().unwrap(), "admin");
        assert_eq!(r.text().unwrap(), "secret");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_query_body_without_params() {
        let req = Request::Command(CommandRequest::query("select from OUser").limit(10));
        let data = req.encode(&header());
        let mut r = Reader::new(&data);
        r.byte().unwrap();
        r.int().unwrap();
        assert_eq!(r.char().unwrap(), 's');
        let body = r.bytes().unwrap().unwrap();

        let mut b = Reader::new(&body);
        assert_eq!(b.text().unwrap(), "q");
        assert_eq!(b.text().unwrap(), "select from OUser");
        assert_eq!(b.int().unwrap(), 10);
        assert_eq!(b.text().unwrap(), "");
        assert_eq!(b.int().unwrap(), 0);
        assert_eq!(b.remaining(), 0);
    }

    #[test]
    fn test_script_body_with_params() {
        let cmd = CommandRequest::script("javascript", "return 1")
            .param("name", "admin")
            .mode(CommandMode::Async);
        let data = Request::Command(cmd).encode(&header());
        let mut r = Reader::new(&data);
        r.byte().unwrap();
        r.int().unwrap();
        assert_eq!(r.char().unwrap(), 'a');
        let body = r.bytes().unwrap().unwrap();

        let mut b = Reader::new(&body);
        assert_eq!(b.text().unwrap(), "s");
        assert_eq!(b.text().unwrap(), "javascript");
        assert_eq!(b.text().unwrap(), "return 1");
        assert!(b.boolean().unwrap());
        assert_eq!(b.text().unwrap(), r#"params:{"name":"admin"}"#);
        assert!(!b.boolean().unwrap());
        assert_eq!(b.remaining(), 0);
    }

    #[test]
    fn test_params_double_quote_ambiguous_strings() {
        let mut params = IndexMap::new();
        params.insert("rid".to_string(), Value::from("#5:0"));
        params.insert("n".to_string(), Value::from("42"));
        params.insert("plain".to_string(), Value::from("abc"));
        params.insert("num".to_string(), Value::Integer(42));
        assert_eq!(
            serialize_params(&params),
            r##"params:{"rid":"\"#5:0\"","n":"\"42\"","plain":"abc","num":42}"##
        );
    }

    #[test]
    fn test_commit_entries() {
        let mut tx = Transaction::new(11);
        let tmp = tx.create(9, Document::with_class("V").with("a", 1));
        tx.delete(Rid::new(9, 4), 2);
        assert_eq!(tmp, Rid::new(9, -2));

        let data = Request::Commit {
            transaction: tx,
            storage: "plocal".into(),
        }
        .encode(&header());
        let mut r = Reader::new(&data);
        assert_eq!(r.byte().unwrap(), 60);
        r.int().unwrap();
        assert_eq!(r.int().unwrap(), 11);
        assert!(r.boolean().unwrap());

        assert_eq!(r.byte().unwrap(), 1);
        assert_eq!(r.byte().unwrap(), 3);
        assert_eq!(r.rid().unwrap(), tmp);
        assert_eq!(r.text().unwrap(), "V@a:1");
        assert_eq!(r.char().unwrap(), 'd');

        assert_eq!(r.byte().unwrap(), 1);
        assert_eq!(r.byte().unwrap(), 2);
        assert_eq!(r.rid().unwrap(), Rid::new(9, 4));
        assert_eq!(r.char().unwrap(), 'd');
        assert_eq!(r.int().unwrap(), 2);

        assert_eq!(r.byte().unwrap(), 0);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_cluster_count_layout() {
        let data = Request::ClusterCount {
            ids: vec![3, 4],
            tombstones: true,
        }
        .encode(&header());
        assert_eq!(&data[5..], &[0, 2, 0, 3, 0, 4, 1]);
    }
}

//! Incremental response reading.
//!
//! An [`Operation`] is the in-flight half of a request. It is fed whatever
//! bytes have arrived and advances in steps; each step reads one complete
//! unit (a header, a record, a whole fixed-size body) or nothing at all, so
//! running out of bytes mid-step simply leaves the step to be retried when
//! more data is buffered. Partially built results live on an explicit stack.

use orientdb_record::{csv, Document, RecordError, Rid, Value};
use tracing::debug;

use super::codec::{CodecError, CodecResult, Reader, RECORD_NULL, RECORD_RID};
use super::request::Request;
use super::response::{
    ClusterDescriptor, ClusterInfo, CommandItem, CommandResult, CommitResult, ConfigEntry,
    ConfigList, OpenInfo, PushMessage, RawRecord, Record, Response, SessionInfo, TreeChange,
};
use crate::error::{DriverError, DriverResult, ServerError};

pub const STATUS_OK: u8 = 0;
pub const STATUS_ERROR: u8 = 1;
pub const STATUS_PUSH: u8 = 3;

const COMMAND_END: u8 = 0;
const COMMAND_RECORD: u8 = 1;
const COMMAND_PREFETCHED: u8 = 2;
const COMMAND_FLAT: u8 = 97;
const COMMAND_COLLECTION: u8 = 108;
const COMMAND_NULL: u8 = 110;
const COMMAND_RECORD_ALT: u8 = 114;

/// Outcome of feeding bytes to an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadStatus {
    /// More bytes are needed.
    Continue,
    Complete(Response),
    /// The server answered with an error chain.
    Error(ServerError),
    /// The frame was consumed but a record in it could not be decoded.
    Failed(DriverError),
    /// An out-of-band frame; the operation is still waiting for its own.
    PushData(PushMessage),
}

impl ReadStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReadStatus::Continue | ReadStatus::PushData(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    /// No request is waiting; only push frames are acceptable.
    Idle,
    Unit,
    Session,
    Open,
    Bool,
    Short,
    Long,
    Databases,
    Reload,
    Range,
    Metadata,
    Load(Rid),
    Created(i16),
    Version,
    Command,
    Commit { changes: bool },
    ConfigValue,
    ConfigList,
}

impl Shape {
    fn of(request: &Request) -> Self {
        match request {
            Request::Connect(_) => Shape::Session,
            Request::DbOpen { .. } => Shape::Open,
            Request::DbClose
            | Request::DbCreate { .. }
            | Request::DbDrop { .. }
            | Request::DbFreeze { .. }
            | Request::DbRelease { .. } => Shape::Unit,
            Request::DbExists { .. }
            | Request::ClusterDrop { .. }
            | Request::RecordDelete { .. }
            | Request::RecordCleanOut { .. }
            | Request::ConfigSet { .. } => Shape::Bool,
            Request::ClusterAdd { .. } => Shape::Short,
            Request::DbSize | Request::DbCountRecords | Request::ClusterCount { .. } => Shape::Long,
            Request::DbList => Shape::Databases,
            Request::DbReload => Shape::Reload,
            Request::ClusterRange { .. } => Shape::Range,
            Request::RecordMetadata { .. } => Shape::Metadata,
            Request::RecordLoad { rid, .. } => Shape::Load(*rid),
            Request::RecordCreate { cluster, .. } => Shape::Created(*cluster),
            Request::RecordUpdate { .. } => Shape::Version,
            Request::Command(_) => Shape::Command,
            Request::Commit { storage, .. } => Shape::Commit {
                changes: storage != "memory",
            },
            Request::ConfigGet { .. } => Shape::ConfigValue,
            Request::ConfigList => Shape::ConfigList,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Status,
    Body,
}

/// A partially built sub-result.
#[derive(Debug)]
enum Partial {
    Items(Vec<CommandItem>),
    Collection { remaining: usize, records: Vec<Record> },
    Records(Vec<Record>),
}

#[derive(Debug)]
pub struct Operation {
    name: &'static str,
    shape: Shape,
    header_token: bool,
    phase: Phase,
    stack: Vec<Partial>,
    deferred: Option<RecordError>,
}

impl Operation {
    pub fn new(request: &Request, use_token: bool) -> Self {
        Self {
            name: request.name(),
            shape: Shape::of(request),
            header_token: use_token && !request.opens_session(),
            phase: Phase::Status,
            stack: Vec::new(),
            deferred: None,
        }
    }

    /// Reader for frames arriving while nothing is pending.
    pub fn idle() -> Self {
        Self {
            name: "Idle",
            shape: Shape::Idle,
            header_token: false,
            phase: Phase::Status,
            stack: Vec::new(),
            deferred: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Feed the unconsumed bytes. Returns the status and how many bytes were
    /// consumed; the caller drops those and keeps the rest.
    pub fn consume(&mut self, buf: &[u8]) -> DriverResult<(ReadStatus, usize)> {
        let mut committed = 0;
        loop {
            let mut reader = Reader::new(&buf[committed..]);
            match self.step(&mut reader) {
                Ok(None) => committed += reader.position(),
                Ok(Some(status)) => {
                    committed += reader.position();
                    return Ok((status, committed));
                }
                Err(CodecError::Incomplete) => return Ok((ReadStatus::Continue, committed)),
                Err(CodecError::Invalid(message)) => {
                    return Err(DriverError::Protocol(format!("{}: {}", self.name, message)))
                }
            }
        }
    }

    /// Read one unit. `self` is only touched once the unit has been read in
    /// full.
    fn step(&mut self, r: &mut Reader<'_>) -> CodecResult<Option<ReadStatus>> {
        match self.phase {
            Phase::Status => self.read_status(r),
            Phase::Body => match self.shape {
                Shape::Command => self.command_step(r),
                Shape::Load(rid) => self.load_step(r, rid),
                _ => self.read_body(r).map(|response| Some(self.finish(response))),
            },
        }
    }

    fn read_status(&mut self, r: &mut Reader<'_>) -> CodecResult<Option<ReadStatus>> {
        let status = r.byte()?;
        if self.shape == Shape::Idle && status != STATUS_PUSH {
            return Err(CodecError::Invalid(format!(
                "response status {} with no pending request",
                status
            )));
        }
        match status {
            STATUS_OK => {
                r.int()?;
                if self.header_token {
                    r.bytes()?;
                }
                self.phase = Phase::Body;
                match self.shape {
                    Shape::Command => self.stack.push(Partial::Items(Vec::new())),
                    Shape::Load(_) => self.stack.push(Partial::Records(Vec::new())),
                    _ => {}
                }
                Ok(None)
            }
            STATUS_ERROR => {
                r.int()?;
                if self.header_token {
                    r.bytes()?;
                }
                let error = r.error()?;
                Ok(Some(ReadStatus::Error(error)))
            }
            STATUS_PUSH => {
                let session_id = r.int()?;
                let command = r.byte()?;
                let content = r.bytes()?;
                let content = content.and_then(|data| match String::from_utf8(data) {
                    Ok(text) => match csv::deserialize(&text) {
                        Ok(doc) => Some(doc),
                        Err(e) => {
                            debug!("Discarding unreadable push content: {}", e);
                            None
                        }
                    },
                    Err(_) => None,
                });
                Ok(Some(ReadStatus::PushData(PushMessage {
                    session_id,
                    command,
                    content,
                })))
            }
            other => Err(CodecError::Invalid(format!("unknown response status {}", other))),
        }
    }

    fn finish(&mut self, response: Response) -> ReadStatus {
        match self.deferred.take() {
            Some(e) => ReadStatus::Failed(DriverError::Serialization(e)),
            None => ReadStatus::Complete(response),
        }
    }

    fn settle<T>(&mut self, decoded: Result<T, RecordError>, fallback: T) -> T {
        match decoded {
            Ok(value) => value,
            Err(e) => {
                self.deferred.get_or_insert(e);
                fallback
            }
        }
    }

    fn push_item(&mut self, item: CommandItem) {
        if let Some(Partial::Items(items)) = self.stack.last_mut() {
            items.push(item);
        }
    }

    fn command_step(&mut self, r: &mut Reader<'_>) -> CodecResult<Option<ReadStatus>> {
        let pending = match self.stack.last() {
            Some(Partial::Collection { remaining, .. }) => Some(*remaining),
            _ => None,
        };
        match pending {
            Some(0) => {
                if let Some(Partial::Collection { records, .. }) = self.stack.pop() {
                    self.push_item(CommandItem::Collection(records));
                }
                return Ok(None);
            }
            Some(_) => {
                let decoded = read_record(r)?;
                let record = self.settle(decoded, Record::Null);
                if let Some(Partial::Collection { remaining, records }) = self.stack.last_mut() {
                    *remaining -= 1;
                    records.push(record);
                }
                return Ok(None);
            }
            None => {}
        }

        let status = r.byte()?;
        let item = match status {
            COMMAND_END => {
                let items = match self.stack.pop() {
                    Some(Partial::Items(items)) => items,
                    _ => Vec::new(),
                };
                let result = CommandResult::assemble(items);
                return Ok(Some(self.finish(Response::Command(result))));
            }
            COMMAND_NULL => CommandItem::Null,
            COMMAND_RECORD | COMMAND_RECORD_ALT => {
                let decoded = read_record(r)?;
                CommandItem::Record(self.settle(decoded, Record::Null))
            }
            COMMAND_PREFETCHED => {
                let decoded = read_record(r)?;
                CommandItem::Prefetched(self.settle(decoded, Record::Null))
            }
            COMMAND_FLAT => CommandItem::Flat(flat_value(r.string()?)),
            COMMAND_COLLECTION => {
                let remaining = count(r.int()?)?;
                self.stack.push(Partial::Collection {
                    remaining,
                    records: Vec::with_capacity(remaining.min(1024)),
                });
                return Ok(None);
            }
            other => {
                return Err(CodecError::Invalid(format!("unknown command result status {}", other)))
            }
        };
        self.push_item(item);
        Ok(None)
    }

    fn load_step(&mut self, r: &mut Reader<'_>, rid: Rid) -> CodecResult<Option<ReadStatus>> {
        let status = r.byte()?;
        let record = match status {
            0 => {
                let records = match self.stack.pop() {
                    Some(Partial::Records(records)) => records,
                    _ => Vec::new(),
                };
                return Ok(Some(self.finish(Response::Records(records))));
            }
            1 => {
                let content = r.bytes()?;
                let version = r.int()?;
                let record_type = r.char()?;
                build_record(record_type, rid, version, content)
            }
            2 => read_record(r)?,
            other => {
                return Err(CodecError::Invalid(format!("unknown record status {}", other)))
            }
        };
        let record = self.settle(record, Record::Null);
        if let Some(Partial::Records(records)) = self.stack.last_mut() {
            records.push(record);
        }
        Ok(None)
    }

    fn read_body(&mut self, r: &mut Reader<'_>) -> CodecResult<Response> {
        Ok(match self.shape {
            Shape::Unit => Response::Unit,
            Shape::Session => Response::Session(read_session(r)?),
            Shape::Open => {
                let session = read_session(r)?;
                let n = count(r.short()? as i32)?;
                let mut clusters = Vec::with_capacity(n);
                for _ in 0..n {
                    let name = r.text()?;
                    let id = r.short()?;
                    clusters.push(ClusterInfo { name, id });
                }
                let server = r.string()?;
                let release = r.string()?;
                let server = server
                    .filter(|s| !s.is_empty())
                    .and_then(|text| match csv::deserialize(&text) {
                        Ok(doc) => Some(doc),
                        Err(e) => {
                            debug!("Ignoring unreadable server configuration: {}", e);
                            None
                        }
                    });
                Response::Open(OpenInfo {
                    session,
                    clusters,
                    server,
                    release,
                })
            }
            Shape::Bool => Response::Bool(r.boolean()?),
            Shape::Short => Response::Short(r.short()?),
            Shape::Long => Response::Long(r.long()?),
            Shape::Databases => {
                let text = r.string()?.unwrap_or_default();
                let doc = self.settle(csv::deserialize(&text), Document::new());
                let names: Vec<String> = doc
                    .get("databases")
                    .and_then(Value::as_map)
                    .map(|map| map.keys().cloned().collect())
                    .unwrap_or_default();
                Response::Databases(names)
            }
            Shape::Reload => {
                let n = count(r.short()? as i32)?;
                let mut clusters = Vec::with_capacity(n);
                for _ in 0..n {
                    let name = r.text()?;
                    let id = r.short()?;
                    let cluster_type = r.text()?;
                    let segment = r.short()?;
                    clusters.push(ClusterDescriptor {
                        name,
                        id,
                        cluster_type,
                        segment,
                    });
                }
                Response::Clusters(clusters)
            }
            Shape::Range => {
                let begin = r.long()?;
                let end = r.long()?;
                Response::Range { begin, end }
            }
            Shape::Metadata => {
                let rid = r.rid()?;
                let version = r.int()?;
                Response::Metadata { rid, version }
            }
            Shape::Created(cluster) => {
                let position = r.long()?;
                let version = r.int()?;
                Response::Created {
                    rid: Rid::new(cluster, position),
                    version,
                }
            }
            Shape::Version => Response::Version(r.int()?),
            Shape::Commit { changes } => Response::Commit(read_commit(r, changes)?),
            Shape::ConfigValue => Response::ConfigValue(r.string()?),
            Shape::ConfigList => {
                let n = count(r.short()? as i32)?;
                let mut entries = ConfigList::new();
                for _ in 0..n {
                    let key = r.text()?;
                    let value = r.text()?;
                    match entries.get_mut(&key) {
                        Some(entry) => entry.push(value),
                        None => {
                            entries.insert(key, ConfigEntry::Single(value));
                        }
                    }
                }
                Response::ConfigList(entries)
            }
            Shape::Idle | Shape::Command | Shape::Load(_) => {
                return Err(CodecError::Invalid("no fixed body for this response".into()))
            }
        })
    }
}

fn count(n: i32) -> CodecResult<usize> {
    usize::try_from(n).map_err(|_| CodecError::Invalid(format!("negative count {}", n)))
}

fn read_session(r: &mut Reader<'_>) -> CodecResult<SessionInfo> {
    let session_id = r.int()?;
    let token = r.bytes()?.filter(|t| !t.is_empty());
    Ok(SessionInfo { session_id, token })
}

fn read_commit(r: &mut Reader<'_>, with_changes: bool) -> CodecResult<CommitResult> {
    let mut result = CommitResult::default();
    for _ in 0..count(r.int()?)? {
        let tmp = r.rid()?;
        let rid = r.rid()?;
        result.created.push((tmp, rid));
    }
    for _ in 0..count(r.int()?)? {
        let rid = r.rid()?;
        let version = r.int()?;
        result.updated.push((rid, version));
    }
    if with_changes {
        for _ in 0..count(r.int()?)? {
            let uuid = r.uuid()?;
            let file_id = r.long()?;
            let page_index = r.long()?;
            let page_offset = r.int()?;
            result.changes.push(TreeChange {
                uuid,
                file_id,
                page_index,
                page_offset,
            });
        }
    }
    Ok(result)
}

/// The `Record` primitive. Wire errors abort the step; a record whose
/// content does not decode is reported in the inner result.
fn read_record(r: &mut Reader<'_>) -> CodecResult<Result<Record, RecordError>> {
    let tag = r.short()?;
    match tag {
        RECORD_NULL => Ok(Ok(Record::Null)),
        RECORD_RID => Ok(Ok(Record::Rid(r.rid()?))),
        _ => {
            let record_type = r.char()?;
            let rid = r.rid()?;
            let version = r.int()?;
            let content = r.bytes()?;
            Ok(build_record(record_type, rid, version, content))
        }
    }
}

fn build_record(
    record_type: char,
    rid: Rid,
    version: i32,
    content: Option<Vec<u8>>,
) -> Result<Record, RecordError> {
    if record_type != 'd' {
        return Ok(Record::Raw(RawRecord {
            record_type,
            rid,
            version,
            content,
        }));
    }
    let text = match content {
        Some(data) => String::from_utf8(data)
            .map_err(|e| RecordError::Malformed(format!("record {} is not UTF-8: {}", rid, e)))?,
        None => String::new(),
    };
    let mut doc = csv::deserialize(&text)?;
    doc.set_rid(Some(rid));
    doc.set_version(Some(version));
    Ok(Record::Document(doc))
}

/// Flat results are documents when they parse as one, otherwise a single
/// serialized value.
fn flat_value(text: Option<String>) -> Value {
    let Some(text) = text else {
        return Value::Null;
    };
    if let Ok(doc) = csv::deserialize(&text) {
        if !doc.is_empty() || doc.class().is_some() {
            return Value::Embedded(doc);
        }
    }
    csv::deserialize_value(&text).unwrap_or(Value::String(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::Writer;
    use crate::protocol::request::CommandRequest;

    fn ok_header(w: &mut Writer) -> &mut Writer {
        w.byte(STATUS_OK).int(7)
    }

    fn run(op: &mut Operation, data: &[u8]) -> ReadStatus {
        let (status, used) = op.consume(data).unwrap();
        assert_eq!(used, data.len());
        status
    }

    #[test]
    fn test_fixed_body() {
        let mut w = Writer::new();
        ok_header(&mut w).long(123_456_789_012);
        let mut op = Operation::new(&Request::DbSize, false);
        assert_eq!(run(&mut op, &w.finish()), ReadStatus::Complete(Response::Long(123_456_789_012)));
    }

    #[test]
    fn test_partial_bytes_are_left_unconsumed() {
        let mut w = Writer::new();
        ok_header(&mut w).long(5);
        let data = w.finish();

        let mut op = Operation::new(&Request::DbSize, false);
        let (status, used) = op.consume(&data[..7]).unwrap();
        assert_eq!(status, ReadStatus::Continue);
        assert_eq!(used, 5);

        let (status, used) = op.consume(&data[5..]).unwrap();
        assert_eq!(status, ReadStatus::Complete(Response::Long(5)));
        assert_eq!(used, 8);
    }

    #[test]
    fn test_error_status() {
        let mut w = Writer::new();
        w.byte(STATUS_ERROR)
            .int(7)
            .byte(1)
            .string("OCommandExecutionException")
            .string("boom")
            .boolean(false)
            .bytes(None);
        let mut op = Operation::new(&Request::DbSize, false);
        match run(&mut op, &w.finish()) {
            ReadStatus::Error(e) => assert_eq!(e.message, "boom"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_token_in_header() {
        let mut w = Writer::new();
        w.byte(STATUS_OK).int(7).bytes(Some(&b"tok"[..])).boolean(true);
        let mut op = Operation::new(&Request::db_exists("demo"), true);
        assert_eq!(run(&mut op, &w.finish()), ReadStatus::Complete(Response::Bool(true)));
    }

    #[test]
    fn test_push_frame_keeps_operation_waiting() {
        let mut w = Writer::new();
        w.byte(STATUS_PUSH)
            .int(-10)
            .byte(80)
            .bytes(Some(br#"members:[]"#));
        ok_header(&mut w).boolean(false);
        let data = w.finish();

        let mut op = Operation::new(&Request::db_exists("demo"), false);
        let (status, used) = op.consume(&data).unwrap();
        match status {
            ReadStatus::PushData(push) => {
                assert_eq!(push.command, 80);
                assert!(push.content.unwrap().contains("members"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let (status, _) = op.consume(&data[used..]).unwrap();
        assert_eq!(status, ReadStatus::Complete(Response::Bool(false)));
    }

    #[test]
    fn test_idle_reader_accepts_only_push_frames() {
        let mut w = Writer::new();
        w.byte(STATUS_PUSH).int(-10).byte(80).bytes(None);
        let mut idle = Operation::idle();
        let (status, _) = idle.consume(&w.finish()).unwrap();
        assert!(matches!(status, ReadStatus::PushData(PushMessage { content: None, .. })));

        let mut w = Writer::new();
        ok_header(&mut w);
        assert!(matches!(Operation::idle().consume(&w.finish()), Err(DriverError::Protocol(_))));
    }

    #[test]
    fn test_unknown_status_is_protocol_error() {
        let mut op = Operation::new(&Request::DbSize, false);
        assert!(matches!(op.consume(&[9]), Err(DriverError::Protocol(_))));
    }

    #[test]
    fn test_record_load_primary_record() {
        let mut w = Writer::new();
        ok_header(&mut w)
            .byte(1)
            .string(r#"OUser@name:"admin",status:"ACTIVE""#)
            .int(2)
            .char('d')
            .byte(0);
        let mut op = Operation::new(&Request::load(Rid::new(5, 0)), false);
        match run(&mut op, &w.finish()) {
            ReadStatus::Complete(Response::Records(records)) => {
                let doc = records[0].as_document().unwrap();
                assert_eq!(doc.rid(), Some(Rid::new(5, 0)));
                assert_eq!(doc.version(), Some(2));
                assert_eq!(doc.class(), Some("OUser"));
                assert_eq!(doc.get("name"), Some(&Value::from("admin")));
                assert_eq!(doc.get("status"), Some(&Value::from("ACTIVE")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_command_collection_and_prefetched() {
        let mut w = Writer::new();
        ok_header(&mut w)
            .byte(COMMAND_COLLECTION)
            .int(2)
            .short(0)
            .char('d')
            .rid(&Rid::new(9, 0))
            .int(1)
            .string("V@n:1")
            .short(RECORD_RID)
            .rid(&Rid::new(9, 1))
            .byte(COMMAND_PREFETCHED)
            .short(0)
            .char('d')
            .rid(&Rid::new(4, 0))
            .int(3)
            .string("OUser@name:\"a\"")
            .byte(COMMAND_END);
        let data = w.finish();

        let mut op = Operation::new(&Request::Command(CommandRequest::query("select")), false);
        match run(&mut op, &data) {
            ReadStatus::Complete(Response::Command(CommandResult::ResultSet(graph))) => {
                assert_eq!(graph.len(), 4);
                assert_eq!(
                    graph[0],
                    CommandItem::Collection(vec![
                        Record::Rid(Rid::new(9, 0)),
                        Record::Rid(Rid::new(9, 1))
                    ])
                );
                assert_eq!(graph[2], CommandItem::Record(Record::Rid(Rid::new(9, 1))));
                let prefetched = match &graph[3] {
                    CommandItem::Record(r) => r.rid(),
                    _ => None,
                };
                assert_eq!(prefetched, Some(Rid::new(4, 0)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_command_byte_at_a_time() {
        let mut w = Writer::new();
        ok_header(&mut w)
            .byte(COMMAND_RECORD)
            .short(0)
            .char('d')
            .rid(&Rid::new(3, 3))
            .int(1)
            .string("name:\"x\",n:12l")
            .byte(COMMAND_END);
        let data = w.finish();

        let mut op = Operation::new(&Request::Command(CommandRequest::query("select")), false);
        let mut buffer = Vec::new();
        let mut result = None;
        for byte in data {
            buffer.push(byte);
            let (status, used) = op.consume(&buffer).unwrap();
            buffer.drain(..used);
            if status.is_terminal() {
                result = Some(status);
            }
        }
        match result {
            Some(ReadStatus::Complete(Response::Command(CommandResult::Collection(items)))) => {
                assert_eq!(items.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_command_status_is_fatal() {
        let mut w = Writer::new();
        ok_header(&mut w).byte(42);
        let mut op = Operation::new(&Request::Command(CommandRequest::query("select")), false);
        assert!(matches!(op.consume(&w.finish()), Err(DriverError::Protocol(_))));
    }

    #[test]
    fn test_malformed_record_fails_only_the_request() {
        let mut w = Writer::new();
        ok_header(&mut w)
            .byte(1)
            .string("no separator here")
            .int(1)
            .char('d')
            .byte(0);
        let data = w.finish();
        let mut op = Operation::new(&Request::load(Rid::new(5, 0)), false);
        let (status, used) = op.consume(&data).unwrap();
        assert_eq!(used, data.len());
        assert!(matches!(status, ReadStatus::Failed(DriverError::Serialization(_))));
    }

    #[test]
    fn test_flat_scalar_result() {
        let mut w = Writer::new();
        ok_header(&mut w).byte(COMMAND_FLAT).string("42").byte(COMMAND_END);
        let mut op = Operation::new(&Request::Command(CommandRequest::script("sql", "return 42")), false);
        assert_eq!(
            run(&mut op, &w.finish()),
            ReadStatus::Complete(Response::Command(CommandResult::Collection(vec![
                CommandItem::Flat(Value::Integer(42))
            ])))
        );
    }

    #[test]
    fn test_commit_without_changes_for_memory_storage() {
        let mut w = Writer::new();
        ok_header(&mut w)
            .int(1)
            .rid(&Rid::new(9, -2))
            .rid(&Rid::new(9, 14))
            .int(1)
            .rid(&Rid::new(9, 3))
            .int(5);
        let request = Request::Commit {
            transaction: crate::protocol::Transaction::new(1),
            storage: "memory".into(),
        };
        let mut op = Operation::new(&request, false);
        match run(&mut op, &w.finish()) {
            ReadStatus::Complete(Response::Commit(result)) => {
                assert_eq!(result.assigned(Rid::new(9, -2)), Some(Rid::new(9, 14)));
                assert_eq!(result.updated, vec![(Rid::new(9, 3), 5)]);
                assert!(result.changes.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_config_list_collapses_repeated_keys() {
        let mut w = Writer::new();
        ok_header(&mut w)
            .short(3)
            .string("a")
            .string("1")
            .string("b")
            .string("2")
            .string("a")
            .string("3");
        let mut op = Operation::new(&Request::ConfigList, false);
        match run(&mut op, &w.finish()) {
            ReadStatus::Complete(Response::ConfigList(list)) => {
                assert_eq!(list["a"], ConfigEntry::Multiple(vec!["1".into(), "3".into()]));
                assert_eq!(list["b"], ConfigEntry::Single("2".into()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_db_list_reads_database_names() {
        let mut w = Writer::new();
        ok_header(&mut w).string(r#"databases:{"demo":"plocal:/db/demo","GratefulDeadConcerts":"plocal:/db/g"}"#);
        let mut op = Operation::new(&Request::DbList, false);
        assert_eq!(
            run(&mut op, &w.finish()),
            ReadStatus::Complete(Response::Databases(vec![
                "demo".to_string(),
                "GratefulDeadConcerts".to_string()
            ]))
        );
    }
}

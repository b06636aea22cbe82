//! JSON records as exchanged by the REST interface.
//!
//! The REST side ships plain JSON plus metadata keys: `@type`, `@class`,
//! `@rid`, `@version` and an `@fieldTypes` sidecar (`name=letter,...`) naming
//! the types JSON cannot express. Converting through here yields the same
//! [`Document`] the binary protocol produces.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Number, Value as Json};

use crate::document::{is_metadata_field, Document};
use crate::error::{RecordError, RecordResult};
use crate::rid::Rid;
use crate::rid_bag::{RidBag, RidBagType};
use crate::value::Value;

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Encode a document as a REST JSON record.
pub fn to_json(doc: &Document) -> Json {
    let mut obj = Map::new();
    obj.insert("@type".to_string(), Json::String("d".to_string()));
    if let Some(class) = doc.class() {
        obj.insert("@class".to_string(), Json::String(class.to_string()));
    }
    if let Some(rid) = doc.rid() {
        obj.insert("@rid".to_string(), Json::String(rid.to_string()));
    }
    if let Some(version) = doc.version() {
        obj.insert("@version".to_string(), Json::from(version));
    }

    let mut field_types = Vec::new();
    for (name, value) in doc.fields() {
        if let Some(letter) = field_type(value) {
            field_types.push(format!("{}={}", name, letter));
        }
        obj.insert(name.to_string(), encode(value));
    }
    if !field_types.is_empty() {
        obj.insert("@fieldTypes".to_string(), Json::String(field_types.join(",")));
    }
    Json::Object(obj)
}

fn all_links(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|v| matches!(v, Value::Link(_)))
}

fn field_type(value: &Value) -> Option<char> {
    match value {
        Value::Byte(_) => Some('b'),
        Value::Short(_) => Some('s'),
        Value::Long(_) => Some('l'),
        Value::Float(_) => Some('f'),
        Value::Double(_) => Some('d'),
        Value::Date(_) => Some('a'),
        Value::DateTime(_) => Some('t'),
        Value::Link(_) => Some('x'),
        Value::LinkBag(_) => Some('g'),
        Value::List(items) if all_links(items) => Some('z'),
        Value::Set(items) if all_links(items) => Some('n'),
        Value::Set(_) => Some('e'),
        _ => None,
    }
}

fn encode(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Boolean(b) => Json::Bool(*b),
        Value::Byte(v) => Json::from(*v),
        Value::Short(v) => Json::from(*v),
        Value::Integer(v) => Json::from(*v),
        Value::Long(v) => Json::from(*v),
        Value::Float(v) => Number::from_f64(*v as f64).map(Json::Number).unwrap_or(Json::Null),
        Value::Double(v) => Number::from_f64(*v).map(Json::Number).unwrap_or(Json::Null),
        Value::String(s) => Json::String(s.clone()),
        Value::Date(d) => Json::String(d.format(DATE_FORMAT).to_string()),
        Value::DateTime(d) => Json::String(d.format(DATETIME_FORMAT).to_string()),
        Value::Link(rid) => Json::String(rid.to_string()),
        Value::LinkBag(bag) => match bag.bag_type() {
            RidBagType::Embedded => {
                Json::Array(bag.iter().map(|rid| Json::String(rid.to_string())).collect())
            }
            RidBagType::Tree => Json::String(bag.to_base64()),
        },
        Value::List(items) | Value::Set(items) => Json::Array(items.iter().map(encode).collect()),
        Value::Map(map) => Json::Object(
            map.iter()
                .filter(|(k, _)| !is_metadata_field(k))
                .map(|(k, v)| (k.clone(), encode(v)))
                .collect(),
        ),
        Value::Embedded(doc) => to_json(doc),
    }
}

/// Decode a REST JSON record into a document.
pub fn from_json(json: &Json) -> RecordResult<Document> {
    let obj = json
        .as_object()
        .ok_or_else(|| RecordError::InvalidJson(format!("expected an object, got {}", json)))?;

    let field_types = match obj.get("@fieldTypes") {
        Some(Json::String(s)) => decode_field_types(s),
        _ => IndexMap::new(),
    };

    let mut doc = Document::new();
    for (name, raw) in obj {
        if is_metadata_field(name) {
            continue;
        }
        let value = match field_types.get(name.as_str()) {
            Some(letter) => decode_typed(name, raw, *letter)?,
            None => decode_plain(raw)?,
        };
        doc.set(name.clone(), value);
    }

    doc.set_class(obj.get("@class").and_then(Json::as_str).map(str::to_string));
    if let Some(rid) = obj.get("@rid").and_then(Json::as_str) {
        doc.set_rid(Some(Rid::parse(rid)?));
    }
    doc.set_version(obj.get("@version").and_then(Json::as_i64).map(|v| v as i32));
    Ok(doc)
}

fn decode_field_types(input: &str) -> IndexMap<&str, char> {
    input
        .split(',')
        .filter_map(|item| {
            let (name, letter) = item.split_once('=')?;
            Some((name.trim(), letter.trim().chars().next()?))
        })
        .collect()
}

fn is_record_object(obj: &Map<String, Json>) -> bool {
    obj.contains_key("@type") || obj.contains_key("@rid") || obj.contains_key("@class")
}

fn decode_plain(raw: &Json) -> RecordResult<Value> {
    Ok(match raw {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(n) => match n.as_i64() {
            Some(v) => i32::try_from(v).map(Value::Integer).unwrap_or(Value::Long(v)),
            None => Value::Double(n.as_f64().unwrap_or_default()),
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(decode_plain).collect::<RecordResult<_>>()?),
        Json::Object(obj) if is_record_object(obj) => Value::Embedded(from_json(raw)?),
        Json::Object(obj) => Value::Map(
            obj.iter()
                .map(|(k, v)| Ok((k.clone(), decode_plain(v)?)))
                .collect::<RecordResult<_>>()?,
        ),
    })
}

fn mismatch(name: &str, letter: char, raw: &Json) -> RecordError {
    RecordError::InvalidJson(format!("field '{}' typed '{}' cannot hold {}", name, letter, raw))
}

fn parse_date(input: &str) -> RecordResult<DateTime<Utc>> {
    for format in [DATETIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            return Ok(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(input, DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| RecordError::InvalidDate(input.to_string()))
}

fn decode_links(name: &str, letter: char, raw: &Json) -> RecordResult<Vec<Value>> {
    raw.as_array()
        .ok_or_else(|| mismatch(name, letter, raw))?
        .iter()
        .map(|item| match item {
            Json::String(s) => Rid::parse(s).map(Value::Link),
            Json::Object(_) => from_json(item).map(Value::Embedded),
            other => Err(mismatch(name, letter, other)),
        })
        .collect()
}

fn decode_typed(name: &str, raw: &Json, letter: char) -> RecordResult<Value> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let int = || raw.as_i64().ok_or_else(|| mismatch(name, letter, raw));
    let float = || raw.as_f64().ok_or_else(|| mismatch(name, letter, raw));
    let text = || raw.as_str().ok_or_else(|| mismatch(name, letter, raw));

    match letter {
        'b' => u8::try_from(int()?).map(Value::Byte).map_err(|_| mismatch(name, letter, raw)),
        's' => i16::try_from(int()?).map(Value::Short).map_err(|_| mismatch(name, letter, raw)),
        'l' => int().map(Value::Long),
        'f' => float().map(|v| Value::Float(v as f32)),
        'd' | 'c' => float().map(Value::Double),
        'a' => parse_date(text()?).map(Value::Date),
        't' => parse_date(text()?).map(Value::DateTime),
        'x' => match raw {
            Json::Object(_) => from_json(raw).map(Value::Embedded),
            _ => Rid::parse(text()?).map(Value::Link),
        },
        'z' => decode_links(name, letter, raw).map(Value::List),
        'n' => decode_links(name, letter, raw).map(Value::Set),
        'e' => match decode_plain(raw)? {
            Value::List(items) => Ok(Value::Set(items)),
            _ => Err(mismatch(name, letter, raw)),
        },
        'g' => match raw {
            Json::String(s) => RidBag::from_base64(s).map(Value::LinkBag),
            Json::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| mismatch(name, letter, item))
                        .and_then(Rid::parse)
                })
                .collect::<RecordResult<Vec<_>>>()
                .map(|rids| Value::LinkBag(RidBag::embedded(rids))),
            _ => Err(mismatch(name, letter, raw)),
        },
        _ => decode_plain(raw),
    }
}

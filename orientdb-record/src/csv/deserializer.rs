use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::document::Document;
use crate::error::{RecordError, RecordResult};
use crate::rid::Rid;
use crate::rid_bag::RidBag;
use crate::value::Value;

fn closing_for(open: u8) -> Option<u8> {
    match open {
        b'[' => Some(b']'),
        b'{' => Some(b'}'),
        b'(' => Some(b')'),
        b'<' => Some(b'>'),
        _ => None,
    }
}

/// Byte index of the first comma that separates two top-level values, or
/// the input length when there is none.
///
/// Nested `[] {} () <>` pairs and quoted strings are opaque: a comma only
/// separates at delimiter depth 0. Shared by the document, map and list
/// parsers.
pub fn find_comma_index(input: &str) -> usize {
    let bytes = input.as_bytes();
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
        } else {
            match b {
                b'"' => in_string = true,
                b',' if stack.is_empty() => return i,
                b']' | b'}' | b')' | b'>' => {
                    if stack.last().and_then(|open| closing_for(*open)) == Some(b) {
                        stack.pop();
                    }
                }
                _ if closing_for(b).is_some() => stack.push(b),
                _ => {}
            }
        }
        i += 1;
    }

    bytes.len()
}

/// Split a list body into its top-level items.
///
/// An empty body has no items; every top-level comma is followed by one more
/// item, so `1,` yields `["1", ""]`.
pub fn split_list(input: &str) -> Vec<&str> {
    let mut items = Vec::new();
    if input.is_empty() {
        return items;
    }
    let mut rest = input;
    loop {
        let at = find_comma_index(rest);
        items.push(&rest[..at]);
        if at == rest.len() {
            return items;
        }
        rest = &rest[at + 1..];
    }
}

/// First occurrence of `target` outside quoted strings.
fn find_unquoted(input: &str, target: u8) -> Option<usize> {
    let bytes = input.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
        } else if b == b'"' {
            in_string = true;
        } else if b == target {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn is_class_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '$')
}

/// Split off a `Class@` prefix: an `@` that precedes the first unquoted `:`.
fn split_class(input: &str) -> (Option<&str>, &str) {
    let Some(at) = input.find('@') else {
        return (None, input);
    };
    let before_colon = match find_unquoted(input, b':') {
        Some(colon) => at < colon,
        None => true,
    };
    let class = &input[..at];
    if before_colon && is_class_name(class) {
        (Some(class), &input[at + 1..])
    } else {
        (None, input)
    }
}

fn unquote_name(name: &str) -> RecordResult<String> {
    let name = name.trim();
    if name.len() >= 2 && name.starts_with('"') && name.ends_with('"') {
        Ok(unescape(&name[1..name.len() - 1]))
    } else if name.is_empty() {
        Err(RecordError::Malformed("empty field name".to_string()))
    } else {
        Ok(name.to_string())
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn parse_fields(input: &str) -> RecordResult<IndexMap<String, Value>> {
    let mut fields = IndexMap::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let colon = find_unquoted(rest, b':')
            .ok_or_else(|| RecordError::Malformed(format!("field without value: '{}'", rest)))?;
        let name = unquote_name(&rest[..colon])?;
        rest = &rest[colon + 1..];

        let end = find_comma_index(rest);
        let value = deserialize_value(&rest[..end])?;
        rest = if end < rest.len() { &rest[end + 1..] } else { "" };

        fields.insert(name, value);
    }

    Ok(fields)
}

/// Deserialize a record text into a document, keeping its class tag.
pub fn deserialize(input: &str) -> RecordResult<Document> {
    let (class, body) = split_class(input.trim());
    let mut doc: Document = parse_fields(body)?.into_iter().collect();
    doc.set_class(class.map(str::to_string));
    Ok(doc)
}

fn looks_numeric(s: &str) -> bool {
    matches!(s.as_bytes().first(), Some(b'0'..=b'9' | b'-' | b'+' | b'.'))
        && s.bytes().any(|b| b.is_ascii_digit())
}

fn millis_to_datetime(value: &str, millis: i64) -> RecordResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| RecordError::InvalidDate(value.to_string()))
}

fn expect_closing<'a>(value: &'a str, close: char) -> RecordResult<&'a str> {
    if value.len() >= 2 && value.ends_with(close) {
        Ok(&value[1..value.len() - 1])
    } else {
        Err(RecordError::Malformed(format!(
            "unterminated value, expected '{}': {}",
            close, value
        )))
    }
}

fn malformed(value: &str) -> RecordError {
    RecordError::Malformed(format!("unreadable number: {}", value))
}

fn parse_items(body: &str) -> RecordResult<Vec<Value>> {
    split_list(body).into_iter().map(deserialize_value).collect()
}

/// Deserialize a single value by dispatching on its leading and trailing
/// type markers.
pub fn deserialize_value(raw: &str) -> RecordResult<Value> {
    let value = raw.trim();
    if value.is_empty() {
        return Ok(Value::Null);
    }
    match value {
        "true" => return Ok(Value::Boolean(true)),
        "false" => return Ok(Value::Boolean(false)),
        "null" => return Ok(Value::Null),
        _ => {}
    }

    let first = value.as_bytes()[0];
    let last = value.as_bytes()[value.len() - 1];
    // Type suffixes are ASCII; a multi-byte final char has no numeric prefix.
    let prefix = if last.is_ascii() {
        &value[..value.len() - 1]
    } else {
        ""
    };
    let numeric_prefix = looks_numeric(prefix);

    match first {
        b'"' => return expect_closing(value, '"').map(|s| Value::String(unescape(s))),
        b'%' if last == b';' => {
            return RidBag::from_base64(&value[1..value.len() - 1]).map(Value::LinkBag)
        }
        _ => {}
    }

    if numeric_prefix && (last == b't' || last == b'a') {
        if let Ok(millis) = prefix.parse::<i64>() {
            let date = millis_to_datetime(value, millis)?;
            return Ok(if last == b'a' {
                Value::Date(date)
            } else {
                Value::DateTime(date)
            });
        }
    }

    match first {
        b'(' => {
            let body = expect_closing(value, ')')?;
            return deserialize(body).map(Value::Embedded);
        }
        b'{' => {
            let body = expect_closing(value, '}')?;
            return parse_fields(body).map(Value::Map);
        }
        b'[' => return parse_items(expect_closing(value, ']')?).map(Value::List),
        b'<' => return parse_items(expect_closing(value, '>')?).map(Value::Set),
        _ => {}
    }

    if matches!(prefix, "inf" | "-inf" | "NaN") {
        match last {
            b'f' => return prefix.parse::<f32>().map(Value::Float).map_err(|_| malformed(value)),
            b'd' => return prefix.parse::<f64>().map(Value::Double).map_err(|_| malformed(value)),
            _ => {}
        }
    }

    if numeric_prefix {
        let parsed = match last {
            b'b' => prefix.parse::<u8>().ok().map(Value::Byte),
            b's' => prefix.parse::<i16>().ok().map(Value::Short),
            b'l' => prefix.parse::<i64>().ok().map(Value::Long),
            b'c' => prefix
                .parse::<i64>()
                .map(Value::Long)
                .or_else(|_| prefix.parse::<f64>().map(Value::Double))
                .ok(),
            b'f' => prefix.parse::<f32>().ok().map(Value::Float),
            b'd' => prefix.parse::<f64>().ok().map(Value::Double),
            _ => None,
        };
        if let Some(parsed) = parsed {
            return Ok(parsed);
        }
    }

    if looks_numeric(value) {
        if let Ok(v) = value.parse::<i32>() {
            return Ok(Value::Integer(v));
        }
        if let Ok(v) = value.parse::<i64>() {
            return Ok(Value::Long(v));
        }
        if let Ok(v) = value.parse::<f64>() {
            return Ok(Value::Double(v));
        }
    }

    if let Ok(rid) = Rid::parse(value) {
        return Ok(Value::Link(rid));
    }

    Ok(Value::String(value.to_string()))
}

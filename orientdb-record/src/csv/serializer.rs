use indexmap::IndexMap;

use crate::document::{is_metadata_field, Document};
use crate::value::Value;

/// Serialize a document. The class name, when present, becomes the
/// `Class@` prefix of the record text.
pub fn serialize(doc: &Document) -> String {
    let mut out = String::new();
    write_document(&mut out, doc);
    out
}

/// Serialize a map body (`"key":value,...`) without surrounding braces.
pub fn serialize_map(map: &IndexMap<String, Value>) -> String {
    let mut out = String::new();
    write_map_body(&mut out, map);
    out
}

pub fn serialize_value(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

fn write_document(out: &mut String, doc: &Document) {
    if let Some(class) = doc.class() {
        out.push_str(class);
        out.push('@');
    }
    for (i, (name, value)) in doc.fields().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_field_name(out, name);
        out.push(':');
        write_value(out, value);
    }
}

/// Names that would split or retag the record are written as quoted strings.
fn write_field_name(out: &mut String, name: &str) {
    let plain = !name.is_empty()
        && name.trim() == name
        && !name.contains(|c: char| {
            matches!(
                c,
                ':' | ',' | '"' | '@' | '\\' | '(' | ')' | '[' | ']' | '{' | '}' | '<' | '>'
            )
        });
    if plain {
        out.push_str(name);
    } else {
        write_string(out, name);
    }
}

fn write_map_body(out: &mut String, map: &IndexMap<String, Value>) {
    let mut first = true;
    for (key, value) in map {
        if is_metadata_field(key) {
            continue;
        }
        if !first {
            out.push(',');
        }
        first = false;
        write_string(out, key);
        out.push(':');
        write_value(out, value);
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

fn write_items(out: &mut String, open: char, close: char, items: &[Value]) {
    out.push(open);
    // A lone null would otherwise read back as an empty collection.
    if let [Value::Null] = items {
        out.push_str("null");
        out.push(close);
        return;
    }
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_value(out, item);
    }
    out.push(close);
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Byte(v) => out.push_str(&format!("{}b", v)),
        Value::Short(v) => out.push_str(&format!("{}s", v)),
        Value::Integer(v) => out.push_str(&v.to_string()),
        Value::Long(v) => out.push_str(&format!("{}l", v)),
        Value::Float(v) => out.push_str(&format!("{}f", v)),
        Value::Double(v) => out.push_str(&format!("{}d", v)),
        Value::String(s) => write_string(out, s),
        Value::Date(d) => out.push_str(&format!("{}a", d.timestamp_millis())),
        Value::DateTime(d) => out.push_str(&format!("{}t", d.timestamp_millis())),
        Value::Link(rid) => out.push_str(&rid.to_string()),
        Value::LinkBag(bag) => {
            out.push('%');
            out.push_str(&bag.to_base64());
            out.push(';');
        }
        Value::List(items) => write_items(out, '[', ']', items),
        Value::Set(items) => write_items(out, '<', '>', items),
        Value::Map(map) => {
            out.push('{');
            write_map_body(out, map);
            out.push('}');
        }
        Value::Embedded(doc) => {
            out.push('(');
            write_document(out, doc);
            out.push(')');
        }
    }
}

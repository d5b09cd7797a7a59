//! Structural XML <-> mapping conversion for message payloads.
//!
//! Element text and CDATA sections both become string values, repeated
//! sibling names become arrays and attributes are ignored. An element that
//! carries text alongside children keeps its text under `#text`.
//!
//! Leaf text is kept byte for byte, surrounding whitespace included.
//! Whitespace between child elements is indentation and is dropped.

use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    Reader, Writer,
};
use serde_json::{Map, Value};

use crate::{Result, WxkitError};

const TEXT_KEY: &str = "#text";

struct Frame {
    name: String,
    children: Map<String, Value>,
    text: String,
}

impl Frame {
    fn new(name: String) -> Self {
        Self {
            name,
            children: Map::new(),
            text: String::new(),
        }
    }

    fn into_value(self) -> (String, Value) {
        let value = if self.children.is_empty() {
            Value::String(self.text)
        } else {
            let mut children = self.children;
            let text = self.text.trim();
            if !text.is_empty() {
                children.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
            }
            Value::Object(children)
        };
        (self.name, value)
    }
}

fn insert_child(map: &mut Map<String, Value>, name: String, value: Value) {
    match map.get_mut(&name) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(name, value);
        }
    }
}

fn parse_error(err: impl std::fmt::Display) -> WxkitError {
    WxkitError::Serialization(format!("invalid xml: {}", err))
}

fn element_name(start: &BytesStart<'_>) -> Result<String> {
    std::str::from_utf8(start.name().as_ref())
        .map(str::to_string)
        .map_err(parse_error)
}

/// Parse an XML document into a mapping keyed by element name.
///
/// `<xml><A>1</A></xml>` becomes `{"xml": {"A": "1"}}`.
pub fn xml_to_object(xml: &str) -> Result<Map<String, Value>> {
    let mut reader = Reader::from_str(xml);

    let mut stack = vec![Frame::new(String::new())];

    loop {
        match reader.read_event().map_err(parse_error)? {
            Event::Start(start) => stack.push(Frame::new(element_name(&start)?)),
            Event::Empty(start) => {
                let name = element_name(&start)?;
                if let Some(top) = stack.last_mut() {
                    insert_child(&mut top.children, name, Value::String(String::new()));
                }
            }
            Event::Text(text) => {
                let unescaped = text.unescape().map_err(parse_error)?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&unescaped);
                }
            }
            Event::CData(cdata) => {
                let raw = cdata.into_inner();
                let content = std::str::from_utf8(&raw).map_err(parse_error)?;
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(content);
                }
            }
            Event::End(_) => {
                if stack.len() < 2 {
                    return Err(parse_error("unexpected closing tag"));
                }
                if let Some(frame) = stack.pop() {
                    let (name, value) = frame.into_value();
                    if let Some(parent) = stack.last_mut() {
                        insert_child(&mut parent.children, name, value);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match stack.pop() {
        Some(root) if stack.is_empty() => Ok(root.children),
        _ => Err(parse_error("unclosed element")),
    }
}

fn write_error(err: impl std::fmt::Display) -> WxkitError {
    WxkitError::Serialization(format!("failed to write xml: {}", err))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, name: &str, value: &Value) -> Result<()> {
    match value {
        Value::Array(items) => {
            for item in items {
                write_element(writer, name, item)?;
            }
        }
        Value::Null => {
            writer
                .write_event(Event::Empty(BytesStart::new(name)))
                .map_err(write_error)?;
        }
        Value::Object(children) => {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(write_error)?;
            for (child, child_value) in children {
                if child == TEXT_KEY {
                    writer
                        .write_event(Event::Text(BytesText::new(&scalar_text(child_value))))
                        .map_err(write_error)?;
                } else {
                    write_element(writer, child, child_value)?;
                }
            }
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(write_error)?;
        }
        scalar => {
            writer
                .write_event(Event::Start(BytesStart::new(name)))
                .map_err(write_error)?;
            writer
                .write_event(Event::Text(BytesText::new(&scalar_text(scalar))))
                .map_err(write_error)?;
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(write_error)?;
        }
    }
    Ok(())
}

/// Render a mapping as indented XML, one element per key.
pub fn object_to_xml(obj: &Map<String, Value>) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    for (name, value) in obj {
        write_element(&mut writer, name, value)?;
    }
    String::from_utf8(writer.into_inner()).map_err(write_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_parse_plain_and_cdata() {
        let parsed = xml_to_object(
            "<xml><ToUserName><![CDATA[gh_123]]></ToUserName>\
             <CreateTime>1348831860</CreateTime>\
             <Content><![CDATA[a < b & c]]></Content></xml>",
        )
        .unwrap();

        assert_eq!(
            Value::Object(parsed),
            json!({
                "xml": {
                    "ToUserName": "gh_123",
                    "CreateTime": "1348831860",
                    "Content": "a < b & c"
                }
            })
        );
    }

    #[test]
    fn test_repeated_children_become_array() {
        let parsed = xml_to_object(
            "<xml><Articles><item><Title>a</Title></item><item><Title>b</Title></item></Articles></xml>",
        )
        .unwrap();

        assert_eq!(
            parsed["xml"]["Articles"]["item"],
            json!([{ "Title": "a" }, { "Title": "b" }])
        );
    }

    #[test]
    fn test_attributes_ignored_and_empty_elements() {
        let parsed = xml_to_object(r#"<xml lang="zh"><Empty/><Blank></Blank></xml>"#).unwrap();
        assert_eq!(Value::Object(parsed), json!({ "xml": { "Empty": "", "Blank": "" } }));
    }

    #[test]
    fn test_roundtrip_preserves_pairs() {
        let original = as_map(json!({
            "xml": {
                "ToUserName": "a",
                "FromUserName": "b & <c>",
                "MsgType": "news",
                "Content": "  padded text\n",
                "Articles": { "item": [{ "Title": "one" }, { "Title": "two" }] }
            }
        }));

        let xml = object_to_xml(&original).unwrap();
        assert!(xml.contains("&amp;"));

        let parsed = xml_to_object(&xml).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_roundtrip_keeps_surrounding_whitespace() {
        let parsed = xml_to_object(
            "<xml><Content><![CDATA[ hello\n]]></Content><Blank><![CDATA[\n]]></Blank></xml>",
        )
        .unwrap();
        assert_eq!(parsed["xml"]["Content"], " hello\n");
        assert_eq!(parsed["xml"]["Blank"], "\n");

        let reparsed = xml_to_object(&object_to_xml(&parsed).unwrap()).unwrap();
        assert_eq!(reparsed, parsed);
    }

    #[test]
    fn test_indentation_is_not_text() {
        let parsed = xml_to_object("<xml>\n  <A> 1 </A>\n  <B/>\n</xml>\n").unwrap();
        assert_eq!(Value::Object(parsed), json!({ "xml": { "A": " 1 ", "B": "" } }));
    }

    #[test]
    fn test_numbers_written_as_text() {
        let xml = object_to_xml(&as_map(json!({ "xml": { "CreateTime": 1348831860 } }))).unwrap();
        assert!(xml.contains("<CreateTime>1348831860</CreateTime>"));
    }

    #[test]
    fn test_malformed_xml_rejected() {
        assert!(xml_to_object("<xml><a>1</b></xml>").is_err());
        assert!(xml_to_object("<xml><a>1</a>").is_err());
    }
}

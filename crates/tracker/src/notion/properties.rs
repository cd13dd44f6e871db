//! Conversions between Notion property values and plain values.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Notion rejects text objects longer than this.
pub(crate) const MAX_TEXT_LEN: usize = 2000;

pub(crate) fn rich_text(content: &str) -> Value {
    json!({ "rich_text": text_objects(content) })
}

pub(crate) fn title(content: &str) -> Value {
    json!({ "title": text_objects(content) })
}

pub(crate) fn status(name: &str) -> Value {
    json!({ "status": { "name": name } })
}

pub(crate) fn multi_select(names: &BTreeSet<String>) -> Value {
    let options: Vec<Value> = names.iter().map(|n| json!({ "name": n })).collect();
    json!({ "multi_select": options })
}

pub(crate) fn date(at: DateTime<Utc>) -> Value {
    json!({ "date": { "start": at.to_rfc3339() } })
}

/// Split into text objects of at most [`MAX_TEXT_LEN`] characters.
pub(crate) fn text_objects(content: &str) -> Vec<Value> {
    let chars: Vec<char> = content.chars().collect();
    chars
        .chunks(MAX_TEXT_LEN)
        .map(|chunk| {
            let piece: String = chunk.iter().collect();
            json!({ "type": "text", "text": { "content": piece } })
        })
        .collect()
}

/// Plain text of a title or rich_text property; `None` when empty or absent.
pub(crate) fn read_text(props: &Map<String, Value>, name: &str) -> Option<String> {
    let prop = props.get(name)?;
    let parts = prop
        .get("rich_text")
        .or_else(|| prop.get("title"))?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|part| {
            part.get("plain_text")
                .or_else(|| part.pointer("/text/content"))
                .and_then(Value::as_str)
        })
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Option name of a `status` or `select` property.
pub(crate) fn read_status(props: &Map<String, Value>, name: &str) -> Option<String> {
    let prop = props.get(name)?;
    prop.get("status")
        .or_else(|| prop.get("select"))?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

pub(crate) fn read_multi_select(props: &Map<String, Value>, name: &str) -> BTreeSet<String> {
    props
        .get(name)
        .and_then(|p| p.get("multi_select"))
        .and_then(Value::as_array)
        .map(|options| {
            options
                .iter()
                .filter_map(|o| o.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn read_date(props: &Map<String, Value>, name: &str) -> Option<DateTime<Utc>> {
    let start = props.get(name)?.get("date")?.get("start")?.as_str()?;
    parse_timestamp(start)
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_objects_split_long_content() {
        let content = "字".repeat(MAX_TEXT_LEN + 5);
        let objects = text_objects(&content);
        assert_eq!(objects.len(), 2);
        assert_eq!(
            objects[1]["text"]["content"].as_str().unwrap().chars().count(),
            5
        );
    }

    #[test]
    fn test_read_text_joins_parts() {
        let props = json!({
            "Notes": { "rich_text": [
                { "plain_text": "hello " },
                { "text": { "content": "world" } }
            ]}
        });
        let props = props.as_object().unwrap();
        assert_eq!(read_text(props, "Notes").as_deref(), Some("hello world"));
        assert_eq!(read_text(props, "Missing"), None);
    }

    #[test]
    fn test_read_status_accepts_select() {
        let props = json!({ "状态": { "select": { "name": "待处理" } } });
        assert_eq!(
            read_status(props.as_object().unwrap(), "状态").as_deref(),
            Some("待处理")
        );
    }

    #[test]
    fn test_date_round_trip() {
        let now = Utc::now();
        let props = json!({ "Last Transition": date(now) });
        let back = read_date(props.as_object().unwrap(), "Last Transition").unwrap();
        assert_eq!(back.timestamp_micros(), now.timestamp_micros());
    }
}

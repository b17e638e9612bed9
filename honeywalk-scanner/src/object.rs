use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value of a named attribute stored on a crawl object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Str(String),
    /// Milliseconds since the Unix epoch.
    Time(i64),
    /// Reference to a stored blob.
    Ref(u64),
    /// Reference to another stored object.
    Object(u64),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(i) | AttributeValue::Time(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_ref_id(&self) -> Option<u64> {
        match self {
            AttributeValue::Ref(id) | AttributeValue::Object(id) => Some(*id),
            _ => None,
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Str(value)
    }
}

pub type ObjectData = BTreeMap<String, AttributeValue>;

/// How a crawl object was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Origin {
    Link,
    Longdesc,
    Frame,
    Iframe,
    Embedded,
    ServerRedirect,
    ClientRedirect,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Link => "link",
            Origin::Longdesc => "longdesc",
            Origin::Frame => "frame",
            Origin::Iframe => "iframe",
            Origin::Embedded => "embedded",
            Origin::ServerRedirect => "redirect",
            Origin::ClientRedirect => "client-redirect",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectType {
    Url,
    File,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Url => "url",
            ObjectType::File => "file",
        }
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Task-wide budget of new objects. Each accepted object decrements it first;
/// once it is exhausted further objects are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewObjectCounter {
    remaining: i64,
}

impl NewObjectCounter {
    pub fn new(limit: usize) -> Self {
        Self {
            remaining: i64::try_from(limit).unwrap_or(i64::MAX),
        }
    }

    pub fn count_down(&mut self) -> bool {
        self.remaining -= 1;
        self.remaining >= 0
    }

    pub fn remaining(&self) -> usize {
        usize::try_from(self.remaining).unwrap_or(0)
    }
}

/// An object discovered by the crawl and handed on for further analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct NewObject {
    pub url: String,
    pub origin: Option<Origin>,
    pub object_type: ObjectType,
    pub mime_type: Option<String>,
    pub referrer: Option<String>,
    pub referrer_cookie: Option<u64>,
    pub content: Option<u64>,
    pub download_time_start: Option<i64>,
    pub download_time_end: Option<i64>,
    pub creation_time: i64,
}

impl NewObject {
    pub fn new(url: impl Into<String>, origin: Option<Origin>, object_type: ObjectType) -> Self {
        Self {
            url: url.into(),
            origin,
            object_type,
            mime_type: None,
            referrer: None,
            referrer_cookie: None,
            content: None,
            download_time_start: None,
            download_time_end: None,
            creation_time: now_millis(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: &str) -> Self {
        if !mime_type.is_empty() {
            self.mime_type = Some(mime_type.to_lowercase());
        }
        self
    }

    pub fn with_referrer(mut self, referrer: Option<String>) -> Self {
        self.referrer = referrer;
        self
    }

    pub fn with_referrer_cookie(mut self, cookie_id: Option<u64>) -> Self {
        self.referrer_cookie = cookie_id;
        self
    }

    pub fn with_content(mut self, content_id: u64) -> Self {
        self.content = Some(content_id);
        self
    }

    pub fn with_download_times(mut self, start: i64, end: i64) -> Self {
        self.download_time_start = Some(start);
        self.download_time_end = Some(end);
        self
    }

    pub fn to_object_data(&self, parent: Option<u64>) -> ObjectData {
        let mut data = ObjectData::new();
        data.insert("type".into(), self.object_type.as_str().into());
        data.insert("url_original".into(), self.url.as_str().into());
        data.insert("creation_time".into(), AttributeValue::Time(self.creation_time));
        if let Some(origin) = self.origin {
            data.insert("origin".into(), origin.as_str().into());
        }
        if let Some(mime_type) = &self.mime_type {
            data.insert("mime_type".into(), mime_type.as_str().into());
        }
        if let Some(parent) = parent {
            data.insert("parent".into(), AttributeValue::Object(parent));
        }
        if let Some(referrer) = &self.referrer {
            data.insert("referrer".into(), referrer.as_str().into());
        }
        if let Some(cookie) = self.referrer_cookie {
            data.insert("referrer_cookie".into(), AttributeValue::Ref(cookie));
        }
        if let Some(content) = self.content {
            data.insert("content".into(), AttributeValue::Ref(content));
        }
        if let Some(start) = self.download_time_start {
            data.insert("download_time_start".into(), AttributeValue::Time(start));
        }
        if let Some(end) = self.download_time_end {
            data.insert("download_time_end".into(), AttributeValue::Time(end));
        }
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_names() {
        assert_eq!(Origin::Link.as_str(), "link");
        assert_eq!(Origin::ServerRedirect.as_str(), "redirect");
        assert_eq!(Origin::ClientRedirect.to_string(), "client-redirect");
    }

    #[test]
    fn test_new_object_data() {
        let object = NewObject::new("http://example.com/a.pdf", Some(Origin::Embedded), ObjectType::File)
            .with_mime_type("Application/PDF")
            .with_referrer(Some("http://example.com/".to_string()))
            .with_referrer_cookie(Some(4))
            .with_content(9);

        let data = object.to_object_data(Some(1));
        assert_eq!(data["type"], AttributeValue::Str("file".into()));
        assert_eq!(data["origin"], AttributeValue::Str("embedded".into()));
        assert_eq!(data["mime_type"], AttributeValue::Str("application/pdf".into()));
        assert_eq!(data["parent"], AttributeValue::Object(1));
        assert_eq!(data["referrer_cookie"], AttributeValue::Ref(4));
        assert_eq!(data["content"], AttributeValue::Ref(9));
        assert!(!data.contains_key("download_time_start"));
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let data = NewObject::new("http://example.com/", None, ObjectType::Url).to_object_data(None);
        assert_eq!(data.len(), 3);
        assert!(data.contains_key("creation_time"));
    }

    #[test]
    fn test_counter_decrements_then_checks() {
        let mut counter = NewObjectCounter::new(2);
        assert!(counter.count_down());
        assert!(counter.count_down());
        assert!(!counter.count_down());
        assert!(!counter.count_down());
        assert_eq!(counter.remaining(), 0);

        let mut empty = NewObjectCounter::new(0);
        assert!(!empty.count_down());
    }

    #[test]
    fn test_attribute_value_serde() {
        let json = serde_json::to_string(&AttributeValue::Ref(12)).unwrap();
        assert_eq!(json, r#"{"type":"ref","value":12}"#);
        let back: AttributeValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_ref_id(), Some(12));
    }
}

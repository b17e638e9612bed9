// Storage sink for crawl results

use crate::engine::Cookie;
use crate::error::StoreError;
use crate::object::ObjectData;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

/// Where crawl results go. Shared by concurrent tasks, so implementations must
/// be safe to call from several threads.
pub trait ObjectStore: Send + Sync {
    fn save_blob(&self, job: u64, data: &[u8]) -> Result<u64, StoreError>;

    fn load_blob(&self, job: u64, id: u64) -> Result<Vec<u8>, StoreError>;

    fn create_object(&self, job: u64, data: &ObjectData) -> Result<u64, StoreError>;

    fn update_object(&self, job: u64, id: u64, data: &ObjectData) -> Result<(), StoreError>;

    fn save_new_objects(&self, job: u64, objects: &[ObjectData]) -> Result<Vec<u64>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_url_original: String,
    pub request_url_absolute: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_header: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_header: Option<String>,
}

impl RequestRecord {
    pub fn new(original: impl Into<String>, absolute: impl Into<String>) -> Self {
        Self {
            request_url_original: original.into(),
            request_url_absolute: absolute.into(),
            request_header: None,
            response_code: None,
            response_header: None,
        }
    }

    pub fn with_request_header(mut self, header: String) -> Self {
        self.request_header = Some(header);
        self
    }

    pub fn with_response(mut self, code: u16, header: String) -> Self {
        self.response_code = Some(code);
        self.response_header = Some(header);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub requests: Vec<RequestRecord>,
    pub content_type: String,
    pub content: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRequestRecord {
    pub requests: Vec<RequestRecord>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    pub attributes: BTreeMap<String, String>,
}

impl From<&Cookie> for CookieRecord {
    fn from(cookie: &Cookie) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("domain".to_string(), cookie.domain.clone());
        attributes.insert("path".to_string(), cookie.path.clone());
        attributes.insert("is_secure".to_string(), cookie.secure.to_string());
        Self {
            name: cookie.name.clone(),
            value: cookie.value.clone(),
            attributes,
        }
    }
}

impl From<&CookieRecord> for Cookie {
    fn from(record: &CookieRecord) -> Self {
        let attr = |name: &str| record.attributes.get(name).cloned().unwrap_or_default();
        Cookie {
            name: record.name.clone(),
            value: record.value.clone(),
            domain: attr("domain"),
            path: attr("path"),
            secure: attr("is_secure") == "true",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsContextRecord {
    pub id: u32,
    pub source: String,
    pub eval: bool,
}

/// Saves and loads the JSON records referenced from crawl object attributes.
pub struct DataStoreHelper<'a> {
    store: &'a dyn ObjectStore,
    job: u64,
}

impl<'a> DataStoreHelper<'a> {
    pub fn new(store: &'a dyn ObjectStore, job: u64) -> Self {
        Self { store, job }
    }

    fn save_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<u64, StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.store.save_blob(self.job, &bytes)
    }

    fn load_json<T: DeserializeOwned>(&self, id: u64) -> Result<T, StoreError> {
        let bytes = self.store.load_blob(self.job, id)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save_content(&self, data: &[u8]) -> Result<u64, StoreError> {
        self.store.save_blob(self.job, data)
    }

    pub fn save_request(&self, request: &RequestRecord) -> Result<u64, StoreError> {
        self.save_json(request)
    }

    pub fn save_files(&self, files: &[FileRecord]) -> Result<u64, StoreError> {
        self.save_json(files)
    }

    pub fn save_failed_requests(&self, failed: &[FailedRequestRecord]) -> Result<u64, StoreError> {
        self.save_json(failed)
    }

    pub fn save_cookies(&self, cookies: &[CookieRecord]) -> Result<u64, StoreError> {
        self.save_json(cookies)
    }

    pub fn load_cookies(&self, id: u64) -> Result<Vec<CookieRecord>, StoreError> {
        self.load_json(id)
    }

    pub fn save_js_contexts(&self, contexts: &[JsContextRecord]) -> Result<u64, StoreError> {
        self.save_json(contexts)
    }

    pub fn load_request(&self, id: u64) -> Result<RequestRecord, StoreError> {
        self.load_json(id)
    }

    pub fn load_files(&self, id: u64) -> Result<Vec<FileRecord>, StoreError> {
        self.load_json(id)
    }

    pub fn load_failed_requests(&self, id: u64) -> Result<Vec<FailedRequestRecord>, StoreError> {
        self.load_json(id)
    }

    pub fn load_js_contexts(&self, id: u64) -> Result<Vec<JsContextRecord>, StoreError> {
        self.load_json(id)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: u64,
    blobs: HashMap<u64, (u64, Vec<u8>)>,
    objects: BTreeMap<u64, (u64, ObjectData)>,
    new_objects: BTreeMap<u64, (u64, ObjectData)>,
}

impl MemoryState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory `ObjectStore` for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn object(&self, id: u64) -> Option<ObjectData> {
        self.lock().objects.get(&id).map(|(_, data)| data.clone())
    }

    /// Tree objects of a job, ordered by id.
    pub fn objects(&self, job: u64) -> Vec<(u64, ObjectData)> {
        self.lock()
            .objects
            .iter()
            .filter(|(_, (owner, _))| *owner == job)
            .map(|(id, (_, data))| (*id, data.clone()))
            .collect()
    }

    pub fn new_objects(&self, job: u64) -> Vec<(u64, ObjectData)> {
        self.lock()
            .new_objects
            .iter()
            .filter(|(_, (owner, _))| *owner == job)
            .map(|(id, (_, data))| (*id, data.clone()))
            .collect()
    }

    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }
}

impl ObjectStore for MemoryStore {
    fn save_blob(&self, job: u64, data: &[u8]) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let id = state.next_id();
        state.blobs.insert(id, (job, data.to_vec()));
        Ok(id)
    }

    fn load_blob(&self, job: u64, id: u64) -> Result<Vec<u8>, StoreError> {
        match self.lock().blobs.get(&id) {
            Some((owner, data)) if *owner == job => Ok(data.clone()),
            _ => Err(StoreError::NotFound(id)),
        }
    }

    fn create_object(&self, job: u64, data: &ObjectData) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let id = state.next_id();
        state.objects.insert(id, (job, data.clone()));
        Ok(id)
    }

    fn update_object(&self, job: u64, id: u64, data: &ObjectData) -> Result<(), StoreError> {
        let mut state = self.lock();
        let entry = state
            .objects
            .entry(id)
            .or_insert_with(|| (job, ObjectData::new()));
        entry.1.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn save_new_objects(&self, job: u64, objects: &[ObjectData]) -> Result<Vec<u64>, StoreError> {
        let mut state = self.lock();
        let mut ids = Vec::with_capacity(objects.len());
        for data in objects {
            let id = state.next_id();
            state.new_objects.insert(id, (job, data.clone()));
            ids.push(id);
        }
        Ok(ids)
    }
}

/// Store handle given to one worker. Once closed every call fails, so a worker
/// that outlived its follower can't write anything more.
pub struct ClosableStore {
    inner: Arc<dyn ObjectStore>,
    open: RwLock<bool>,
}

impl ClosableStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            open: RwLock::new(true),
        }
    }

    /// Waits for calls already in progress, then rejects all later ones.
    pub fn close(&self) {
        *self.open.write().unwrap_or_else(PoisonError::into_inner) = false;
    }

    pub fn is_open(&self) -> bool {
        *self.open.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn admit(&self) -> Result<RwLockReadGuard<'_, bool>, StoreError> {
        let open = self.open.read().unwrap_or_else(PoisonError::into_inner);
        if *open { Ok(open) } else { Err(StoreError::Closed) }
    }
}

impl ObjectStore for ClosableStore {
    fn save_blob(&self, job: u64, data: &[u8]) -> Result<u64, StoreError> {
        let _open = self.admit()?;
        self.inner.save_blob(job, data)
    }

    fn load_blob(&self, job: u64, id: u64) -> Result<Vec<u8>, StoreError> {
        let _open = self.admit()?;
        self.inner.load_blob(job, id)
    }

    fn create_object(&self, job: u64, data: &ObjectData) -> Result<u64, StoreError> {
        let _open = self.admit()?;
        self.inner.create_object(job, data)
    }

    fn update_object(&self, job: u64, id: u64, data: &ObjectData) -> Result<(), StoreError> {
        let _open = self.admit()?;
        self.inner.update_object(job, id, data)
    }

    fn save_new_objects(&self, job: u64, objects: &[ObjectData]) -> Result<Vec<u64>, StoreError> {
        let _open = self.admit()?;
        self.inner.save_new_objects(job, objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::AttributeValue;

    #[test]
    fn test_cookie_record_conversion() {
        let cookie = Cookie {
            name: "sid".into(),
            value: "abc".into(),
            domain: "example.com".into(),
            path: "/".into(),
            secure: true,
        };
        let record = CookieRecord::from(&cookie);
        assert_eq!(record.attributes["is_secure"], "true");
        assert_eq!(Cookie::from(&record), cookie);
    }

    #[test]
    fn test_helper_saves_and_loads_records() {
        let store = MemoryStore::new();
        let helper = DataStoreHelper::new(&store, 1);

        let request = RequestRecord::new("http://a", "http://a/").with_response(200, "X: y\n".into());
        let id = helper.save_request(&request).unwrap();
        assert_eq!(helper.load_request(id).unwrap(), request);

        let cookies = vec![CookieRecord {
            name: "a".into(),
            value: "b".into(),
            attributes: BTreeMap::new(),
        }];
        let id = helper.save_cookies(&cookies).unwrap();
        assert_eq!(helper.load_cookies(id).unwrap(), cookies);
    }

    #[test]
    fn test_memory_store_blobs_are_scoped_to_job() {
        let store = MemoryStore::new();
        let id = store.save_blob(1, b"data").unwrap();
        assert_eq!(store.load_blob(1, id).unwrap(), b"data");
        assert!(matches!(store.load_blob(2, id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_memory_store_update_merges_attributes() {
        let store = MemoryStore::new();
        let mut data = ObjectData::new();
        data.insert("type".into(), "url".into());
        let id = store.create_object(1, &data).unwrap();

        let mut update = ObjectData::new();
        update.insert("active".into(), AttributeValue::Bool(true));
        store.update_object(1, id, &update).unwrap();

        let stored = store.object(id).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(store.objects(1).len(), 1);
    }

    #[test]
    fn test_closed_store_rejects_writes() {
        let inner = Arc::new(MemoryStore::new());
        let store = ClosableStore::new(inner.clone());
        let id = store.save_blob(1, b"before").unwrap();
        assert!(store.is_open());

        store.close();
        assert!(!store.is_open());
        assert!(matches!(store.save_blob(1, b"after"), Err(StoreError::Closed)));
        assert!(matches!(store.create_object(1, &ObjectData::new()), Err(StoreError::Closed)));
        assert!(matches!(store.load_blob(1, id), Err(StoreError::Closed)));
        assert_eq!(inner.blob_count(), 1);
    }
}

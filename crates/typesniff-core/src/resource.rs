//! Resources under detection.

use std::collections::HashMap;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use url::Url;

use crate::error::TransportError;
use crate::fs::{FileFilter, FileSystem};
use crate::transport::Transport;

/// A data resource: a local directory of samples or a remote endpoint.
#[derive(Debug, Clone)]
pub enum Resource {
    Local(LocalResource),
    Remote(RemoteResource),
}

impl Resource {
    pub fn uri(&self) -> &Url {
        match self {
            Self::Local(local) => local.uri(),
            Self::Remote(remote) => remote.uri(),
        }
    }
}

impl From<LocalResource> for Resource {
    fn from(local: LocalResource) -> Self {
        Self::Local(local)
    }
}

impl From<RemoteResource> for Resource {
    fn from(remote: RemoteResource) -> Self {
        Self::Remote(remote)
    }
}

/// A directory, identified by its `file://` URI.
#[derive(Debug, Clone)]
pub struct LocalResource {
    dir: PathBuf,
    uri: Url,
    fs: Arc<dyn FileSystem>,
}

impl LocalResource {
    pub fn new(dir: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> io::Result<Self> {
        let dir = dir.into();
        let absolute = std::path::absolute(&dir)?;
        let uri = Url::from_directory_path(&absolute).map_err(|()| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file URI", absolute.display()),
            )
        })?;
        Ok(Self { dir, uri, fs })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub(crate) fn file_system(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn list_files(&self, max_depth: usize, filter: &FileFilter) -> io::Result<Vec<PathBuf>> {
        self.fs.list_files(&self.dir, max_depth, filter)
    }

    pub fn open(&self, path: &Path) -> io::Result<Box<dyn Read + '_>> {
        self.fs.open(path)
    }
}

type BodyCache = Arc<Mutex<HashMap<Url, Arc<[u8]>>>>;

/// A remote endpoint.
///
/// The cached variant fetches each URI at most once. The cache is shared by
/// every resource derived through [`with_uri`](Self::with_uri), so types
/// normalizing to the same URI sniff the same bytes.
#[derive(Clone)]
pub struct RemoteResource {
    uri: Url,
    transport: Arc<dyn Transport>,
    cache: Option<BodyCache>,
}

impl RemoteResource {
    pub fn new(uri: Url, transport: Arc<dyn Transport>) -> Self {
        Self {
            uri,
            transport,
            cache: None,
        }
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// The cached variant of this resource. Already cached resources share
    /// their cache with the copy.
    pub fn to_cached(&self) -> Self {
        let mut cached = self.clone();
        if cached.cache.is_none() {
            cached.cache = Some(BodyCache::default());
        }
        cached
    }

    /// The same endpoint at another URI, sharing this resource's cache.
    pub fn with_uri(&self, uri: Url) -> Self {
        Self {
            uri,
            transport: Arc::clone(&self.transport),
            cache: self.cache.clone(),
        }
    }

    /// Open the body for reading, fetching it unless already cached.
    pub fn open_stream(&self) -> Result<Box<dyn Read + '_>, TransportError> {
        Ok(Box::new(Cursor::new(self.body()?)))
    }

    /// The body as UTF-8 text, fetching it unless already cached.
    pub fn read_text(&self) -> Result<String, TransportError> {
        let body = self.body()?;
        std::str::from_utf8(&body)
            .map(str::to_owned)
            .map_err(|_| TransportError::Encoding {
                uri: self.uri.to_string(),
            })
    }

    fn body(&self) -> Result<Arc<[u8]>, TransportError> {
        let Some(cache) = &self.cache else {
            return Ok(self.transport.get(&self.uri)?.into());
        };

        let hit = cache
            .lock()
            .ok()
            .and_then(|bodies| bodies.get(&self.uri).cloned());
        if let Some(body) = hit {
            return Ok(body);
        }
        let body: Arc<[u8]> = self.transport.get(&self.uri)?.into();
        if let Ok(mut bodies) = cache.lock() {
            bodies.insert(self.uri.clone(), Arc::clone(&body));
        }
        Ok(body)
    }

    fn cached_bodies(&self) -> usize {
        self.cache
            .as_ref()
            .and_then(|cache| cache.lock().ok().map(|bodies| bodies.len()))
            .unwrap_or(0)
    }
}

impl fmt::Debug for RemoteResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteResource")
            .field("uri", &self.uri.as_str())
            .field("cached", &self.is_cached())
            .field("cached_bodies", &self.cached_bodies())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::transport::mock::MockTransport;

    const URI: &str = "http://example.org/wfs";

    fn read_all(mut reader: impl Read) -> String {
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn local_resource_has_directory_uri() {
        let mut fs = MockFileSystem::new();
        fs.add_file("/data/a.xml", "<a/>");
        let local = LocalResource::new("/data", Arc::new(fs)).unwrap();
        assert_eq!(local.uri().scheme(), "file");
        assert!(local.uri().path().ends_with("/data/"));
        assert_eq!(
            local.list_files(6, &FileFilter::default()).unwrap(),
            [PathBuf::from("/data/a.xml")]
        );
    }

    #[test]
    fn uncached_remote_fetches_every_time() {
        let transport = Arc::new(MockTransport::new().respond(URI, "<a/>"));
        let remote = RemoteResource::new(Url::parse(URI).unwrap(), transport.clone());
        assert_eq!(read_all(remote.open_stream().unwrap()), "<a/>");
        assert_eq!(read_all(remote.open_stream().unwrap()), "<a/>");
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn cached_remote_fetches_once() {
        let transport = Arc::new(MockTransport::new().respond(URI, "<a/>"));
        let remote = RemoteResource::new(Url::parse(URI).unwrap(), transport.clone()).to_cached();
        assert!(remote.is_cached());
        for _ in 0..3 {
            assert_eq!(read_all(remote.open_stream().unwrap()), "<a/>");
        }
        let copy = remote.to_cached();
        assert_eq!(read_all(copy.open_stream().unwrap()), "<a/>");
        assert_eq!(transport.requests(), [URI]);
    }

    #[test]
    fn failed_fetch_is_not_cached() {
        let transport = Arc::new(MockTransport::new().fail(URI, 500));
        let remote = RemoteResource::new(Url::parse(URI).unwrap(), transport.clone()).to_cached();
        assert!(remote.open_stream().is_err());
        assert!(remote.open_stream().is_err());
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn derived_resources_share_the_cache_per_uri() {
        let other = "http://example.org/wfs?SERVICE=WFS";
        let transport = Arc::new(
            MockTransport::new()
                .respond(URI, "<a/>")
                .respond(other, "<b/>"),
        );
        let remote = RemoteResource::new(Url::parse(URI).unwrap(), transport.clone()).to_cached();
        assert_eq!(read_all(remote.open_stream().unwrap()), "<a/>");

        let moved = remote.with_uri(Url::parse(other).unwrap());
        assert!(moved.is_cached());
        assert_eq!(read_all(moved.open_stream().unwrap()), "<b/>");
        assert_eq!(read_all(moved.open_stream().unwrap()), "<b/>");

        let back = moved.with_uri(Url::parse(URI).unwrap());
        assert_eq!(read_all(back.open_stream().unwrap()), "<a/>");
        assert_eq!(transport.requests(), [URI, other]);
    }

    #[test]
    fn uncached_derived_resource_stays_uncached() {
        let transport = Arc::new(MockTransport::new().respond(URI, "<a/>"));
        let remote = RemoteResource::new(Url::parse("http://example.org/").unwrap(), transport.clone());
        let moved = remote.with_uri(Url::parse(URI).unwrap());
        assert!(!moved.is_cached());
        read_all(moved.open_stream().unwrap());
        read_all(moved.open_stream().unwrap());
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn text_and_stream_share_the_cached_body() {
        let transport = Arc::new(MockTransport::new().respond(URI, "{\"links\": []}"));
        let remote = RemoteResource::new(Url::parse(URI).unwrap(), transport.clone()).to_cached();
        assert_eq!(remote.read_text().unwrap(), "{\"links\": []}");
        assert_eq!(read_all(remote.open_stream().unwrap()), "{\"links\": []}");
        assert_eq!(transport.requests(), [URI]);
    }

    #[test]
    fn read_text_rejects_invalid_utf8() {
        let transport = Arc::new(MockTransport::new().respond(URI, vec![0xff, 0xfe, 0x00]));
        let remote = RemoteResource::new(Url::parse(URI).unwrap(), transport);
        assert!(matches!(
            remote.read_text(),
            Err(TransportError::Encoding { ref uri }) if uri == URI
        ));
    }

    #[test]
    fn resource_uri_dispatches_on_variant() {
        let transport = Arc::new(MockTransport::new());
        let resource: Resource = RemoteResource::new(Url::parse(URI).unwrap(), transport).into();
        assert_eq!(resource.uri().as_str(), URI);
    }
}

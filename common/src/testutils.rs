//! Test doubles: an in-memory FTP server and a scratch local tree

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use chrono::{DateTime, TimeZone, Utc};
use tokio::io::AsyncWrite;

use crate::config::{self, EndpointOverrides};
use crate::entry;
use crate::error::{Error, FILE_UNAVAILABLE, ProtocolError};
use crate::transport::{ReadChannel, RequestOptions, Transport, UploadChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Upload,
    Download,
    MakeDirectory,
    Delete,
}

#[derive(Debug, Clone)]
enum Node {
    Directory { modified: DateTime<Utc> },
    File { data: Vec<u8>, modified: DateTime<Utc> },
}

#[derive(Debug, Default)]
struct State {
    nodes: BTreeMap<String, Node>,
    failures: HashMap<(Op, String), ProtocolError>,
    requests: Vec<(Op, String)>,
    options_seen: Vec<RequestOptions>,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Date used for nodes created by tests, listings only carry day precision for old entries.
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 6, 1, 0, 0, 0).unwrap()
}

/// Anonymous binary passive requests against `ftp.example.com`.
pub fn request_options() -> RequestOptions {
    let overrides = EndpointOverrides {
        host: Some("ftp.example.com".to_string()),
        ..Default::default()
    };
    RequestOptions {
        endpoint: config::resolve_endpoint(&overrides, None, None).unwrap(),
        transfer_mode: Default::default(),
        transfer_behavior: Default::default(),
    }
}

fn unavailable(path: &str, reason: &str) -> Error {
    ProtocolError::new(FILE_UNAVAILABLE, format!("{path}: {reason}")).into()
}

fn parent(path: &str) -> String {
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(pos) => path[..pos].to_string(),
    }
}

/// FTP server double keeping its tree in memory and answering `LIST` in Unix style.
///
/// Every request is recorded, and the number of requests running at the same time is tracked
/// so tests can check concurrency bounds. Failures can be injected per operation and path.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
    latency: Option<std::time::Duration>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        let mut state = State::default();
        state.nodes.insert(
            "/".to_string(),
            Node::Directory {
                modified: fixed_time(),
            },
        );
        Self {
            state: Arc::new(Mutex::new(state)),
            latency: None,
        }
    }

    /// Hold every request for `latency` so concurrent requests overlap.
    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn add_dir(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        let path = entry::normalize_root(path);
        let mut current = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = format!("{current}/{segment}");
            state
                .nodes
                .entry(current.clone())
                .or_insert(Node::Directory {
                    modified: fixed_time(),
                });
        }
    }

    pub fn add_file(&self, path: &str, data: impl AsRef<[u8]>) {
        self.add_file_at(path, data, fixed_time());
    }

    pub fn add_file_at(&self, path: &str, data: impl AsRef<[u8]>, modified: DateTime<Utc>) {
        let path = entry::normalize_root(path);
        self.add_dir(&parent(&path));
        self.state.lock().unwrap().nodes.insert(
            path,
            Node::File {
                data: data.as_ref().to_vec(),
                modified,
            },
        );
    }

    pub fn fail(&self, op: Op, path: &str, error: ProtocolError) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((op, path.to_string()), error);
    }

    pub fn fail_listing(&self, path: &str, error: ProtocolError) {
        self.fail(Op::List, path, error);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.lock().unwrap().nodes.get(path) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().unwrap().nodes.contains_key(path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.lock().unwrap().nodes.keys().cloned().collect()
    }

    pub fn requests(&self) -> Vec<(Op, String)> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_of(&self, op: Op) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|(kind, _)| *kind == op)
            .map(|(_, path)| path)
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().unwrap().peak_in_flight
    }

    /// Options of every request received so far, in arrival order.
    pub fn options_seen(&self) -> Vec<RequestOptions> {
        self.state.lock().unwrap().options_seen.clone()
    }

    async fn begin(&self, op: Op, path: &str, options: &RequestOptions) -> Result<(), Error> {
        {
            let mut state = self.state.lock().unwrap();
            state.requests.push((op, path.to_string()));
            state.options_seen.push(options.clone());
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        }
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        match state.failures.get(&(op, path.to_string())) {
            Some(error) => Err(error.clone().into()),
            None => Ok(()),
        }
    }

    fn render(name: &str, node: &Node) -> String {
        let (kind, size, modified) = match node {
            Node::Directory { modified } => ('d', 512, modified),
            Node::File { data, modified } => ('-', data.len(), modified),
        };
        format!(
            "{kind}rw-r--r--   1 ftp      ftp      {size:>8} {} {name}",
            modified.format("%b %e  %Y")
        )
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn list_directory(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Vec<String>, Error> {
        self.begin(Op::List, path, options).await?;
        let state = self.state.lock().unwrap();
        let Some(Node::Directory { modified }) = state.nodes.get(path) else {
            return Err(unavailable(path, "No such file or directory"));
        };
        let here = Node::Directory {
            modified: *modified,
        };
        let mut lines = vec![Self::render(".", &here), Self::render("..", &here)];
        for (child, node) in &state.nodes {
            if child != path && parent(child) == path {
                let name = child.rsplit('/').next().unwrap_or(child);
                lines.push(Self::render(name, node));
            }
        }
        Ok(lines)
    }

    async fn open_upload(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Box<dyn UploadChannel>, Error> {
        self.begin(Op::Upload, path, options).await?;
        let state = self.state.lock().unwrap();
        if !matches!(state.nodes.get(&parent(path)), Some(Node::Directory { .. })) {
            return Err(unavailable(path, "No such file or directory"));
        }
        Ok(Box::new(MemoryUpload {
            path: path.to_string(),
            buffer: Vec::new(),
            state: self.state.clone(),
        }))
    }

    async fn open_download(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<ReadChannel, Error> {
        self.begin(Op::Download, path, options).await?;
        match self.state.lock().unwrap().nodes.get(path) {
            Some(Node::File { data, .. }) => Ok(Box::new(std::io::Cursor::new(data.clone()))),
            _ => Err(unavailable(path, "No such file or directory")),
        }
    }

    async fn make_directory(&self, path: &str, options: &RequestOptions) -> Result<(), Error> {
        self.begin(Op::MakeDirectory, path, options).await?;
        let mut state = self.state.lock().unwrap();
        if state.nodes.contains_key(path) {
            return Err(unavailable(path, "File exists"));
        }
        if !matches!(state.nodes.get(&parent(path)), Some(Node::Directory { .. })) {
            return Err(unavailable(path, "No such file or directory"));
        }
        state.nodes.insert(
            path.to_string(),
            Node::Directory {
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(
        &self,
        path: &str,
        is_directory: bool,
        options: &RequestOptions,
    ) -> Result<(), Error> {
        self.begin(Op::Delete, path, options).await?;
        let mut state = self.state.lock().unwrap();
        match state.nodes.get(path) {
            Some(Node::Directory { .. }) if is_directory => {
                if state.nodes.keys().any(|other| parent(other) == path && other != path) {
                    return Err(unavailable(path, "Directory not empty"));
                }
            }
            Some(Node::File { .. }) if !is_directory => {}
            _ => return Err(unavailable(path, "No such file or directory")),
        }
        state.nodes.remove(path);
        Ok(())
    }
}

struct MemoryUpload {
    path: String,
    buffer: Vec<u8>,
    state: Arc<Mutex<State>>,
}

impl AsyncWrite for MemoryUpload {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.get_mut().buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

#[async_trait::async_trait]
impl UploadChannel for MemoryUpload {
    async fn finalize(self: Box<Self>) -> Result<(), Error> {
        let MemoryUpload {
            path,
            buffer,
            state,
        } = *self;
        state.lock().unwrap().nodes.insert(
            path,
            Node::File {
                data: buffer,
                modified: Utc::now(),
            },
        );
        Ok(())
    }
}

pub async fn create_temp_dir() -> anyhow::Result<std::path::PathBuf> {
    let mut idx = 0;
    loop {
        let tmp_dir = std::env::temp_dir().join(format!("ftpsync_test{}", &idx));
        if let Err(error) = tokio::fs::create_dir(&tmp_dir).await {
            match error.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    idx += 1;
                }
                _ => return Err(error.into()),
            }
        } else {
            return Ok(tmp_dir);
        }
    }
}

pub async fn setup_test_dir() -> anyhow::Result<std::path::PathBuf> {
    // create a temporary directory
    let tmp_dir = create_temp_dir().await?;
    // site
    // |- .htaccess
    // |- index.html
    // |- assets
    //    |- main.css
    //    |- img
    //       |- logo.png
    let site = tmp_dir.join("site");
    tokio::fs::create_dir(&site).await?;
    tokio::fs::write(site.join(".htaccess"), "Options -Indexes").await?;
    tokio::fs::write(site.join("index.html"), "<html></html>").await?;
    let assets = site.join("assets");
    tokio::fs::create_dir(&assets).await?;
    tokio::fs::write(assets.join("main.css"), "body {}").await?;
    let img = assets.join("img");
    tokio::fs::create_dir(&img).await?;
    tokio::fs::write(img.join("logo.png"), vec![0x89u8; 2048]).await?;
    Ok(tmp_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing;

    #[tokio::test]
    async fn listing_round_trips_through_parser() {
        let transport = MemoryTransport::new();
        transport.add_file("/pub/README", b"hello");
        transport.add_dir("/pub/etc");
        let lines = transport
            .list_directory("/pub", &request_options())
            .await
            .unwrap();
        assert_eq!(lines.len(), 4);
        let entries = listing::parse_listing(&lines, "/pub", false).unwrap();
        assert_eq!(entries.len(), 2);
        let readme = entries.iter().find(|e| e.name() == "README").unwrap();
        assert_eq!(readme.size(), Some(5));
        assert_eq!(readme.last_modified, fixed_time());
    }

    #[tokio::test]
    async fn rmd_requires_empty_directory() {
        let transport = MemoryTransport::new();
        transport.add_file("/pub/a", b"x");
        let options = request_options();
        let err = transport.delete("/pub", true, &options).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(ref e) if e.is_file_unavailable()));
        transport.delete("/pub/a", false, &options).await.unwrap();
        transport.delete("/pub", true, &options).await.unwrap();
        assert!(!transport.exists("/pub"));
    }
}

//! Deterministic doubles for the engine's external collaborators.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::{Mutex, mpsc};

use tether_core::cluster::{
    ActiveForward, ClusterLogClient, ContainerInfo, LogSink, LogStream, PortForwardClient,
};
use tether_core::error::{Result, TetherError};
use tether_core::watch::{FsEvent, Notifier, NotifierChannels, NotifierFactory, NotifyError};
use tether_model::WatchName;

/// Poll until `check` passes or the deadline expires. Works under the
/// paused test clock, where sleeping auto-advances time.
pub async fn wait_until<F>(deadline: Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    let started = tokio::time::Instant::now();
    loop {
        if check() {
            return;
        }
        if started.elapsed() > deadline {
            panic!("condition not met within {deadline:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// One fake notifier created through [`FakeNotifierFactory`].
#[derive(Clone)]
pub struct FakeNotifierHandle {
    pub paths: Vec<PathBuf>,
    events: mpsc::Sender<FsEvent>,
    errors: mpsc::Sender<NotifyError>,
    closed: Arc<AtomicBool>,
}

impl FakeNotifierHandle {
    pub async fn emit(&self, path: &str) {
        self.events
            .send(FsEvent { path: path.into() })
            .await
            .expect("worker dropped event channel");
    }

    pub async fn emit_error(&self, message: &str, overflow: bool) {
        self.errors
            .send(NotifyError {
                message: message.to_owned(),
                overflow,
            })
            .await
            .expect("worker dropped error channel");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Records every notifier the engine creates and exposes injection handles.
#[derive(Default)]
pub struct FakeNotifierFactory {
    started: Arc<StdMutex<Vec<FakeNotifierHandle>>>,
}

impl FakeNotifierFactory {
    pub fn started(&self) -> Vec<FakeNotifierHandle> {
        self.started.lock().unwrap().clone()
    }

    pub fn latest(&self) -> FakeNotifierHandle {
        self.started
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no notifier started yet")
    }
}

impl NotifierFactory for FakeNotifierFactory {
    fn make(&self, paths: Vec<PathBuf>) -> Result<Box<dyn Notifier>> {
        Ok(Box::new(FakeNotifier {
            paths,
            registry: Arc::clone(&self.started),
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

struct FakeNotifier {
    paths: Vec<PathBuf>,
    registry: Arc<StdMutex<Vec<FakeNotifierHandle>>>,
    closed: Arc<AtomicBool>,
}

impl Notifier for FakeNotifier {
    fn start(&mut self) -> Result<NotifierChannels> {
        let (event_tx, events) = mpsc::channel(64);
        let (error_tx, errors) = mpsc::channel(8);
        self.registry.lock().unwrap().push(FakeNotifierHandle {
            paths: self.paths.clone(),
            events: event_tx,
            errors: error_tx,
            closed: Arc::clone(&self.closed),
        });
        Ok(NotifierChannels { events, errors })
    }

    fn close(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// A recorded `container_logs` call.
#[derive(Debug, Clone)]
pub struct OpenedLog {
    pub container: String,
    pub since: Option<DateTime<Utc>>,
}

/// Fake cluster client serving preset containers and scriptable log
/// streams.
///
/// Each opened stream is a duplex pipe; the write half is retained so tests
/// can push more bytes or drop it to signal EOF.
#[derive(Default)]
pub struct FakeLogClient {
    containers: StdMutex<Vec<ContainerInfo>>,
    /// Content written immediately when a container's stream opens.
    initial_content: StdMutex<HashMap<String, Vec<u8>>>,
    /// Containers whose streams close right after the initial content.
    close_after_content: StdMutex<Vec<String>>,
    opened: StdMutex<Vec<OpenedLog>>,
    writers: Mutex<Vec<(String, DuplexStream)>>,
    pod_errors_remaining: AtomicUsize,
}

impl FakeLogClient {
    pub fn set_containers(&self, containers: Vec<ContainerInfo>) {
        *self.containers.lock().unwrap() = containers;
    }

    pub fn set_initial_content(&self, container: &str, content: &[u8]) {
        self.initial_content
            .lock()
            .unwrap()
            .insert(container.to_owned(), content.to_vec());
    }

    pub fn close_after_content(&self, container: &str) {
        self.close_after_content
            .lock()
            .unwrap()
            .push(container.to_owned());
    }

    pub fn fail_pod_lookups(&self, times: usize) {
        self.pod_errors_remaining.store(times, Ordering::SeqCst);
    }

    pub fn opened(&self) -> Vec<OpenedLog> {
        self.opened.lock().unwrap().clone()
    }

    /// Push more bytes into the most recent stream for a container.
    pub async fn push(&self, container: &str, bytes: &[u8]) {
        let mut writers = self.writers.lock().await;
        let writer = writers
            .iter_mut()
            .rev()
            .find(|(name, _)| name == container)
            .map(|(_, writer)| writer)
            .expect("no open stream for container");
        writer.write_all(bytes).await.expect("push into stream");
        writer.flush().await.expect("flush stream");
    }
}

#[async_trait]
impl ClusterLogClient for FakeLogClient {
    async fn pod_containers(&self, pod: &str, _namespace: &str) -> Result<Vec<ContainerInfo>> {
        if self
            .pod_errors_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TetherError::Internal(format!("pod {pod} not in cache")));
        }
        Ok(self.containers.lock().unwrap().clone())
    }

    async fn container_logs(
        &self,
        _pod: &str,
        container: &str,
        _namespace: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<LogStream> {
        let (mut writer, reader) = tokio::io::duplex(4096);

        let initial = self.initial_content.lock().unwrap().get(container).cloned();
        if let Some(content) = initial {
            writer.write_all(&content).await.expect("write preset content");
        }

        self.opened.lock().unwrap().push(OpenedLog {
            container: container.to_owned(),
            since,
        });

        let closes = self
            .close_after_content
            .lock()
            .unwrap()
            .iter()
            .any(|name| name == container);
        if !closes {
            self.writers
                .lock()
                .await
                .push((container.to_owned(), writer));
        }

        Ok(Box::new(reader))
    }
}

/// Log sink collecting bytes per (watch, container).
#[derive(Default)]
pub struct CollectingSink {
    chunks: StdMutex<HashMap<(String, String), Vec<u8>>>,
}

impl CollectingSink {
    pub fn contents(&self, watch: &str, container: &str) -> Vec<u8> {
        self.chunks
            .lock()
            .unwrap()
            .get(&(watch.to_owned(), container.to_owned()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LogSink for CollectingSink {
    async fn append(&self, watch: &WatchName, container: &str, chunk: &[u8]) -> Result<()> {
        self.chunks
            .lock()
            .unwrap()
            .entry((watch.to_string(), container.to_owned()))
            .or_default()
            .extend_from_slice(chunk);
        Ok(())
    }
}

/// Fake forwarder factory with scriptable failure behaviour.
#[derive(Default)]
pub struct FakeForwardClient {
    pub attempts: AtomicUsize,
    /// Attempts up to this count fail immediately; later ones hold the
    /// tunnel open until cancelled.
    pub fail_first: AtomicUsize,
    created: StdMutex<Vec<(u16, u16)>>,
}

impl FakeForwardClient {
    pub fn fail_first(&self, count: usize) {
        self.fail_first.store(count, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<(u16, u16)> {
        self.created.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortForwardClient for FakeForwardClient {
    async fn create_forwarder(
        &self,
        _pod: &str,
        _namespace: &str,
        forward: &tether_model::Forward,
    ) -> Result<Box<dyn ActiveForward>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.created
            .lock()
            .unwrap()
            .push((forward.local_port, forward.container_port));
        let fails = attempt <= self.fail_first.load(Ordering::SeqCst);
        Ok(Box::new(FakeForward { fails }))
    }
}

struct FakeForward {
    fails: bool,
}

#[async_trait]
impl ActiveForward for FakeForward {
    async fn forward_ports(&mut self) -> Result<()> {
        if self.fails {
            return Err(TetherError::Internal("connection refused".into()));
        }
        // A healthy tunnel blocks until the worker is cancelled.
        futures::future::pending::<()>().await;
        Ok(())
    }
}

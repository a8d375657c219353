//! Pod log stream workers.
//!
//! One worker per stream identity. The worker introspects the pod, filters
//! containers through the spec's only/ignore lists, and keeps one tail per
//! selected container as a child task, so a crashed container restarts its
//! own tail without disturbing the rest of the stream. Each tail copies
//! bytes to the log sink through a cancel-safe reader while a health-check
//! timer watches for stalls.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::sync::{Mutex, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::info;

use tether_model::{PodLogStreamSpec, PodLogStreamStatus, WatchKind, WatchName, WatchStatus};

use crate::backoff::Backoff;
use crate::cluster::{ClusterLogClient, ContainerInfo, ContainerState, LogSink, LogStream};
use crate::config::{EngineConfig, LogStreamConfig};
use crate::error::TetherError;
use crate::status::StatusPublisher;
use crate::worker::{Lifecycle, Watermark, WorkerHandle, WorkerState, recv_watermark};

pub mod reader;

pub use reader::{CancelSafeReader, ReadClock};

pub(crate) struct LogStreamParams {
    pub name: WatchName,
    pub spec: PodLogStreamSpec,
    pub client: Arc<dyn ClusterLogClient>,
    pub sink: Arc<dyn LogSink>,
    pub publisher: Arc<StatusPublisher>,
    pub config: EngineConfig,
    pub initial_status: PodLogStreamStatus,
    pub resume: Option<oneshot::Receiver<Watermark>>,
}

pub(crate) fn spawn_log_stream(
    params: LogStreamParams,
    parent: &CancellationToken,
) -> WorkerHandle {
    let cancel = parent.child_token();
    let (handoff_tx, handoff_rx) = oneshot::channel();
    let task = tokio::spawn(run_log_stream(params, cancel.clone(), handoff_tx));
    WorkerHandle::new(cancel, task, handoff_rx)
}

/// Stream-level status shared between the worker and its container tails.
struct SharedStatus {
    name: WatchName,
    publisher: Arc<StatusPublisher>,
    status: Mutex<PodLogStreamStatus>,
}

impl SharedStatus {
    async fn mutate(&self, mutate: impl FnOnce(&mut PodLogStreamStatus)) {
        let mut status = self.status.lock().await;
        mutate(&mut status);
    }

    async fn publish(&self) {
        let snapshot = self.status.lock().await.clone();
        self.publisher
            .publish(&self.name, WatchStatus::PodLogStream(snapshot))
            .await;
    }
}

/// Highest read position observed across all tails, handed to a successor.
#[derive(Clone, Default)]
struct WatermarkSlot(Arc<StdMutex<Option<DateTime<Utc>>>>);

impl WatermarkSlot {
    fn advance(&self, mark: DateTime<Utc>) {
        let mut slot = self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_none_or(|current| current < mark) {
            *slot = Some(mark);
        }
    }

    fn get(&self) -> Option<DateTime<Utc>> {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run_log_stream(
    params: LogStreamParams,
    cancel: CancellationToken,
    handoff_tx: oneshot::Sender<Watermark>,
) {
    let LogStreamParams {
        name,
        spec,
        client,
        sink,
        publisher,
        config,
        initial_status,
        resume,
    } = params;

    let mut lifecycle = Lifecycle::new(name.clone(), WatchKind::PodLogStream);

    // A successor resumes from wherever its predecessor stopped reading,
    // bounded below by the spec's own since-time.
    let resume_mark = recv_watermark(resume).await;
    let since = match (spec.since_time, resume_mark) {
        (Some(configured), Some(inherited)) => Some(configured.max(inherited)),
        (time, mark) => time.or(mark),
    };

    let shared = Arc::new(SharedStatus {
        name: name.clone(),
        publisher,
        status: Mutex::new(initial_status.clone()),
    });
    let watermark = WatermarkSlot::default();

    // Pod introspection feeds the container filters. Failures here are
    // transient (the pod may simply not exist yet) and retried in place.
    let mut backoff = Backoff::new(config.retry);
    let containers = loop {
        match client.pod_containers(&spec.pod, &spec.namespace).await {
            Ok(containers) => break containers,
            Err(err) => {
                shared
                    .mutate(|status| status.error = format!("pod not found: {err}"))
                    .await;
                shared.publish().await;
                tokio::select! {
                    _ = cancel.cancelled() => {
                        drain(&mut lifecycle, &shared, &watermark, since, handoff_tx).await;
                        return;
                    }
                    _ = tokio::time::sleep(backoff.next()) => {}
                }
            }
        }
    };

    let selected: Vec<ContainerInfo> = containers
        .into_iter()
        .filter(|container| spec.selects_container(&container.name))
        .collect();
    let names: Vec<String> = selected.iter().map(|c| c.name.clone()).collect();
    let prefixed = selected.len() > 1;

    shared
        .mutate(|status| {
            status.ensure_containers(&names);
            status.error.clear();
        })
        .await;
    shared.publish().await;

    lifecycle.transition(WorkerState::Running);

    let mut tails = Vec::new();
    for container in selected {
        if container.id.is_empty() || container.state == ContainerState::Waiting {
            continue;
        }
        // Terminated containers are streamed once; a sticky `terminated`
        // status means a previous worker already drained this container.
        let already_closed = initial_status
            .container_statuses
            .iter()
            .any(|cs| cs.name == container.name && cs.terminated);
        if already_closed {
            continue;
        }

        let tail = TailParams {
            watch: name.clone(),
            pod: spec.pod.clone(),
            namespace: spec.namespace.clone(),
            container,
            prefixed,
            client: Arc::clone(&client),
            sink: Arc::clone(&sink),
            shared: Arc::clone(&shared),
            config: config.clone(),
            since,
            watermark: watermark.clone(),
        };
        tails.push(tokio::spawn(tail_container(tail, cancel.child_token())));
    }

    if tails.is_empty() {
        cancel.cancelled().await;
    } else {
        for tail in tails {
            let _ = tail.await;
        }
    }

    drain(&mut lifecycle, &shared, &watermark, since, handoff_tx).await;
}

async fn drain(
    lifecycle: &mut Lifecycle,
    shared: &SharedStatus,
    watermark: &WatermarkSlot,
    since: Option<DateTime<Utc>>,
    handoff_tx: oneshot::Sender<Watermark>,
) {
    lifecycle.transition(WorkerState::Draining);
    shared
        .mutate(|status| {
            for cs in status.container_statuses.iter_mut() {
                cs.active = false;
            }
        })
        .await;
    shared.publish().await;
    let mark = watermark
        .get()
        .or(since)
        .unwrap_or_else(Utc::now);
    let _ = handoff_tx.send(mark);
    lifecycle.transition(WorkerState::Stopped);
}

struct TailParams {
    watch: WatchName,
    pod: String,
    namespace: String,
    container: ContainerInfo,
    prefixed: bool,
    client: Arc<dyn ClusterLogClient>,
    sink: Arc<dyn LogSink>,
    shared: Arc<SharedStatus>,
    config: EngineConfig,
    since: Option<DateTime<Utc>>,
    watermark: WatermarkSlot,
}

async fn tail_container(params: TailParams, cancel: CancellationToken) {
    let TailParams {
        watch,
        pod,
        namespace,
        container,
        prefixed,
        client,
        sink,
        shared,
        config,
        mut since,
        watermark,
    } = params;

    let terminated = container.state == ContainerState::Terminated;
    let mut backoff = Backoff::new(config.retry);
    let mut lifecycle = Lifecycle::new(watch.clone(), WatchKind::PodLogStream);

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let attempt_started = tokio::time::Instant::now();

        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.container_logs(&pod, &container.name, &namespace, since) => result,
        };

        match stream {
            Ok(stream) => {
                lifecycle.transition(WorkerState::Running);
                shared
                    .mutate(|status| {
                        status.mutate_container(&container.name, |cs| {
                            cs.active = true;
                            cs.error.clear();
                        });
                    })
                    .await;
                shared.publish().await;

                let outcome = copy_logs(
                    stream,
                    &watch,
                    &container.name,
                    prefixed,
                    &cancel,
                    &sink,
                    &config.log_stream,
                )
                .await;

                match outcome {
                    CopyOutcome::Cancelled => break,
                    CopyOutcome::Stalled { resume_at } => {
                        // No bytes for a full health-check interval: tear
                        // down the stream and reconnect just past the last
                        // read so rotation loses at most the gap.
                        info!(target: "tether::logstream", watch = %watch,
                            container = %container.name,
                            "log stream stalled, reconnecting");
                        lifecycle.transition(WorkerState::Restarting);
                        watermark.advance(resume_at);
                        since = Some(resume_at);
                        continue;
                    }
                    CopyOutcome::Eof { last_read } => {
                        if let Some(mark) = last_read {
                            watermark.advance(mark);
                        }
                        if terminated {
                            shared
                                .mutate(|status| {
                                    status.mutate_container(&container.name, |cs| {
                                        cs.active = false;
                                        cs.terminated = true;
                                        cs.error.clear();
                                    });
                                })
                                .await;
                            shared.publish().await;
                            break;
                        }
                        // A running container's stream ended (dropped or
                        // rotated); reconnect from just past the last read.
                        shared
                            .mutate(|status| {
                                status.mutate_container(&container.name, |cs| cs.active = false);
                            })
                            .await;
                        shared.publish().await;
                        if let Some(mark) = last_read {
                            since = Some(mark + config.log_stream.reconnect_gap());
                        }
                    }
                    CopyOutcome::Failed(err) => {
                        shared
                            .mutate(|status| {
                                status.mutate_container(&container.name, |cs| {
                                    cs.active = false;
                                    cs.error = err.to_string();
                                });
                            })
                            .await;
                        shared.publish().await;
                    }
                }
            }
            Err(err) => {
                if cancel.is_cancelled() {
                    break;
                }
                shared
                    .mutate(|status| {
                        status.mutate_container(&container.name, |cs| {
                            cs.active = false;
                            cs.error = err.to_string();
                        });
                    })
                    .await;
                shared.publish().await;
            }
        }

        lifecycle.transition(WorkerState::Restarting);

        // An attempt that did useful work before failing resets the policy;
        // a fast failure advances it.
        if backoff.survived(attempt_started.elapsed()) {
            backoff.reset();
        } else {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff.next()) => {}
            }
        }
    }

    shared
        .mutate(|status| {
            status.mutate_container(&container.name, |cs| cs.active = false);
        })
        .await;
    shared.publish().await;
}

enum CopyOutcome {
    Cancelled,
    Stalled { resume_at: DateTime<Utc> },
    Eof { last_read: Option<DateTime<Utc>> },
    Failed(TetherError),
}

async fn copy_logs(
    stream: LogStream,
    watch: &WatchName,
    container_name: &str,
    prefixed: bool,
    cancel: &CancellationToken,
    sink: &Arc<dyn LogSink>,
    config: &LogStreamConfig,
) -> CopyOutcome {
    let read_cancel = cancel.child_token();
    let mut reader = CancelSafeReader::new(stream, read_cancel.clone());
    let clock = reader.clock();

    let interval = config.health_check_interval();
    let mut health_check =
        tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    let mut prefixer = LinePrefixer::new(prefixed.then(|| container_name.to_owned()));
    let mut buf = vec![0u8; 8192];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                read_cancel.cancel();
                return CopyOutcome::Cancelled;
            }
            _ = health_check.tick() => {
                // A tail that has never read anything is left alone; the
                // container may simply be quiet since before we attached.
                if let Some((instant, utc)) = clock.last_read()
                    && instant.elapsed() >= interval
                {
                    read_cancel.cancel();
                    return CopyOutcome::Stalled {
                        resume_at: utc + config.reconnect_gap(),
                    };
                }
            }
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    return CopyOutcome::Eof {
                        last_read: clock.last_read().map(|(_, utc)| utc),
                    };
                }
                Ok(n) => {
                    let chunk = prefixer.process(&buf[..n]);
                    if let Err(err) = sink.append(watch, container_name, &chunk).await {
                        return CopyOutcome::Failed(err);
                    }
                }
                Err(err) => return CopyOutcome::Failed(err.into()),
            }
        }
    }
}

/// Prepends `[container] ` to each line when a pod has several containers,
/// buffering line-start state across byte chunks.
struct LinePrefixer {
    prefix: Option<String>,
    at_line_start: bool,
}

impl LinePrefixer {
    fn new(container: Option<String>) -> Self {
        Self {
            prefix: container.map(|name| format!("[{name}] ")),
            at_line_start: true,
        }
    }

    fn process(&mut self, chunk: &[u8]) -> Vec<u8> {
        let Some(prefix) = &self.prefix else {
            return chunk.to_vec();
        };

        let mut out = Vec::with_capacity(chunk.len() + prefix.len());
        for &byte in chunk {
            if self.at_line_start {
                out.extend_from_slice(prefix.as_bytes());
                self.at_line_start = false;
            }
            out.push(byte);
            if byte == b'\n' {
                self.at_line_start = true;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixer_tags_each_line_across_chunks() {
        let mut prefixer = LinePrefixer::new(Some("web".to_owned()));
        let mut out = prefixer.process(b"hello ");
        out.extend(prefixer.process(b"world\npartial"));
        out.extend(prefixer.process(b" line\n"));
        assert_eq!(out, b"[web] hello world\n[web] partial line\n".to_vec());
    }

    #[test]
    fn prefixer_passes_through_when_unambiguous() {
        let mut prefixer = LinePrefixer::new(None);
        assert_eq!(prefixer.process(b"a\nb\n"), b"a\nb\n".to_vec());
    }

    #[test]
    fn watermark_slot_is_monotonic() {
        let slot = WatermarkSlot::default();
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::seconds(5);
        slot.advance(later);
        slot.advance(earlier);
        assert_eq!(slot.get(), Some(later));
    }
}

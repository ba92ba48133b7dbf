//! Shared helpers: device images and an in-process target connector.

#![allow(dead_code)]

use async_trait::async_trait;
use blocksync::progress::{callback, ProgressCallback, ProgressEvent};
use blocksync::{
    Connector, Result, RetryPolicy, TargetRequest, TargetStats, TargetSync, Transport, Verdict,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::duplex;
use tokio::task::JoinHandle;

pub const MIB: u64 = 1024 * 1024;

/// Deterministic, non-repeating-looking test content.
pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| {
            let x = (i as u64).wrapping_mul(2654435761).wrapping_add(seed as u64 * 97);
            (x >> 13) as u8 ^ seed
        })
        .collect()
}

pub fn write_image(path: &Path, data: &[u8]) {
    std::fs::write(path, data).unwrap();
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        handshake_timeout: Duration::from_secs(5),
    }
}

/// A connected transport pair backed by an in-memory pipe.
pub fn pipe() -> (Transport, Transport) {
    let (a, b) = duplex(256 * 1024);
    let (ar, aw) = tokio::io::split(a);
    let (br, bw) = tokio::io::split(b);
    (Transport::new(ar, aw), Transport::new(br, bw))
}

/// Runs a [`TargetSync`] in a tokio task for every connection.
pub struct InProcessConnector {
    /// Device the target actually opens (and advertises)
    pub device: PathBuf,
    /// Overrides the requested block size when set
    pub block_size: Option<u64>,
    /// Connections to drop immediately before serving
    pub fail_first: AtomicU32,
    pub calls: AtomicU32,
    handles: Mutex<Vec<JoinHandle<Result<TargetStats>>>>,
}

impl InProcessConnector {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            block_size: None,
            fail_first: AtomicU32::new(0),
            calls: AtomicU32::new(0),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = Some(block_size);
        self
    }

    pub fn failing_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Wait for the most recent target task.
    pub async fn join_target(&self) -> Result<TargetStats> {
        let handle = self.handles.lock().unwrap().pop().expect("no target started");
        handle.await.expect("target task panicked")
    }
}

#[async_trait]
impl Connector for InProcessConnector {
    fn describe(&self) -> String {
        format!("in-process {}", self.device.display())
    }

    async fn connect(&self, request: &TargetRequest) -> Result<Transport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (local, remote) = pipe();

        let pending_failures = self.fail_first.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_first.store(pending_failures - 1, Ordering::SeqCst);
            drop(remote);
            return Ok(local);
        }

        let target = TargetSync::new(
            &self.device,
            self.block_size.unwrap_or(request.block_size),
            request.digest,
        )
        .with_length(Some(request.length));

        let handle = tokio::spawn(async move {
            let mut remote = remote;
            let result = target.run(&mut remote).await;
            drop(remote);
            result
        });
        self.handles.lock().unwrap().push(handle);
        Ok(local)
    }
}

/// Target stand-in that sends fixed lines and then goes silent.
pub struct ScriptedConnector {
    pub lines: Vec<String>,
    peers: Mutex<Vec<Transport>>,
}

impl ScriptedConnector {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|s| s.to_string()).collect(),
            peers: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn describe(&self) -> String {
        "scripted target".to_string()
    }

    async fn connect(&self, _request: &TargetRequest) -> Result<Transport> {
        let (local, mut remote) = pipe();
        for line in &self.lines {
            remote.write_line(line).await?;
        }
        self.peers.lock().unwrap().push(remote);
        Ok(local)
    }
}

/// Records the verdict of every block the source processes.
pub fn verdict_recorder() -> (Arc<dyn ProgressCallback>, Arc<Mutex<Vec<(u64, Verdict)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let cb = callback(move |event| {
        if let ProgressEvent::Block { index, verdict, .. } = event {
            sink.lock().unwrap().push((index, verdict));
        }
    });
    (cb, seen)
}

pub fn diff_indices(seen: &Mutex<Vec<(u64, Verdict)>>) -> Vec<u64> {
    seen.lock()
        .unwrap()
        .iter()
        .filter(|(_, v)| *v == Verdict::Diff)
        .map(|(i, _)| *i)
        .collect()
}

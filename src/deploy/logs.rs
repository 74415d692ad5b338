use super::backend::{LogSink, LogStream};
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Replay the last `tail` lines of `path`, then follow appended lines until
/// the returned stream is dropped.
///
/// A filesystem watcher wakes the follower early; a fixed poll interval
/// covers platforms and filesystems where the watcher is silent. A file
/// that shrinks is treated as truncated and read again from the start.
pub fn follow_file(path: PathBuf, tail: usize) -> LogStream {
    let (sink, stream) = LogStream::channel(256);
    tokio::spawn(async move {
        let (wake_tx, wake_rx) = mpsc::channel::<()>(1);
        let watcher = watch(&path, wake_tx);
        if watcher.is_none() {
            debug!(path = %path.display(), "log watcher unavailable, polling only");
        }
        follow(path, tail, sink, wake_rx).await;
        drop(watcher);
    });
    stream
}

fn watch(path: &Path, wake: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<notify::Event, notify::Error>| {
            if let Ok(event) = res {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    let _ = wake.try_send(());
                }
            }
        },
        Config::default(),
    )
    .ok()?;
    watcher.watch(path, RecursiveMode::NonRecursive).ok()?;
    Some(watcher)
}

async fn follow(path: PathBuf, tail: usize, sink: LogSink, mut wake: mpsc::Receiver<()>) {
    let initial = tokio::fs::read(&path).await.unwrap_or_default();
    let mut offset = initial.len() as u64;
    let text = String::from_utf8_lossy(&initial);
    let lines: Vec<&str> = text.lines().collect();
    for line in &lines[lines.len().saturating_sub(tail)..] {
        if !sink.send((*line).to_string()).await {
            return;
        }
    }

    let mut partial = String::new();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = sink.cancelled() => break,
            _ = ticker.tick() => {}
            _ = wake.recv() => {}
        }
        let Some((chunk, next)) = read_from(&path, offset).await else {
            continue;
        };
        if next < offset {
            partial.clear();
        }
        offset = next;
        partial.push_str(&chunk);
        while let Some(end) = partial.find('\n') {
            let line: String = partial.drain(..=end).collect();
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            if !sink.send(line).await {
                return;
            }
        }
    }
    debug!(path = %path.display(), "log follower stopped");
}

/// Bytes appended since `offset`, and the new offset.
async fn read_from(path: &Path, offset: u64) -> Option<(String, u64)> {
    let mut file = tokio::fs::File::open(path).await.ok()?;
    let len = file.metadata().await.ok()?.len();
    let start = if len < offset { 0 } else { offset };
    if len == start {
        return None;
    }
    file.seek(std::io::SeekFrom::Start(start)).await.ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).await.ok()?;
    let next = start + buf.len() as u64;
    Some((String::from_utf8_lossy(&buf).into_owned(), next))
}

//! The Scryer: watch management and the event run loop.
//!
//! One OS watcher feeds one run-loop task. Translation, validation,
//! store writes and watch-set updates all happen serially on that task;
//! processed events fan out through a bounded drop-oldest channel.
//!
//! Watches are armed per directory. The OS facility reports the
//! contents of each watched directory but not the contents of
//! descendants, so every directory in a scryed tree is watched
//! individually, and the Scryer keeps the authoritative set of watched
//! paths so it can drop watches by prefix after the paths are already
//! gone from disk.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::event::{process_node_event, translate, NodeEvent};
use super::walker::{self, ScryedDirectory};
use super::ScryError;
use crate::channel;
use crate::node::NodeKind;
use crate::store::{Directory, EventKind, EventStore};

/// Capacity of the processed-event output channel.
pub const PROCESSED_CHANNEL_CAPACITY: usize = 1024;

/// Capacity of the internal raw notification channel.
const RAW_CHANNEL_CAPACITY: usize = 1024;

/// A stored directory paired with its configured selection globs.
#[derive(Clone)]
struct ScryDir {
    dir: Directory,
    config: ScryedDirectory,
}

/// The OS watcher handle plus the set of paths currently armed. The
/// stopping flag lives under the same lock so shutdown and the watch
/// hooks cannot interleave.
struct WatchSet {
    watcher: RecommendedWatcher,
    paths: BTreeSet<PathBuf>,
    stopping: bool,
}

impl WatchSet {
    /// Arm a watch on `root` and every directory below it.
    fn arm_tree(&mut self, root: &Path) {
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            match self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    debug!("watching {:?}", dir);
                    self.paths.insert(dir.clone());
                }
                Err(e) => {
                    warn!("failed to watch {:?}: {}", dir, e);
                    continue;
                }
            }
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("unable to walk dir {:?}: {}", dir, e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
                if is_dir {
                    stack.push(entry.path());
                }
            }
        }
    }

    /// Drop every watch whose path is prefix-matched by `prefix`. Works
    /// after the paths are gone from disk.
    fn disarm_prefix(&mut self, prefix: &Path) {
        let doomed: Vec<PathBuf> = self
            .paths
            .iter()
            .filter(|p| p.starts_with(prefix))
            .cloned()
            .collect();
        for path in doomed {
            let _ = self.watcher.unwatch(&path);
            self.paths.remove(&path);
            debug!("unwatched {:?}", path);
        }
    }

    fn disarm_all(&mut self) {
        let all: Vec<PathBuf> = self.paths.iter().cloned().collect();
        for path in all {
            let _ = self.watcher.unwatch(&path);
        }
        self.paths.clear();
    }
}

struct RunContext {
    top_dir: PathBuf,
    store: Arc<EventStore>,
    dirs: Vec<ScryDir>,
    watch_set: Arc<Mutex<WatchSet>>,
    out_tx: channel::Sender<NodeEvent>,
}

/// Observes configured directory trees and records validated node
/// events.
pub struct Scryer {
    top_dir: PathBuf,
    store: Arc<EventStore>,
    dirs: Vec<ScryDir>,
    watch_set: Arc<Mutex<WatchSet>>,
    stop_tx: watch::Sender<bool>,
    raw_rx: Option<mpsc::Receiver<Result<notify::Event, notify::Error>>>,
    out_tx: channel::Sender<NodeEvent>,
    out_rx: Option<channel::Receiver<NodeEvent>>,
    run_handle: Option<JoinHandle<()>>,
}

impl Scryer {
    /// Create a Scryer for every directory registered in the store and
    /// arm watches over their trees. `configs` supplies selection globs
    /// for catch-up seeding; directories without a config entry are
    /// scryed without filters.
    pub async fn init(
        top_dir: impl Into<PathBuf>,
        store: Arc<EventStore>,
        configs: Vec<ScryedDirectory>,
    ) -> Result<Scryer, ScryError> {
        let top_dir = top_dir.into();

        let (raw_tx, raw_rx) = mpsc::channel(RAW_CHANNEL_CAPACITY);
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.blocking_send(res);
            },
            NotifyConfig::default(),
        )
        .map_err(|e| ScryError::Notify(e.to_string()))?;

        let dirs: Vec<ScryDir> = store
            .list_directories()
            .await?
            .into_iter()
            .map(|dir| {
                let config = configs
                    .iter()
                    .find(|c| c.path == dir.path)
                    .cloned()
                    .unwrap_or_else(|| ScryedDirectory::new(dir.path.clone()));
                ScryDir { dir, config }
            })
            .collect();

        let mut watch_set = WatchSet {
            watcher,
            paths: BTreeSet::new(),
            stopping: false,
        };
        for sd in &dirs {
            watch_set.arm_tree(&top_dir.join(&sd.dir.path));
        }

        let (out_tx, out_rx) = channel::dropping(PROCESSED_CHANNEL_CAPACITY);
        let (stop_tx, _) = watch::channel(false);

        Ok(Scryer {
            top_dir,
            store,
            dirs,
            watch_set: Arc::new(Mutex::new(watch_set)),
            stop_tx,
            raw_rx: Some(raw_rx),
            out_tx,
            out_rx: Some(out_rx),
            run_handle: None,
        })
    }

    /// Take the processed-event receiver. Yields `None` after the first
    /// call.
    pub fn take_events(&mut self) -> Option<channel::Receiver<NodeEvent>> {
        self.out_rx.take()
    }

    /// Spawn the run loop. Calling more than once has no effect.
    pub fn start(&mut self) {
        let Some(raw_rx) = self.raw_rx.take() else {
            return;
        };
        let ctx = RunContext {
            top_dir: self.top_dir.clone(),
            store: self.store.clone(),
            dirs: self.dirs.clone(),
            watch_set: self.watch_set.clone(),
            out_tx: self.out_tx.clone(),
        };
        let stop_rx = self.stop_tx.subscribe();
        self.run_handle = Some(tokio::spawn(run_loop(ctx, raw_rx, stop_rx)));
    }

    /// Remove every watch so no new events are produced, then flag the
    /// run loop to drain and exit. Idempotent.
    pub fn stop(&self) {
        {
            let mut ws = self.watch_set.lock().expect("watch set lock poisoned");
            if ws.stopping {
                return;
            }
            ws.disarm_all();
            ws.stopping = true;
        }
        let _ = self.stop_tx.send(true);
    }

    /// Stop and wait for the run loop to exit.
    pub async fn close(&mut self) {
        self.stop();
        if let Some(handle) = self.run_handle.take() {
            if let Err(e) = handle.await {
                error!("scryer run loop failed: {}", e);
            }
        }
    }
}

async fn run_loop(
    ctx: RunContext,
    mut raw_rx: mpsc::Receiver<Result<notify::Event, notify::Error>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    if *stop_rx.borrow_and_update() {
        // stopped before the loop ever ran
        return;
    }
    loop {
        tokio::select! {
            maybe = raw_rx.recv() => match maybe {
                Some(Ok(event)) => {
                    trace!("received watcher event {:?}", event);
                    if let Err(e) = handle_raw_event(&ctx, event).await {
                        error!("store failed while handling event, scryer exiting: {}", e);
                        return;
                    }
                }
                Some(Err(e)) => {
                    error!("received watcher error: {}", e);
                }
                None => return,
            },
            _ = stop_rx.changed() => break,
        }
    }

    // watches are already gone; drain what the OS queued, then exit
    while let Ok(res) = raw_rx.try_recv() {
        match res {
            Ok(event) => {
                if let Err(e) = handle_raw_event(&ctx, event).await {
                    error!("store failed while draining events: {}", e);
                    return;
                }
            }
            Err(e) => error!("received watcher error: {}", e),
        }
    }
    info!("no more watcher events, scryer done");
}

async fn handle_raw_event(ctx: &RunContext, event: notify::Event) -> Result<(), ScryError> {
    for (kind, full_path) in translate(&event) {
        let Some((scry_dir, rel_path)) = resolve_dir(ctx, &full_path) else {
            warn!("no scryed dir for event path {:?}", full_path);
            continue;
        };
        if rel_path.is_empty() {
            // event on the scryed root itself
            continue;
        }
        match process_node_event(&ctx.store, &scry_dir.dir, kind, &full_path, &rel_path).await {
            Ok(node_event) => {
                update_watches(ctx, scry_dir, &node_event).await?;
                ctx.out_tx.send(node_event);
            }
            Err(ScryError::Unsupported(msg)) => trace!("dropping event: {}", msg),
            Err(ScryError::AlreadyTracked(msg)) => trace!("dropping event: {}", msg),
            Err(ScryError::ValidationFailed(msg)) => error!("dropping event: {}", msg),
            Err(e @ ScryError::Store(_)) => return Err(e),
            Err(e) => error!("failed to handle watcher event: {}", e),
        }
    }
    Ok(())
}

/// Keep the watch set and store aligned with directory lifecycle
/// events.
async fn update_watches(
    ctx: &RunContext,
    scry_dir: &ScryDir,
    event: &NodeEvent,
) -> Result<(), ScryError> {
    match event.kind {
        EventKind::Create => {
            if event.node_kind == Some(NodeKind::Dir) {
                {
                    let mut ws = ctx.watch_set.lock().expect("watch set lock poisoned");
                    // no point arming once shutdown has disarmed everything
                    if !ws.stopping {
                        ws.arm_tree(&event.full_path);
                    }
                }
                // a completed rename pair keeps its descendants' chains;
                // only a genuinely new subtree needs seeding
                if event.prior_path.is_none() {
                    match walker::seed_subtree(
                        &ctx.store,
                        &ctx.top_dir,
                        &scry_dir.config,
                        &scry_dir.dir,
                        &event.path,
                    )
                    .await
                    {
                        Ok(seeded) if seeded > 0 => {
                            debug!("seeded {} nodes under {:?}", seeded, event.path);
                        }
                        Ok(_) => {}
                        Err(e @ ScryError::Store(_)) => return Err(e),
                        Err(e) => error!("failed to seed new subtree {:?}: {}", event.path, e),
                    }
                }
            }
        }
        EventKind::Rename | EventKind::Remove => {
            let mut ws = ctx.watch_set.lock().expect("watch set lock poisoned");
            ws.disarm_prefix(&event.full_path);
        }
        EventKind::Write => {}
    }
    Ok(())
}

/// Find the scryed directory containing an event path and the event's
/// path relative to it.
fn resolve_dir<'a>(ctx: &'a RunContext, full_path: &Path) -> Option<(&'a ScryDir, String)> {
    let rel = full_path.strip_prefix(&ctx.top_dir).ok()?;
    for sd in &ctx.dirs {
        if let Ok(inner) = rel.strip_prefix(&sd.dir.path) {
            return Some((sd, inner.to_string_lossy().into_owned()));
        }
    }
    None
}

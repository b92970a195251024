//! Shared harness for integration tests: a scryed temp tree, filesystem
//! actions, and chain comparison against expected event sequences.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use scryd::channel::Receiver;
use scryd::node::content_hash;
use scryd::scry::{walker, NodeEvent, ScryedDirectory, Scryer};
use scryd::store::{Directory, Event, EventKind, EventStore};
use tempfile::TempDir;

pub struct Harness {
    // kept alive so the tree survives the test body
    pub tmp: TempDir,
    pub top_dir: PathBuf,
    pub store: Arc<EventStore>,
    pub dirs: Vec<Directory>,
    pub scryer: Scryer,
    pub events: Receiver<NodeEvent>,
}

impl Harness {
    pub fn path(&self, rel: &str) -> PathBuf {
        self.top_dir.join(rel)
    }

    /// Wait for at least `min_events` processed events, then keep
    /// draining until the scryer has been quiet for a while.
    pub async fn settle(&mut self, min_events: usize) -> Vec<NodeEvent> {
        let mut got = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while got.len() < min_events {
            if tokio::time::Instant::now() > deadline {
                panic!(
                    "timed out waiting for events: wanted {}, got {}: {:?}",
                    min_events,
                    got.len(),
                    got
                );
            }
            match tokio::time::timeout(Duration::from_millis(100), self.events.recv()).await {
                Ok(Some(event)) => got.push(event),
                Ok(None) => panic!("processed event channel closed"),
                Err(_) => {}
            }
        }
        loop {
            match tokio::time::timeout(Duration::from_millis(250), self.events.recv()).await {
                Ok(Some(event)) => got.push(event),
                _ => break,
            }
        }
        got
    }

    pub async fn close(&mut self) {
        self.scryer.close().await;
    }
}

/// Build a fresh temp tree with the given scryed directories, seed the
/// store from disk and start a scryer over it.
pub async fn start(scry_dirs: &[&str]) -> Harness {
    let tmp = TempDir::new().expect("failed to create temp dir");
    start_over(tmp, scry_dirs).await
}

/// Start scrying over a pre-built temp tree. The scryed directories are
/// created if missing; anything already inside them is seeded with
/// synthetic create events before the watcher starts.
pub async fn start_over(tmp: TempDir, scry_dirs: &[&str]) -> Harness {
    let top_dir = tmp.path().canonicalize().expect("failed to canonicalize");
    for rel in scry_dirs {
        std::fs::create_dir_all(top_dir.join(rel)).expect("failed to create scry dir");
    }

    let store = Arc::new(EventStore::open(&top_dir.join(".db")).expect("failed to open store"));

    let mut dirs = Vec::new();
    let mut configs = Vec::new();
    for rel in scry_dirs {
        let dir = store.add_directory(rel).await.expect("failed to add dir");
        let config = ScryedDirectory::new(*rel);
        walker::seed_directory(&store, &top_dir, &config, &dir)
            .await
            .expect("failed to seed dir");
        dirs.push(dir);
        configs.push(config);
    }

    let mut scryer = Scryer::init(top_dir.clone(), store.clone(), configs)
        .await
        .expect("failed to init scryer");
    let events = scryer.take_events().expect("events already taken");
    scryer.start();

    // give the watcher thread a moment to come up
    tokio::time::sleep(Duration::from_millis(200)).await;

    Harness {
        tmp,
        top_dir,
        store,
        dirs,
        scryer,
        events,
    }
}

// filesystem actions, mirroring what a user (or another program) does

pub fn touch(path: &Path) {
    std::fs::File::create(path).expect("touch failed");
}

/// Append to an existing file or create it, like `>>`.
pub fn write(path: &Path, content: &[u8]) {
    let mut file = if path.exists() {
        std::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .expect("open for append failed")
    } else {
        std::fs::File::create(path).expect("create failed")
    };
    file.write_all(content).expect("write failed");
}

pub fn mv(src: &Path, dst: &Path) {
    std::fs::rename(src, dst).expect("rename failed");
}

pub fn remove(path: &Path) {
    std::fs::remove_file(path).expect("remove failed");
}

pub fn mkdir_all(path: &Path) {
    std::fs::create_dir_all(path).expect("mkdir failed");
}

pub fn rmdir(path: &Path) {
    std::fs::remove_dir(path).expect("rmdir failed");
}

/// One expected event. Size and hash are only compared when a hash is
/// expected; rename/remove events never carry one.
#[derive(Debug, Clone)]
pub struct WantEvent {
    pub kind: EventKind,
    pub path: &'static str,
    pub size: u64,
    pub hash: Option<String>,
}

impl WantEvent {
    pub fn new(kind: EventKind, path: &'static str) -> WantEvent {
        WantEvent {
            kind,
            path,
            size: 0,
            hash: None,
        }
    }

    pub fn with_content(kind: EventKind, path: &'static str, content: &[u8]) -> WantEvent {
        WantEvent {
            kind,
            path,
            size: content.len() as u64,
            hash: Some(content_hash(content)),
        }
    }
}

/// Compare the chains of a directory against expectations keyed by each
/// chain's tail path. Also asserts the universal chain properties:
/// every chain starts with a create and its timestamps never decrease.
pub async fn assert_dir_chains(
    store: &EventStore,
    dir: &Directory,
    wanted: &[(&str, Vec<Vec<WantEvent>>)],
) {
    let mut got: HashMap<String, Vec<Vec<Event>>> = HashMap::new();
    for chain in store.list_chains(dir.id).await.expect("list_chains") {
        let events = store.list_events(chain.id).await.expect("list_events");
        assert!(!events.is_empty(), "chain {} has no events", chain.id);
        assert_eq!(
            events[0].kind,
            EventKind::Create,
            "chain {} does not start with a create: {:?}",
            chain.id,
            events
        );
        for pair in events.windows(2) {
            assert!(
                pair[0].timestamp <= pair[1].timestamp,
                "events out of order on chain {}: {:?}",
                chain.id,
                events
            );
        }
        let tail_path = events.last().expect("nonempty").path.clone();
        got.entry(tail_path).or_default().push(events);
    }

    let mut got_tails: Vec<&str> = got.keys().map(|s| s.as_str()).collect();
    got_tails.sort_unstable();
    let mut want_tails: Vec<&str> = wanted.iter().map(|(p, _)| *p).collect();
    want_tails.sort_unstable();
    assert_eq!(
        want_tails, got_tails,
        "chain tail paths differ for dir {:?}",
        dir.path
    );

    for (tail, want_chains) in wanted {
        let got_chains = &got[*tail];
        assert_eq!(
            want_chains.len(),
            got_chains.len(),
            "chain count differs at {:?}: got {:#?}",
            tail,
            got_chains
        );
        let mut remaining: Vec<&Vec<Event>> = got_chains.iter().collect();
        for want_chain in want_chains {
            match remaining.iter().position(|g| chain_matches(want_chain, g)) {
                Some(i) => {
                    remaining.remove(i);
                }
                None => panic!(
                    "no chain matching {:?} at tail {:?}; got {:#?}",
                    want_chain, tail, got_chains
                ),
            }
        }
    }
}

fn chain_matches(want: &[WantEvent], got: &[Event]) -> bool {
    want.len() == got.len()
        && want.iter().zip(got.iter()).all(|(w, g)| {
            let attrs_ok = match &w.hash {
                Some(h) => g.hash.as_deref() == Some(h.as_str()) && g.size == w.size,
                None => true,
            };
            w.kind == g.kind && w.path == g.path && attrs_ok
        })
}

//! End-to-end scenarios: real filesystem actions observed through the
//! OS watcher, compared against the expected per-chain event sequences.

mod common;

use common::{
    assert_dir_chains, mkdir_all, mv, remove, start, touch, write, WantEvent,
};
use scryd::store::EventKind::{Create, Remove, Rename, Write};

#[tokio::test]
async fn touch_write_rename_remove() {
    let content = b"I am Weasel!";
    let mut h = start(&["d"]).await;
    let d = h.path("d");

    touch(&d.join("a"));
    h.settle(1).await;
    write(&d.join("a"), content);
    h.settle(1).await;
    mv(&d.join("a"), &d.join("b"));
    h.settle(2).await;
    remove(&d.join("b"));
    h.settle(1).await;
    h.close().await;

    let dir = h.dirs[0].clone();
    assert_dir_chains(
        &h.store,
        &dir,
        &[(
            "b",
            vec![vec![
                WantEvent::new(Create, "a"),
                WantEvent::with_content(Write, "a", content),
                WantEvent::new(Rename, "a"),
                WantEvent::with_content(Create, "b", content),
                WantEvent::new(Remove, "b"),
            ]],
        )],
    )
    .await;

    // the arrival half of the rename pair names the departed path
    let chains = h.store.list_chains(dir.id).await.unwrap();
    assert_eq!(chains.len(), 1);
    let events = h.store.list_events(chains[0].id).await.unwrap();
    let arrival = events
        .iter()
        .find(|e| e.kind == Create && e.path == "b")
        .unwrap();
    assert_eq!(arrival.prior_path.as_deref(), Some("a"));

    // removed: unreachable by path and by inode, reachable by id
    assert!(h.store.get_chain_by_path(dir.id, "a").await.unwrap().is_none());
    assert!(h.store.get_chain_by_path(dir.id, "b").await.unwrap().is_none());
    assert!(h
        .store
        .get_chain_by_ino(chains[0].ino)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn filename_reuse_after_rename() {
    let mut h = start(&["d"]).await;
    let d = h.path("d");

    touch(&d.join("a"));
    h.settle(1).await;
    mv(&d.join("a"), &d.join("b"));
    h.settle(2).await;
    touch(&d.join("a"));
    h.settle(1).await;
    remove(&d.join("a"));
    h.settle(1).await;
    remove(&d.join("b"));
    h.settle(1).await;
    h.close().await;

    assert_dir_chains(
        &h.store,
        &h.dirs[0].clone(),
        &[
            (
                "b",
                vec![vec![
                    WantEvent::new(Create, "a"),
                    WantEvent::new(Rename, "a"),
                    WantEvent::new(Create, "b"),
                    WantEvent::new(Remove, "b"),
                ]],
            ),
            (
                "a",
                vec![vec![
                    WantEvent::new(Create, "a"),
                    WantEvent::new(Remove, "a"),
                ]],
            ),
        ],
    )
    .await;
}

#[tokio::test]
async fn name_reuse_after_remove() {
    let mut h = start(&["d"]).await;
    let d = h.path("d");

    touch(&d.join("a"));
    h.settle(1).await;
    remove(&d.join("a"));
    h.settle(1).await;
    touch(&d.join("a"));
    h.settle(1).await;
    remove(&d.join("a"));
    h.settle(1).await;
    h.close().await;

    let dir = h.dirs[0].clone();
    assert_dir_chains(
        &h.store,
        &dir,
        &[(
            "a",
            vec![
                vec![
                    WantEvent::new(Create, "a"),
                    WantEvent::new(Remove, "a"),
                ],
                vec![
                    WantEvent::new(Create, "a"),
                    WantEvent::new(Remove, "a"),
                ],
            ],
        )],
    )
    .await;

    // two distinct chains, both fully sealed
    assert!(h.store.get_chain_by_path(dir.id, "a").await.unwrap().is_none());
}

#[tokio::test]
async fn rename_onto_existing_file() {
    let mut h = start(&["d"]).await;
    let d = h.path("d");

    touch(&d.join("a"));
    h.settle(1).await;
    touch(&d.join("b"));
    h.settle(1).await;
    mv(&d.join("b"), &d.join("a"));
    h.settle(2).await;
    remove(&d.join("a"));
    h.settle(1).await;
    h.close().await;

    assert_dir_chains(
        &h.store,
        &h.dirs[0].clone(),
        &[(
            "a",
            vec![
                vec![WantEvent::new(Create, "a")],
                vec![
                    WantEvent::new(Create, "b"),
                    WantEvent::new(Rename, "b"),
                    WantEvent::new(Create, "a"),
                    WantEvent::new(Remove, "a"),
                ],
            ],
        )],
    )
    .await;
}

#[tokio::test]
async fn populated_subtree_moved_into_scryed_root() {
    let mut h = start(&["d"]).await;

    // build a subtree outside the scryed directory; no events fire
    let src = h.path("src");
    mkdir_all(&src.join("s1"));
    touch(&src.join("s1").join("a"));

    mv(&src.join("s1"), &h.path("d").join("s1"));
    h.settle(1).await;
    h.close().await;

    // one OS event arrived for s1; the walker synthesised s1/a
    assert_dir_chains(
        &h.store,
        &h.dirs[0].clone(),
        &[
            ("s1", vec![vec![WantEvent::new(Create, "s1")]]),
            ("s1/a", vec![vec![WantEvent::new(Create, "s1/a")]]),
        ],
    )
    .await;
}

#[tokio::test]
async fn nested_directory_creation() {
    let mut h = start(&["d"]).await;

    mkdir_all(&h.path("d").join("s1/s2/s3"));
    h.settle(1).await;
    h.close().await;

    assert_dir_chains(
        &h.store,
        &h.dirs[0].clone(),
        &[
            ("s1", vec![vec![WantEvent::new(Create, "s1")]]),
            ("s1/s2", vec![vec![WantEvent::new(Create, "s1/s2")]]),
            ("s1/s2/s3", vec![vec![WantEvent::new(Create, "s1/s2/s3")]]),
        ],
    )
    .await;
}

#[tokio::test]
async fn moved_directory_keeps_descendants_resolvable() {
    let mut h = start(&["d"]).await;
    let d = h.path("d");

    mkdir_all(&d.join("s1"));
    h.settle(1).await;
    mkdir_all(&d.join("s2"));
    h.settle(1).await;
    mkdir_all(&d.join("s1/s3"));
    h.settle(1).await;
    touch(&d.join("s1/s3/a"));
    h.settle(1).await;
    mkdir_all(&d.join("s2/s4"));
    h.settle(1).await;

    // move the populated subtree, then move the file back out of it
    mv(&d.join("s1/s3"), &d.join("s2/s4/s3"));
    h.settle(2).await;
    mv(&d.join("s2/s4/s3/a"), &d.join("s1/a"));
    h.settle(2).await;
    h.close().await;

    let dir = h.dirs[0].clone();
    assert_dir_chains(
        &h.store,
        &dir,
        &[
            ("s1", vec![vec![WantEvent::new(Create, "s1")]]),
            ("s2", vec![vec![WantEvent::new(Create, "s2")]]),
            ("s2/s4", vec![vec![WantEvent::new(Create, "s2/s4")]]),
            (
                "s2/s4/s3",
                vec![vec![
                    WantEvent::new(Create, "s1/s3"),
                    WantEvent::new(Rename, "s1/s3"),
                    WantEvent::new(Create, "s2/s4/s3"),
                ]],
            ),
            (
                "s1/a",
                vec![vec![
                    WantEvent::new(Create, "s1/s3/a"),
                    WantEvent::new(Rename, "s2/s4/s3/a"),
                    WantEvent::new(Create, "s1/a"),
                ]],
            ),
        ],
    )
    .await;

    // the chain that started at s1/s3/a is now the chain at s1/a,
    // having passed through s2/s4/s3/a purely via its ancestors' moves
    let file_chain = h
        .store
        .get_chain_by_path(dir.id, "s1/a")
        .await
        .unwrap()
        .expect("s1/a should resolve");
    let events = h.store.list_events(file_chain.id).await.unwrap();
    assert_eq!(events[0].path, "s1/s3/a");
    assert_eq!(events[1].path, "s2/s4/s3/a");
    assert_eq!(events[2].prior_path.as_deref(), Some("s2/s4/s3/a"));
    assert!(h
        .store
        .get_chain_by_path(dir.id, "s2/s4/s3/a")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn remove_directory_with_contents() {
    let mut h = start(&["d"]).await;
    let d = h.path("d");

    mkdir_all(&d.join("s1"));
    h.settle(1).await;
    touch(&d.join("s1/a"));
    h.settle(1).await;
    remove(&d.join("s1/a"));
    h.settle(1).await;
    common::rmdir(&d.join("s1"));
    h.settle(1).await;
    h.close().await;

    let dir = h.dirs[0].clone();
    assert_dir_chains(
        &h.store,
        &dir,
        &[
            (
                "s1",
                vec![vec![
                    WantEvent::new(Create, "s1"),
                    WantEvent::new(Remove, "s1"),
                ]],
            ),
            (
                "s1/a",
                vec![vec![
                    WantEvent::new(Create, "s1/a"),
                    WantEvent::new(Remove, "s1/a"),
                ]],
            ),
        ],
    )
    .await;
    assert!(h.store.get_chain_by_path(dir.id, "s1").await.unwrap().is_none());
}

#[tokio::test]
async fn bootstrap_seeds_existing_tree() {
    // files that exist before the scryer starts get synthetic creates
    let tmp = tempfile::TempDir::new().unwrap();
    let top = tmp.path().canonicalize().unwrap();
    std::fs::create_dir_all(top.join("d/sub")).unwrap();
    std::fs::write(top.join("d/f1.txt"), b"i am f1").unwrap();
    std::fs::write(top.join("d/sub/f2.txt"), b"i am f2").unwrap();

    let mut h = common::start_over(tmp, &["d"]).await;
    h.close().await;

    assert_dir_chains(
        &h.store,
        &h.dirs[0].clone(),
        &[
            (
                "f1.txt",
                vec![vec![WantEvent::with_content(Create, "f1.txt", b"i am f1")]],
            ),
            ("sub", vec![vec![WantEvent::new(Create, "sub")]]),
            (
                "sub/f2.txt",
                vec![vec![WantEvent::with_content(
                    Create,
                    "sub/f2.txt",
                    b"i am f2",
                )]],
            ),
        ],
    )
    .await;
}

#[tokio::test]
async fn existing_file_removed_after_start() {
    let mut h = {
        let tmp = tempfile::TempDir::new().unwrap();
        let top = tmp.path().canonicalize().unwrap();
        std::fs::create_dir_all(top.join("d")).unwrap();
        std::fs::write(top.join("d/a"), b"i am a").unwrap();
        common::start_over(tmp, &["d"]).await
    };

    remove(&h.path("d").join("a"));
    h.settle(1).await;
    h.close().await;

    assert_dir_chains(
        &h.store,
        &h.dirs[0].clone(),
        &[(
            "a",
            vec![vec![
                WantEvent::with_content(Create, "a", b"i am a"),
                WantEvent::new(Remove, "a"),
            ]],
        )],
    )
    .await;
}

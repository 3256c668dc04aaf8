use std::time::Duration;

use reviewtree_core::{CollectionsClient, Scope};
use reviewtree_sync::store::tree::{NodeKind, TreeNode};
use reviewtree_sync::{ErrorKind, Outcome, ReconcileReport, StoreError, SyncCoordinator};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TREES: &str = "/v1/collections/reviewTrees/records";
const FILES: &str = "/v1/collections/reviewFiles/records";

fn src_tree() -> Value {
    json!({
        "id": "root",
        "name": "root",
        "type": "folder",
        "children": [
            { "name": "src", "type": "folder", "children": [
                { "name": "a.js", "type": "file" },
                { "name": "lib", "type": "folder", "children": [
                    { "name": "b.js", "type": "file" }
                ] }
            ] },
            { "name": "README.md", "type": "file" }
        ]
    })
}

async fn mount_tree(server: &MockServer, tree: Value) {
    Mock::given(method("GET"))
        .and(path(TREES))
        .and(query_param("projectId", "p1"))
        .and(query_param("versionId", "v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "key": "tree-1",
            "projectId": "p1",
            "versionId": "v1",
            "data": tree
        }])))
        .mount(server)
        .await;
}

async fn mount_tree_put(server: &MockServer) {
    Mock::given(method("PUT"))
        .and(path(format!("{TREES}/tree-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "key": "tree-1" })))
        .mount(server)
        .await;
}

async fn mount_files(server: &MockServer, records: Value) {
    Mock::given(method("GET"))
        .and(path(FILES))
        .respond_with(ResponseTemplate::new(200).set_body_json(records))
        .mount(server)
        .await;
}

async fn loaded(server: &MockServer) -> SyncCoordinator {
    let client = CollectionsClient::new(&server.uri()).unwrap();
    let coordinator = SyncCoordinator::new(client, Scope::new("p1", "v1"));
    coordinator.load_tree().await.unwrap();
    coordinator
}

fn collect_paths(node: &TreeNode, out: &mut Vec<String>) {
    for child in node.children.iter().flatten() {
        out.push(child.path.clone());
        collect_paths(child, out);
    }
}

async fn tree_paths(coordinator: &SyncCoordinator) -> Vec<String> {
    let mut out = Vec::new();
    collect_paths(&coordinator.tree_snapshot().await, &mut out);
    out
}

#[tokio::test]
async fn created_file_path_extends_created_folder() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    mount_tree_put(&server).await;
    Mock::given(method("POST"))
        .and(path(FILES))
        .and(body_partial_json(json!({
            "projectId": "p1",
            "versionId": "v1",
            "fileId": "src/util/fmt.js",
            "path": "src/util/fmt.js",
            "name": "fmt.js",
            "content": "export {}"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "k-new" })))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    let folder = coordinator
        .create_folder(Some("src"), "util")
        .await
        .unwrap()
        .applied()
        .unwrap();
    let created = coordinator
        .create_file(Some(folder.as_str()), "fmt.js", "export {}")
        .await
        .unwrap()
        .applied()
        .unwrap();

    assert_eq!(folder, "src/util");
    assert_eq!(created.path, "src/util/fmt.js");
    assert!(created.content_synced);
    let record = coordinator.content_of("src/util/fmt.js").await.unwrap();
    assert_eq!(record.key.as_deref(), Some("k-new"));
    assert!(tree_paths(&coordinator).await.contains(&created.path));
}

#[tokio::test]
async fn created_file_content_round_trips_through_lazy_load() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    mount_tree_put(&server).await;
    Mock::given(method("POST"))
        .and(path(FILES))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "k1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .and(query_param("fileId", "a.js"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "key": "k1",
            "data": { "fileId": "a.js", "path": "a.js", "content": "console.log(1)" }
        }])))
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    coordinator
        .create_file(None, "a.js", "console.log(1)")
        .await
        .unwrap();
    let record = coordinator
        .load_file_by_id("a.js")
        .await
        .unwrap()
        .applied()
        .unwrap()
        .unwrap();

    assert_eq!(record.content, "console.log(1)");
    assert_eq!(record.key.as_deref(), Some("k1"));
}

#[tokio::test]
async fn lazy_load_replaces_placeholder_and_falls_back_to_full_scan() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .and(query_param("fileId", "src/a.js"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{ "key": "k1", "path": "/src/a.js", "code": ["let a;", "a = 1;"] }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .and(query_param("fileId", "lib/b.js"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    mount_files(
        &server,
        json!([
            { "key": "k1", "path": "src/a.js", "content": "" },
            { "key": "k2", "name": "b.js", "fileId": "src/lib/b.js", "text": "b" }
        ]),
    )
    .await;

    let coordinator = loaded(&server).await;
    assert_eq!(coordinator.load_files().await.unwrap(), 2);
    assert_eq!(coordinator.content_of("src/a.js").await.unwrap().content, "");

    let fresh = coordinator
        .load_file_by_id("src/a.js")
        .await
        .unwrap()
        .applied()
        .unwrap()
        .unwrap();
    assert_eq!(fresh.content, "let a;\na = 1;");
    assert_eq!(
        coordinator.content_of("src/a.js").await.unwrap().content,
        "let a;\na = 1;"
    );

    let fallback = coordinator
        .load_file_by_id("lib/b.js")
        .await
        .unwrap()
        .applied()
        .unwrap()
        .unwrap();
    assert_eq!(fallback.path, "src/lib/b.js");
    assert_eq!(fallback.content, "b");
}

#[tokio::test]
async fn rename_moves_subtree_and_content_records() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    mount_tree_put(&server).await;
    mount_files(
        &server,
        json!([
            { "key": "k1", "path": "src/a.js", "content": "a" },
            { "key": "k2", "path": "src/lib/b.js", "content": "b" }
        ]),
    )
    .await;
    Mock::given(method("PUT"))
        .and(path(format!("{FILES}/k1")))
        .and(body_partial_json(json!({ "path": "source/a.js", "content": "a" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{FILES}/k2")))
        .and(body_partial_json(json!({ "path": "source/lib/b.js" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    coordinator.load_files().await.unwrap();
    let renamed = coordinator
        .rename_item("src", "source")
        .await
        .unwrap()
        .applied()
        .unwrap();

    assert_eq!(renamed.old_path, "src");
    assert_eq!(renamed.new_path, "source");
    assert_eq!(renamed.records_moved, 2);
    let paths = tree_paths(&coordinator).await;
    assert!(paths.contains(&"source".to_string()));
    assert!(paths.contains(&"source/a.js".to_string()));
    assert!(paths.iter().all(|p| p != "src" && !p.starts_with("src/")));
    assert_eq!(
        coordinator.content_of("source/lib/b.js").await.unwrap().key.as_deref(),
        Some("k2")
    );
}

#[tokio::test]
async fn delete_cascades_to_tree_and_content_records() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    mount_tree_put(&server).await;
    mount_files(
        &server,
        json!([
            { "key": "k1", "path": "src/a.js", "content": "a" },
            { "path": "src/lib/b.js", "content": "b" },
            { "key": "k3", "path": "README.md", "content": "readme" }
        ]),
    )
    .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{FILES}/k1")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(FILES))
        .and(query_param("fileId", "src/lib/b.js"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    coordinator.load_files().await.unwrap();
    let deleted = coordinator
        .delete_item("src")
        .await
        .unwrap()
        .applied()
        .unwrap();

    assert_eq!(deleted.kind, NodeKind::Folder);
    assert_eq!(deleted.records_removed, 2);
    assert_eq!(deleted.records_failed, 0);
    assert_eq!(tree_paths(&coordinator).await, vec!["README.md".to_string()]);
    assert!(coordinator.content_of("src/a.js").await.is_none());
    assert!(coordinator.content_of("README.md").await.is_some());
}

#[tokio::test]
async fn deleting_uncached_file_deletes_by_file_id() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    mount_tree_put(&server).await;
    Mock::given(method("DELETE"))
        .and(path(FILES))
        .and(query_param("fileId", "README.md"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    let deleted = coordinator
        .delete_item("README.md")
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(deleted.records_removed, 1);
}

#[tokio::test]
async fn content_sync_failure_keeps_tree_change() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    mount_tree_put(&server).await;
    Mock::given(method("POST"))
        .and(path(FILES))
        .respond_with(ResponseTemplate::new(500).set_body_string("down"))
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    let created = coordinator
        .create_file(Some("src"), "c.js", "c")
        .await
        .unwrap()
        .applied()
        .unwrap();

    assert!(!created.content_synced);
    assert!(tree_paths(&coordinator).await.contains(&"src/c.js".to_string()));
    let record = coordinator.content_of("src/c.js").await.unwrap();
    assert_eq!(record.key, None);
    assert_eq!(record.content, "c");
}

#[tokio::test]
async fn tree_persist_failure_surfaces_as_api_error() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    Mock::given(method("PUT"))
        .and(path(format!("{TREES}/tree-1")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(FILES))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "unused" })))
        .expect(0)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    let err = coordinator
        .create_file(None, "x.js", "")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Api);
    assert!(matches!(err, StoreError::Api(_)));
}

#[tokio::test]
async fn validation_errors_leave_everything_untouched() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    let before = coordinator.tree_snapshot().await;

    let duplicate = coordinator
        .create_file(Some("src"), "a.js", "")
        .await
        .unwrap_err();
    assert_eq!(duplicate.kind(), ErrorKind::Validation);
    let not_folder = coordinator
        .create_folder(Some("README.md"), "x")
        .await
        .unwrap_err();
    assert_eq!(not_folder.kind(), ErrorKind::Validation);
    let root = coordinator.delete_item("").await.unwrap_err();
    assert_eq!(root.kind(), ErrorKind::Validation);
    let missing = coordinator.rename_item("nope", "x").await.unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    assert_eq!(coordinator.tree_snapshot().await, before);
}

#[tokio::test]
async fn missing_tree_document_is_a_load_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TREES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = CollectionsClient::new(&server.uri()).unwrap();
    let coordinator = SyncCoordinator::new(client, Scope::new("p1", "v1"));
    let err = coordinator.load_tree().await.unwrap_err();
    assert!(matches!(err, StoreError::TreeDocument(_)));

    let err = coordinator.create_folder(None, "src").await.unwrap_err();
    assert!(matches!(err, StoreError::MissingDocumentKey));
}

#[tokio::test]
async fn newer_selection_supersedes_older_one() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .and(query_param("fileId", "src/a.js"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "key": "k1", "path": "src/a.js", "content": "a" }]))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .and(query_param("fileId", "README.md"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "key": "k3", "path": "README.md", "content": "r" }])),
        )
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    let (first, second) = tokio::join!(coordinator.load_file_by_id("src/a.js"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.load_file_by_id("README.md").await
    });

    assert_eq!(first.unwrap(), Outcome::Superseded);
    let second = second.unwrap().applied().unwrap().unwrap();
    assert_eq!(second.content, "r");
}

#[tokio::test]
async fn save_file_updates_existing_record() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    mount_files(
        &server,
        json!([{ "key": "k1", "path": "src/a.js", "content": "old" }]),
    )
    .await;
    Mock::given(method("PUT"))
        .and(path(format!("{FILES}/k1")))
        .and(body_partial_json(json!({ "content": "new", "fileId": "src/a.js" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    coordinator.load_files().await.unwrap();
    let saved = coordinator
        .save_file("src/a.js", "new")
        .await
        .unwrap()
        .applied()
        .unwrap();

    assert_eq!(saved.content, "new");
    assert_eq!(coordinator.content_of("src/a.js").await.unwrap().content, "new");
    let err = coordinator.save_file("src", "x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn reconcile_recreates_missing_and_drops_orphaned_records() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    mount_files(
        &server,
        json!([
            { "key": "k1", "path": "src/a.js", "content": "a" },
            { "key": "k2", "path": "src/lib/b.js", "content": "b" },
            { "key": "k9", "path": "old/x.js", "content": "x" }
        ]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path(FILES))
        .and(body_partial_json(json!({ "path": "README.md", "content": "" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "k-readme" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("{FILES}/k9")))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    coordinator.load_files().await.unwrap();
    let report = coordinator.reconcile().await.unwrap();

    assert_eq!(
        report,
        ReconcileReport {
            created: 1,
            rebound: 0,
            removed: 1,
            failed: 0
        }
    );
    assert!(coordinator.content_of("old/x.js").await.is_none());
    assert_eq!(
        coordinator.content_of("README.md").await.unwrap().key.as_deref(),
        Some("k-readme")
    );
}

#[tokio::test]
async fn expand_all_twice_matches_once() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;

    let coordinator = loaded(&server).await;
    let once = coordinator.expand_all_folders().await;
    let twice = coordinator.expand_all_folders().await;

    assert_eq!(once, twice);
    assert_eq!(once.len(), 2);
}

fn single_file_tree(folders: &[&str]) -> Value {
    let children: Vec<Value> = folders
        .iter()
        .map(|folder| {
            json!({ "name": folder, "type": "folder", "children": [{ "name": "a.js", "type": "file" }] })
        })
        .collect();
    json!({ "id": "root", "name": "root", "type": "folder", "children": children })
}

#[tokio::test]
async fn reconcile_moves_bare_name_record_onto_its_file() {
    let server = MockServer::start().await;
    mount_tree(&server, single_file_tree(&["src"])).await;
    mount_files(
        &server,
        json!([{ "key": "k1", "name": "a.js", "content": "real content" }]),
    )
    .await;
    Mock::given(method("PUT"))
        .and(path(format!("{FILES}/k1")))
        .and(body_partial_json(json!({
            "fileId": "src/a.js",
            "path": "src/a.js",
            "content": "real content"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "k-new" })))
        .expect(0)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    coordinator.load_files().await.unwrap();
    let report = coordinator.reconcile().await.unwrap();

    assert_eq!(
        report,
        ReconcileReport {
            created: 0,
            rebound: 1,
            removed: 0,
            failed: 0
        }
    );
    let record = coordinator.content_of("src/a.js").await.unwrap();
    assert_eq!(record.path, "src/a.js");
    assert_eq!(record.key.as_deref(), Some("k1"));
    assert_eq!(record.content, "real content");
}

#[tokio::test]
async fn reconcile_keeps_bare_name_record_shared_by_two_files() {
    let server = MockServer::start().await;
    mount_tree(&server, single_file_tree(&["src", "lib"])).await;
    mount_files(
        &server,
        json!([{ "key": "k1", "name": "a.js", "content": "shared" }]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path(FILES))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "k-new" })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("{FILES}/k1")))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    coordinator.load_files().await.unwrap();
    let report = coordinator.reconcile().await.unwrap();

    assert_eq!(
        report,
        ReconcileReport {
            created: 2,
            rebound: 0,
            removed: 0,
            failed: 0
        }
    );
    let kept = coordinator.content_of("a.js").await.unwrap();
    assert_eq!(kept.key.as_deref(), Some("k1"));
    assert_eq!(kept.content, "shared");
}

#[tokio::test]
async fn save_file_moves_bare_name_record_instead_of_creating_another() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    mount_files(
        &server,
        json!([{ "key": "k1", "name": "a.js", "content": "old" }]),
    )
    .await;
    Mock::given(method("PUT"))
        .and(path(format!("{FILES}/k1")))
        .and(body_partial_json(json!({ "path": "src/a.js", "content": "new" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "k-dup" })))
        .expect(0)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    coordinator.load_files().await.unwrap();
    let saved = coordinator
        .save_file("src/a.js", "new")
        .await
        .unwrap()
        .applied()
        .unwrap();

    assert_eq!(saved.key.as_deref(), Some("k1"));
    assert_eq!(saved.path, "src/a.js");
    let cached = coordinator.content_of("src/a.js").await.unwrap();
    assert_eq!(cached.path, "src/a.js");
    assert_eq!(cached.content, "new");
}

#[tokio::test]
async fn lone_precise_answer_is_cached_under_requested_id() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    Mock::given(method("GET"))
        .and(path(FILES))
        .and(query_param("fileId", "src/a.js"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "key": "k9", "id": 42, "content": "x" }])),
        )
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    let record = coordinator
        .load_file_by_id("src/a.js")
        .await
        .unwrap()
        .applied()
        .unwrap()
        .unwrap();

    assert_eq!(record.path, "src/a.js");
    let cached = coordinator.content_of("src/a.js").await.unwrap();
    assert_eq!(cached.key.as_deref(), Some("k9"));
    assert_eq!(cached.content, "x");
    assert!(coordinator.content_of("42").await.is_none());
}

#[tokio::test]
async fn double_create_of_same_file_runs_once() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    Mock::given(method("PUT"))
        .and(path(format!("{TREES}/tree-1")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "key": "tree-1" }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(FILES))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "key": "k-n" })))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    let (first, second) = tokio::join!(
        coordinator.create_file(Some("src"), "n.js", "x"),
        coordinator.create_file(Some("src"), "n.js", "x")
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let applied: Vec<_> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            Outcome::Applied(created) => Some(created.clone()),
            Outcome::Superseded => None,
        })
        .collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].path, "src/n.js");
    assert!(applied[0].content_synced);
    assert_eq!(outcomes.iter().filter(|o| o.is_superseded()).count(), 1);
    let paths = tree_paths(&coordinator).await;
    assert_eq!(paths.iter().filter(|p| p.as_str() == "src/n.js").count(), 1);
    assert_eq!(coordinator.pending_generations(), 0);
}

#[tokio::test]
async fn double_delete_of_same_file_runs_once() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    Mock::given(method("PUT"))
        .and(path(format!("{TREES}/tree-1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "key": "tree-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(FILES))
        .and(query_param("fileId", "README.md"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    let (first, second) = tokio::join!(
        coordinator.delete_item("README.md"),
        coordinator.delete_item("README.md")
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let applied: Vec<_> = outcomes
        .iter()
        .filter_map(|outcome| outcome.clone().applied())
        .collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].path, "README.md");
    assert_eq!(applied[0].records_removed, 1);
    assert_eq!(outcomes.iter().filter(|o| o.is_superseded()).count(), 1);
    assert_eq!(coordinator.pending_generations(), 0);
}

#[tokio::test]
async fn rename_overtaken_by_another_rename_keeps_its_effects() {
    let server = MockServer::start().await;
    mount_tree(&server, src_tree()).await;
    Mock::given(method("PUT"))
        .and(path(format!("{TREES}/tree-1")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "key": "tree-1" }))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = loaded(&server).await;
    let (first, second) = tokio::join!(coordinator.rename_item("src", "source"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        coordinator.rename_item("src", "code").await
    });

    assert_eq!(first.unwrap(), Outcome::Superseded);
    assert_eq!(second.unwrap_err().kind(), ErrorKind::NotFound);
    let paths = tree_paths(&coordinator).await;
    assert!(paths.contains(&"source/a.js".to_string()));
    assert!(!paths.iter().any(|p| p.starts_with("code")));
    assert_eq!(coordinator.pending_generations(), 0);
}

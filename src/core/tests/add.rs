//! URI intake: destination collisions, plugin expansion, handler selection.

use super::*;
use crate::plugin::Plugin;
use crate::types::Status;

#[tokio::test]
async fn add_persists_metadata_and_resolved_path() {
    let (core, dir) = create_test_core().await;
    let handler = StubHandler::new("stub://", "a.rar", StubMode::Complete);
    core.register_handler(handler.clone());

    let tasks = core
        .add("stub://host/a.rar", TaskOptions::default())
        .await
        .unwrap();

    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.uri, "stub://host/a.rar");
    assert_eq!(task.filesize, Some(100));
    assert!(task.support_range);
    assert_eq!(task.status, Status::Downloading);
    assert_eq!(
        task.path,
        dir.path().join("download").join("a.rar").display().to_string()
    );
}

#[tokio::test]
async fn colliding_filenames_get_numbered_destinations() {
    let (core, dir) = create_test_core().await;
    let handler = StubHandler::new("stub://", "a.rar", StubMode::Hang);
    core.register_handler(handler.clone());
    let download_dir = dir.path().join("download");
    std::fs::create_dir_all(&download_dir).unwrap();

    // occupy "a.rar" and then "a(1).rar" on disk, as finished downloads would
    std::fs::write(download_dir.join("a.rar"), b"first").unwrap();
    let second = core
        .add("stub://host/a.rar", TaskOptions::default())
        .await
        .unwrap();
    assert_eq!(
        second[0].path,
        download_dir.join("a(1).rar").display().to_string()
    );

    std::fs::write(download_dir.join("a(1).rar"), b"second").unwrap();
    let third = core
        .add("stub://host/a.rar", TaskOptions::default())
        .await
        .unwrap();
    assert_eq!(
        third[0].path,
        download_dir.join("a(1)(1).rar").display().to_string()
    );
}

#[tokio::test]
async fn unhandled_uris_are_skipped() {
    let (core, _dir) = create_test_core().await;
    // only the default http handler is registered; a stub scheme matches
    // nothing and produces no tasks
    let tasks = core
        .add("gopher://old/web", TaskOptions::default())
        .await
        .unwrap();
    assert!(tasks.is_empty());
}

#[tokio::test]
async fn first_matching_handler_wins_in_registration_order() {
    let (core, _dir) = create_test_core().await;
    let first = StubHandler::new("stub://", "first.bin", StubMode::Complete);
    let second = StubHandler::new("stub://", "second.bin", StubMode::Complete);
    core.register_handler(first.clone());
    core.register_handler(second.clone());

    core.add("stub://host/x", TaskOptions::default())
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(1), || async {
            first.calls().len() == 1
        })
        .await,
        "first registration takes the uri"
    );
    assert!(second.calls().is_empty());
}

struct MirrorPlugin;

#[async_trait]
impl Plugin for MirrorPlugin {
    fn name(&self) -> &str {
        "mirror"
    }

    async fn on_add_uri(&self, uri: &str, _options: &TaskOptions) -> Vec<String> {
        vec![
            uri.replace("host", "mirror-a"),
            uri.replace("host", "mirror-b"),
        ]
    }
}

#[tokio::test]
async fn plugin_expansion_replaces_the_original_uri() {
    let (core, _dir) = create_test_core().await;
    let handler = StubHandler::new("stub://", "a.bin", StubMode::Complete);
    core.register_handler(handler.clone());
    core.register_plugin(Arc::new(MirrorPlugin));

    let tasks = core
        .add("stub://host/a.bin", TaskOptions::default())
        .await
        .unwrap();

    let mut uris: Vec<String> = tasks.iter().map(|t| t.uri.clone()).collect();
    uris.sort();
    assert_eq!(
        uris,
        vec![
            "stub://mirror-a/a.bin".to_string(),
            "stub://mirror-b/a.bin".to_string(),
        ],
        "expansion replaces the original uri entirely"
    );
}

#[tokio::test]
async fn disabled_plugins_do_not_expand() {
    let (core, _dir) = create_test_core().await;
    let handler = StubHandler::new("stub://", "a.bin", StubMode::Complete);
    core.register_handler(handler.clone());
    core.register_plugin(Arc::new(MirrorPlugin));
    core.disable_plugin("mirror");

    let tasks = core
        .add("stub://host/a.bin", TaskOptions::default())
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].uri, "stub://host/a.bin");

    assert_eq!(core.plugin_names(), vec!["mirror".to_string()]);
}

#[tokio::test]
async fn options_are_stored_with_the_task() {
    let (core, _dir) = create_test_core().await;
    let handler = StubHandler::new("stub://", "a.bin", StubMode::Complete);
    core.register_handler(handler.clone());

    let options = TaskOptions {
        split: Some(2),
        fileio: Some(crate::fileio::FileIoMode::SysIo),
        ..Default::default()
    };
    let tasks = core.add("stub://host/a.bin", options.clone()).await.unwrap();

    let stored = core.get_option(tasks[0].id).await.unwrap();
    assert_eq!(stored, options);
}

#[tokio::test]
async fn per_task_dir_option_overrides_the_global_directory() {
    let (core, dir) = create_test_core().await;
    let handler = StubHandler::new("stub://", "a.bin", StubMode::Complete);
    core.register_handler(handler.clone());

    let elsewhere = dir.path().join("elsewhere");
    let tasks = core
        .add(
            "stub://host/a.bin",
            TaskOptions {
                dir: Some(elsewhere.clone()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(
        tasks[0].path,
        elsewhere.join("a.bin").display().to_string()
    );
    assert!(elsewhere.is_dir(), "per-task directory must be created");
}

//! End-to-end download scenarios over scripted transports.

use super::*;
use crate::downloader::RangedDownloader;
use crate::handler::RangedHandler;
use crate::types::{Event, Status};

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn unknown_size_streams_single_block_to_completion() {
    let (core, dir) = create_test_core().await;
    // three chunks of 7, 11, and 5 bytes; no size, no range support
    let downloader = Arc::new(ScriptedDownloader {
        body: patterned(23),
        advertise_size: false,
        advertise_range: false,
        chunk_sizes: vec![7, 11, 5],
        delay: Duration::ZERO,
        fail_at: None,
        data_requests: AtomicUsize::new(0),
    });
    let options = use_scripted(&core, Arc::clone(&downloader));

    let tasks = core.add("https://host/stream.bin", options).await.unwrap();
    let id = tasks[0].id;
    assert_eq!(tasks[0].filesize, None);
    assert!(!tasks[0].support_range);

    assert!(
        wait_until(Duration::from_secs(2), || async {
            core.tell_status(id).await.unwrap().status == Status::Complete
        })
        .await
    );

    let path = dir.path().join("download").join("stream.bin");
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 23);
    assert_eq!(std::fs::read(&path).unwrap(), patterned(23));
}

#[tokio::test]
async fn ranged_download_splits_and_reassembles_byte_for_byte() {
    let (core, dir) = create_test_core().await;
    let body = patterned(1000);
    let downloader = ScriptedDownloader::sized(body.clone());
    let mut options = use_scripted(&core, Arc::clone(&downloader));
    options.split = Some(4);

    let tasks = core.add("https://host/a.bin", options).await.unwrap();
    let id = tasks[0].id;
    assert_eq!(tasks[0].filesize, Some(1000));
    assert!(tasks[0].support_range);

    assert!(
        wait_until(Duration::from_secs(2), || async {
            core.tell_status(id).await.unwrap().status == Status::Complete
        })
        .await
    );

    let path = dir.path().join("download").join("a.bin");
    assert_eq!(std::fs::read(&path).unwrap(), body);
    assert_eq!(
        downloader.data_requests.load(Ordering::SeqCst),
        4,
        "one ranged request per block"
    );
    assert!(
        !path.with_extension("bin.getex").exists(),
        "no checkpoint after completion"
    );
}

#[tokio::test]
async fn mid_stream_failure_in_one_block_errors_the_task_and_cancels_siblings() {
    let (core, _dir) = create_test_core().await;
    let downloader = Arc::new(ScriptedDownloader {
        body: patterned(1000),
        advertise_size: true,
        advertise_range: true,
        chunk_sizes: vec![50],
        delay: Duration::from_millis(5),
        // second block of four dies after two chunks
        fail_at: Some(FailAt {
            range_start: 250,
            after_chunks: 2,
        }),
        data_requests: AtomicUsize::new(0),
    });
    let mut options = use_scripted(&core, Arc::clone(&downloader));
    options.split = Some(4);

    let mut events = core.subscribe();
    let tasks = core.add("https://host/a.bin", options).await.unwrap();
    let id = tasks[0].id;

    assert!(
        wait_until(Duration::from_secs(2), || async {
            core.tell_status(id).await.unwrap().status == Status::Error
        })
        .await,
        "task must transition to error"
    );
    assert!(
        wait_until(Duration::from_secs(1), || async {
            !core.is_pending(id).await
        })
        .await,
        "all workers must unwind"
    );

    // Started, then the error event carrying the transport message
    assert!(matches!(events.recv().await.unwrap(), Event::Started { .. }));
    match events.recv().await.unwrap() {
        Event::DownloadError { id: got, error } => {
            assert_eq!(got, id);
            assert!(error.contains("scripted mid-stream failure"), "got: {error}");
        }
        other => panic!("expected DownloadError, got {other:?}"),
    }

    let task = core.tell_status(id).await.unwrap();
    assert!(task.end_time.is_some(), "error is a terminal transition");
}

#[tokio::test]
async fn error_notifies_plugins_with_message_and_trace() {
    struct ErrorRecorder {
        seen: Arc<std::sync::Mutex<Vec<(TaskId, String, String)>>>,
    }

    #[async_trait]
    impl crate::plugin::Plugin for ErrorRecorder {
        fn name(&self) -> &str {
            "error-recorder"
        }

        async fn on_download_error(&self, id: TaskId, error: &str, trace: &str) {
            self.seen
                .lock()
                .unwrap()
                .push((id, error.to_string(), trace.to_string()));
        }
    }

    let (core, _dir) = create_test_core().await;
    let downloader = Arc::new(ScriptedDownloader {
        body: patterned(100),
        advertise_size: false,
        advertise_range: false,
        chunk_sizes: vec![10],
        delay: Duration::ZERO,
        fail_at: Some(FailAt {
            range_start: 0,
            after_chunks: 1,
        }),
        data_requests: AtomicUsize::new(0),
    });
    let options = use_scripted(&core, Arc::clone(&downloader));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    core.register_plugin(Arc::new(ErrorRecorder {
        seen: Arc::clone(&seen),
    }));

    let tasks = core.add("https://host/a.bin", options).await.unwrap();
    let id = tasks[0].id;

    assert!(
        wait_until(Duration::from_secs(2), || async {
            !seen.lock().unwrap().is_empty()
        })
        .await
    );
    let (got, error, trace) = seen.lock().unwrap()[0].clone();
    assert_eq!(got, id);
    assert!(error.contains("scripted mid-stream failure"));
    assert!(trace.contains("Transport"), "trace is the debug rendering");
}

#[tokio::test]
async fn pause_mid_download_then_unpause_yields_identical_bytes() {
    let (core, dir) = create_test_core().await;
    let body = patterned(4096);
    let downloader = Arc::new(ScriptedDownloader {
        body: body.clone(),
        advertise_size: true,
        advertise_range: true,
        chunk_sizes: vec![64],
        delay: Duration::from_millis(20),
        fail_at: None,
        data_requests: AtomicUsize::new(0),
    });
    let mut options = use_scripted(&core, Arc::clone(&downloader));
    options.split = Some(8);

    let tasks = core.add("https://host/big.bin", options).await.unwrap();
    let id = tasks[0].id;
    let path = std::path::PathBuf::from(&tasks[0].path);
    let checkpoint = std::path::PathBuf::from(format!("{}.getex", tasks[0].path));

    // let some bytes land, then pause well before the ~160ms finish line
    tokio::time::sleep(Duration::from_millis(50)).await;
    core.pause(id).await.unwrap();

    assert_eq!(core.tell_status(id).await.unwrap().status, Status::Paused);
    assert!(checkpoint.exists(), "pause must leave a checkpoint");
    let saved = crate::split::SplitState::load_checkpoint(&checkpoint)
        .unwrap()
        .unwrap();
    assert!(
        !saved.unfinished_pairs().is_empty(),
        "a mid-download pause leaves unfinished blocks"
    );

    core.unpause(id).await.unwrap();
    assert!(
        wait_until(Duration::from_secs(10), || async {
            core.tell_status(id).await.unwrap().status == Status::Complete
        })
        .await,
        "resumed task should complete"
    );

    assert_eq!(std::fs::read(&path).unwrap(), body, "byte-for-byte equal");
    assert!(!checkpoint.exists());
}

#[tokio::test]
async fn complete_event_and_plugin_notification_fire_once() {
    let (core, _dir) = create_test_core().await;
    let downloader = ScriptedDownloader::sized(patterned(100));
    let options = use_scripted(&core, downloader);

    let mut events = core.subscribe();
    let tasks = core.add("https://host/tiny.bin", options).await.unwrap();
    let id = tasks[0].id;

    assert!(matches!(events.recv().await.unwrap(), Event::Started { .. }));
    assert!(matches!(
        events.recv().await.unwrap(),
        Event::Complete { id: got } if got == id
    ));

    let task = core.tell_status(id).await.unwrap();
    assert_eq!(task.status, Status::Complete);
    assert!(task.end_time.is_some());
}

#[tokio::test]
async fn general_fileio_backend_completes_a_ranged_download() {
    let (core, dir) = create_test_core().await;
    let body = patterned(512);
    let downloader = ScriptedDownloader::sized(body.clone());
    let mut options = use_scripted(&core, downloader);
    options.split = Some(2);
    options.fileio = Some(crate::fileio::FileIoMode::GeneralIo);

    let tasks = core.add("https://host/g.bin", options).await.unwrap();
    let id = tasks[0].id;
    assert!(
        wait_until(Duration::from_secs(2), || async {
            core.tell_status(id).await.unwrap().status == Status::Complete
        })
        .await
    );
    assert_eq!(
        std::fs::read(dir.path().join("download").join("g.bin")).unwrap(),
        body
    );
}

/// An in-memory offset + count transport, standing in for an FTP/SFTP wire
/// client.
struct ScriptedRanged {
    body: Vec<u8>,
}

#[async_trait]
impl RangedDownloader for ScriptedRanged {
    async fn metadata(&self, uri: &str) -> Result<FileMetadata> {
        Ok(FileMetadata {
            filesize: Some(self.body.len() as u64),
            filename: uri.rsplit('/').next().unwrap_or("download").to_string(),
            support_range: true,
        })
    }

    async fn open(
        &self,
        _uri: &str,
        offset: u64,
        count: Option<u64>,
    ) -> Result<Box<dyn ByteStream>> {
        let start = offset as usize;
        let end = count
            .map(|c| (start + c as usize).min(self.body.len()))
            .unwrap_or(self.body.len());
        let chunks = self.body[start..end]
            .chunks(64)
            .map(Bytes::copy_from_slice)
            .collect();
        Ok(Box::new(ScriptedStream {
            chunks,
            delay: Duration::ZERO,
            fail_after: None,
            delivered: 0,
        }))
    }
}

#[tokio::test]
async fn sftp_shaped_transport_downloads_through_the_ranged_handler() {
    let (core, dir) = create_test_core().await;
    let body = patterned(1000);
    let shared = body.clone();
    core.register_handler(Arc::new(RangedHandler::sftp(move |_config| {
        Ok(Arc::new(ScriptedRanged {
            body: shared.clone(),
        }) as Arc<dyn RangedDownloader>)
    })));

    let tasks = core
        .add(
            "sftp://host/data/file.bin",
            TaskOptions {
                split: Some(4),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let task = &tasks[0];
    assert_eq!(task.filesize, Some(1000));
    assert!(task.support_range);

    assert!(
        wait_until(Duration::from_secs(2), || async {
            core.tell_status(task.id).await.unwrap().status == Status::Complete
        })
        .await
    );
    assert_eq!(
        std::fs::read(dir.path().join("download").join("file.bin")).unwrap(),
        body
    );
}

#[tokio::test]
async fn async_fileio_offload_completes_a_download() {
    let (core, dir) = create_test_core().await;
    let body = patterned(300);
    let downloader = ScriptedDownloader::sized(body.clone());
    let mut options = use_scripted(&core, downloader);
    options.split = Some(3);
    options.fileio_async = Some(true);

    let tasks = core.add("https://host/async.bin", options).await.unwrap();
    let id = tasks[0].id;
    assert!(
        wait_until(Duration::from_secs(2), || async {
            core.tell_status(id).await.unwrap().status == Status::Complete
        })
        .await
    );
    assert_eq!(
        std::fs::read(dir.path().join("download").join("async.bin")).unwrap(),
        body
    );
}

use sitemirror::*;
use std::time::Duration;

fn url(raw: &str) -> NormalizedUrl {
    UrlNormalizer::normalize(raw, None).unwrap()
}

fn done_record(raw: &str, path: &str, title: Option<&str>) -> VisitRecord {
    let mut store = VisitationStore::new();
    let page = url(raw);
    store.mark_pending(&page);
    store.mark_in_flight(&page).unwrap();
    store
        .mark_done(
            &page,
            PageOutcome {
                status: 200,
                content_type: "text/html".into(),
                bytes: 10,
                local_path: path.into(),
                title: title.map(str::to_string),
            },
        )
        .unwrap()
        .clone()
}

fn summary(scope: &str) -> CrawlSummary {
    CrawlSummary {
        scope: url(scope),
        pages_done: 2,
        pages_failed: 0,
        pages_pending: 0,
        total_bytes: 20,
        elapsed: Duration::from_secs(3),
        failures: Vec::new(),
        cancelled: false,
    }
}

#[cfg(test)]
mod page_sink_tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsPageSink::new(dir.path());
        let path = LocalPath::new(vec!["blog".into(), "post1".into()], "index.html");

        sink.write(&path, b"<p>hi</p>").await.unwrap();

        let written = std::fs::read(dir.path().join("blog/post1/index.html")).unwrap();
        assert_eq!(written, b"<p>hi</p>");
    }

    #[tokio::test]
    async fn test_write_leaves_no_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FsPageSink::new(dir.path());
        let path = LocalPath::new(vec!["blog".into()], "index.html");

        sink.write(&path, b"first").await.unwrap();
        sink.write(&path, b"second").await.unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path().join("blog"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["index.html".to_string()]);
        assert_eq!(std::fs::read(dir.path().join("blog/index.html")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("blog"), b"a file, not a directory").unwrap();
        let sink = FsPageSink::new(dir.path());

        let result = sink
            .write(&LocalPath::new(vec!["blog".into()], "index.html"), b"x")
            .await;
        assert!(matches!(result, Err(SinkError::Io { .. })));
    }
}

#[cfg(test)]
mod metadata_sink_tests {
    use super::*;

    #[tokio::test]
    async fn test_finalize_writes_sorted_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FsMetadataSink::new(dir.path());

        sink.record(&done_record("https://example.com/blog/z/", "blog/z/index.html", None))
            .await
            .unwrap();
        sink.record(&done_record("https://example.com/blog/a/", "blog/a/index.html", None))
            .await
            .unwrap();
        sink.finalize(&summary("https://example.com/blog/")).await.unwrap();

        let records = load_records(dir.path()).await.unwrap();
        let urls: Vec<&str> = records.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.com/blog/a/", "https://example.com/blog/z/"]);

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!(json["scope"], "https://example.com/blog/");
        assert_eq!(json["pages_done"], 2);
        assert_eq!(json["cancelled"], false);
    }

    #[tokio::test]
    async fn test_later_record_replaces_earlier_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FsMetadataSink::new(dir.path());
        let page = url("https://example.com/blog/");

        let mut store = VisitationStore::new();
        store.mark_pending(&page);
        sink.record(store.record(&page).unwrap()).await.unwrap();
        sink.record(&done_record("https://example.com/blog/", "blog/index.html", None))
            .await
            .unwrap();
        sink.finalize(&summary("https://example.com/blog/")).await.unwrap();

        let records = load_records(dir.path()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].state, VisitState::Done);
    }

    #[tokio::test]
    async fn test_index_document_lists_mirrored_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FsMetadataSink::new(dir.path());
        sink.record(&done_record(
            "https://example.com/blog/",
            "blog/index.html",
            Some("Tips & <Tricks>"),
        ))
        .await
        .unwrap();

        let index = sink.finalize(&summary("https://example.com/blog/")).await.unwrap();

        assert_eq!(index.entries, 1);
        assert_eq!(index.path, LocalPath::root_file(INDEX_DOCUMENT));
        assert!(index.html.contains(r#"<a href="blog/index.html">Tips &amp; &lt;Tricks&gt;</a>"#));
        let on_disk = std::fs::read_to_string(dir.path().join(INDEX_DOCUMENT)).unwrap();
        assert_eq!(on_disk, index.html);
    }

    #[tokio::test]
    async fn test_finalize_is_deterministic() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();

        for dir in [&first, &second] {
            let mut sink = FsMetadataSink::new(dir.path());
            sink.record(&done_record("https://example.com/blog/", "blog/index.html", Some("Home")))
                .await
                .unwrap();
            sink.finalize(&summary("https://example.com/blog/")).await.unwrap();
        }

        for file in [METADATA_FILE, INDEX_DOCUMENT] {
            assert_eq!(
                std::fs::read(first.path().join(file)).unwrap(),
                std::fs::read(second.path().join(file)).unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_load_records_without_metadata_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_records(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_records_rejects_corrupt_metadata() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), b"{not json").unwrap();
        assert!(matches!(
            load_records(dir.path()).await,
            Err(SinkError::Serialize(_))
        ));
    }

    #[test]
    fn test_reserved_paths() {
        let sink = FsMetadataSink::new("out");
        assert_eq!(
            sink.reserved_paths(),
            vec![
                LocalPath::root_file(METADATA_FILE),
                LocalPath::root_file(INDEX_DOCUMENT)
            ]
        );
    }
}

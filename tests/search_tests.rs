use std::sync::Arc;
use std::time::{Duration, Instant};
use textcore::config::SearchConfig;
use textcore::{
    CancellationFlag, CoreError, DocumentBuffer, SearchEngine, SearchOptions, TextEdit,
};

fn tiny_window_engine() -> SearchEngine {
    SearchEngine::new(SearchConfig {
        window_chars: 2,
        min_overlap: 1,
        ..Default::default()
    })
}

#[test]
fn test_tiny_window_single_char_matches_reported_once() {
    let buffer = DocumentBuffer::from_text("aaaa");
    let results = tiny_window_engine()
        .find_all(&buffer.snapshot(), &SearchOptions::literal("a"))
        .unwrap();
    let offsets: Vec<usize> = results.iter().map(|r| r.offset).collect();
    assert_eq!(offsets, vec![0, 1, 2, 3]);
}

#[test]
fn test_replace_all_descending_order() {
    let mut buffer = DocumentBuffer::from_text("aXaXa");
    let replaced = tiny_window_engine()
        .replace_all(&mut buffer, &SearchOptions::literal("a"), "bb")
        .unwrap();
    assert_eq!(replaced, 3);
    assert_eq!(buffer.text_all(), "bbXbbXbb");
}

#[test]
fn test_forward_order_with_stale_offsets_corrupts() {
    // The same edits applied first-to-last with the offsets found before editing
    let mut buffer = DocumentBuffer::from_text("aXaXa");
    for offset in [0, 2, 4] {
        buffer.replace(offset, 1, "bb").unwrap();
    }
    assert_ne!(buffer.text_all(), "bbXbbXbb");

    // The batch API refuses ascending order outright
    let mut buffer = DocumentBuffer::from_text("aXaXa");
    let ascending: Vec<TextEdit> = [0, 2, 4]
        .into_iter()
        .map(|offset| TextEdit {
            offset,
            length: 1,
            text: "bb".to_string(),
        })
        .collect();
    assert!(matches!(
        buffer.apply_edits_descending(&ascending),
        Err(CoreError::OutOfRange { .. })
    ));
    assert_eq!(buffer.text_all(), "aXaXa");
}

#[test]
fn test_match_spanning_default_window_seam() {
    let window = SearchConfig::default().window_chars;
    let mut text = "x".repeat(window - 3);
    text.push_str("needle");
    text.push_str(&"y".repeat(100));
    let buffer = DocumentBuffer::from_text(&text);
    let results = SearchEngine::default()
        .find_all(&buffer.snapshot(), &SearchOptions::literal("needle"))
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].offset, window - 3);
    assert_eq!(results[0].line, 1);
}

#[test]
fn test_regex_whole_word_case_insensitive() {
    let buffer = DocumentBuffer::from_text("Error: error_code\nERROR again\nterror");
    let options = SearchOptions::literal("error").case_insensitive().whole_word();
    let results = SearchEngine::default()
        .find_all(&buffer.snapshot(), &options)
        .unwrap();
    let lines: Vec<(usize, usize)> = results.iter().map(|r| (r.line, r.column)).collect();
    assert_eq!(lines, vec![(1, 1), (2, 1)]);
    assert_eq!(&*results[1].line_text, "ERROR again");
}

#[test]
fn test_search_does_not_see_later_edits() {
    let mut buffer = DocumentBuffer::from_text("one two");
    let snapshot = buffer.snapshot();
    buffer.insert(0, "two ").unwrap();
    let engine = SearchEngine::default();
    assert_eq!(engine.count(&snapshot, &SearchOptions::literal("two")).unwrap(), 1);
    assert_eq!(
        engine
            .count(&buffer.snapshot(), &SearchOptions::literal("two"))
            .unwrap(),
        2
    );
}

#[test]
fn test_multi_document_search() {
    let docs: Vec<(Arc<str>, _)> = ["alpha beta", "beta\nbeta gamma", "gamma"]
        .iter()
        .enumerate()
        .map(|(i, text)| {
            (
                Arc::<str>::from(format!("doc{i}")),
                DocumentBuffer::from_text(text).snapshot(),
            )
        })
        .collect();
    let results = SearchEngine::default()
        .find_all_in_documents(&docs, &SearchOptions::literal("beta"))
        .unwrap();
    let sources: Vec<&str> = results
        .iter()
        .filter_map(|r| r.source_id.as_deref())
        .collect();
    assert_eq!(sources, vec!["doc0", "doc1", "doc1"]);
}

/// ~50 MB of text with no match for "not present", so a scan has to walk every window
fn large_buffer() -> DocumentBuffer {
    let line = "the quick brown fox jumps over the lazy dog 0123456789\n";
    DocumentBuffer::from_text(&line.repeat(50 * 1024 * 1024 / line.len()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_large_find_all_returns_empty_promptly() {
    let buffer = large_buffer();

    let engine = SearchEngine::default();
    let cancel = CancellationFlag::new();
    let trigger = cancel.clone();
    let started = Instant::now();
    let results = engine
        .find_all_async(
            buffer.snapshot(),
            SearchOptions::literal("not present"),
            cancel,
            // Cancel as soon as the first window has been scanned
            move |_| trigger.cancel(),
        )
        .await
        .unwrap();

    assert!(results.is_empty());
    assert!(started.elapsed() < Duration::from_secs(30));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_in_flight_find_all_from_caller() {
    let buffer = large_buffer();
    let engine = SearchEngine::default();
    let cancel = CancellationFlag::new();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let mut started_tx = Some(started_tx);

    let search = tokio::spawn({
        let snapshot = buffer.snapshot();
        let cancel = cancel.clone();
        async move {
            engine
                .find_all_async(snapshot, SearchOptions::literal("not present"), cancel, move |_| {
                    if let Some(tx) = started_tx.take() {
                        let _ = tx.send(());
                    }
                })
                .await
        }
    });

    // Wait until the worker has scanned its first window
    tokio::time::timeout(Duration::from_secs(30), started_rx)
        .await
        .unwrap()
        .unwrap();
    let cancelled_at = Instant::now();
    cancel.cancel();

    let results = tokio::time::timeout(Duration::from_secs(1), search)
        .await
        .expect("search did not stop within a second of cancel")
        .unwrap()
        .unwrap();
    assert!(results.is_empty());
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_count_async_matches_sync_count() {
    let buffer = DocumentBuffer::from_text(&"ab\n".repeat(1000));
    let engine = SearchEngine::new(SearchConfig {
        window_chars: 100,
        ..Default::default()
    });
    let options = SearchOptions::regex("^ab$");
    let sync = engine.count(&buffer.snapshot(), &options).unwrap();
    let total = engine
        .count_async(buffer.snapshot(), options, CancellationFlag::new(), |_| {})
        .await
        .unwrap();
    assert_eq!(sync, 1000);
    assert_eq!(total, 1000);
}

#[tokio::test]
async fn test_async_invalid_pattern_is_error() {
    let buffer = DocumentBuffer::from_text("abc");
    let result = SearchEngine::default()
        .find_all_async(
            buffer.snapshot(),
            SearchOptions::regex("(abc"),
            CancellationFlag::new(),
            |_| {},
        )
        .await;
    assert!(matches!(result, Err(CoreError::Pattern(_))));
}

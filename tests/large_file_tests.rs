use std::io::Write;
use std::sync::Arc;
use textcore::cancel::CancellationFlag;
use textcore::config::LargeFileConfig;
use textcore::model::backing::{BackingSource, MemorySource};
use textcore::model::chunk_cache::{ChunkCache, ChunkCacheOptions};
use textcore::model::encoding::Encoding;
use textcore::model::line_index::LineIndex;
use textcore::{CoreError, MappedDocument, SearchEngine, SearchOptions};

fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_crlf_split_between_chunks_normalizes_once() {
    let source: Arc<dyn BackingSource> = Arc::new(MemorySource::new("ab\r\ncd"));
    let cache = ChunkCache::new(
        source,
        ChunkCacheOptions {
            chunk_size: 3,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(&*cache.get_chunk(0).unwrap(), "ab\n");
    assert_eq!(&*cache.get_chunk(3).unwrap(), "cd");
    assert_eq!(cache.read_text(0..6).unwrap(), "ab\ncd");
}

#[test]
fn test_line_start_offset_with_interval_one() {
    let source: Arc<dyn BackingSource> = Arc::new(MemorySource::new("line1\nline2\nline3"));
    let index =
        LineIndex::build(source, Encoding::Utf8, 1, &CancellationFlag::new(), |_| {}).unwrap();
    assert_eq!(index.total_lines(), 3);
    assert_eq!(index.line_start_offset(2).unwrap(), 12);
    assert!(matches!(
        index.line_start_offset(3),
        Err(CoreError::OutOfRange { .. })
    ));
}

#[test]
fn test_mapped_file_lines_and_search() {
    let mut content = Vec::new();
    for i in 0..500 {
        content.extend_from_slice(format!("row {i:04} value\r\n").as_bytes());
    }
    let file = write_temp(&content);
    let config = LargeFileConfig {
        chunk_size: 1024,
        max_chunks: 4,
        line_sample_interval: 16,
        ..Default::default()
    };

    let doc = MappedDocument::open(file.path(), &config, &CancellationFlag::new(), |_| {}).unwrap();
    assert_eq!(doc.line_count(), 501);
    assert_eq!(doc.line(0).unwrap(), "row 0000 value");
    assert_eq!(doc.line(257).unwrap(), "row 0257 value");
    assert_eq!(doc.lines(498, 3).unwrap(), vec!["row 0498 value", "row 0499 value", ""]);

    let offset = 100 * "row 0000 value\r\n".len() + 4;
    assert_eq!(doc.line_of_offset(offset).unwrap(), 100);

    // Searching goes through an in-memory copy with normalized line endings
    let buffer = doc.to_buffer().unwrap();
    assert_eq!(buffer.line_count(), 501);
    let results = SearchEngine::default()
        .find_all(&buffer.snapshot(), &SearchOptions::regex(r"row 04\d\d"))
        .unwrap();
    assert_eq!(results.len(), 100);
    assert_eq!(results[0].line, 401);
    assert_eq!(&*results[0].line_text, "row 0400 value");

    assert!(doc.chunk_stats().evictions > 0);
    doc.close();
    assert!(matches!(doc.read_all(), Err(CoreError::Disposed)));
}

#[test]
fn test_mapped_utf16_file() {
    let text = "héllo\r\nwörld\nlast";
    let mut bytes = vec![0xFF, 0xFE];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    let file = write_temp(&bytes);
    let config = LargeFileConfig {
        encoding: Encoding::Utf16Le,
        chunk_size: 6,
        line_sample_interval: 1,
        ..Default::default()
    };

    let doc = MappedDocument::open(file.path(), &config, &CancellationFlag::new(), |_| {}).unwrap();
    assert_eq!(doc.line_count(), 3);
    assert_eq!(doc.line(0).unwrap(), "héllo");
    assert_eq!(doc.line(1).unwrap(), "wörld");
    assert_eq!(doc.read_all().unwrap(), "héllo\nwörld\nlast");
}

#[test]
fn test_empty_mapped_file() {
    let file = write_temp(b"");
    let doc = MappedDocument::open(
        file.path(),
        &LargeFileConfig::default(),
        &CancellationFlag::new(),
        |_| {},
    )
    .unwrap();
    assert_eq!(doc.line_count(), 1);
    assert_eq!(doc.line(0).unwrap(), "");
    assert_eq!(doc.read_all().unwrap(), "");
}

#[test]
fn test_lone_cr_lines_agree_with_buffer() {
    let open = |normalize_line_endings| {
        let source: Arc<dyn BackingSource> = Arc::new(MemorySource::new("a\rb\rc"));
        let config = LargeFileConfig {
            normalize_line_endings,
            ..Default::default()
        };
        MappedDocument::from_source(source, &config, &CancellationFlag::new(), |_| {}).unwrap()
    };

    let doc = open(true);
    assert_eq!(doc.line_count(), 3);
    assert_eq!(doc.lines(0, 3).unwrap(), vec!["a", "b", "c"]);
    assert_eq!(doc.line_of_offset(2).unwrap(), 1);
    assert_eq!(doc.read_all().unwrap(), "a\nb\nc");
    assert_eq!(doc.to_buffer().unwrap().line_count(), doc.line_count());

    // Raw mode keeps the carriage returns inside one line
    let doc = open(false);
    assert_eq!(doc.line_count(), 1);
    assert_eq!(doc.line(0).unwrap(), "a\rb\rc");
}

use anyhow::{Context, Result as AnyhowResult};
use clap::Parser;
use std::path::{Path, PathBuf};
use textcore::config::CoreConfig;
use textcore::model::encoding::normalize_line_endings;
use textcore::primitives::lexer::LexerRegistry;
use textcore::primitives::token_cache::TokenCache;
use textcore::{
    CancellationFlag, DocumentBuffer, LineEnding, MappedDocument, SearchEngine, SearchOptions,
};
use tracing_subscriber::EnvFilter;

/// Inspect and search a text file with the editing core
#[derive(Parser, Debug)]
#[command(name = "textcore")]
#[command(about = "Query, search and tokenize text files", long_about = None)]
#[command(version)]
struct Args {
    /// File to open
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Print every match of PATTERN
    #[arg(long, value_name = "PATTERN")]
    find: Option<String>,

    /// Treat the pattern as a regular expression
    #[arg(long)]
    regex: bool,

    /// Match without regard to case
    #[arg(long)]
    ignore_case: bool,

    /// Only match whole words
    #[arg(long)]
    whole_word: bool,

    /// Print the number of matches instead of the matches
    #[arg(long)]
    count: bool,

    /// Print line N (1-based)
    #[arg(long, value_name = "N")]
    line: Option<usize>,

    /// With --line, also print the line's tokens
    #[arg(long)]
    tokens: bool,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,
}

/// An opened file: editable in memory, or mapped read-only when large
enum Document {
    Buffer(DocumentBuffer),
    Mapped(MappedDocument),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}

fn main() -> AnyhowResult<()> {
    let args = Args::parse();
    init_tracing();

    let config = match &args.config {
        Some(path) => CoreConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => CoreConfig::load_or_default(),
    };

    if args.dump_config {
        let json = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
        println!("{json}");
        return Ok(());
    }

    let path = args
        .file
        .as_deref()
        .context("No file given (see --help)")?;
    let document = open_document(path, &config)?;

    if let Some(line) = args.line {
        print_line(&document, path, line, args.tokens, &config)?;
    }

    if let Some(pattern) = &args.find {
        let mut options = if args.regex {
            SearchOptions::regex(pattern.as_str())
        } else {
            SearchOptions::literal(pattern.as_str())
        };
        if args.ignore_case {
            options = options.case_insensitive();
        }
        if args.whole_word {
            options = options.whole_word();
        }
        search(&document, &options, args.count, &config)?;
    }

    if args.line.is_none() && args.find.is_none() {
        print_summary(&document);
    }
    Ok(())
}

fn open_document(path: &Path, config: &CoreConfig) -> AnyhowResult<Document> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("Failed to read metadata of {}", path.display()))?
        .len();

    if size >= config.large_file.threshold_bytes {
        tracing::info!(path = %path.display(), size, "opening large file through a memory map");
        let mapped = MappedDocument::open(
            path,
            &config.large_file,
            &CancellationFlag::new(),
            |fraction| tracing::trace!(fraction, "indexing lines"),
        )
        .with_context(|| format!("Failed to map {}", path.display()))?;
        return Ok(Document::Mapped(mapped));
    }

    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let encoding = config.large_file.encoding;
    let body = bytes.strip_prefix(encoding.bom_bytes()).unwrap_or(&bytes);
    let text = encoding.decode(body);
    let line_ending = LineEnding::detect(&text);
    tracing::debug!(line_ending = line_ending.display_name(), "loaded file");
    Ok(Document::Buffer(DocumentBuffer::from_text(
        &normalize_line_endings(&text),
    )))
}

fn print_summary(document: &Document) {
    match document {
        Document::Buffer(buffer) => {
            let stats = buffer.stats();
            println!(
                "{} chars, {} lines (piece tree depth {}, {} pieces)",
                buffer.len(),
                buffer.line_count(),
                stats.depth,
                stats.leaf_count
            );
        }
        Document::Mapped(mapped) => {
            println!(
                "{} bytes, {} lines, {} (mapped, line index {} bytes)",
                mapped.byte_len(),
                mapped.line_count(),
                mapped.encoding().display_name(),
                mapped.line_index().memory_usage()
            );
        }
    }
}

fn print_line(
    document: &Document,
    path: &Path,
    line: usize,
    with_tokens: bool,
    config: &CoreConfig,
) -> AnyhowResult<()> {
    let index = line.checked_sub(1).context("Line numbers start at 1")?;
    let text = match document {
        Document::Buffer(buffer) => buffer.line(index),
        Document::Mapped(mapped) => mapped.line(index),
    }
    .with_context(|| format!("Failed to read line {line}"))?;
    println!("{text}");

    if with_tokens {
        let Document::Buffer(buffer) = document else {
            anyhow::bail!("--tokens is not available for memory-mapped files");
        };
        let tokenizer = LexerRegistry::with_builtins().for_path(path);
        let mut cache = TokenCache::new(buffer.line_count(), &config.lexing);
        cache
            .ensure_valid(index..index + 1, buffer.text(), tokenizer.as_ref())
            .context("Failed to tokenize")?;
        for token in cache.tokens(index).unwrap_or_default() {
            let lexeme: String = text.chars().skip(token.start).take(token.len).collect();
            println!("{:>5} {:>4} {:?} {:?}", token.start, token.len, token.kind, lexeme);
        }
    }
    Ok(())
}

fn search(
    document: &Document,
    options: &SearchOptions,
    count_only: bool,
    config: &CoreConfig,
) -> AnyhowResult<()> {
    let loaded;
    let buffer = match document {
        Document::Buffer(buffer) => buffer,
        Document::Mapped(mapped) => {
            loaded = mapped
                .to_buffer()
                .context("Failed to load mapped file for searching")?;
            &loaded
        }
    };
    let engine = SearchEngine::new(config.search.clone());
    let snapshot = buffer.snapshot();

    if count_only {
        let count = engine.count(&snapshot, options).context("Search failed")?;
        println!("{count}");
        return Ok(());
    }

    let results = engine.find_all(&snapshot, options).context("Search failed")?;
    for result in &results {
        println!("{}:{}: {}", result.line, result.column, result.line_text);
    }
    if results.len() >= config.search.max_results {
        eprintln!("(stopped after {} matches)", results.len());
    }
    Ok(())
}

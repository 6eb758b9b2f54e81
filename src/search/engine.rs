use crate::cancel::CancellationFlag;
use crate::config::SearchConfig;
use crate::error::{CoreError, Result};
use crate::model::buffer::{DocumentBuffer, DocumentSnapshot, TextEdit};
use crate::search::matcher::Matcher;
use crate::search::options::{LineTextCache, SearchDirection, SearchOptions, SearchResult};
use crate::search::window::{scan_windows, Hit, ScanLimits, Window};
use std::ops::{ControlFlow, Range};
use std::sync::Arc;
use std::time::Duration;

/// A match located by a scan, with its replacement text when one was requested
struct Located {
    result: SearchResult,
    replacement: Option<String>,
}

/// Find and replace over document snapshots.
///
/// Holds only configuration; every call takes the snapshot and options it works on, so
/// one engine can serve any number of documents and threads.
#[derive(Debug, Clone, Default)]
pub struct SearchEngine {
    config: SearchConfig,
}

impl SearchEngine {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Next match in `options.direction` from `from`
    pub fn find(
        &self,
        snapshot: &DocumentSnapshot,
        options: &SearchOptions,
        from: usize,
    ) -> Result<Option<SearchResult>> {
        match options.direction {
            SearchDirection::Forward => self.find_next(snapshot, options, from),
            SearchDirection::Backward => self.find_previous(snapshot, options, from),
        }
    }

    /// First match starting at or after `from`. With wrap-around, falls back to the
    /// first match starting before `from`.
    pub fn find_next(
        &self,
        snapshot: &DocumentSnapshot,
        options: &SearchOptions,
        from: usize,
    ) -> Result<Option<SearchResult>> {
        let Some(matcher) = Matcher::compile(options, &self.config)? else {
            return Ok(None);
        };
        Ok(self
            .locate_next(snapshot, &matcher, options, from, None)?
            .map(|found| found.result))
    }

    /// Last match ending at or before `from`. With wrap-around, falls back to the last
    /// match in the scope.
    pub fn find_previous(
        &self,
        snapshot: &DocumentSnapshot,
        options: &SearchOptions,
        from: usize,
    ) -> Result<Option<SearchResult>> {
        let Some(matcher) = Matcher::compile(options, &self.config)? else {
            return Ok(None);
        };
        let scope = options.scope.resolve(snapshot.len())?;
        let from = from.clamp(scope.start, scope.end);

        if let Some(found) = self.last_in(snapshot, &matcher, options, scope.clone(), from)? {
            return Ok(Some(found));
        }
        if options.wrap_around && from < scope.end {
            let end = scope.end;
            return self.last_in(snapshot, &matcher, options, scope, end);
        }
        Ok(None)
    }

    /// Every match in the scope, in document order, capped at `max_results`
    pub fn find_all(
        &self,
        snapshot: &DocumentSnapshot,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.find_all_with(snapshot, options, None, |_| {})
    }

    /// [`Self::find_all`] with cooperative cancellation and percentage progress
    pub fn find_all_with(
        &self,
        snapshot: &DocumentSnapshot,
        options: &SearchOptions,
        cancel: Option<&CancellationFlag>,
        mut progress: impl FnMut(u8),
    ) -> Result<Vec<SearchResult>> {
        let Some(matcher) = Matcher::compile(options, &self.config)? else {
            return Ok(Vec::new());
        };
        let scope = options.scope.resolve(snapshot.len())?;
        let mut results = Vec::new();
        let mut lines = LineTextCache::new();
        let max_results = self.config.max_results;

        scan_windows(
            snapshot,
            &matcher,
            scope,
            &self.limits(options),
            cancel,
            &mut progress,
            &mut |window, hit| {
                results.push(build_result(snapshot, window, hit, &mut lines, None)?);
                Ok(if results.len() >= max_results {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                })
            },
        )?;

        tracing::debug!(
            pattern = %options.pattern,
            matches = results.len(),
            capped = results.len() >= max_results,
            "find all"
        );
        Ok(results)
    }

    /// [`Self::find_all`] on a blocking worker thread.
    ///
    /// `cancel` is polled before every window and every match; once it is set the
    /// call resolves to an empty list. An invalid pattern still fails with `Pattern`.
    pub async fn find_all_async(
        &self,
        snapshot: DocumentSnapshot,
        options: SearchOptions,
        cancel: CancellationFlag,
        progress: impl FnMut(u8) + Send + 'static,
    ) -> Result<Vec<SearchResult>> {
        let engine = self.clone();
        let task = tokio::task::spawn_blocking(move || {
            engine.find_all_with(&snapshot, &options, Some(&cancel), progress)
        });
        cancelled_as_empty(task.await)
    }

    /// Number of matches in the scope. Not capped by `max_results`.
    pub fn count(&self, snapshot: &DocumentSnapshot, options: &SearchOptions) -> Result<usize> {
        self.count_with(snapshot, options, None, |_| {})
    }

    pub fn count_with(
        &self,
        snapshot: &DocumentSnapshot,
        options: &SearchOptions,
        cancel: Option<&CancellationFlag>,
        mut progress: impl FnMut(u8),
    ) -> Result<usize> {
        let Some(matcher) = Matcher::compile(options, &self.config)? else {
            return Ok(0);
        };
        let scope = options.scope.resolve(snapshot.len())?;
        let mut count = 0;
        scan_windows(
            snapshot,
            &matcher,
            scope,
            &self.limits(options),
            cancel,
            &mut progress,
            &mut |_, _| {
                count += 1;
                Ok(ControlFlow::Continue(()))
            },
        )?;
        Ok(count)
    }

    /// [`Self::count`] on a blocking worker thread; resolves to 0 when cancelled
    pub async fn count_async(
        &self,
        snapshot: DocumentSnapshot,
        options: SearchOptions,
        cancel: CancellationFlag,
        progress: impl FnMut(u8) + Send + 'static,
    ) -> Result<usize> {
        let engine = self.clone();
        let task = tokio::task::spawn_blocking(move || {
            engine.count_with(&snapshot, &options, Some(&cancel), progress)
        });
        cancelled_as_empty(task.await)
    }

    /// Replace the next match at or after `from` (wrapping if allowed), returning the
    /// match that was replaced. The buffer is untouched when nothing matches.
    pub fn replace(
        &self,
        buffer: &mut DocumentBuffer,
        options: &SearchOptions,
        from: usize,
        replacement: &str,
    ) -> Result<Option<SearchResult>> {
        let Some(matcher) = Matcher::compile(options, &self.config)? else {
            return Ok(None);
        };
        let snapshot = buffer.snapshot();
        let Some(found) = self.locate_next(&snapshot, &matcher, options, from, Some(replacement))?
        else {
            return Ok(None);
        };
        let text = found.replacement.as_deref().unwrap_or(replacement);
        buffer.replace(found.result.offset, found.result.length, text)?;
        Ok(Some(found.result))
    }

    /// Replace every match in the scope, returning how many were replaced.
    ///
    /// All matches are located on one snapshot first; the edits are then applied from
    /// the last match to the first so the offsets of earlier matches stay valid.
    pub fn replace_all(
        &self,
        buffer: &mut DocumentBuffer,
        options: &SearchOptions,
        replacement: &str,
    ) -> Result<usize> {
        let Some(matcher) = Matcher::compile(options, &self.config)? else {
            return Ok(0);
        };
        let snapshot = buffer.snapshot();
        let scope = options.scope.resolve(snapshot.len())?;
        let mut edits = Vec::new();
        scan_windows(
            &snapshot,
            &matcher,
            scope,
            &self.limits(options),
            None,
            &mut |_| {},
            &mut |window, hit| {
                edits.push(TextEdit {
                    offset: hit.start,
                    length: hit.end - hit.start,
                    text: matcher.expand(window.haystack(), hit.byte_start, replacement),
                });
                Ok(ControlFlow::Continue(()))
            },
        )?;

        edits.reverse();
        buffer.apply_edits_descending(&edits)?;
        tracing::debug!(pattern = %options.pattern, replaced = edits.len(), "replace all");
        Ok(edits.len())
    }

    /// Search several documents, tagging each result with its document's id.
    ///
    /// Each document is searched whole; `options.scope` is ignored. The combined list
    /// is capped at `max_results`.
    pub fn find_all_in_documents(
        &self,
        documents: &[(Arc<str>, DocumentSnapshot)],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let Some(matcher) = Matcher::compile(options, &self.config)? else {
            return Ok(Vec::new());
        };
        let limits = self.limits(options);
        let max_results = self.config.max_results;
        let mut results = Vec::new();

        for (id, snapshot) in documents {
            if results.len() >= max_results {
                break;
            }
            let mut lines = LineTextCache::new();
            scan_windows(
                snapshot,
                &matcher,
                0..snapshot.len(),
                &limits,
                None,
                &mut |_| {},
                &mut |window, hit| {
                    results.push(build_result(
                        snapshot,
                        window,
                        hit,
                        &mut lines,
                        Some(id.clone()),
                    )?);
                    Ok(if results.len() >= max_results {
                        ControlFlow::Break(())
                    } else {
                        ControlFlow::Continue(())
                    })
                },
            )?;
        }
        Ok(results)
    }

    fn limits<'a>(&self, options: &'a SearchOptions) -> ScanLimits<'a> {
        ScanLimits {
            window_chars: self.config.window_chars,
            overlap: options.pattern.chars().count().max(self.config.min_overlap),
            budget: (self.config.window_timeout_ms > 0)
                .then(|| Duration::from_millis(self.config.window_timeout_ms)),
            pattern: &options.pattern,
        }
    }

    fn locate_next(
        &self,
        snapshot: &DocumentSnapshot,
        matcher: &Matcher,
        options: &SearchOptions,
        from: usize,
        replacement: Option<&str>,
    ) -> Result<Option<Located>> {
        let scope = options.scope.resolve(snapshot.len())?;
        let from = from.clamp(scope.start, scope.end);

        if let Some(found) =
            self.first_in(snapshot, matcher, options, from..scope.end, replacement)?
        {
            return Ok(Some(found));
        }
        if options.wrap_around && from > scope.start {
            let wrapped = self.first_in(snapshot, matcher, options, scope, replacement)?;
            return Ok(wrapped.filter(|found| found.result.offset < from));
        }
        Ok(None)
    }

    fn first_in(
        &self,
        snapshot: &DocumentSnapshot,
        matcher: &Matcher,
        options: &SearchOptions,
        range: Range<usize>,
        replacement: Option<&str>,
    ) -> Result<Option<Located>> {
        let mut found = None;
        let mut lines = LineTextCache::new();
        scan_windows(
            snapshot,
            matcher,
            range,
            &self.limits(options),
            None,
            &mut |_| {},
            &mut |window, hit| {
                let replacement =
                    replacement.map(|r| matcher.expand(window.haystack(), hit.byte_start, r));
                let result = build_result(snapshot, window, hit, &mut lines, None)?;
                found = Some(Located {
                    result,
                    replacement,
                });
                Ok(ControlFlow::Break(()))
            },
        )?;
        Ok(found)
    }

    /// Last match of a forward scan over `scope` that ends at or before `limit`.
    ///
    /// The scan always runs to the real end of the scope, so anchors, word boundaries
    /// and greedy repetition see the text past `limit`.
    fn last_in(
        &self,
        snapshot: &DocumentSnapshot,
        matcher: &Matcher,
        options: &SearchOptions,
        scope: Range<usize>,
        limit: usize,
    ) -> Result<Option<SearchResult>> {
        let mut last = None;
        scan_windows(
            snapshot,
            matcher,
            scope,
            &self.limits(options),
            None,
            &mut |_| {},
            &mut |_, hit| {
                // Accepted matches never overlap, so every later one ends past `limit` too
                if hit.end > limit {
                    return Ok(ControlFlow::Break(()));
                }
                last = Some(hit);
                Ok(ControlFlow::Continue(()))
            },
        )?;
        last.map(|hit| {
            SearchResult::from_span(
                snapshot,
                hit.start,
                hit.end - hit.start,
                &mut LineTextCache::new(),
                None,
            )
        })
        .transpose()
    }
}

/// Build a result, taking the line text from the scan window when the line lies
/// wholly inside it
fn build_result(
    snapshot: &DocumentSnapshot,
    window: &mut Window,
    hit: Hit,
    lines: &mut LineTextCache,
    source_id: Option<Arc<str>>,
) -> Result<SearchResult> {
    let (line, column) = snapshot.offset_to_line_column(hit.start)?;
    let line_text = lines.get_or_insert_with(line, || {
        match window.line_text(hit.start - column, snapshot.len()) {
            Some(text) => Ok(Arc::from(text)),
            None => snapshot.line(line).map(Arc::from),
        }
    })?;
    Ok(SearchResult {
        offset: hit.start,
        length: hit.end - hit.start,
        line: line + 1,
        column: column + 1,
        line_text,
        source_id,
    })
}

/// Resolve a blocking search task: cancellation becomes an empty result, a panic in
/// the worker is propagated
fn cancelled_as_empty<T: Default>(
    joined: std::result::Result<Result<T>, tokio::task::JoinError>,
) -> Result<T> {
    match joined {
        Ok(Err(CoreError::Cancelled)) => {
            tracing::debug!("search cancelled");
            Ok(T::default())
        }
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(_) => Ok(T::default()),
    }
}

//! Repository-scoped keyword search.

use tantivy::collector::{Count, TopDocs};
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{Index, IndexReader, TantivyDocument, Term};
use tracing::debug;

use code_index_types::{RepoId, SearchPage, SearchResult};

use crate::error::SearchError;
use crate::index::SearchIndex;
use crate::schema::SearchSchema;

/// Lines of context kept on each side of the hit line
const SNIPPET_CONTEXT_LINES: usize = 1;

/// A window of file content around the first keyword hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub content: String,
    /// Byte offset of the hit within `content`
    pub start_index: usize,
    /// Byte offset one past the hit within `content`
    pub end_index: usize,
    /// 1-based line number of the first line of `content`
    pub start_line: usize,
}

/// Searcher over the code index.
pub struct CodeSearcher {
    index: Index,
    reader: IndexReader,
    schema: SearchSchema,
}

impl CodeSearcher {
    /// Create a new searcher from a SearchIndex.
    pub fn new(index: &SearchIndex) -> Result<Self, SearchError> {
        Ok(Self {
            index: index.index().clone(),
            reader: index.reader()?,
            schema: index.schema().clone(),
        })
    }

    /// Reload the reader to see recent commits.
    pub fn reload(&self) -> Result<(), SearchError> {
        self.reader.reload()?;
        Ok(())
    }

    /// Search `keyword` in the given repositories (all when empty).
    ///
    /// `page` is 1-based; 0 is treated as 1.
    pub fn search(
        &self,
        repo_ids: &[RepoId],
        keyword: &str,
        page: usize,
        page_size: usize,
    ) -> Result<SearchPage, SearchError> {
        if keyword.trim().is_empty() || page_size == 0 {
            return Ok(SearchPage::default());
        }

        let mut query_parser = QueryParser::for_index(&self.index, vec![self.schema.content]);
        query_parser.set_conjunction_by_default();
        let (text_query, errors) = query_parser.parse_query_lenient(keyword);
        if !errors.is_empty() {
            debug!(keyword, errors = errors.len(), "Ignored unparsable query parts");
        }

        let query: Box<dyn Query> = if repo_ids.is_empty() {
            text_query
        } else {
            let repo_clauses: Vec<(Occur, Box<dyn Query>)> = repo_ids
                .iter()
                .map(|id| {
                    let term = Term::from_field_i64(self.schema.repo_id, *id);
                    let query: Box<dyn Query> =
                        Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                    (Occur::Should, query)
                })
                .collect();

            Box::new(BooleanQuery::new(vec![
                (Occur::Must, text_query),
                (Occur::Must, Box::new(BooleanQuery::new(repo_clauses))),
            ]))
        };

        let searcher = self.reader.searcher();
        let total = searcher.search(&query, &Count)?;

        // Tantivy preallocates for limit + offset, so both stay within the hit count.
        let offset = page.max(1).saturating_sub(1).saturating_mul(page_size);
        if offset >= total {
            debug!(keyword, total, page, "Search page past the last hit");
            return Ok(SearchPage {
                total: total as u64,
                results: Vec::new(),
            });
        }
        let limit = page_size.min(total - offset);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit).and_offset(offset))?;

        let mut results = Vec::with_capacity(top_docs.len());
        for (_score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;

            let repo_id = doc
                .get_first(self.schema.repo_id)
                .and_then(|v| v.as_i64())
                .unwrap_or_default();
            let filename = doc
                .get_first(self.schema.filename)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            let content = doc
                .get_first(self.schema.content)
                .and_then(|v| v.as_str())
                .unwrap_or("");

            let snippet = extract_snippet(content, keyword);
            results.push(SearchResult {
                repo_id,
                start_index: snippet.start_index,
                end_index: snippet.end_index,
                filename,
                content: snippet.content,
                start_line: snippet.start_line,
            });
        }

        debug!(
            keyword,
            repos = repo_ids.len(),
            total,
            returned = results.len(),
            "Code search complete"
        );

        Ok(SearchPage {
            total: total as u64,
            results,
        })
    }

    /// Get the number of indexed documents.
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }
}

/// Earliest case-insensitive occurrence of the keyword, or of any of its
/// whitespace-separated terms. Returns (byte offset, length).
fn find_hit(content: &str, keyword: &str) -> Option<(usize, usize)> {
    let haystack = content.to_ascii_lowercase();

    let whole = keyword.trim().to_ascii_lowercase();
    if let Some(pos) = haystack.find(&whole) {
        return Some((pos, whole.len()));
    }

    keyword
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| c == '"' || c == '+' || c == '-'))
        .filter(|t| !t.is_empty())
        .filter_map(|t| {
            let needle = t.to_ascii_lowercase();
            haystack.find(&needle).map(|pos| (pos, needle.len()))
        })
        .min_by_key(|(pos, _)| *pos)
}

/// Cut the lines around the first hit of `keyword` out of `content`.
///
/// Without a literal hit the first lines of the file are returned with an
/// empty hit range.
pub fn extract_snippet(content: &str, keyword: &str) -> Snippet {
    let (pos, len) = match find_hit(content, keyword) {
        Some(hit) => hit,
        None => {
            let end = nth_line_end(content, 0, SNIPPET_CONTEXT_LINES * 2 + 1);
            return Snippet {
                content: content[..end].to_string(),
                start_index: 0,
                end_index: 0,
                start_line: 1,
            };
        }
    };

    let hit_line_start = content[..pos].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let hit_line = content[..pos].matches('\n').count() + 1;

    let mut start = hit_line_start;
    let mut leading = 0;
    while leading < SNIPPET_CONTEXT_LINES && start > 0 {
        start = content[..start - 1].rfind('\n').map(|i| i + 1).unwrap_or(0);
        leading += 1;
    }

    let end = nth_line_end(content, pos, SNIPPET_CONTEXT_LINES + 1);

    Snippet {
        content: content[start..end].to_string(),
        start_index: pos - start,
        end_index: pos - start + len,
        start_line: hit_line - leading,
    }
}

/// Byte offset of the end of the `count`-th line starting at `from`
/// (excluding the newline), clamped to the content length.
fn nth_line_end(content: &str, from: usize, count: usize) -> usize {
    let mut end = from;
    for _ in 0..count {
        match content[end..].find('\n') {
            Some(i) => end += i + 1,
            None => return content.len(),
        }
    }
    end.saturating_sub(1).max(from)
}

//! Document mapping from repository files to Tantivy documents.

use tantivy::doc;
use tantivy::TantivyDocument;

use code_index_types::RepoId;

use crate::content::RepoFile;
use crate::schema::SearchSchema;

/// Primary key of a file document.
pub fn doc_id(repo_id: RepoId, filename: &str) -> String {
    format!("{}:{}", repo_id, filename)
}

/// Convert a repository file to a Tantivy document.
pub fn file_to_doc(schema: &SearchSchema, repo_id: RepoId, file: &RepoFile) -> TantivyDocument {
    doc!(
        schema.doc_id => doc_id(repo_id, &file.path),
        schema.repo_id => repo_id,
        schema.filename => file.path.clone(),
        schema.content => file.content.clone()
    )
}

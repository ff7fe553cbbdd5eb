//! Tantivy schema definition for code search.
//!
//! One document per repository file.

use tantivy::schema::{Field, Schema, FAST, INDEXED, STORED, STRING, TEXT};

use crate::SearchError;

/// Schema field handles for efficient access
#[derive(Debug, Clone)]
pub struct SearchSchema {
    schema: Schema,
    /// Primary key: "{repo_id}:{filename}" (STRING | STORED)
    pub doc_id: Field,
    /// Owning repository (INDEXED | STORED | FAST)
    pub repo_id: Field,
    /// Path relative to the repository root (STRING | STORED)
    pub filename: Field,
    /// File content (TEXT | STORED)
    pub content: Field,
}

impl SearchSchema {
    /// Get the underlying Tantivy schema
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Create a SearchSchema from an existing Tantivy Schema
    pub fn from_schema(schema: Schema) -> Result<Self, SearchError> {
        let doc_id = schema
            .get_field("doc_id")
            .map_err(|_| SearchError::SchemaMismatch("missing doc_id field".into()))?;
        let repo_id = schema
            .get_field("repo_id")
            .map_err(|_| SearchError::SchemaMismatch("missing repo_id field".into()))?;
        let filename = schema
            .get_field("filename")
            .map_err(|_| SearchError::SchemaMismatch("missing filename field".into()))?;
        let content = schema
            .get_field("content")
            .map_err(|_| SearchError::SchemaMismatch("missing content field".into()))?;

        Ok(Self {
            schema,
            doc_id,
            repo_id,
            filename,
            content,
        })
    }
}

/// Build the code search schema.
pub fn build_code_schema() -> SearchSchema {
    let mut schema_builder = Schema::builder();

    let doc_id = schema_builder.add_text_field("doc_id", STRING | STORED);

    // Used both for repository-scoped queries and for replacing a repository
    let repo_id = schema_builder.add_i64_field("repo_id", INDEXED | STORED | FAST);

    let filename = schema_builder.add_text_field("filename", STRING | STORED);

    // Stored so snippets can be cut from the hit
    let content = schema_builder.add_text_field("content", TEXT | STORED);

    let schema = schema_builder.build();

    SearchSchema {
        schema,
        doc_id,
        repo_id,
        filename,
        content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_schema() {
        let schema = build_code_schema();
        assert!(schema.schema().get_field("repo_id").is_ok());
        assert!(schema.schema().get_field("content").is_ok());
    }

    #[test]
    fn test_from_schema_roundtrip() {
        let built = build_code_schema();
        let parsed = SearchSchema::from_schema(built.schema().clone()).unwrap();
        assert_eq!(parsed.repo_id, built.repo_id);
        assert_eq!(parsed.content, built.content);
    }

    #[test]
    fn test_from_schema_missing_field() {
        let mut builder = Schema::builder();
        builder.add_text_field("doc_id", STRING | STORED);
        let result = SearchSchema::from_schema(builder.build());
        assert!(matches!(result, Err(SearchError::SchemaMismatch(_))));
    }
}

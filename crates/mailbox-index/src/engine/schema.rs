//! Tantivy schema definition for mailbox indexing

use anyhow::Result;
use tantivy::Index;
use tantivy::schema::{
    FAST, Field, INDEXED, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing,
    TextOptions,
};
use tantivy::tokenizer::{TextAnalyzer, WhitespaceTokenizer};

/// Tokenizer for text fields; content arrives already analyzed
pub const TOKENS_TOKENIZER: &str = "mailidx_tokens";

/// Value indexed in the attachment field of any document with attachments
pub const ANY_ATTACHMENT: &str = "any";

/// Build the Tantivy schema for mailbox indexing
///
/// Fields indexed:
/// - item_id, index_id, mod_content: item identity and mutation sequence
/// - item_type: exact match item type
/// - content, subject, from, to: full-text tokens
/// - from_domain, to_domain, attachment, object: browseable keywords
/// - date, size, appt_start, appt_end: range queries
/// - sort_date, sort_name, sort_subject: stored sort keys
/// - task_due, task_status, task_percent: task attributes
pub fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    builder.add_i64_field("item_id", INDEXED | STORED | FAST);
    builder.add_i64_field("index_id", STORED);
    builder.add_i64_field("mod_content", STORED);
    builder.add_text_field("item_type", STRING | STORED);

    // Positions are kept so phrase support can be added without reindexing
    let text_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_index_option(IndexRecordOption::WithFreqsAndPositions)
            .set_tokenizer(TOKENS_TOKENIZER),
    );
    builder.add_text_field("content", text_opts.clone());
    builder.add_text_field("subject", text_opts.clone());
    builder.add_text_field("from", text_opts.clone());
    builder.add_text_field("to", text_opts);

    builder.add_text_field("from_domain", STRING);
    builder.add_text_field("to_domain", STRING);
    builder.add_text_field("attachment", STRING);
    builder.add_text_field("object", STRING);

    builder.add_i64_field("date", INDEXED | STORED | FAST);
    builder.add_i64_field("size", INDEXED | STORED | FAST);
    builder.add_i64_field("appt_start", INDEXED | FAST);
    builder.add_i64_field("appt_end", INDEXED | FAST);

    builder.add_text_field("sort_date", STRING | STORED);
    builder.add_text_field("sort_name", STRING | STORED);
    builder.add_text_field("sort_subject", STRING | STORED);

    builder.add_i64_field("task_due", STORED);
    builder.add_text_field("task_status", STRING | STORED);
    builder.add_i64_field("task_percent", STORED);

    builder.build()
}

/// Register the tokenizers the schema refers to
pub fn register_tokenizers(index: &Index) {
    index.tokenizers().register(
        TOKENS_TOKENIZER,
        TextAnalyzer::builder(WhitespaceTokenizer::default()).build(),
    );
}

/// Field handles for quick access during indexing and searching
#[derive(Debug, Clone, Copy)]
pub struct SchemaFields {
    pub item_id: Field,
    pub index_id: Field,
    pub mod_content: Field,
    pub item_type: Field,
    pub content: Field,
    pub subject: Field,
    pub from: Field,
    pub to: Field,
    pub from_domain: Field,
    pub to_domain: Field,
    pub attachment: Field,
    pub object: Field,
    pub date: Field,
    pub size: Field,
    pub appt_start: Field,
    pub appt_end: Field,
    pub sort_date: Field,
    pub sort_name: Field,
    pub sort_subject: Field,
    pub task_due: Field,
    pub task_status: Field,
    pub task_percent: Field,
}

impl SchemaFields {
    /// Create field handles from a schema
    pub fn new(schema: &Schema) -> Result<Self> {
        Ok(Self {
            item_id: schema.get_field("item_id")?,
            index_id: schema.get_field("index_id")?,
            mod_content: schema.get_field("mod_content")?,
            item_type: schema.get_field("item_type")?,
            content: schema.get_field("content")?,
            subject: schema.get_field("subject")?,
            from: schema.get_field("from")?,
            to: schema.get_field("to")?,
            from_domain: schema.get_field("from_domain")?,
            to_domain: schema.get_field("to_domain")?,
            attachment: schema.get_field("attachment")?,
            object: schema.get_field("object")?,
            date: schema.get_field("date")?,
            size: schema.get_field("size")?,
            appt_start: schema.get_field("appt_start")?,
            appt_end: schema.get_field("appt_end")?,
            sort_date: schema.get_field("sort_date")?,
            sort_name: schema.get_field("sort_name")?,
            sort_subject: schema.get_field("sort_subject")?,
            task_due: schema.get_field("task_due")?,
            task_status: schema.get_field("task_status")?,
            task_percent: schema.get_field("task_percent")?,
        })
    }
}

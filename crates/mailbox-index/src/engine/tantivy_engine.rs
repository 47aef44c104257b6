//! Index engine implementation using Tantivy

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use log::{debug, info};
use regex::Regex;
use tantivy::collector::DocSetCollector;
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, EmptyQuery, Occur, Query, RangeQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, Term, Value};
use tantivy::{DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyDocument};

use crate::models::{
    IndexDocument, IndexItem, ItemId, ItemType, ModSeq, TaskInfo, TaskStatus,
};
use crate::query::{KeywordField, NumericField, QueryOp, TextField};

use super::schema::{ANY_ATTACHMENT, SchemaFields, build_schema, register_tokenizers};
use super::{
    Analyzer, BrowseTerm, DocRef, IndexEngine, IndexSearcher, NativeSort, SearchHit, SortField,
    SortType, TermField,
};

/// Default heap size for index writer (50MB)
pub const DEFAULT_HEAP_SIZE: usize = 50_000_000;

/// Upper bound on terms a single wildcard may expand to
const MAX_WILDCARD_TERMS: usize = 1000;

/// Where an index lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexLocation {
    InMemory,
    Directory(PathBuf),
}

#[derive(Debug, Default)]
struct IoCounters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    open_searchers: AtomicUsize,
}

/// Tantivy index for one mailbox
pub struct TantivyEngine {
    location: IndexLocation,
    writer_heap_bytes: usize,
    index: Index,
    reader: IndexReader,
    fields: SchemaFields,
    writer: Option<IndexWriter>,
    bulk: bool,
    counters: Arc<IoCounters>,
}

impl std::fmt::Debug for TantivyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyEngine")
            .field("location", &self.location)
            .field("index", &"<tantivy::Index>")
            .field("bulk", &self.bulk)
            .finish()
    }
}

impl TantivyEngine {
    /// Open or create an index
    pub fn open(location: IndexLocation, writer_heap_bytes: usize) -> Result<Self> {
        Self::open_with_counters(location, writer_heap_bytes, Arc::default())
    }

    /// Create an in-memory index (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::open(IndexLocation::InMemory, DEFAULT_HEAP_SIZE)
    }

    fn open_with_counters(
        location: IndexLocation,
        writer_heap_bytes: usize,
        counters: Arc<IoCounters>,
    ) -> Result<Self> {
        let schema = build_schema();
        let index = match &location {
            IndexLocation::InMemory => Index::create_in_ram(schema.clone()),
            IndexLocation::Directory(path) => {
                std::fs::create_dir_all(path).context("Failed to create index directory")?;
                let dir = MmapDirectory::open(path).context("Failed to open index directory")?;
                Index::open_or_create(dir, schema.clone())
                    .context("Failed to open or create index")?
            }
        };
        register_tokenizers(&index);

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .context("Failed to create index reader")?;

        let fields = SchemaFields::new(&schema)?;

        Ok(Self {
            location,
            writer_heap_bytes,
            index,
            reader,
            fields,
            writer: None,
            bulk: false,
            counters,
        })
    }

    /// Get or create the writer
    fn writer(&mut self) -> Result<&mut IndexWriter> {
        if self.writer.is_none() {
            let writer = self
                .index
                .writer_with_num_threads(1, self.writer_heap_bytes)
                .context("Failed to create index writer")?;
            self.writer = Some(writer);
        }
        self.writer
            .as_mut()
            .ok_or_else(|| anyhow!("index writer unavailable"))
    }

    fn term_field(&self, field: TermField) -> Field {
        match field {
            TermField::Content => self.fields.content,
            TermField::Subject => self.fields.subject,
            TermField::From => self.fields.from,
            TermField::To => self.fields.to,
            TermField::FromDomain => self.fields.from_domain,
            TermField::ToDomain => self.fields.to_domain,
            TermField::Attachment => self.fields.attachment,
            TermField::Object => self.fields.object,
        }
    }
}

impl IndexEngine for TantivyEngine {
    fn begin_write(&mut self) -> Result<()> {
        self.writer()?;
        self.bulk = true;
        Ok(())
    }

    fn end_write(&mut self) {
        self.bulk = false;
    }

    fn add_documents(
        &mut self,
        item: &IndexItem,
        mod_seq: ModSeq,
        documents: &[IndexDocument],
        analyzer: &Analyzer,
        delete_first: bool,
    ) -> Result<()> {
        let docs: Vec<TantivyDocument> = documents
            .iter()
            .map(|doc| build_document(&self.fields, analyzer, item, mod_seq, doc))
            .collect();
        let bytes: usize = documents.iter().map(IndexDocument::byte_len).sum();
        let item_field = self.fields.item_id;

        let writer = self.writer()?;
        if delete_first {
            writer.delete_term(Term::from_field_i64(item_field, i64::from(item.id.value())));
        }
        for doc in docs {
            writer
                .add_document(doc)
                .with_context(|| format!("Failed to add document for item {}", item.id))?;
        }

        self.counters
            .bytes_written
            .fetch_add(bytes as u64, AtomicOrdering::Relaxed);
        Ok(())
    }

    fn delete_documents(&mut self, ids: &[ItemId]) -> Result<Vec<ItemId>> {
        let item_field = self.fields.item_id;
        let writer = self.writer()?;
        for id in ids {
            writer.delete_term(Term::from_field_i64(item_field, i64::from(id.value())));
        }
        Ok(ids.to_vec())
    }

    fn delete_all_documents(&mut self) -> Result<()> {
        self.writer()?
            .delete_all_documents()
            .context("Failed to clear index")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.commit().context("Failed to commit index")?;
        }
        self.reader.reload().context("Failed to reload index reader")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.rollback().context("Failed to roll back index")?;
        }
        Ok(())
    }

    fn open_searcher(&self) -> Result<Box<dyn IndexSearcher>> {
        Ok(Box::new(TantivySearcher::new(
            self.reader.searcher(),
            self.fields,
            Arc::clone(&self.counters),
        )))
    }

    fn browse_terms(&self, field: TermField, pattern: Option<&Regex>) -> Result<Vec<BrowseTerm>> {
        let tfield = self.term_field(field);
        let searcher = self.reader.searcher();
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();

        for segment in searcher.segment_readers() {
            let inverted = segment.inverted_index(tfield)?;
            let mut stream = inverted.terms().stream()?;
            while stream.advance() {
                let text = String::from_utf8_lossy(stream.key());
                if field == TermField::Attachment && text == ANY_ATTACHMENT {
                    continue;
                }
                if pattern.is_some_and(|re| !re.is_match(&text)) {
                    continue;
                }
                *counts.entry(text.into_owned()).or_default() +=
                    u64::from(stream.value().doc_freq);
            }
        }

        Ok(counts
            .into_iter()
            .map(|(text, freq)| BrowseTerm { text, freq })
            .collect())
    }

    fn expand_prefix(
        &self,
        field: TermField,
        prefix: &str,
        max: usize,
    ) -> Result<(Vec<String>, bool)> {
        prefix_terms(&self.reader.searcher(), self.term_field(field), prefix, max)
    }

    fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    fn bytes_read(&self) -> u64 {
        self.counters.bytes_read.load(AtomicOrdering::Relaxed)
    }

    fn bytes_written(&self) -> u64 {
        self.counters.bytes_written.load(AtomicOrdering::Relaxed)
    }

    fn open_searchers(&self) -> usize {
        self.counters.open_searchers.load(AtomicOrdering::Relaxed)
    }

    fn evict(&mut self) {
        if self.bulk {
            debug!("Not evicting writer during bulk write");
            return;
        }
        self.writer = None;
    }

    fn delete_index(&mut self) -> Result<()> {
        self.writer = None;
        self.bulk = false;
        if let IndexLocation::Directory(path) = &self.location {
            if path.exists() {
                std::fs::remove_dir_all(path)
                    .with_context(|| format!("Failed to remove index at {}", path.display()))?;
            }
        }
        *self = Self::open_with_counters(
            self.location.clone(),
            self.writer_heap_bytes,
            Arc::clone(&self.counters),
        )?;
        info!("Deleted index at {:?}", self.location);
        Ok(())
    }
}

/// Build a Tantivy document for one item document
fn build_document(
    fields: &SchemaFields,
    analyzer: &Analyzer,
    item: &IndexItem,
    mod_seq: ModSeq,
    source: &IndexDocument,
) -> TantivyDocument {
    let mut doc = TantivyDocument::new();

    // Identity
    doc.add_i64(fields.item_id, i64::from(item.id.value()));
    doc.add_i64(fields.index_id, i64::from(item.index_id.value()));
    doc.add_i64(fields.mod_content, mod_seq.as_i64());
    doc.add_text(fields.item_type, item.item_type.as_str());

    // Sort keys
    let date_ms = item.date.timestamp_millis();
    doc.add_i64(fields.date, date_ms);
    doc.add_text(fields.sort_date, sort_date_key(date_ms));
    doc.add_i64(fields.size, i64::try_from(item.size).unwrap_or(i64::MAX));
    doc.add_text(fields.sort_name, &item.sort_sender);
    doc.add_text(fields.sort_subject, &item.sort_subject);

    // Text content
    if !source.content.is_empty() {
        doc.add_text(fields.content, analyzer.token_text(&source.content));
    }
    if !source.subject.is_empty() {
        doc.add_text(fields.subject, analyzer.token_text(&source.subject));
    }
    for address in &source.from {
        doc.add_text(fields.from, analyzer.token_text(address));
        if let Some(domain) = email_domain(address) {
            doc.add_text(fields.from_domain, domain);
        }
    }
    for address in &source.to {
        doc.add_text(fields.to, analyzer.token_text(address));
        if let Some(domain) = email_domain(address) {
            doc.add_text(fields.to_domain, domain);
        }
    }

    // Keywords
    if !source.attachments.is_empty() {
        doc.add_text(fields.attachment, ANY_ATTACHMENT);
    }
    for content_type in &source.attachments {
        doc.add_text(fields.attachment, content_type.trim().to_lowercase());
    }
    for object in &source.objects {
        doc.add_text(fields.object, object.trim().to_lowercase());
    }

    if let Some(span) = source.appointment {
        doc.add_i64(fields.appt_start, span.start_ms);
        doc.add_i64(fields.appt_end, span.end_ms);
    }

    if let Some(task) = source.task {
        if let Some(due) = task.due {
            doc.add_i64(fields.task_due, due.timestamp_millis());
        }
        doc.add_text(fields.task_status, task.status.as_str());
        doc.add_i64(fields.task_percent, i64::from(task.percent_complete));
    }

    doc
}

/// Fixed-width date key so string order matches chronological order
fn sort_date_key(date_ms: i64) -> String {
    format!("{:020}", date_ms.max(0))
}

/// Domain part of an address such as `Alice <alice@example.com>`
fn email_domain(address: &str) -> Option<String> {
    let (_, domain) = address.rsplit_once('@')?;
    let domain = domain
        .trim()
        .trim_end_matches('>')
        .trim()
        .to_lowercase();
    if domain.is_empty() { None } else { Some(domain) }
}

/// Terms of `field` beginning with `prefix`, across all segments
fn prefix_terms(
    searcher: &Searcher,
    field: Field,
    prefix: &str,
    max: usize,
) -> Result<(Vec<String>, bool)> {
    let mut terms = BTreeSet::new();
    for segment in searcher.segment_readers() {
        let inverted = segment.inverted_index(field)?;
        let mut stream = inverted.terms().range().ge(prefix.as_bytes()).into_stream()?;
        while stream.advance() {
            let key = stream.key();
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            terms.insert(String::from_utf8_lossy(key).into_owned());
        }
    }
    let complete = terms.len() <= max;
    Ok((terms.into_iter().take(max).collect(), complete))
}

fn encode_address(address: DocAddress) -> DocRef {
    DocRef((u64::from(address.segment_ord) << 32) | u64::from(address.doc_id))
}

fn decode_address(doc: DocRef) -> DocAddress {
    DocAddress::new((doc.0 >> 32) as u32, (doc.0 & u64::from(u32::MAX)) as u32)
}

fn stored_i64(doc: &TantivyDocument, field: Field) -> i64 {
    doc.get_first(field)
        .and_then(|v| v.as_i64())
        .unwrap_or_default()
}

fn stored_str(doc: &TantivyDocument, field: Field) -> &str {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Text(String),
    Number(i64),
}

struct Match {
    key: Option<SortKey>,
    item_id: i64,
    address: DocAddress,
}

/// Point-in-time searcher over one reader generation
struct TantivySearcher {
    searcher: Searcher,
    fields: SchemaFields,
    counters: Arc<IoCounters>,
}

impl TantivySearcher {
    fn new(searcher: Searcher, fields: SchemaFields, counters: Arc<IoCounters>) -> Self {
        counters.open_searchers.fetch_add(1, AtomicOrdering::Relaxed);
        Self {
            searcher,
            fields,
            counters,
        }
    }

    fn text_fields(&self, field: TextField) -> Vec<Field> {
        let f = &self.fields;
        match field {
            TextField::Any => vec![f.content, f.subject, f.from, f.to],
            TextField::Content => vec![f.content],
            TextField::Subject => vec![f.subject],
            TextField::From => vec![f.from],
            TextField::To => vec![f.to],
        }
    }

    fn keyword_field(&self, field: KeywordField) -> Field {
        match field {
            KeywordField::Type => self.fields.item_type,
            KeywordField::FromDomain => self.fields.from_domain,
            KeywordField::ToDomain => self.fields.to_domain,
            KeywordField::Attachment => self.fields.attachment,
            KeywordField::Object => self.fields.object,
        }
    }

    fn numeric_field(&self, field: NumericField) -> Field {
        match field {
            NumericField::Date => self.fields.date,
            NumericField::Size => self.fields.size,
            NumericField::AppointmentStart => self.fields.appt_start,
            NumericField::AppointmentEnd => self.fields.appt_end,
        }
    }

    /// Build a Tantivy query from a compiled operation
    fn build_query(&self, op: &QueryOp, analyzer: &Analyzer) -> Result<Box<dyn Query>> {
        match op {
            QueryOp::MatchAll => Ok(Box::new(AllQuery)),
            QueryOp::Text { field, text } => {
                let fields = self.text_fields(*field);
                let tokens = analyzer.tokens(text);
                // Text that analyzes to nothing does not constrain the search
                if tokens.is_empty() {
                    return Ok(Box::new(AllQuery));
                }
                let clauses = tokens
                    .iter()
                    .map(|token| {
                        let alternatives: Vec<Term> = fields
                            .iter()
                            .map(|f| Term::from_field_text(*f, token))
                            .collect();
                        (Occur::Must, any_term(alternatives))
                    })
                    .collect();
                Ok(Box::new(BooleanQuery::new(clauses)))
            }
            QueryOp::Prefix { field, prefix } => {
                let prefix = prefix.to_lowercase();
                let mut alternatives = Vec::new();
                for f in self.text_fields(*field) {
                    let (terms, complete) =
                        prefix_terms(&self.searcher, f, &prefix, MAX_WILDCARD_TERMS)?;
                    if !complete {
                        bail!("Wildcard '{}*' matches too many terms", prefix);
                    }
                    alternatives.extend(terms.iter().map(|t| Term::from_field_text(f, t)));
                }
                Ok(any_term(alternatives))
            }
            QueryOp::Keyword { field, value } => {
                let term = Term::from_field_text(self.keyword_field(*field), &value.to_lowercase());
                Ok(Box::new(TermQuery::new(term, IndexRecordOption::Basic)))
            }
            QueryOp::Range {
                field,
                lower,
                upper,
            } => {
                let f = self.numeric_field(*field);
                Ok(Box::new(RangeQuery::new(
                    lower.as_ref().map(|v| Term::from_field_i64(f, *v)),
                    upper.as_ref().map(|v| Term::from_field_i64(f, *v)),
                )))
            }
            QueryOp::ItemIds(ids) => {
                let terms = ids
                    .iter()
                    .map(|id| Term::from_field_i64(self.fields.item_id, i64::from(id.value())))
                    .collect();
                Ok(any_term(terms))
            }
            QueryOp::And(ops) => {
                if ops.is_empty() {
                    return Ok(Box::new(AllQuery));
                }
                let clauses = ops
                    .iter()
                    .map(|op| Ok((Occur::Must, self.build_query(op, analyzer)?)))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Box::new(BooleanQuery::new(clauses)))
            }
        }
    }

    fn sort_key(&self, doc: &TantivyDocument, sort: &NativeSort) -> SortKey {
        match sort.field {
            SortField::Name => SortKey::Text(stored_str(doc, self.fields.sort_name).to_lowercase()),
            SortField::Subject => {
                SortKey::Text(stored_str(doc, self.fields.sort_subject).to_lowercase())
            }
            SortField::Size => SortKey::Number(stored_i64(doc, self.fields.size)),
            SortField::Date => match sort.kind {
                SortType::String => {
                    SortKey::Text(stored_str(doc, self.fields.sort_date).to_string())
                }
                SortType::Numeric => SortKey::Number(stored_i64(doc, self.fields.date)),
            },
        }
    }
}

/// Query matching any of the given terms
fn any_term(mut terms: Vec<Term>) -> Box<dyn Query> {
    if terms.len() > 1 {
        let clauses = terms
            .into_iter()
            .map(|t| {
                let query: Box<dyn Query> = Box::new(TermQuery::new(t, IndexRecordOption::Basic));
                (Occur::Should, query)
            })
            .collect();
        return Box::new(BooleanQuery::new(clauses));
    }
    match terms.pop() {
        Some(term) => Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
        None => Box::new(EmptyQuery),
    }
}

impl IndexSearcher for TantivySearcher {
    fn search(
        &mut self,
        query: &QueryOp,
        sort: Option<&NativeSort>,
        analyzer: &Analyzer,
    ) -> Result<Vec<DocRef>> {
        let tantivy_query = self.build_query(query, analyzer)?;
        let addresses = self.searcher.search(tantivy_query.as_ref(), &DocSetCollector)?;

        let mut matches = Vec::with_capacity(addresses.len());
        let mut bytes = 0u64;
        for address in addresses {
            let doc: TantivyDocument = self.searcher.doc(address)?;
            let key = sort.map(|s| self.sort_key(&doc, s));
            bytes += 8 + key.as_ref().map_or(0, |k| match k {
                SortKey::Text(s) => s.len() as u64,
                SortKey::Number(_) => 8,
            });
            matches.push(Match {
                key,
                item_id: stored_i64(&doc, self.fields.item_id),
                address,
            });
        }
        self.counters
            .bytes_read
            .fetch_add(bytes, AtomicOrdering::Relaxed);

        let reverse = sort.is_some_and(|s| s.reverse);
        matches.sort_by(|a, b| {
            let by_key = a.key.cmp(&b.key);
            let by_key = if reverse { by_key.reverse() } else { by_key };
            by_key.then_with(|| {
                (a.address.segment_ord, a.address.doc_id)
                    .cmp(&(b.address.segment_ord, b.address.doc_id))
            })
        });

        // Items with several documents appear once, at their best position
        let mut seen = HashSet::new();
        matches.retain(|m| seen.insert(m.item_id));

        Ok(matches.into_iter().map(|m| encode_address(m.address)).collect())
    }

    fn load(&mut self, doc_ref: DocRef) -> Result<SearchHit> {
        let doc: TantivyDocument = self.searcher.doc(decode_address(doc_ref))?;
        let f = &self.fields;

        let item_id = u32::try_from(stored_i64(&doc, f.item_id)).context("Corrupt item id")?;
        let index_id = u32::try_from(stored_i64(&doc, f.index_id)).unwrap_or(item_id);
        let item_type: ItemType = stored_str(&doc, f.item_type).parse()?;
        let date = DateTime::<Utc>::from_timestamp_millis(stored_i64(&doc, f.date))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let task = TaskStatus::parse(stored_str(&doc, f.task_status)).map(|status| TaskInfo {
            due: doc
                .get_first(f.task_due)
                .and_then(|v| v.as_i64())
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            status,
            percent_complete: u8::try_from(stored_i64(&doc, f.task_percent).clamp(0, 100))
                .unwrap_or_default(),
        });

        let hit = SearchHit {
            item_id: ItemId(item_id),
            index_id: ItemId(index_id),
            item_type,
            mod_seq: ModSeq::from(stored_i64(&doc, f.mod_content)),
            date,
            size: u64::try_from(stored_i64(&doc, f.size)).unwrap_or_default(),
            sort_subject: stored_str(&doc, f.sort_subject).to_string(),
            sort_sender: stored_str(&doc, f.sort_name).to_string(),
            task,
        };

        let bytes = 64 + hit.sort_subject.len() + hit.sort_sender.len();
        self.counters
            .bytes_read
            .fetch_add(bytes as u64, AtomicOrdering::Relaxed);
        Ok(hit)
    }
}

impl Drop for TantivySearcher {
    fn drop(&mut self) {
        self.counters
            .open_searchers
            .fetch_sub(1, AtomicOrdering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::ops::Bound;

    use chrono::TimeZone;

    use super::*;

    fn item(id: u32, subject: &str, sender: &str, size: u64, day: u32) -> IndexItem {
        IndexItem::new(ItemId(id), ItemType::Message)
            .sort_subject(subject)
            .sort_sender(sender)
            .size(size)
            .date(Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap())
    }

    fn add(engine: &mut TantivyEngine, item: &IndexItem, docs: &[IndexDocument]) {
        engine
            .add_documents(item, ModSeq::Sequenced(1), docs, &Analyzer::standard(), true)
            .unwrap();
    }

    fn populated() -> TantivyEngine {
        let mut engine = TantivyEngine::in_memory().unwrap();
        add(
            &mut engine,
            &item(1, "Quarterly budget", "alice", 300, 1),
            &[IndexDocument::new("numbers for the quarterly budget")
                .subject("Quarterly budget")
                .from_address("Alice <alice@example.com>")
                .to_address("bob@corp.test")
                .attachment("application/pdf")],
        );
        add(
            &mut engine,
            &item(2, "Lunch", "bob", 100, 3),
            &[IndexDocument::new("tacos on friday")
                .subject("Lunch")
                .from_address("bob@corp.test")],
        );
        add(
            &mut engine,
            &item(3, "Budget review", "carol", 200, 2),
            &[
                IndexDocument::new("budget review notes").subject("Budget review"),
                IndexDocument::new("attachment text mentioning budget").attachment("text/plain"),
            ],
        );
        engine.commit().unwrap();
        engine
    }

    fn search(engine: &TantivyEngine, op: QueryOp, sort: Option<NativeSort>) -> Vec<u32> {
        let mut searcher = engine.open_searcher().unwrap();
        let refs = searcher
            .search(&op, sort.as_ref(), &Analyzer::standard())
            .unwrap();
        refs.into_iter()
            .map(|r| searcher.load(r).unwrap().item_id.value())
            .collect()
    }

    fn text(s: &str) -> QueryOp {
        QueryOp::Text {
            field: TextField::Any,
            text: s.to_string(),
        }
    }

    #[test]
    fn test_text_search_dedupes_items() {
        let engine = populated();
        let mut ids = search(&engine, text("budget"), None);
        ids.sort();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_field_search() {
        let engine = populated();
        let op = QueryOp::Text {
            field: TextField::From,
            text: "alice".to_string(),
        };
        assert_eq!(search(&engine, op, None), vec![1]);
    }

    #[test]
    fn test_sorted_search() {
        let engine = populated();
        let size_asc = NativeSort {
            field: SortField::Size,
            kind: SortType::Numeric,
            reverse: false,
        };
        assert_eq!(search(&engine, QueryOp::MatchAll, Some(size_asc)), vec![2, 3, 1]);

        let date_desc = NativeSort {
            field: SortField::Date,
            kind: SortType::String,
            reverse: true,
        };
        assert_eq!(search(&engine, QueryOp::MatchAll, Some(date_desc)), vec![2, 3, 1]);

        let name_asc = NativeSort {
            field: SortField::Name,
            kind: SortType::String,
            reverse: false,
        };
        assert_eq!(search(&engine, QueryOp::MatchAll, Some(name_asc)), vec![1, 2, 3]);
    }

    #[test]
    fn test_keyword_and_range() {
        let engine = populated();
        let has_attachment = QueryOp::Keyword {
            field: KeywordField::Attachment,
            value: ANY_ATTACHMENT.to_string(),
        };
        let mut ids = search(&engine, has_attachment, None);
        ids.sort();
        assert_eq!(ids, vec![1, 3]);

        let larger = QueryOp::Range {
            field: NumericField::Size,
            lower: Bound::Excluded(150),
            upper: Bound::Unbounded,
        };
        let mut ids = search(&engine, larger, None);
        ids.sort();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_item_ids_query() {
        let engine = populated();
        let mut ids = search(&engine, QueryOp::ItemIds(vec![ItemId(2), ItemId(3)]), None);
        ids.sort();
        assert_eq!(ids, vec![2, 3]);
        assert!(search(&engine, QueryOp::ItemIds(vec![]), None).is_empty());
    }

    #[test]
    fn test_delete_first_replaces_documents() {
        let mut engine = populated();
        add(
            &mut engine,
            &item(2, "Dinner", "bob", 100, 3),
            &[IndexDocument::new("pizza on saturday")],
        );
        engine.commit().unwrap();
        assert!(search(&engine, text("tacos"), None).is_empty());
        assert_eq!(search(&engine, text("pizza"), None), vec![2]);
    }

    #[test]
    fn test_delete_documents() {
        let mut engine = populated();
        let deleted = engine.delete_documents(&[ItemId(1)]).unwrap();
        assert_eq!(deleted, vec![ItemId(1)]);
        engine.commit().unwrap();
        assert_eq!(search(&engine, text("quarterly"), None), Vec::<u32>::new());
    }

    #[test]
    fn test_browse_domains() {
        let engine = populated();
        let terms = engine.browse_terms(TermField::FromDomain, None).unwrap();
        assert_eq!(
            terms,
            vec![
                BrowseTerm {
                    text: "corp.test".to_string(),
                    freq: 1
                },
                BrowseTerm {
                    text: "example.com".to_string(),
                    freq: 1
                },
            ]
        );

        let pattern = Regex::new("^exa").unwrap();
        let terms = engine
            .browse_terms(TermField::FromDomain, Some(&pattern))
            .unwrap();
        assert_eq!(terms.len(), 1);

        let attachments = engine.browse_terms(TermField::Attachment, None).unwrap();
        let names: Vec<_> = attachments.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(names, vec!["application/pdf", "text/plain"]);
    }

    #[test]
    fn test_prefix_expansion() {
        let engine = populated();
        let (terms, complete) = engine.expand_prefix(TermField::Content, "bu", 10).unwrap();
        assert_eq!(terms, vec!["budget"]);
        assert!(complete);

        let (terms, complete) = engine.expand_prefix(TermField::Content, "", 2).unwrap();
        assert_eq!(terms.len(), 2);
        assert!(!complete);

        let op = QueryOp::Prefix {
            field: TextField::Any,
            prefix: "tac".to_string(),
        };
        assert_eq!(search(&engine, op, None), vec![2]);
    }

    #[test]
    fn test_searcher_release_is_counted() {
        let engine = populated();
        let searcher = engine.open_searcher().unwrap();
        assert_eq!(engine.open_searchers(), 1);
        drop(searcher);
        assert_eq!(engine.open_searchers(), 0);
    }

    #[test]
    fn test_rollback_discards_uncommitted() {
        let mut engine = populated();
        add(
            &mut engine,
            &item(9, "Draft", "dave", 10, 4),
            &[IndexDocument::new("uncommitted words")],
        );
        engine.rollback().unwrap();
        engine.commit().unwrap();
        assert!(search(&engine, text("uncommitted"), None).is_empty());
        assert_eq!(engine.num_docs(), 4);
    }

    #[test]
    fn test_delete_index_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let location = IndexLocation::Directory(dir.path().join("idx"));
        let mut engine = TantivyEngine::open(location, DEFAULT_HEAP_SIZE).unwrap();
        add(
            &mut engine,
            &item(1, "Hello", "alice", 10, 1),
            &[IndexDocument::new("hello world")],
        );
        engine.commit().unwrap();
        assert_eq!(engine.num_docs(), 1);

        engine.delete_index().unwrap();
        assert_eq!(engine.num_docs(), 0);
        assert!(engine.bytes_written() > 0);
    }

    #[test]
    fn test_loaded_hit_fields() {
        let mut engine = TantivyEngine::in_memory().unwrap();
        let task = TaskInfo {
            due: Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
            status: TaskStatus::InProgress,
            percent_complete: 40,
        };
        let it = IndexItem::new(ItemId(5), ItemType::Task).sort_subject("Ship it");
        engine
            .add_documents(
                &it,
                ModSeq::OutOfSequence,
                &[IndexDocument::new("ship the release").task(task)],
                &Analyzer::standard(),
                false,
            )
            .unwrap();
        engine.commit().unwrap();

        let mut searcher = engine.open_searcher().unwrap();
        let refs = searcher
            .search(&QueryOp::MatchAll, None, &Analyzer::standard())
            .unwrap();
        let hit = searcher.load(refs[0]).unwrap();
        assert_eq!(hit.item_type, ItemType::Task);
        assert_eq!(hit.mod_seq, ModSeq::OutOfSequence);
        assert_eq!(hit.task, Some(task));
        assert!(engine.bytes_read() > 0);
    }

    #[test]
    fn test_email_domain() {
        assert_eq!(email_domain("Alice <Alice@Example.COM>").as_deref(), Some("example.com"));
        assert_eq!(email_domain("no address"), None);
        assert_eq!(email_domain("trailing@"), None);
    }
}

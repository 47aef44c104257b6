//! mailidx - mailbox index administration tool
//!
//! Loads mailbox items from a JSON file, opens the mailbox's on-disk index
//! and runs indexing, search, reindex and inspection commands against it.
//! Every command prints JSON.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info};
use mailbox_index::{
    AddressField, InMemoryItemStore, IndexSettings, IndexableItem, Mailbox, MailboxId,
    OperationContext, Protocol, ReindexRequest, SearchParams, SortBy, StaticAccountConfig,
    handle_reindex, search,
};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(name = "mailidx")]
#[command(about = "Index and search a mailbox")]
#[command(version)]
struct Cli {
    /// JSON file with the mailbox's items
    #[arg(long, global = true)]
    items: Option<PathBuf>,

    /// Index root directory (defaults to the configured one)
    #[arg(long, global = true)]
    index_dir: Option<PathBuf>,

    #[arg(long, global = true, default_value_t = 1)]
    mailbox_id: u32,

    /// Account the mailbox belongs to
    #[arg(long, global = true, default_value = "local")]
    account: String,

    /// Text analyzer: standard, english or folding
    #[arg(long, global = true)]
    analyzer: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store and index every item from --items
    Index {
        /// Commit after this many items (0 = once at the end)
        #[arg(long, default_value_t = 0)]
        batch_size: usize,
    },
    /// Run a query
    Search {
        query: String,
        /// Sort name, e.g. dateDesc, subjAsc, taskDueAsc
        #[arg(long, default_value = "dateDesc")]
        sort: String,
        /// Calendar window start, ms since the epoch
        #[arg(long, default_value_t = 0)]
        cal_start: i64,
        /// Calendar window end, ms since the epoch
        #[arg(long, default_value_t = 0)]
        cal_end: i64,
        /// Treat the text index as stale
        #[arg(long)]
        out_of_sync: bool,
    },
    /// Rebuild the index from --items and wait for it to finish
    ///
    /// Without --types or --ids the whole index is rebuilt, which requires
    /// --items.
    Reindex {
        /// Comma-separated item types
        #[arg(long, conflicts_with = "ids")]
        types: Option<String>,
        /// Comma-separated item ids
        #[arg(long)]
        ids: Option<String>,
    },
    /// List indexed terms
    Browse {
        #[arg(value_enum)]
        field: BrowseField,
        /// Regular expression the terms must match
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Show index statistics
    Stats,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BrowseField {
    FromDomains,
    ToDomains,
    Attachments,
    Objects,
}

fn load_items(path: Option<&PathBuf>) -> Result<Vec<IndexableItem>> {
    match path {
        Some(path) => config::load_json_file(path),
        None => Ok(Vec::new()),
    }
}

fn open_mailbox(
    cli: &Cli,
    settings: &IndexSettings,
    items: Vec<IndexableItem>,
    batch_size: usize,
) -> Result<Arc<Mailbox>> {
    let index_root = match &cli.index_dir {
        Some(dir) => dir.clone(),
        None => settings.resolve_index_root()?,
    };
    std::fs::create_dir_all(&index_root)
        .with_context(|| format!("Failed to create index directory: {}", index_root.display()))?;

    let mut account = StaticAccountConfig::new(cli.account.clone()).with_batch_size(batch_size);
    if let Some(analyzer) = cli.analyzer.as_ref().or(settings.default_analyzer.as_ref()) {
        account = account.with_analyzer(analyzer.clone());
    }

    info!(
        "Opening mailbox {} with {} items at {}",
        cli.mailbox_id,
        items.len(),
        index_root.display()
    );
    Ok(Mailbox::builder(MailboxId(cli.mailbox_id))
        .account(Arc::new(account))
        .store(Arc::new(InMemoryItemStore::with_items(items)))
        .index_root(index_root, settings.writer_heap_bytes)
        .build())
}

/// A full rebuild clears the index before re-adding the store's items
fn check_reindex_source(
    types: Option<&str>,
    ids: Option<&str>,
    items: Option<&Path>,
) -> Result<()> {
    if types.is_none() && ids.is_none() && items.is_none() {
        bail!("a whole-mailbox reindex needs --items");
    }
    Ok(())
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let settings = IndexSettings::load()?;
    let items = load_items(cli.items.as_ref())?;

    match &cli.command {
        Command::Index { batch_size } => {
            let mailbox = open_mailbox(&cli, &settings, Vec::new(), *batch_size)?;
            let count = items.len();
            mailbox.add_items(items)?;
            let index = mailbox.index()?;
            print_json(&json!({
                "indexed": count,
                "watermark": mailbox.index_watermark(),
                "num_docs": index.num_docs()?,
            }))
        }
        Command::Search {
            query,
            sort,
            cal_start,
            cal_end,
            out_of_sync,
        } => {
            let mailbox = open_mailbox(&cli, &settings, items, 0)?;
            let mut params = SearchParams::new(query.clone())
                .sort(SortBy::parse(sort))
                .calendar_window(*cal_start, *cal_end);
            let results = search(
                Protocol::Admin,
                &OperationContext::new(cli.account.clone()),
                &mailbox,
                &mut params,
                *out_of_sync,
            )?;
            let sort = results.sort();
            let hits = results.collect_hits()?;
            print_json(&json!({
                "query": params.query,
                "sort": sort.name(),
                "hits": hits,
            }))
        }
        Command::Reindex { types, ids } => {
            check_reindex_source(types.as_deref(), ids.as_deref(), cli.items.as_deref())?;
            let mailbox = open_mailbox(&cli, &settings, items, 0)?;
            let index = mailbox.index()?;
            let request = ReindexRequest {
                action: "start".to_string(),
                types: types.clone(),
                ids: ids.clone(),
            };
            let started = handle_reindex(&index, &request)?;
            index.wait_for_reindex();
            let finished = handle_reindex(&index, &ReindexRequest::new("status"))?;
            print_json(&json!({
                "start": started,
                "finished": finished,
            }))
        }
        Command::Browse { field, pattern } => {
            let mailbox = open_mailbox(&cli, &settings, items, 0)?;
            let index = mailbox.index()?;
            let pattern = pattern.as_deref();
            let terms = match field {
                BrowseField::FromDomains => index.browse_domains(AddressField::From, pattern)?,
                BrowseField::ToDomains => index.browse_domains(AddressField::To, pattern)?,
                BrowseField::Attachments => index.browse_attachments(pattern)?,
                BrowseField::Objects => index.browse_objects(pattern)?,
            };
            print_json(&json!({ "terms": terms }))
        }
        Command::Stats => {
            let mailbox = open_mailbox(&cli, &settings, items, 0)?;
            let index = mailbox.index()?;
            print_json(&json!({
                "mailbox_id": mailbox.id(),
                "analyzer": index.analyzer()?.name(),
                "num_docs": index.num_docs()?,
                "bytes_read": index.bytes_read()?,
                "bytes_written": index.bytes_written()?,
                "reindex": index.get_reindex_status(),
            }))
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run(Cli::parse()) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

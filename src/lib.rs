//! xlsx-fill: write CSV/TSV shipment records into an xlsx template.
//!
//! Records are resolved against command-line defaults into the eleven known
//! fields and written to the template's active sheet from row 4 down. The
//! template itself is never modified; the result goes to a new file.

pub mod cli;
pub mod fields;
pub mod records;
pub mod sheet;
pub mod workbook;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, debug, info};

use crate::{cli::Cli, fields::FilledRow, records::RecordSource};

pub use workbook::TemplateBook;

/// Rows 1-3 belong to the template's title block.
pub const FIRST_DATA_ROW: u32 = 4;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging(verbose: bool) {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if verbose {
            builder.filter_module("xlsx_fill", LevelFilter::Debug);
        } else if env::var("RUST_LOG").is_err() {
            builder.filter_module("xlsx_fill", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    execute(&cli)
}

pub fn execute(cli: &Cli) -> Result<()> {
    let delimiter = records::resolve_input_delimiter(cli.input.as_deref(), cli.delimiter);
    info!(
        "Reading records from {} with delimiter '{}'",
        describe_input(cli),
        printable_delimiter(delimiter)
    );
    let source = RecordSource::open(cli.input.as_deref(), cli.field_names(), delimiter)?;
    let rows = fields::materialize(source, &cli.defaults())?;
    for (offset, row) in rows.iter().enumerate() {
        debug!("Fill row {}: {:?}", FIRST_DATA_ROW + offset as u32, row.values());
    }

    let mut book = TemplateBook::open(&cli.template)?;
    book.fill_rows(FIRST_DATA_ROW, rows.iter().map(FilledRow::cells))?;
    book.save(&cli.output)?;
    info!(
        "Wrote {} row(s) to sheet '{}' of {:?}",
        rows.len(),
        book.sheet_name(),
        cli.output
    );
    Ok(())
}

fn describe_input(cli: &Cli) -> String {
    match cli.input.as_deref() {
        Some(path) if records::is_dash(path) => "stdin".to_string(),
        Some(path) => format!("{path:?}"),
        None => "no input (defaults only)".to_string(),
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}

//! Delimited-text input: path, stdin (`-`) or nothing at all.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use anyhow::{Context, Result};
use log::debug;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

/// One input row keyed by header (or explicit) field names.
///
/// A key whose value is `None` is still present: the row simply ran out of
/// values before reaching it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pairs: Vec<(String, Option<String>)>,
}

impl Record {
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, Option<String>)>,
    {
        Self {
            pairs: pairs.into_iter().collect(),
        }
    }

    fn from_row(keys: &[String], row: &csv::StringRecord) -> Self {
        let mut values = row.iter();
        Self::from_pairs(
            keys.iter()
                .map(|key| (key.clone(), values.next().map(str::to_owned))),
        )
    }

    /// `None` when the key is absent, `Some(None)` when present without a value.
    /// Repeated keys resolve to the last occurrence.
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_deref())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

/// `.tsv` inputs default to tab, everything else (stdin and no input included)
/// to comma.
pub fn resolve_input_delimiter(path: Option<&Path>, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| {
        match path.and_then(|p| p.extension()).and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
            _ => DEFAULT_CSV_DELIMITER,
        }
    })
}

fn open_input(input: Option<&Path>) -> Result<Box<dyn Read>> {
    Ok(match input {
        Some(path) if is_dash(path) => Box::new(io::stdin().lock()),
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Opening input file {path:?}"))?,
        )),
        None => Box::new(io::empty()),
    })
}

/// Lazy, single-pass sequence of [`Record`]s.
pub struct RecordSource {
    keys: Vec<String>,
    rows: csv::StringRecordsIntoIter<Box<dyn Read>>,
}

impl RecordSource {
    /// With `fields` every line is data and values are assigned positionally;
    /// without, the first line is the header.
    pub fn open(input: Option<&Path>, fields: Option<&[String]>, delimiter: u8) -> Result<Self> {
        let reader = open_input(input)?;
        Self::from_reader(reader, fields, delimiter)
    }

    pub fn from_reader(
        reader: Box<dyn Read>,
        fields: Option<&[String]>,
        delimiter: u8,
    ) -> Result<Self> {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .has_headers(fields.is_none())
            .delimiter(delimiter)
            .double_quote(true)
            .flexible(true);
        let mut csv_reader = builder.from_reader(reader);

        let keys = match fields {
            Some(names) => names.to_vec(),
            None => csv_reader
                .headers()
                .context("Reading input header")?
                .iter()
                .map(str::to_owned)
                .collect(),
        };
        debug!("Input field names: {keys:?}");

        Ok(Self {
            keys,
            rows: csv_reader.into_records(),
        })
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Iterator for RecordSource {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.rows.next()?;
        Some(match row {
            Ok(row) => Ok(Record::from_row(&self.keys, &row)),
            Err(err) => {
                let context = match err.position() {
                    Some(pos) => format!("Reading input record at line {}", pos.line()),
                    None => "Reading input record".to_string(),
                };
                Err(anyhow::Error::new(err).context(context))
            }
        })
    }
}

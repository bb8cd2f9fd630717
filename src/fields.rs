//! Known shipment fields and the record → row resolution.

use std::fmt;

use anyhow::Result;

use crate::records::Record;

/// The eleven columns a filled template row carries, in sheet order (B..L).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldName {
    SenderName,
    SenderPhone,
    SenderEmail,
    PackageValue,
    StoreName,
    StoreId,
    ReceiverName,
    ReceiverPhone,
    ReceiverEmail,
    ReturnStoreName,
    ReturnStoreId,
}

pub const FIELD_COUNT: usize = 11;

impl FieldName {
    pub const ALL: [FieldName; FIELD_COUNT] = [
        FieldName::SenderName,
        FieldName::SenderPhone,
        FieldName::SenderEmail,
        FieldName::PackageValue,
        FieldName::StoreName,
        FieldName::StoreId,
        FieldName::ReceiverName,
        FieldName::ReceiverPhone,
        FieldName::ReceiverEmail,
        FieldName::ReturnStoreName,
        FieldName::ReturnStoreId,
    ];

    /// Key used to look the field up in an input record.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldName::SenderName => "sender_name",
            FieldName::SenderPhone => "sender_phone",
            FieldName::SenderEmail => "sender_email",
            FieldName::PackageValue => "package_value",
            FieldName::StoreName => "store_name",
            FieldName::StoreId => "store_id",
            FieldName::ReceiverName => "receiver_name",
            FieldName::ReceiverPhone => "receiver_phone",
            FieldName::ReceiverEmail => "receiver_email",
            FieldName::ReturnStoreName => "return_store_name",
            FieldName::ReturnStoreId => "return_store_id",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-field fallback values supplied on the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultValues {
    values: [Option<String>; FIELD_COUNT],
}

impl DefaultValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: FieldName, value: Option<String>) -> &mut Self {
        self.values[field.index()] = value;
        self
    }

    pub fn get(&self, field: FieldName) -> Option<&str> {
        self.values[field.index()].as_deref()
    }
}

/// One resolved data row. Column A of the template is the leading placeholder
/// and is never part of `values`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilledRow {
    values: [Option<String>; FIELD_COUNT],
}

impl FilledRow {
    pub fn get(&self, field: FieldName) -> Option<&str> {
        self.values[field.index()].as_deref()
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    /// Positional view as written to the sheet: the unset placeholder first,
    /// then the field values.
    pub fn cells(&self) -> impl Iterator<Item = Option<&str>> {
        std::iter::once(None).chain(self.values.iter().map(|v| v.as_deref()))
    }
}

/// Resolve every known field from `record`, falling back to `defaults` when
/// the record has no such key.
pub fn fill_row(record: &Record, defaults: &DefaultValues) -> FilledRow {
    let mut row = FilledRow::default();
    for field in FieldName::ALL {
        row.values[field.index()] = match record.get(field.as_str()) {
            Some(value) => value.map(str::to_owned),
            None => defaults.get(field).map(str::to_owned),
        };
    }
    row
}

/// Resolve all records. An empty source still yields one row built from the
/// defaults alone.
pub fn materialize<I>(records: I, defaults: &DefaultValues) -> Result<Vec<FilledRow>>
where
    I: IntoIterator<Item = Result<Record>>,
{
    let mut rows = Vec::new();
    for record in records {
        rows.push(fill_row(&record?, defaults));
    }
    if rows.is_empty() {
        rows.push(fill_row(&Record::default(), defaults));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, Option<&str>)]) -> Record {
        Record::from_pairs(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.map(str::to_owned))),
        )
    }

    #[test]
    fn record_value_wins_over_default() {
        let mut defaults = DefaultValues::new();
        defaults.set(FieldName::SenderName, Some("Default".into()));
        defaults.set(FieldName::PackageValue, Some("10".into()));

        let row = fill_row(&record(&[("sender_name", Some("Ann"))]), &defaults);
        assert_eq!(row.get(FieldName::SenderName), Some("Ann"));
        assert_eq!(row.get(FieldName::PackageValue), Some("10"));
        assert_eq!(row.get(FieldName::StoreId), None);
    }

    #[test]
    fn present_but_missing_value_does_not_fall_back() {
        let mut defaults = DefaultValues::new();
        defaults.set(FieldName::StoreId, Some("42".into()));

        let row = fill_row(&record(&[("store_id", None)]), &defaults);
        assert_eq!(row.get(FieldName::StoreId), None);
    }

    #[test]
    fn order_ignores_input_column_order() {
        let row = fill_row(
            &record(&[
                ("return_store_id", Some("9")),
                ("unknown", Some("x")),
                ("sender_name", Some("Ann")),
            ]),
            &DefaultValues::new(),
        );
        let values = row.values();
        assert_eq!(values[0].as_deref(), Some("Ann"));
        assert_eq!(values[FIELD_COUNT - 1].as_deref(), Some("9"));
        assert!(values[1..FIELD_COUNT - 1].iter().all(Option::is_none));
    }

    #[test]
    fn empty_source_yields_single_default_row() -> Result<()> {
        let mut defaults = DefaultValues::new();
        defaults.set(FieldName::ReceiverEmail, Some("r@example.com".into()));

        let rows = materialize(std::iter::empty(), &defaults)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get(FieldName::ReceiverEmail), Some("r@example.com"));

        let bare = materialize(std::iter::empty(), &DefaultValues::new())?;
        assert_eq!(bare, vec![FilledRow::default()]);
        Ok(())
    }

    #[test]
    fn cells_lead_with_placeholder() {
        let row = fill_row(&record(&[("sender_name", Some("Ann"))]), &DefaultValues::new());
        let cells: Vec<_> = row.cells().collect();
        assert_eq!(cells.len(), FIELD_COUNT + 1);
        assert_eq!(cells[0], None);
        assert_eq!(cells[1], Some("Ann"));
    }

    #[test]
    fn materialize_propagates_reader_errors() {
        let records = vec![Ok(Record::default()), Err(anyhow::anyhow!("bad line"))];
        assert!(materialize(records, &DefaultValues::new()).is_err());
    }
}

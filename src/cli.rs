use std::path::PathBuf;

use clap::Parser;

use crate::fields::{DefaultValues, FieldName};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Fill an xlsx template with shipment records from CSV/TSV input",
    long_about = None
)]
pub struct Cli {
    /// The source xlsx template
    #[arg(short = 't', long)]
    pub template: PathBuf,
    /// The output xlsx file
    #[arg(short = 'o', long)]
    pub output: PathBuf,
    /// Input CSV/TSV file; `-` reads standard input, omitted means no records
    #[arg(short = 'i', long, alias = "csv")]
    pub input: Option<PathBuf>,
    /// Field names for header-less input (repeatable or comma-separated)
    #[arg(
        short = 'f',
        long = "field",
        alias = "csv-fields",
        value_delimiter = ',',
        action = clap::ArgAction::Append
    )]
    pub fields: Vec<String>,
    /// Input delimiter (supports ',', 'tab', ';', '|'); defaults by extension
    #[arg(short = 'd', long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Log every resolved row
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// The sender name
    #[arg(long = "sender-name", alias = "sender_name", value_name = "VALUE")]
    pub sender_name: Option<String>,
    /// The sender phone
    #[arg(long = "sender-phone", alias = "sender_phone", value_name = "VALUE")]
    pub sender_phone: Option<String>,
    /// The sender email
    #[arg(long = "sender-email", alias = "sender_email", value_name = "VALUE")]
    pub sender_email: Option<String>,
    /// The package value
    #[arg(long = "package-value", alias = "package_value", value_name = "VALUE")]
    pub package_value: Option<String>,
    /// The store name
    #[arg(long = "store-name", alias = "store_name", value_name = "VALUE")]
    pub store_name: Option<String>,
    /// The store id
    #[arg(long = "store-id", alias = "store_id", value_name = "VALUE")]
    pub store_id: Option<String>,
    /// The receiver name
    #[arg(long = "receiver-name", alias = "receiver_name", value_name = "VALUE")]
    pub receiver_name: Option<String>,
    /// The receiver phone
    #[arg(long = "receiver-phone", alias = "receiver_phone", value_name = "VALUE")]
    pub receiver_phone: Option<String>,
    /// The receiver email
    #[arg(long = "receiver-email", alias = "receiver_email", value_name = "VALUE")]
    pub receiver_email: Option<String>,
    /// The return store name
    #[arg(
        long = "return-store-name",
        alias = "return_store_name",
        value_name = "VALUE"
    )]
    pub return_store_name: Option<String>,
    /// The return store id
    #[arg(long = "return-store-id", alias = "return_store_id", value_name = "VALUE")]
    pub return_store_id: Option<String>,
}

impl Cli {
    pub fn defaults(&self) -> DefaultValues {
        let mut defaults = DefaultValues::new();
        for field in FieldName::ALL {
            defaults.set(field, self.default_for(field).cloned());
        }
        defaults
    }

    fn default_for(&self, field: FieldName) -> Option<&String> {
        match field {
            FieldName::SenderName => self.sender_name.as_ref(),
            FieldName::SenderPhone => self.sender_phone.as_ref(),
            FieldName::SenderEmail => self.sender_email.as_ref(),
            FieldName::PackageValue => self.package_value.as_ref(),
            FieldName::StoreName => self.store_name.as_ref(),
            FieldName::StoreId => self.store_id.as_ref(),
            FieldName::ReceiverName => self.receiver_name.as_ref(),
            FieldName::ReceiverPhone => self.receiver_phone.as_ref(),
            FieldName::ReceiverEmail => self.receiver_email.as_ref(),
            FieldName::ReturnStoreName => self.return_store_name.as_ref(),
            FieldName::ReturnStoreId => self.return_store_id.as_ref(),
        }
    }

    /// Explicit field names, if any were given.
    pub fn field_names(&self) -> Option<&[String]> {
        (!self.fields.is_empty()).then_some(self.fields.as_slice())
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" | "\\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use quick_xml::{Reader, events::Event};
use tempfile::{TempDir, tempdir};
use zip::{CompressionMethod, ZipArchive, ZipWriter, write::FileOptions};

pub const SHEET: &str = "xl/worksheets/sheet1.xml";

/// Title block of the shipment template: rows 1-3, columns A..L.
pub const TITLE_ROWS: &str = concat!(
    r#"<row r="1"><c r="A1" t="inlineStr"><is><t>Shipments</t></is></c></row>"#,
    r#"<row r="3"><c r="A3" t="inlineStr"><is><t>No</t></is></c>"#,
    r#"<c r="B3" t="inlineStr"><is><t>Sender</t></is></c>"#,
    r#"<c r="L3" t="inlineStr"><is><t>Return store</t></is></c></row>"#,
);

/// Scratch directory that cleans up on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Single-sheet template with `rows` as its sheetData content.
    pub fn template(&self, name: &str, rows: &str) -> PathBuf {
        let path = self.join(name);
        write_template(&path, rows);
        path
    }
}

fn write_template(path: &Path, rows: &str) {
    let mut zout = ZipWriter::new(File::create(path).expect("create template"));
    let opt: FileOptions<'_, ()> =
        FileOptions::default().compression_method(CompressionMethod::Deflated);
    let parts = [
        (
            "[Content_Types].xml",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#.to_string(),
        ),
        (
            "_rels/.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#.to_string(),
        ),
        (
            "xl/workbook.xml",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Shipments" sheetId="1" r:id="rId1"/></sheets></workbook>"#.to_string(),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet1.xml"/></Relationships>"#.to_string(),
        ),
        (
            SHEET,
            format!(
                r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>{rows}</sheetData></worksheet>"#
            ),
        ),
    ];
    for (name, body) in parts {
        zout.start_file(name, opt).expect("start entry");
        zout.write_all(body.as_bytes()).expect("write entry");
    }
    zout.finish().expect("finish template");
}

pub fn read_entry(path: &Path, name: &str) -> String {
    let mut zip = ZipArchive::new(File::open(path).expect("open xlsx")).expect("xlsx archive");
    let mut out = String::new();
    zip.by_name(name)
        .expect("entry present")
        .read_to_string(&mut out)
        .expect("utf-8 entry");
    out
}

/// Text of every valued cell in the first sheet, keyed by coordinate.
pub fn cell_values(path: &Path) -> BTreeMap<String, String> {
    let xml = read_entry(path, SHEET);
    let mut reader = Reader::from_str(&xml);
    let mut cells = BTreeMap::new();
    let mut coord: Option<String> = None;
    let mut in_text = false;
    loop {
        match reader.read_event().expect("valid sheet xml") {
            Event::Start(e) if e.local_name().as_ref() == b"c" => {
                coord = e.attributes().flatten().find_map(|a| {
                    (a.key.as_ref() == b"r").then(|| String::from_utf8_lossy(&a.value).into_owned())
                });
            }
            Event::Start(e) if matches!(e.local_name().as_ref(), b"t" | b"v") => {
                in_text = true;
                if let Some(c) = &coord {
                    cells.entry(c.clone()).or_insert_with(String::new);
                }
            }
            Event::End(e) if matches!(e.local_name().as_ref(), b"t" | b"v") => in_text = false,
            Event::End(e) if e.local_name().as_ref() == b"c" => coord = None,
            Event::Text(t) if in_text => {
                if let Some(c) = &coord {
                    cells
                        .entry(c.clone())
                        .or_insert_with(String::new)
                        .push_str(&String::from_utf8_lossy(&t));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    cells
}

/// Valued cells of one row, in column order.
pub fn row_values(path: &Path, row: u32) -> Vec<(String, String)> {
    let suffix = row.to_string();
    cell_values(path)
        .into_iter()
        .filter(|(coord, _)| {
            coord.trim_start_matches(|c: char| c.is_ascii_alphabetic()) == suffix
        })
        .collect()
}

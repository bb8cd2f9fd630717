//! Row rewriting over raw worksheet XML.
//!
//! The sheet is scanned once with quick-xml to locate rows, cells,
//! `<sheetData>` and `<dimension>` by byte offset. Only the target rows (and
//! the dimension) are re-rendered; every other byte of the template is copied
//! through untouched.

use std::{borrow::Cow, collections::BTreeMap, ops::Range, sync::LazyLock};

use anyhow::{Context, Result, bail};
use log::debug;
use quick_xml::{
    Reader, Writer,
    events::{BytesStart, BytesText, Event},
};
use regex::Regex;

static CELL_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$?([A-Za-z]+)\$?([0-9]+)$").expect("valid cell ref regex"));

static OOXML_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_x[0-9A-Fa-f]{4}_").expect("valid escape regex"));

fn is_xml_illegal(c: char) -> bool {
    matches!(
        c,
        '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}'
    )
}

/// Encode characters XML 1.0 cannot carry as `_xHHHH_`. Text that already
/// looks like such an escape gets its underscore escaped (`_x005F_`) so it
/// reads back verbatim.
pub fn escape_ooxml(text: &str) -> Cow<'_, str> {
    if !text.contains(is_xml_illegal) && !OOXML_ESCAPE.is_match(text) {
        return Cow::Borrowed(text);
    }
    let text = OOXML_ESCAPE.replace_all(text, "_x005F_$0");
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_xml_illegal(c) {
            out.push_str(&format!("_x{:04X}_", c as u32));
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

/// 0-based column index to letters (0 -> "A", 26 -> "AA").
pub fn col_idx_to_letters(mut idx: usize) -> String {
    let mut s = String::new();
    loop {
        let rem = idx % 26;
        s.insert(0, (b'A' + rem as u8) as char);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    s
}

/// Column letters to 1-based column number ("A" -> 1, "AA" -> 27).
pub fn letters_to_col(s: &str) -> u32 {
    s.bytes().fold(0, |acc, b| {
        acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as u32
    })
}

/// Split "B12" into (column 2, row 12).
pub fn parse_cell_ref(coord: &str) -> Option<(u32, u32)> {
    let caps = CELL_REF.captures(coord)?;
    let row = caps[2].parse().ok()?;
    Some((letters_to_col(&caps[1]), row))
}

fn coord(col: u32, row: u32) -> String {
    format!("{}{}", col_idx_to_letters(col as usize - 1), row)
}

#[derive(Debug)]
struct CellSpan {
    col: u32,
    span: Range<usize>,
    style: Option<String>,
}

#[derive(Debug)]
struct RowSpan {
    num: u32,
    span: Range<usize>,
    open_tag: Range<usize>,
    self_closing: bool,
    cells: Vec<CellSpan>,
}

#[derive(Debug)]
enum SheetData {
    /// Offset of `</sheetData>`.
    Open { close: usize },
    /// `<sheetData/>`
    Empty(Range<usize>),
}

#[derive(Debug)]
struct Dimension {
    span: Range<usize>,
    reference: String,
}

#[derive(Debug)]
struct SheetLayout {
    rows: Vec<RowSpan>,
    max_col: u32,
    sheet_data: SheetData,
    dimension: Option<Dimension>,
}

fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes().with_checks(false).flatten().find_map(|a| {
        (a.key.as_ref() == key).then(|| String::from_utf8_lossy(&a.value).into_owned())
    })
}

fn scan(xml: &[u8]) -> Result<SheetLayout> {
    let mut reader = Reader::from_reader(xml);

    let mut rows = Vec::new();
    let mut max_col = 0u32;
    let mut sheet_data = None;
    let mut dimension = None;

    let mut current_row: Option<RowSpan> = None;
    let mut current_cell: Option<CellSpan> = None;
    let mut next_row = 1u32;
    let mut next_col = 1u32;

    loop {
        let start = reader.buffer_position() as usize;
        let ev = reader
            .read_event()
            .with_context(|| format!("malformed worksheet XML near byte {start}"))?;
        let end = reader.buffer_position() as usize;

        match ev {
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"row" => {
                let num = attr(e, b"r")
                    .and_then(|r| r.parse::<u32>().ok())
                    .unwrap_or(next_row);
                next_row = num + 1;
                next_col = 1;
                let row = RowSpan {
                    num,
                    span: start..end,
                    open_tag: start..end,
                    self_closing: matches!(ev, Event::Empty(_)),
                    cells: Vec::new(),
                };
                if row.self_closing {
                    rows.push(row);
                } else {
                    current_row = Some(row);
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"row" => {
                if let Some(mut row) = current_row.take() {
                    row.span.end = end;
                    rows.push(row);
                }
            }
            Event::Start(ref e) | Event::Empty(ref e)
                if current_row.is_some() && e.local_name().as_ref() == b"c" =>
            {
                let col = attr(e, b"r")
                    .and_then(|r| parse_cell_ref(&r))
                    .map(|(col, _)| col)
                    .unwrap_or(next_col);
                next_col = col + 1;
                max_col = max_col.max(col);
                let cell = CellSpan {
                    col,
                    span: start..end,
                    style: attr(e, b"s"),
                };
                if matches!(ev, Event::Empty(_)) {
                    if let Some(row) = current_row.as_mut() {
                        row.cells.push(cell);
                    }
                } else {
                    current_cell = Some(cell);
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"c" => {
                if let (Some(mut cell), Some(row)) = (current_cell.take(), current_row.as_mut()) {
                    cell.span.end = end;
                    row.cells.push(cell);
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"sheetData" => {
                sheet_data = Some(SheetData::Open { close: start });
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"sheetData" => {
                sheet_data = Some(SheetData::Empty(start..end));
            }
            Event::Empty(ref e) if e.local_name().as_ref() == b"dimension" => {
                if let Some(reference) = attr(e, b"ref") {
                    dimension = Some(Dimension {
                        span: start..end,
                        reference,
                    });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let Some(sheet_data) = sheet_data else {
        bail!("<sheetData> not found in worksheet");
    };
    Ok(SheetLayout {
        rows,
        max_col,
        sheet_data,
        dimension,
    })
}

/// Render one `<c>`; `None` when there is nothing left to keep.
fn render_cell(coord: &str, style: Option<&str>, value: Option<&str>) -> Result<Option<Vec<u8>>> {
    let mut writer = Writer::new(Vec::new());
    let mut c_elem = writer.create_element("c").with_attribute(("r", coord));
    if let Some(s) = style {
        c_elem = c_elem.with_attribute(("s", s));
    }
    match value {
        Some(text) => {
            c_elem
                .with_attribute(("t", "inlineStr"))
                .write_inner_content(|w| {
                    w.create_element("is").write_inner_content(|w2| {
                        let mut t_elem = w2.create_element("t");
                        if text.trim() != text {
                            t_elem = t_elem.with_attribute(("xml:space", "preserve"));
                        }
                        t_elem.write_text_content(BytesText::new(&escape_ooxml(text)))?;
                        Ok(())
                    })?;
                    Ok(())
                })?;
        }
        // cleared but still styled
        None if style.is_some() => {
            c_elem.write_empty()?;
        }
        None => return Ok(None),
    }
    Ok(Some(writer.into_inner()))
}

enum Piece<'a> {
    Raw(&'a [u8]),
    New(Vec<u8>),
}

fn render_row(
    xml: &[u8],
    row_num: u32,
    existing: Option<&RowSpan>,
    values: &[(u32, Option<String>)],
) -> Result<Vec<u8>> {
    let mut pieces: BTreeMap<u32, Piece<'_>> = BTreeMap::new();
    if let Some(row) = existing {
        for cell in &row.cells {
            pieces.insert(cell.col, Piece::Raw(&xml[cell.span.clone()]));
        }
    }
    for (col, value) in values {
        let style = existing
            .and_then(|row| row.cells.iter().find(|c| c.col == *col))
            .and_then(|c| c.style.as_deref());
        match render_cell(&coord(*col, row_num), style, value.as_deref())? {
            Some(bytes) => pieces.insert(*col, Piece::New(bytes)),
            None => pieces.remove(col),
        };
    }

    let mut out = Vec::new();
    match existing {
        Some(row) => {
            let open = &xml[row.open_tag.clone()];
            if row.self_closing {
                let body = open.strip_suffix(b"/>").unwrap_or(open);
                out.extend_from_slice(body.trim_ascii_end());
                out.push(b'>');
            } else {
                out.extend_from_slice(open);
            }
        }
        None => out.extend_from_slice(format!("<row r=\"{row_num}\">").as_bytes()),
    }
    for piece in pieces.into_values() {
        match piece {
            Piece::Raw(bytes) => out.extend_from_slice(bytes),
            Piece::New(bytes) => out.extend_from_slice(&bytes),
        }
    }
    out.extend_from_slice(b"</row>");
    Ok(out)
}

fn dimension_ref(original: &str, max_col: u32, max_row: u32) -> String {
    let first = original.split(':').next().unwrap_or("A1");
    format!("{first}:{}", coord(max_col, max_row))
}

/// Write `rows` into successive sheet rows starting at `start_row`.
///
/// Position 0 of each row maps to column A and is never written; position `i`
/// goes to column `i + 1`. A row only exposes the sheet's widest used column,
/// values past it are dropped. Unset values clear the cell, keeping its style.
pub fn fill_rows<R, I, S>(xml: &[u8], start_row: u32, rows: R) -> Result<Vec<u8>>
where
    R: IntoIterator<Item = I>,
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    let layout = scan(xml)?;
    let width = layout.max_col.max(1);

    let mut edits: Vec<(Range<usize>, Vec<u8>)> = Vec::new();
    let mut appended = Vec::new();
    let mut last_row = start_row.saturating_sub(1);

    for (offset, row) in rows.into_iter().enumerate() {
        let row_num = start_row + offset as u32;
        last_row = row_num;
        let values: Vec<(u32, Option<String>)> = row
            .into_iter()
            .enumerate()
            // position 0 is the placeholder: column A keeps its template
            // content instead of being cleared to unset
            .skip(1)
            .map(|(pos, v)| (pos as u32 + 1, v.map(|s| s.as_ref().to_owned())))
            .take_while(|(col, _)| *col <= width)
            .collect();

        match layout.rows.iter().find(|r| r.num == row_num) {
            Some(existing) => {
                let bytes = render_row(xml, row_num, Some(existing), &values)?;
                edits.push((existing.span.clone(), bytes));
            }
            None => {
                debug!("Row {row_num} is not in the template, creating it");
                let bytes = render_row(xml, row_num, None, &values)?;
                match layout.rows.iter().find(|r| r.num > row_num) {
                    Some(next) => edits.push((next.span.start..next.span.start, bytes)),
                    None => appended.extend_from_slice(&bytes),
                }
            }
        }
    }

    match &layout.sheet_data {
        SheetData::Open { close } => edits.push((*close..*close, appended)),
        SheetData::Empty(span) => {
            let mut bytes = b"<sheetData>".to_vec();
            bytes.extend_from_slice(&appended);
            bytes.extend_from_slice(b"</sheetData>");
            edits.push((span.clone(), bytes));
        }
    }

    if let Some(dim) = &layout.dimension {
        let max_row = layout
            .rows
            .iter()
            .map(|r| r.num)
            .max()
            .unwrap_or(0)
            .max(last_row)
            .max(1);
        let reference = dimension_ref(&dim.reference, width, max_row);
        edits.push((
            dim.span.clone(),
            format!("<dimension ref=\"{reference}\"/>").into_bytes(),
        ));
    }

    // inserts (empty ranges) must land before a replacement starting at the same offset
    edits.sort_by_key(|(range, _)| (range.start, range.end));
    let mut out = Vec::with_capacity(xml.len() + edits.iter().map(|(_, b)| b.len()).sum::<usize>());
    let mut cursor = 0;
    for (range, bytes) in edits {
        out.extend_from_slice(&xml[cursor..range.start]);
        out.extend_from_slice(&bytes);
        cursor = range.end;
    }
    out.extend_from_slice(&xml[cursor..]);
    Ok(out)
}

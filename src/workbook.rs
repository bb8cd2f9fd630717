use std::{
    fs::{self, File},
    io::{Read, Seek, Write},
    path::{Path, PathBuf},
};

use ::zip as zip_crate;
use anyhow::{Context, Result, bail};
use log::{debug, info};
use quick_xml::{Reader, events::Event};

use crate::sheet;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const CALC_CHAIN_PART: &str = "xl/calcChain.xml";

/// A template workbook with its active worksheet loaded for editing.
///
/// Only the active sheet's XML is held in memory; every other part of the
/// package is raw-copied from the template on [`TemplateBook::save`].
pub struct TemplateBook {
    src_path: PathBuf,
    sheet_name: String,
    sheet_path: String,
    sheet_xml: Vec<u8>,
}

fn read_part<R: Read + Seek>(zip: &mut zip_crate::ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut part = zip
        .by_name(name)
        .with_context(|| format!("{name} not found"))?;
    let mut buf = Vec::with_capacity(part.size() as usize);
    part.read_to_end(&mut buf)
        .with_context(|| format!("reading {name}"))?;
    Ok(buf)
}

fn attr_lossy(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes().with_checks(false).flatten().find_map(|a| {
        (a.key.as_ref() == key).then(|| String::from_utf8_lossy(&a.value).into_owned())
    })
}

/// `r:id` under whatever prefix the relationships namespace was bound to.
fn rel_id(e: &quick_xml::events::BytesStart<'_>) -> Option<String> {
    e.attributes().with_checks(false).flatten().find_map(|a| {
        (a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
            .then(|| String::from_utf8_lossy(&a.value).into_owned())
    })
}

/// (name, relationship id) of the sheet selected by `activeTab`.
fn active_sheet(workbook_xml: &[u8]) -> Result<(String, String)> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(true);

    let mut active_tab: Option<usize> = None;
    let mut sheets = Vec::new();
    loop {
        match reader.read_event().context("malformed xl/workbook.xml")? {
            Event::Empty(ref e) | Event::Start(ref e) => match e.local_name().as_ref() {
                b"workbookView" if active_tab.is_none() => {
                    active_tab = Some(
                        attr_lossy(e, b"activeTab")
                            .and_then(|v| v.parse().ok())
                            .unwrap_or(0),
                    );
                }
                b"sheet" => {
                    let name = attr_lossy(e, b"name").unwrap_or_default();
                    let rid = rel_id(e)
                        .with_context(|| format!("sheet '{name}' has no relationship id"))?;
                    sheets.push((name, rid));
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    let tab = active_tab.unwrap_or(0);
    if sheets.is_empty() {
        bail!("workbook has no sheets");
    }
    let idx = if tab < sheets.len() { tab } else { 0 };
    Ok(sheets.swap_remove(idx))
}

fn relationship_target(rels_xml: &[u8], rid: &str) -> Result<String> {
    let mut reader = Reader::from_reader(rels_xml);
    reader.config_mut().trim_text(true);
    loop {
        match reader
            .read_event()
            .context("malformed xl/_rels/workbook.xml.rels")?
        {
            Event::Empty(ref e) | Event::Start(ref e)
                if e.local_name().as_ref() == b"Relationship"
                    && attr_lossy(e, b"Id").as_deref() == Some(rid) =>
            {
                return attr_lossy(e, b"Target")
                    .with_context(|| format!("relationship {rid} has no Target"));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    bail!("relationship {rid} not found in {WORKBOOK_RELS_PART}")
}

/// Resolve a workbook relationship target to an archive entry name.
fn part_path(target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(abs) => abs.to_owned(),
        None => format!("xl/{target}"),
    };
    let mut parts: Vec<&str> = Vec::new();
    for seg in joined.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Cut every empty `<local .../>` element whose attribute `key` matches `unwanted`.
fn strip_elements(
    xml: &[u8],
    local: &[u8],
    key: &[u8],
    unwanted: impl Fn(&str) -> bool,
) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut out = Vec::with_capacity(xml.len());
    let mut cursor = 0;
    loop {
        let start = reader.buffer_position() as usize;
        let ev = reader.read_event().context("malformed package XML")?;
        let end = reader.buffer_position() as usize;
        match ev {
            Event::Empty(ref e)
                if e.local_name().as_ref() == local
                    && attr_lossy(e, key).is_some_and(|v| unwanted(&v)) =>
            {
                out.extend_from_slice(&xml[cursor..start]);
                cursor = end;
            }
            Event::Eof => break,
            _ => {}
        }
    }
    out.extend_from_slice(&xml[cursor..]);
    Ok(out)
}

impl TemplateBook {
    /// Open the template and load its active worksheet.
    pub fn open<P: AsRef<Path>>(src: P) -> Result<Self> {
        let src_path = src.as_ref().to_path_buf();
        let file = File::open(&src_path)
            .with_context(|| format!("Opening template {src_path:?}"))?;
        let mut zip = zip_crate::ZipArchive::new(file)
            .with_context(|| format!("Reading template {src_path:?} as an xlsx archive"))?;

        let workbook_xml = read_part(&mut zip, WORKBOOK_PART)?;
        let rels_xml = read_part(&mut zip, WORKBOOK_RELS_PART)?;

        let (sheet_name, rid) = active_sheet(&workbook_xml)?;
        let sheet_path = part_path(&relationship_target(&rels_xml, &rid)?);
        let sheet_xml = read_part(&mut zip, &sheet_path)?;
        info!("Template {src_path:?}: active sheet '{sheet_name}' ({sheet_path})");

        Ok(Self {
            src_path,
            sheet_name,
            sheet_path,
            sheet_xml,
        })
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn sheet_path(&self) -> &str {
        &self.sheet_path
    }

    /// Overwrite rows `start_row..` of the active sheet, see [`sheet::fill_rows`].
    pub fn fill_rows<R, I, S>(&mut self, start_row: u32, rows: R) -> Result<()>
    where
        R: IntoIterator<Item = I>,
        I: IntoIterator<Item = Option<S>>,
        S: AsRef<str>,
    {
        self.sheet_xml = sheet::fill_rows(&self.sheet_xml, start_row, rows)
            .with_context(|| format!("filling {}", self.sheet_path))?;
        Ok(())
    }

    /// Save to `dst`. The archive is built in a temp file beside `dst` and
    /// moved into place only once complete; the template is never touched.
    ///
    /// The calculation chain is dropped (with its content-type override and
    /// workbook relationship) since overwritten cells may have held formulas;
    /// Excel rebuilds it on load.
    pub fn save<P: AsRef<Path>>(&self, dst: P) -> Result<()> {
        let dst = dst.as_ref();
        let mut zin = zip_crate::ZipArchive::new(
            File::open(&self.src_path)
                .with_context(|| format!("Opening template {:?}", self.src_path))?,
        )?;

        let mut rewritten: Vec<(&str, Vec<u8>)> = Vec::new();
        if zin.index_for_name(CALC_CHAIN_PART).is_some() {
            debug!("Dropping {CALC_CHAIN_PART}");
            let types = read_part(&mut zin, CONTENT_TYPES_PART)?;
            rewritten.push((
                CONTENT_TYPES_PART,
                strip_elements(&types, b"Override", b"PartName", |p| {
                    p.trim_start_matches('/') == CALC_CHAIN_PART
                })?,
            ));
            let rels = read_part(&mut zin, WORKBOOK_RELS_PART)?;
            rewritten.push((
                WORKBOOK_RELS_PART,
                strip_elements(&rels, b"Relationship", b"Target", |t| {
                    part_path(t) == CALC_CHAIN_PART
                })?,
            ));
        }

        let dir = match dst.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut builder = tempfile::Builder::new();
        // 0o666 before the umask, like a plain File::create
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o666));
        }
        let mut tmp = builder
            .tempfile_in(dir)
            .with_context(|| format!("Creating output file in {dir:?}"))?;
        if let Ok(existing) = fs::metadata(dst) {
            tmp.as_file()
                .set_permissions(existing.permissions())
                .with_context(|| format!("Copying permissions of {dst:?}"))?;
        }

        // fixed timestamp keeps repeated runs byte-identical
        let opt: zip_crate::write::FileOptions<'_, ()> = zip_crate::write::FileOptions::default()
            .compression_method(zip_crate::CompressionMethod::Deflated)
            .compression_level(Some(1))
            .last_modified_time(zip_crate::DateTime::default());

        {
            let mut zout = zip_crate::ZipWriter::new(tmp.as_file_mut());
            for i in 0..zin.len() {
                let file = zin.by_index_raw(i)?;
                let name = file.name();
                if name == CALC_CHAIN_PART {
                    continue;
                }
                if name == self.sheet_path {
                    zout.start_file(name, opt)?;
                    zout.write_all(&self.sheet_xml)?;
                } else if let Some((_, content)) = rewritten.iter().find(|(p, _)| *p == name) {
                    zout.start_file(name, opt)?;
                    zout.write_all(content)?;
                } else {
                    zout.raw_copy_file(file)?;
                }
            }
            zout.finish()?;
        }

        tmp.persist(dst)
            .map_err(|e| e.error)
            .with_context(|| format!("Writing output file {dst:?}"))?;
        debug!("Saved {dst:?}");
        Ok(())
    }
}

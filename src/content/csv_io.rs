use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};

use super::code_names::{expand_code_name_cell, join_code_names};
use super::record::{Payload, QuestionKind, QuestionRecord, GENDER_VARIANT_KEYS};
use super::transform::{
    base_columns, gender_variant_columns, normalize_header, source_columns as col, SourceRow,
};

#[derive(Debug, Clone)]
pub struct SheetRow {
    /// 1-based line number in the source file.
    pub line: u64,
    pub cells: SourceRow,
}

/// A source sheet kept with its header order so it can be written back.
#[derive(Debug, Clone, Default)]
pub struct SourceSheet {
    pub headers: Vec<String>,
    pub rows: Vec<SheetRow>,
}

impl SourceSheet {
    pub fn numbered_rows(&self) -> impl Iterator<Item = (u64, &SourceRow)> {
        self.rows.iter().map(|r| (r.line, &r.cells))
    }

    pub fn ensure_column(&mut self, name: &str) {
        if !self.headers.iter().any(|h| h == name) {
            self.headers.push(name.to_string());
        }
    }

    /// Replace every `CodeName` cell with its expanded tag list.
    pub fn expand_code_name_column(&mut self) -> usize {
        let mut changed = 0usize;
        for row in &mut self.rows {
            let Some(raw) = row.cells.get(col::CODE_NAME) else {
                continue;
            };
            let expanded = join_code_names(&expand_code_name_cell(raw));
            if &expanded != raw {
                row.cells.insert(col::CODE_NAME.to_string(), expanded);
                changed += 1;
            }
        }
        changed
    }
}

pub fn read_sheet<R: Read>(reader: R) -> Result<SourceSheet> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::None)
        .from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(normalize_header).collect();
    let mut rows = Vec::new();
    let mut rec = StringRecord::new();
    while rdr.read_record(&mut rec)? {
        let line = rec.position().map(|p| p.line()).unwrap_or(0);
        if rec.iter().all(|c| c.trim().is_empty()) {
            continue;
        }
        let cells: SourceRow = headers
            .iter()
            .zip(rec.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        rows.push(SheetRow { line, cells });
    }
    Ok(SourceSheet { headers, rows })
}

pub fn read_sheet_file(path: &Path) -> Result<SourceSheet> {
    let file = File::open(path).with_context(|| format!("source file not found: {}", path.display()))?;
    read_sheet(BufReader::new(file)).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn write_sheet<W: Write>(sheet: &SourceSheet, writer: W) -> Result<()> {
    let mut wtr = WriterBuilder::new().from_writer(writer);
    wtr.write_record(&sheet.headers)?;
    for row in &sheet.rows {
        wtr.write_record(
            sheet
                .headers
                .iter()
                .map(|h| row.cells.get(h).map(String::as_str).unwrap_or("")),
        )?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_sheet_file(sheet: &SourceSheet, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("cannot write {}", path.display()))?;
    write_sheet(sheet, file)
}

/// Export header for `kind`; gender variant columns only when needed.
pub fn export_headers(kind: QuestionKind, with_variants: bool) -> Vec<String> {
    let mut headers: Vec<String> = base_columns(kind).iter().map(|s| s.to_string()).collect();
    if with_variants {
        headers.extend(gender_variant_columns());
    }
    headers
}

fn export_cells(rec: &QuestionRecord, with_variants: bool) -> Vec<String> {
    let code_names = join_code_names(&rec.code_names);
    let mut cells = match &rec.payload {
        Payload::Balance(p) => vec![
            code_names,
            rec.order.clone(),
            rec.id.clone(),
            rec.content.clone(),
            p.choice_a.clone(),
            p.choice_b.clone(),
            rec.content_en.clone(),
            p.choice_a_en.clone(),
            p.choice_b_en.clone(),
        ],
        Payload::Truth(p) => vec![
            code_names,
            rec.order.clone(),
            rec.id.clone(),
            rec.content.clone(),
            p.answers.clone(),
            rec.content_en.clone(),
            p.answers_en.clone(),
        ],
    };
    if with_variants {
        for variants in [&rec.gender_variants, &rec.gender_variants_en] {
            for key in GENDER_VARIANT_KEYS {
                cells.push(variants.get(key).cloned().unwrap_or_default());
            }
        }
    }
    cells
}

/// Write records of one kind in the source sheet layout. Records of the
/// other kind are skipped. Returns the number of data rows written.
pub fn write_export<W: Write>(records: &[QuestionRecord], kind: QuestionKind, writer: W) -> Result<usize> {
    let selected: Vec<&QuestionRecord> = records.iter().filter(|r| r.kind() == kind).collect();
    let with_variants = selected
        .iter()
        .any(|r| !r.gender_variants.is_empty() || !r.gender_variants_en.is_empty());

    let mut wtr = WriterBuilder::new().from_writer(writer);
    wtr.write_record(export_headers(kind, with_variants))?;
    for rec in &selected {
        wtr.write_record(export_cells(rec, with_variants))?;
    }
    wtr.flush()?;
    Ok(selected.len())
}

pub fn write_export_file(records: &[QuestionRecord], kind: QuestionKind, path: &Path) -> Result<usize> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let file = File::create(path).with_context(|| format!("cannot write {}", path.display()))?;
    write_export(records, kind, file)
}

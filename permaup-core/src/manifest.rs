//! CSV manifest in and out. Unknown columns pass through untouched.

use crate::error::{Error, Result};
use std::fs::File;
use std::path::{Path, PathBuf};

pub const FILENAME_COL: &str = "filename";
pub const IPFS_COL: &str = "ipfs";
pub const AR_HASH_COL: &str = "arHash";

/// Output header plus where the known columns live in it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Columns {
    header: Vec<String>,
    input_len: usize,
    filename: Option<usize>,
    ipfs: Option<usize>,
    ar_hash: usize,
}

impl Columns {
    /// Input header, with `arHash` appended when missing.
    pub fn from_input(input: &[String]) -> Self {
        let mut header = input.to_vec();
        let ar_hash = match header.iter().position(|c| c == AR_HASH_COL) {
            Some(i) => i,
            None => {
                header.push(AR_HASH_COL.to_string());
                header.len() - 1
            }
        };
        let filename = header.iter().position(|c| c == FILENAME_COL);
        let ipfs = header.iter().position(|c| c == IPFS_COL);
        Self { header, input_len: input.len(), filename, ipfs, ar_hash }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn has_filename(&self) -> bool {
        self.filename.is_some()
    }

    /// Split raw cells into header-aligned fields and trailing extras.
    /// Cells past the input header never land in an appended `arHash`.
    fn layout<T: Clone + Default>(&self, mut cells: Vec<T>) -> (Vec<T>, Vec<T>) {
        let extra = if cells.len() > self.input_len { cells.split_off(self.input_len) } else { Vec::new() };
        cells.resize(self.header.len(), T::default());
        (cells, extra)
    }

    pub fn row(&self, line: u64, fields: Vec<String>) -> ManifestRow {
        let (fields, extra) = self.layout(fields);
        ManifestRow {
            line,
            fields,
            extra,
            raw: None,
            filename: self.filename,
            ipfs: self.ipfs,
            ar_hash: self.ar_hash,
        }
    }

    /// A record that could not be decoded. Its bytes are written back as read.
    fn raw_row(&self, line: u64, cells: Vec<Vec<u8>>, reason: String) -> ManifestRow {
        let lossy = cells.iter().map(|c| String::from_utf8_lossy(c).into_owned()).collect();
        let mut row = self.row(line, lossy);
        let (fields, extra) = self.layout(cells);
        row.raw = Some(RawCells { fields, extra, reason });
        row
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct RawCells {
    fields: Vec<Vec<u8>>,
    extra: Vec<Vec<u8>>,
    reason: String,
}

/// One manifest line, laid out in output-header order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestRow {
    pub line: u64,
    fields: Vec<String>,
    extra: Vec<String>,
    raw: Option<RawCells>,
    filename: Option<usize>,
    ipfs: Option<usize>,
    ar_hash: usize,
}

impl ManifestRow {
    fn cell(&self, idx: Option<usize>) -> Option<&str> {
        idx.and_then(|i| self.fields.get(i))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn filename(&self) -> Option<&str> {
        self.cell(self.filename)
    }

    pub fn ipfs(&self) -> Option<&str> {
        self.cell(self.ipfs)
    }

    pub fn ar_hash(&self) -> Option<&str> {
        self.cell(Some(self.ar_hash))
    }

    /// Why the record could not be decoded, if it could not.
    pub fn invalid(&self) -> Option<&str> {
        self.raw.as_ref().map(|r| r.reason.as_str())
    }

    /// Record the upload id. A row that already has one is left alone.
    pub fn set_ar_hash(&mut self, id: &str) -> Result<()> {
        if let Some(reason) = self.invalid() {
            return Err(Error::InvalidInput(reason.to_string()));
        }
        if let Some(existing) = self.ar_hash() {
            return Err(Error::InvalidInput(format!(
                "line {}: arHash already set to {existing}",
                self.line
            )));
        }
        self.fields[self.ar_hash] = id.to_string();
        Ok(())
    }

    /// Header-aligned cells.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Cells beyond the input header, kept after the header-aligned ones.
    pub fn extra(&self) -> &[String] {
        &self.extra
    }

    fn record(&self) -> csv::ByteRecord {
        match &self.raw {
            Some(raw) => raw.fields.iter().chain(&raw.extra).collect(),
            None => self.fields.iter().chain(&self.extra).collect(),
        }
    }
}

pub struct ManifestReader {
    reader: csv::Reader<File>,
    columns: Columns,
    record: csv::ByteRecord,
    failed: bool,
}

impl ManifestReader {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::FileNotFound(PathBuf::from(path)));
        }
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let input: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if input.iter().all(|c| c.trim().is_empty()) {
            return Err(Error::InvalidInput(format!("{}: missing header row", path.display())));
        }
        let columns = Columns::from_input(&input);
        if !columns.has_filename() {
            tracing::warn!(manifest = %path.display(), "no `{FILENAME_COL}` column; every row will be skipped");
        }
        Ok(Self { reader, columns, record: csv::ByteRecord::new(), failed: false })
    }

    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    /// Number of data records in `path`, without decoding them.
    pub fn count_rows(path: &Path) -> Result<usize> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let mut record = csv::ByteRecord::new();
        let mut n = 0;
        while reader.read_byte_record(&mut record)? {
            n += 1;
        }
        Ok(n)
    }

    fn decode(&self) -> ManifestRow {
        let line = self.record.position().map(|p| p.line()).unwrap_or(0);
        let mut fields = Vec::with_capacity(self.record.len());
        for (i, cell) in self.record.iter().enumerate() {
            match std::str::from_utf8(cell) {
                Ok(s) => fields.push(s.to_string()),
                Err(e) => {
                    let reason = format!("line {line}: field {} is not valid UTF-8: {e}", i + 1);
                    let cells = self.record.iter().map(<[u8]>::to_vec).collect();
                    return self.columns.raw_row(line, cells, reason);
                }
            }
        }
        self.columns.row(line, fields)
    }
}

/// Yields one row per record. A record that is not valid UTF-8 comes back
/// as an [`invalid`](ManifestRow::invalid) row; a read error ends iteration.
impl Iterator for ManifestReader {
    type Item = Result<ManifestRow>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.read_byte_record(&mut self.record) {
            Ok(false) => None,
            Ok(true) => Some(Ok(self.decode())),
            Err(e) => {
                self.failed = true;
                Some(Err(e.into()))
            }
        }
    }
}

/// Writes the header at creation and flushes after every row.
pub struct ManifestWriter {
    writer: csv::Writer<File>,
}

impl ManifestWriter {
    pub fn create(path: &Path, columns: &Columns) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new().flexible(true).from_path(path)?;
        writer.write_record(columns.header())?;
        writer.flush()?;
        Ok(Self { writer })
    }

    pub fn write_row(&mut self, row: &ManifestRow) -> Result<()> {
        self.writer.write_byte_record(&row.record())?;
        self.writer.flush()?;
        Ok(())
    }
}

/// `output-<input file name>` next to the input manifest.
pub fn default_output_path(input: &Path) -> PathBuf {
    let name = input.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    input.with_file_name(format!("output-{name}"))
}

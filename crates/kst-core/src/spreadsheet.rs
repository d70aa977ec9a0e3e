//! Spreadsheet reader and writer
//!
//! A spreadsheet is a CSV table with one symbol per row. The first three
//! columns name the symbol and its template; every other column is a
//! property override merged onto the template's properties.

use crate::cache::{TemplateCache, TemplateKey};
use crate::codec::LibraryCodec;
use crate::error::{Error, Result};
use crate::library::{build_library, import_library};
use crate::property::PropertyMap;
use crate::symbol::Symbol;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Column holding the symbol name
pub const NAME_COLUMN: &str = "name";
/// Column holding the template library locator
pub const LIBRARY_COLUMN: &str = "template_library";
/// Column holding the template symbol name
pub const TEMPLATE_COLUMN: &str = "template_symbol_name";

/// Reserved columns, in the order they are written
pub const RESERVED_COLUMNS: [&str; 3] = [NAME_COLUMN, LIBRARY_COLUMN, TEMPLATE_COLUMN];

/// One input row: its line in the source file and its cells by column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based line number (the header is line 1)
    pub line: usize,
    /// `(column, value)` pairs in column order
    pub cells: Vec<(String, String)>,
}

impl Row {
    pub fn new(line: usize, cells: Vec<(String, String)>) -> Self {
        Self { line, cells }
    }

    /// Value of a column, if the row has one
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())
    }

    /// Property cells to merge onto `template`.
    ///
    /// An empty cell overrides a property the template has, but is skipped
    /// for keys the template lacks: those columns belong to other symbols.
    fn overrides<'a>(
        &'a self,
        template: &'a PropertyMap,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.cells
            .iter()
            .filter(|(c, _)| !RESERVED_COLUMNS.contains(&c.as_str()))
            .filter(move |(c, v)| !v.is_empty() || template.contains_key(c))
            .map(|(c, v)| (c.as_str(), v.as_str()))
    }
}

/// A row that was skipped while reading
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// File (or source name) the row came from
    pub source: PathBuf,
    /// 1-based line number of the row
    pub line: usize,
    pub kind: RowErrorKind,
}

/// Why a row was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowErrorKind {
    /// A reserved column is absent or empty
    MissingColumn(String),
    /// The template could not be found in its library
    TemplateNotFound { library: String, symbol: String },
    /// An earlier row already produced a symbol with this name
    DuplicateName(String),
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: ", self.source.display(), self.line)?;
        match &self.kind {
            RowErrorKind::MissingColumn(column) => {
                write!(f, "missing value for required column '{}'", column)
            }
            RowErrorKind::TemplateNotFound { library, symbol } => {
                write!(f, "template '{}' not found in library '{}'", symbol, library)
            }
            RowErrorKind::DuplicateName(name) => {
                write!(f, "duplicate symbol name '{}'", name)
            }
        }
    }
}

/// Symbols read from (or destined for) a spreadsheet, plus the templates
/// they were derived from.
#[derive(Debug, Clone, Default)]
pub struct Spreadsheet {
    /// One symbol per row, in row order
    pub symbols: Vec<Symbol>,
    /// Templates referenced by `symbols`, keyed by library and name
    pub templates: HashMap<TemplateKey, Symbol>,
}

impl Spreadsheet {
    /// Create an empty spreadsheet
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of symbols
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Add one row that reproduces a template as-is.
    ///
    /// This is the starter row for a new spreadsheet: named after the
    /// template and carrying all of its properties.
    pub fn add_defaults(
        &mut self,
        cache: &mut TemplateCache,
        library: &str,
        name: &str,
    ) -> Result<()> {
        let template = cache
            .resolve(library, name)?
            .ok_or_else(|| Error::TemplateNotFound {
                library: library.to_string(),
                symbol: name.to_string(),
            })?;

        let symbol = Symbol::from_template(template, name, library, std::iter::empty());
        self.templates
            .entry((library.to_string(), name.to_string()))
            .or_insert_with(|| template.clone());
        self.symbols.push(symbol);
        Ok(())
    }

    /// Read rows into symbols.
    ///
    /// Rows with a missing reserved column, an unknown template or a name
    /// already taken are skipped and returned as [`RowError`]s; the other
    /// rows are still read. Only an unreadable template library fails the
    /// whole call.
    pub fn read_rows<I>(
        &mut self,
        rows: I,
        source: &Path,
        cache: &mut TemplateCache,
    ) -> Result<Vec<RowError>>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut errors = Vec::new();
        let mut names: HashSet<String> =
            self.symbols.iter().map(|s| s.name().to_string()).collect();
        let mut skip = |line: usize, kind: RowErrorKind| {
            let error = RowError {
                source: source.to_path_buf(),
                line,
                kind,
            };
            warn!("skipping row: {}", error);
            errors.push(error);
        };

        for row in rows {
            let missing = RESERVED_COLUMNS
                .iter()
                .find(|column| row.get(column).map_or(true, str::is_empty));
            if let Some(column) = missing {
                skip(row.line, RowErrorKind::MissingColumn(column.to_string()));
                continue;
            }

            // Presence of all three was checked above
            let name = row.get(NAME_COLUMN).unwrap_or_default();
            let library = row.get(LIBRARY_COLUMN).unwrap_or_default();
            let template_name = row.get(TEMPLATE_COLUMN).unwrap_or_default();

            if names.contains(name) {
                skip(row.line, RowErrorKind::DuplicateName(name.to_string()));
                continue;
            }

            let Some(template) = cache.resolve(library, template_name)? else {
                skip(
                    row.line,
                    RowErrorKind::TemplateNotFound {
                        library: library.to_string(),
                        symbol: template_name.to_string(),
                    },
                );
                continue;
            };

            let overrides = row.overrides(&template.properties);
            let symbol = Symbol::from_template(template, name, library, overrides);
            self.templates
                .entry((library.to_string(), template_name.to_string()))
                .or_insert_with(|| template.clone());
            names.insert(name.to_string());
            self.symbols.push(symbol);
        }

        Ok(errors)
    }

    /// Read a CSV spreadsheet file
    pub fn read_path<P: AsRef<Path>>(
        &mut self,
        path: P,
        cache: &mut TemplateCache,
    ) -> Result<Vec<RowError>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let rows = parse_rows(BufReader::new(file), path)?;
        let errors = self.read_rows(rows, path, cache)?;
        info!(
            path = %path.display(),
            symbols = self.symbols.len(),
            skipped = errors.len(),
            "read spreadsheet"
        );
        Ok(errors)
    }

    /// Read CSV from a string (useful for testing)
    pub fn read_csv_str(
        &mut self,
        content: &str,
        source_name: &str,
        cache: &mut TemplateCache,
    ) -> Result<Vec<RowError>> {
        let path = PathBuf::from(source_name);
        let rows = parse_rows(content.as_bytes(), &path)?;
        self.read_rows(rows, &path, cache)
    }

    /// Output columns: the reserved columns, then every property key once,
    /// in order of first appearance across symbols.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = RESERVED_COLUMNS.iter().map(|c| c.to_string()).collect();
        let mut seen: HashSet<String> = columns.iter().cloned().collect();

        for symbol in &self.symbols {
            for key in symbol.properties.keys() {
                if !seen.contains(key) {
                    seen.insert(key.to_string());
                    columns.push(key.to_string());
                }
            }
        }

        columns
    }

    /// Convert symbols to rows over [`Spreadsheet::columns`].
    ///
    /// Columns a symbol has no property for are left empty.
    pub fn to_rows(&self) -> Vec<Row> {
        let columns = self.columns();
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| {
                let cells = columns
                    .iter()
                    .map(|column| {
                        let value = match column.as_str() {
                            NAME_COLUMN => symbol.name(),
                            LIBRARY_COLUMN => {
                                symbol.template_library.as_deref().unwrap_or_default()
                            }
                            TEMPLATE_COLUMN => {
                                symbol.template_name.as_deref().unwrap_or_default()
                            }
                            key => symbol.properties.get(key).unwrap_or_default(),
                        };
                        (column.clone(), value.to_string())
                    })
                    .collect();
                Row::new(i + 2, cells)
            })
            .collect()
    }

    /// Write the spreadsheet as CSV to any writer
    pub fn write_csv<W: Write>(&self, writer: W, path: &Path) -> Result<()> {
        let csv_error = |e: csv::Error| Error::Csv {
            path: path.to_path_buf(),
            source: e,
        };
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record(self.columns()).map_err(csv_error)?;
        for row in self.to_rows() {
            csv_writer
                .write_record(row.cells.iter().map(|(_, v)| v))
                .map_err(csv_error)?;
        }
        csv_writer.flush().map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(())
    }

    /// Write the spreadsheet to a CSV file
    pub fn write_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.write_csv(file, path)?;
        info!(path = %path.display(), symbols = self.symbols.len(), "wrote spreadsheet");
        Ok(())
    }

    /// Render the spreadsheet as a CSV string
    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf, Path::new("<memory>"))?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Order symbols for a library file, grouping by template
    pub fn build_library(&self) -> Result<Vec<Symbol>> {
        build_library(&self.symbols, &self.templates)
    }

    /// Build the library and save it through `codec`
    pub fn write_library(&self, codec: &dyn LibraryCodec, locator: &str) -> Result<usize> {
        let symbols = self.build_library()?;
        codec.save(&symbols, locator)?;
        info!(library = locator, symbols = symbols.len(), "wrote symbol library");
        Ok(symbols.len())
    }

    /// Load an existing library as a spreadsheet.
    ///
    /// Root symbols become their own templates; derived symbols point at
    /// the root of their hierarchy.
    pub fn import(codec: &dyn LibraryCodec, locator: &str) -> Result<Self> {
        let symbols = import_library(codec.load(locator)?, locator);

        let mut spreadsheet = Spreadsheet::new();
        for symbol in &symbols {
            if symbol.is_own_template() {
                spreadsheet
                    .templates
                    .insert((locator.to_string(), symbol.name().to_string()), symbol.clone());
            }
        }
        spreadsheet.symbols = symbols;
        info!(library = locator, symbols = spreadsheet.symbols.len(), "imported library");
        Ok(spreadsheet)
    }

    /// Hand this spreadsheet's templates to a cache, so rows referencing
    /// them resolve without loading their library again.
    pub fn seed_cache(&self, cache: &mut TemplateCache) {
        for ((library, _), template) in &self.templates {
            cache.seed(library, template.clone());
        }
    }
}

/// Parse CSV into rows, checking that the header has every reserved column
fn parse_rows<R: Read>(reader: R, path: &Path) -> Result<Vec<Row>> {
    let csv_error = |e: csv::Error| Error::Csv {
        path: path.to_path_buf(),
        source: e,
    };
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true) // Short rows leave trailing columns absent
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();

    for column in RESERVED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(Error::MissingHeader {
                path: path.to_path_buf(),
                column: column.to_string(),
            });
        }
    }

    let mut rows = Vec::new();
    for (row_idx, result) in csv_reader.records().enumerate() {
        let record = result.map_err(csv_error)?;
        let line = record
            .position()
            .map_or(row_idx + 2, |p| p.line() as usize);
        let cells = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| {
                // Property values are kept byte for byte
                let value = if RESERVED_COLUMNS.contains(&h.as_str()) {
                    v.trim()
                } else {
                    v
                };
                (h.clone(), value.to_string())
            })
            .collect();
        rows.push(Row::new(line, cells));
    }

    Ok(rows)
}

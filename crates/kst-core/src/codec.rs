//! Symbol library codecs
//!
//! The rest of the crate only sees [`LibraryCodec`]: load an ordered list of
//! symbols from a locator, save an ordered list back. [`KicadCodec`] reads and
//! writes `.kicad_sym` files; [`MemoryCodec`] keeps libraries in memory.

use crate::error::{Error, Result};
use crate::sexpr::{self, Sexpr};
use crate::symbol::{Symbol, Unit};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// File format version written into generated libraries
pub const KICAD_SYMBOL_LIB_VERSION: &str = "20211014";

/// Generator tag written into generated libraries
pub const GENERATOR: &str = "kicad_symbol_templater";

/// Load and save ordered symbol sequences
pub trait LibraryCodec {
    /// Load every symbol of a library, in file order
    fn load(&self, locator: &str) -> Result<Vec<Symbol>>;

    /// Write symbols to a library, in the order given
    fn save(&self, symbols: &[Symbol], locator: &str) -> Result<()>;
}

/// Codec for KiCad `.kicad_sym` files
#[derive(Debug, Default, Clone, Copy)]
pub struct KicadCodec;

impl LibraryCodec for KicadCodec {
    fn load(&self, locator: &str) -> Result<Vec<Symbol>> {
        let path = Path::new(locator);
        let content = fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let symbols = parse_library(&content, path)?;
        debug!(library = locator, count = symbols.len(), "loaded symbol library");
        Ok(symbols)
    }

    fn save(&self, symbols: &[Symbol], locator: &str) -> Result<()> {
        let path = Path::new(locator);
        let content = library_to_sexpr(symbols).to_pretty_string();
        fs::write(path, content).map_err(|e| Error::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!(library = locator, count = symbols.len(), "wrote symbol library");
        Ok(())
    }
}

/// Parse the text of a `.kicad_sym` file into symbols
pub fn parse_library(content: &str, path: &Path) -> Result<Vec<Symbol>> {
    let root = sexpr::parse(content).map_err(|e| Error::Parse {
        path: path.to_path_buf(),
        line: e.line,
        message: e.message,
    })?;

    if root.head() != Some("kicad_symbol_lib") {
        return Err(Error::InvalidLibrary {
            path: path.to_path_buf(),
            message: "expected (kicad_symbol_lib ...) at top level".to_string(),
        });
    }

    root.as_list()
        .unwrap_or_default()
        .iter()
        .filter(|item| item.head() == Some("symbol"))
        .map(|item| parse_symbol(item, path))
        .collect()
}

fn parse_symbol(expr: &Sexpr, path: &Path) -> Result<Symbol> {
    let items = expr.as_list().unwrap_or_default();
    let name = items
        .get(1)
        .and_then(Sexpr::as_text)
        .ok_or_else(|| Error::InvalidLibrary {
            path: path.to_path_buf(),
            message: "symbol without a name".to_string(),
        })?;

    let mut symbol = Symbol::new(name);
    for item in &items[2..] {
        let fields = item.as_list().unwrap_or_default();
        match item.head() {
            Some("extends") => {
                symbol.extends = fields.get(1).and_then(Sexpr::as_text).map(str::to_string);
            }
            Some("property") => {
                let (Some(key), Some(value)) = (
                    fields.get(1).and_then(Sexpr::as_text),
                    fields.get(2).and_then(Sexpr::as_text),
                ) else {
                    return Err(Error::InvalidLibrary {
                        path: path.to_path_buf(),
                        message: format!("malformed property in symbol '{}'", name),
                    });
                };
                symbol.properties.insert(key, value);
                symbol
                    .property_layout
                    .insert(key.to_string(), fields[3..].to_vec());
            }
            Some("symbol") => {
                let unit_name = fields.get(1).and_then(Sexpr::as_text).unwrap_or_default();
                let body = fields.get(2..).unwrap_or_default().to_vec();
                symbol.push_unit(Unit::parse(unit_name, name, body));
            }
            _ => symbol.attributes.push(item.clone()),
        }
    }

    Ok(symbol)
}

/// Build the `(kicad_symbol_lib ...)` expression for an ordered symbol list
pub fn library_to_sexpr(symbols: &[Symbol]) -> Sexpr {
    let mut items = vec![
        Sexpr::atom("kicad_symbol_lib"),
        Sexpr::list(vec![
            Sexpr::atom("version"),
            Sexpr::atom(KICAD_SYMBOL_LIB_VERSION),
        ]),
        Sexpr::list(vec![Sexpr::atom("generator"), Sexpr::atom(GENERATOR)]),
    ];
    items.extend(symbols.iter().map(symbol_to_sexpr));
    Sexpr::list(items)
}

/// Build the `(symbol ...)` expression for one symbol.
///
/// A derived symbol is written as a delta: its `extends` link and its
/// properties. Units and other items are inherited from the base.
pub fn symbol_to_sexpr(symbol: &Symbol) -> Sexpr {
    let mut items = vec![Sexpr::atom("symbol"), Sexpr::string(symbol.name())];

    if let Some(base) = &symbol.extends {
        items.push(Sexpr::list(vec![
            Sexpr::atom("extends"),
            Sexpr::string(base.clone()),
        ]));
    } else {
        items.extend(symbol.attributes.iter().cloned());
    }

    let mut next_id = symbol
        .property_layout
        .values()
        .filter_map(|layout| layout_id(layout))
        .max()
        .map_or(0, |id| id + 1);

    for (key, value) in symbol.properties.iter() {
        let mut property = vec![
            Sexpr::atom("property"),
            Sexpr::string(key),
            Sexpr::string(value),
        ];
        match symbol.property_layout.get(key) {
            Some(layout) => property.extend(layout.iter().cloned()),
            None => {
                property.extend(default_layout(next_id));
                next_id += 1;
            }
        }
        items.push(Sexpr::list(property));
    }

    if symbol.extends.is_none() {
        for unit in symbol.units() {
            let mut unit_items = vec![Sexpr::atom("symbol"), Sexpr::string(unit.name())];
            unit_items.extend(unit.body.iter().cloned());
            items.push(Sexpr::list(unit_items));
        }
    }

    Sexpr::list(items)
}

fn layout_id(layout: &[Sexpr]) -> Option<u32> {
    layout
        .iter()
        .find(|item| item.head() == Some("id"))
        .and_then(|item| item.as_list()?.get(1)?.as_text()?.parse().ok())
}

/// Hidden placement for properties that have no layout of their own
fn default_layout(id: u32) -> Vec<Sexpr> {
    vec![
        Sexpr::list(vec![Sexpr::atom("id"), Sexpr::atom(id.to_string())]),
        Sexpr::list(vec![
            Sexpr::atom("at"),
            Sexpr::atom("0"),
            Sexpr::atom("0"),
            Sexpr::atom("0"),
        ]),
        Sexpr::list(vec![
            Sexpr::atom("effects"),
            Sexpr::list(vec![
                Sexpr::atom("font"),
                Sexpr::list(vec![
                    Sexpr::atom("size"),
                    Sexpr::atom("1.27"),
                    Sexpr::atom("1.27"),
                ]),
            ]),
            Sexpr::atom("hide"),
        ]),
    ]
}

/// In-memory codec that counts loads
///
/// Useful for pre-seeded pipelines and for checking how often libraries
/// are actually read.
#[derive(Debug, Default)]
pub struct MemoryCodec {
    libraries: RefCell<HashMap<String, Vec<Symbol>>>,
    loads: Cell<usize>,
}

impl MemoryCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a library under a locator
    pub fn insert(&self, locator: impl Into<String>, symbols: Vec<Symbol>) {
        self.libraries.borrow_mut().insert(locator.into(), symbols);
    }

    /// Number of successful and failed `load` calls so far
    pub fn loads(&self) -> usize {
        self.loads.get()
    }

    /// Symbols last saved under a locator
    pub fn get(&self, locator: &str) -> Option<Vec<Symbol>> {
        self.libraries.borrow().get(locator).cloned()
    }
}

impl LibraryCodec for MemoryCodec {
    fn load(&self, locator: &str) -> Result<Vec<Symbol>> {
        self.loads.set(self.loads.get() + 1);
        self.libraries
            .borrow()
            .get(locator)
            .cloned()
            .ok_or_else(|| Error::FileRead {
                path: locator.into(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such library"),
            })
    }

    fn save(&self, symbols: &[Symbol], locator: &str) -> Result<()> {
        self.insert(locator, symbols.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIBRARY: &str = r#"(kicad_symbol_lib (version 20211014) (generator kicad_symbol_editor)
  (symbol "R" (pin_numbers hide) (in_bom yes) (on_board yes)
    (property "Reference" "R" (id 0) (at 2.032 0 90)
      (effects (font (size 1.27 1.27)))
    )
    (property "Value" "R" (id 1) (at 0 0 90)
      (effects (font (size 1.27 1.27)))
    )
    (symbol "R_0_1"
      (rectangle (start -1.016 -2.54) (end 1.016 2.54)
        (stroke (width 0.254) (type default) (color 0 0 0 0))
        (fill (type none))
      )
    )
    (symbol "R_1_1"
      (pin passive line (at 0 3.81 270) (length 1.27)
        (name "~" (effects (font (size 1.27 1.27))))
        (number "1" (effects (font (size 1.27 1.27))))
      )
    )
  )
  (symbol "R_10k" (extends "R")
    (property "Reference" "R" (id 0) (at 2.032 0 90)
      (effects (font (size 1.27 1.27)))
    )
    (property "Value" "10k" (id 1) (at 0 0 90)
      (effects (font (size 1.27 1.27)))
    )
  )
)
"#;

    #[test]
    fn test_parse_library() {
        let symbols = parse_library(LIBRARY, Path::new("test.kicad_sym")).unwrap();

        assert_eq!(symbols.len(), 2);
        let r = &symbols[0];
        assert_eq!(r.name(), "R");
        assert_eq!(r.extends, None);
        assert_eq!(r.properties.get("Value"), Some("R"));
        assert_eq!(r.units().len(), 2);
        assert_eq!(r.units()[1].name(), "R_1_1");
        assert_eq!(r.attributes.len(), 3);

        let derived = &symbols[1];
        assert_eq!(derived.extends.as_deref(), Some("R"));
        assert_eq!(derived.properties.get("Value"), Some("10k"));
        assert!(derived.units().is_empty());
    }

    #[test]
    fn test_parse_rejects_other_files() {
        let err = parse_library("(kicad_sch (version 1))", Path::new("x.kicad_sch")).unwrap_err();
        assert!(matches!(err, Error::InvalidLibrary { .. }));

        let err = parse_library("(kicad_symbol_lib\n(symbol \"R\"", Path::new("x")).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));
    }

    #[test]
    fn test_write_then_read_preserves_structure() {
        let symbols = parse_library(LIBRARY, Path::new("test.kicad_sym")).unwrap();
        let text = library_to_sexpr(&symbols).to_pretty_string();
        let reread = parse_library(&text, Path::new("out.kicad_sym")).unwrap();

        assert_eq!(reread, symbols);
    }

    #[test]
    fn test_derived_symbol_written_as_delta() {
        let symbols = parse_library(LIBRARY, Path::new("test.kicad_sym")).unwrap();
        let mut derived = symbols[0].clone();
        derived.set_name("R_1k");
        derived.extends = Some("R".to_string());

        let expr = symbol_to_sexpr(&derived);
        let heads: Vec<&str> = expr.as_list().unwrap()[2..]
            .iter()
            .filter_map(Sexpr::head)
            .collect();
        assert_eq!(heads, vec!["extends", "property", "property"]);
    }

    #[test]
    fn test_new_property_gets_fresh_id() {
        let mut symbol = parse_library(LIBRARY, Path::new("test.kicad_sym")).unwrap()[0].clone();
        symbol.properties.insert("MPN", "RC0603FR-0710KL");

        let expr = symbol_to_sexpr(&symbol);
        let mpn = expr
            .as_list()
            .unwrap()
            .iter()
            .find(|i| i.as_list().and_then(|l| l.get(1)).and_then(Sexpr::as_text) == Some("MPN"))
            .unwrap();
        assert_eq!(layout_id(&mpn.as_list().unwrap()[3..]), Some(2));
    }

    #[test]
    fn test_kicad_codec_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.kicad_sym");
        let locator = path.to_str().unwrap();
        let symbols = parse_library(LIBRARY, Path::new("test.kicad_sym")).unwrap();

        KicadCodec.save(&symbols, locator).unwrap();
        let loaded = KicadCodec.load(locator).unwrap();

        assert_eq!(loaded, symbols);
    }

    #[test]
    fn test_kicad_codec_missing_file() {
        let err = KicadCodec.load("/nonexistent/lib.kicad_sym").unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[test]
    fn test_memory_codec_counts_loads() {
        let codec = MemoryCodec::new();
        codec.insert("lib", vec![Symbol::new("R")]);

        assert!(codec.load("lib").is_ok());
        assert!(codec.load("missing").is_err());
        assert_eq!(codec.loads(), 2);
    }
}

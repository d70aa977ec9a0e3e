//! kst-core: Core library for deriving KiCad symbol libraries from spreadsheets
//!
//! This library provides functionality to:
//! - Load template symbols from KiCad `.kicad_sym` libraries, once per library
//! - Read spreadsheets of per-symbol overrides against those templates
//! - Merge overrides onto template properties in a stable order
//! - Write a library where symbols sharing a template extend it
//! - Import an existing library back into a spreadsheet

pub mod cache;
pub mod codec;
pub mod error;
pub mod library;
pub mod property;
pub mod sexpr;
pub mod spreadsheet;
pub mod symbol;

pub use cache::{TemplateCache, TemplateKey};
pub use codec::{KicadCodec, LibraryCodec, MemoryCodec};
pub use error::{Error, Result};
pub use library::{build_library, import_library};
pub use property::{merge, PropertyMap};
pub use spreadsheet::{Row, RowError, RowErrorKind, Spreadsheet, RESERVED_COLUMNS};
pub use symbol::{Symbol, Unit};

//! Template cache
//!
//! Resolves `(library locator, symbol name)` pairs to template symbols. Each
//! library is loaded through the codec at most once, and every resolved
//! template is kept under its full composite key, so two libraries that
//! both define a symbol called `R` never shadow each other.

use crate::codec::LibraryCodec;
use crate::error::Result;
use crate::library::{ancestry, flatten};
use crate::symbol::Symbol;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Composite identity of a template: library locator and symbol name
pub type TemplateKey = (String, String);

/// Append-only cache of loaded libraries and resolved templates.
///
/// Owned by one conversion run; create a fresh cache for each run.
pub struct TemplateCache<'a> {
    codec: &'a dyn LibraryCodec,
    libraries: HashMap<String, Vec<Symbol>>,
    templates: HashMap<TemplateKey, Symbol>,
}

impl<'a> TemplateCache<'a> {
    /// Create an empty cache reading libraries through `codec`
    pub fn new(codec: &'a dyn LibraryCodec) -> Self {
        Self {
            codec,
            libraries: HashMap::new(),
            templates: HashMap::new(),
        }
    }

    /// Resolve a template.
    ///
    /// Returns `Ok(None)` when the library has no symbol of that name. An
    /// unreadable library is an error. The returned symbol is shared; clone
    /// it before changing anything.
    ///
    /// A library symbol that `extends` another is flattened over its base
    /// chain, so the template always has the units and graphics of its root.
    pub fn resolve(&mut self, library: &str, name: &str) -> Result<Option<&Symbol>> {
        let key = (library.to_string(), name.to_string());
        if self.templates.contains_key(&key) {
            debug!(library, symbol = name, "template cache hit");
            return Ok(self.templates.get(&key));
        }

        if !self.libraries.contains_key(library) {
            let symbols = self.codec.load(library)?;
            self.libraries.insert(library.to_string(), symbols);
        }

        let symbols = self.libraries.get(library).map(Vec::as_slice).unwrap_or_default();
        let found = symbols.iter().find(|s| s.name() == name);

        match found {
            Some(symbol) => {
                let mut template = if symbol.extends.is_some() {
                    let by_name: HashMap<&str, &Symbol> =
                        symbols.iter().map(|s| (s.name(), s)).collect();
                    match ancestry(symbol, &by_name) {
                        Some(chain) => {
                            debug!(
                                library,
                                symbol = name,
                                depth = chain.len() - 1,
                                "flattened derived template"
                            );
                            flatten(&chain)
                        }
                        None => {
                            warn!(
                                library,
                                symbol = name,
                                extends = symbol.extends.as_deref().unwrap_or_default(),
                                "base symbol not found, using template as written"
                            );
                            let mut template = symbol.clone();
                            template.extends = None;
                            template
                        }
                    }
                } else {
                    symbol.clone()
                };
                template.set_template(library, name);
                debug!(library, symbol = name, "resolved template");
                let template: &Symbol = self.templates.entry(key).or_insert(template);
                Ok(Some(template))
            }
            None => {
                warn!(library, symbol = name, "template not found");
                Ok(None)
            }
        }
    }

    /// Store a template under its composite key without loading anything.
    ///
    /// An existing entry is kept; the cache never overwrites templates.
    pub fn seed(&mut self, library: &str, template: Symbol) {
        let key = (library.to_string(), template.name().to_string());
        self.templates.entry(key).or_insert_with(|| {
            let mut template = template;
            let name = template.name().to_string();
            template.set_template(library, name);
            template
        });
    }

    /// A previously resolved template, if any
    pub fn get(&self, library: &str, name: &str) -> Option<&Symbol> {
        self.templates.get(&(library.to_string(), name.to_string()))
    }

    /// Number of resolved templates
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

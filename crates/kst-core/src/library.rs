//! Library building and importing
//!
//! [`build_library`] turns spreadsheet symbols into the ordered list written
//! to a library file. Symbols sharing a template become derived symbols of
//! that template; a template used only once is written out flat. Bases are
//! always placed before anything that extends them.
//!
//! [`import_library`] is the reverse: it tags each symbol of an existing
//! library with the template it derives from.

use crate::cache::TemplateKey;
use crate::error::{Error, Result};
use crate::symbol::Symbol;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Group symbols by template and order them for a library file.
///
/// Every symbol must carry a template key present in `templates`; a missing
/// one means rows were not filtered while reading and is an error.
pub fn build_library(
    symbols: &[Symbol],
    templates: &HashMap<TemplateKey, Symbol>,
) -> Result<Vec<Symbol>> {
    // Group by template, keeping first-seen order
    let mut groups: Vec<(TemplateKey, Vec<&Symbol>)> = Vec::new();
    let mut group_index: HashMap<TemplateKey, usize> = HashMap::new();

    for symbol in symbols {
        let key = match symbol.template_key() {
            Some((library, name)) => (library.to_string(), name.to_string()),
            None => {
                return Err(Error::MissingTemplate {
                    library: String::new(),
                    symbol: symbol.name().to_string(),
                })
            }
        };
        match group_index.get(&key) {
            Some(&idx) => groups[idx].1.push(symbol),
            None => {
                group_index.insert(key.clone(), groups.len());
                groups.push((key, vec![symbol]));
            }
        }
    }

    let mut bases: Vec<Symbol> = Vec::new();
    let mut members: Vec<Symbol> = Vec::new();

    for (key, group) in groups {
        let template = templates.get(&key).ok_or_else(|| Error::MissingTemplate {
            library: key.0.clone(),
            symbol: key.1.clone(),
        })?;

        if let [single] = group.as_slice() {
            debug!(template = %key.1, symbol = single.name(), "writing standalone symbol");
            let mut standalone = (*single).clone();
            standalone.extends = None;
            members.push(standalone);
            continue;
        }

        let mut base = template.clone();
        base.extends = None;
        for member in group {
            if member.name() == base.name() {
                // The template itself is one of the rows: fold its values
                // into the base instead of writing it twice
                base.apply_overrides(member.properties.iter());
                continue;
            }
            let mut derived = member.clone();
            derived.extends = Some(base.name().to_string());
            members.push(derived);
        }
        debug!(template = %key.1, library = %key.0, "writing base symbol");
        bases.push(base);
    }

    info!(
        bases = bases.len(),
        symbols = members.len(),
        "built symbol library"
    );

    let mut ordered = bases;
    ordered.extend(members);

    let mut names = HashSet::new();
    for symbol in &ordered {
        if !names.insert(symbol.name()) {
            return Err(Error::DuplicateSymbol {
                name: symbol.name().to_string(),
            });
        }
    }

    Ok(ordered)
}

/// Tag the symbols of an existing library with their templates.
///
/// Root symbols become their own template. A derived symbol is pointed at
/// the root of its `extends` chain within the same library, and the
/// properties along the chain are merged root first so the row is complete
/// on its own. A derived symbol whose chain is broken is imported as a root.
pub fn import_library(symbols: Vec<Symbol>, locator: &str) -> Vec<Symbol> {
    let by_name: HashMap<&str, &Symbol> = symbols.iter().map(|s| (s.name(), s)).collect();

    let imported: Vec<Symbol> = symbols
        .iter()
        .map(|symbol| match ancestry(symbol, &by_name) {
            Some(chain) => {
                let mut row = flatten(&chain);
                row.set_template(locator, chain[chain.len() - 1].name());
                row
            }
            None => {
                warn!(
                    library = locator,
                    symbol = symbol.name(),
                    extends = symbol.extends.as_deref().unwrap_or_default(),
                    "base symbol not found, importing as a root symbol"
                );
                let mut row = symbol.clone();
                row.extends = None;
                let name = row.name().to_string();
                row.set_template(locator, name);
                row
            }
        })
        .collect();

    info!(library = locator, symbols = imported.len(), "imported symbols");
    imported
}

/// Follow `extends` links from a symbol up to its root.
///
/// The chain starts with `symbol` and ends with the root. Returns `None`
/// for a dangling link or a cycle.
pub(crate) fn ancestry<'a>(
    symbol: &'a Symbol,
    by_name: &HashMap<&str, &'a Symbol>,
) -> Option<Vec<&'a Symbol>> {
    let mut chain = vec![symbol];
    let mut visited = HashSet::new();
    let mut current = symbol;
    while let Some(base) = current.extends.as_deref() {
        if !visited.insert(current.name()) {
            return None;
        }
        current = *by_name.get(base)?;
        chain.push(current);
    }
    Some(chain)
}

/// Collapse an [`ancestry`] chain into one standalone symbol.
///
/// Units, graphics and attributes come from the root. Properties and their
/// layouts are applied root first, so the nearest symbol wins. The result
/// carries the name of `chain[0]` and no `extends` link. `chain` is never
/// empty, as returned by [`ancestry`].
pub(crate) fn flatten(chain: &[&Symbol]) -> Symbol {
    let root = chain[chain.len() - 1];
    let mut flat = root.clone();
    for symbol in chain[..chain.len() - 1].iter().rev() {
        flat.apply_overrides(symbol.properties.iter());
        flat.property_layout.extend(
            symbol
                .property_layout
                .iter()
                .map(|(key, layout)| (key.clone(), layout.clone())),
        );
    }
    flat.set_name(chain[0].name());
    flat.extends = None;
    flat
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIB: &str = "passives.kicad_sym";

    fn template(name: &str) -> Symbol {
        let mut t = Symbol::new(name);
        t.properties = [("Reference", "R"), ("Value", name)].into_iter().collect();
        t.set_template(LIB, name);
        t
    }

    fn row(template: &Symbol, name: &str, value: &str) -> Symbol {
        Symbol::from_template(template, name, LIB, [("Value", value)])
    }

    fn templates(list: &[&Symbol]) -> HashMap<TemplateKey, Symbol> {
        list.iter()
            .map(|t| ((LIB.to_string(), t.name().to_string()), (*t).clone()))
            .collect()
    }

    fn position(symbols: &[Symbol], name: &str) -> usize {
        symbols.iter().position(|s| s.name() == name).unwrap()
    }

    #[test]
    fn test_multi_member_group_derives_from_template() {
        let r1 = template("R1");
        let symbols = vec![row(&r1, "R1_A", "1k"), row(&r1, "R1_B", "2k")];

        let out = build_library(&symbols, &templates(&[&r1])).unwrap();

        let names: Vec<&str> = out.iter().map(Symbol::name).collect();
        assert_eq!(names, vec!["R1", "R1_A", "R1_B"]);
        assert_eq!(out[0].extends, None);
        assert_eq!(out[0].properties, r1.properties);
        assert_eq!(out[1].extends.as_deref(), Some("R1"));
        assert_eq!(out[1].properties.get("Value"), Some("1k"));
        assert_eq!(out[2].extends.as_deref(), Some("R1"));
        assert_eq!(out[2].properties.get("Value"), Some("2k"));
    }

    #[test]
    fn test_single_member_group_is_standalone() {
        let r = template("R");
        let symbols = vec![row(&r, "R_10k", "10k")];

        let out = build_library(&symbols, &templates(&[&r])).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name(), "R_10k");
        assert_eq!(out[0].extends, None);
        assert_eq!(out[0].properties.get("Value"), Some("10k"));
    }

    #[test]
    fn test_self_referential_root_collapses() {
        let t = template("T");
        let symbols = vec![row(&t, "T", "10k"), row(&t, "T_1", "1k")];

        let out = build_library(&symbols, &templates(&[&t])).unwrap();

        let named_t: Vec<&Symbol> = out.iter().filter(|s| s.name() == "T").collect();
        assert_eq!(named_t.len(), 1);
        assert_eq!(named_t[0].properties.get("Value"), Some("10k"));
        assert_eq!(named_t[0].extends, None);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_stale_extends_cleared_on_template() {
        let mut r = template("R");
        r.extends = Some("OLD".to_string());
        let symbols = vec![row(&r, "R_1", "1"), row(&r, "R_2", "2")];

        let out = build_library(&symbols, &templates(&[&r])).unwrap();

        assert_eq!(out[0].name(), "R");
        assert_eq!(out[0].extends, None);
    }

    #[test]
    fn test_bases_precede_derived_symbols() {
        let r = template("R");
        let c = template("C");
        let l = template("L");
        let symbols = vec![
            row(&r, "R_1", "1"),
            row(&l, "L_1", "1u"),
            row(&c, "C_1", "1n"),
            row(&r, "R_2", "2"),
            row(&c, "C_2", "2n"),
        ];

        let out = build_library(&symbols, &templates(&[&r, &c, &l])).unwrap();

        let names: Vec<&str> = out.iter().map(Symbol::name).collect();
        assert_eq!(names, vec!["R", "C", "R_1", "R_2", "L_1", "C_1", "C_2"]);
        for symbol in &out {
            if let Some(base) = &symbol.extends {
                assert!(position(&out, base) < position(&out, symbol.name()));
            }
        }
    }

    #[test]
    fn test_missing_template_is_error() {
        let r = template("R");
        let symbols = vec![row(&r, "R_1", "1")];

        let err = build_library(&symbols, &HashMap::new()).unwrap_err();
        assert!(matches!(err, Error::MissingTemplate { ref symbol, .. } if symbol == "R"));
    }

    #[test]
    fn test_duplicate_output_name_is_error() {
        let r = template("R");
        let c = template("C");
        // A standalone row named like another group's base
        let symbols = vec![row(&r, "R_1", "1"), row(&r, "R_2", "2"), row(&c, "R", "x")];

        let err = build_library(&symbols, &templates(&[&r, &c])).unwrap_err();
        assert!(matches!(err, Error::DuplicateSymbol { ref name } if name == "R"));
    }

    #[test]
    fn test_same_base_name_across_libraries_is_error() {
        let local = template("R");
        let mut vendor = Symbol::new("R");
        vendor.properties = [("Reference", "R"), ("Value", "vendor R")].into_iter().collect();
        vendor.set_template("vendor.kicad_sym", "R");
        let symbols = vec![
            row(&local, "R_1", "1"),
            row(&local, "R_2", "2"),
            Symbol::from_template(&vendor, "VR_1", "vendor.kicad_sym", [("Value", "1")]),
            Symbol::from_template(&vendor, "VR_2", "vendor.kicad_sym", [("Value", "2")]),
        ];
        let mut templates = templates(&[&local]);
        templates.insert(("vendor.kicad_sym".to_string(), "R".to_string()), vendor);

        let err = build_library(&symbols, &templates).unwrap_err();
        assert!(matches!(err, Error::DuplicateSymbol { ref name } if name == "R"));
    }

    #[test]
    fn test_import_marks_roots_and_resolves_chains() {
        let mut base = Symbol::new("R");
        base.properties = [("Reference", "R"), ("Value", "R"), ("Footprint", "R_0603")]
            .into_iter()
            .collect();
        let mut mid = Symbol::new("R_10k");
        mid.extends = Some("R".to_string());
        mid.properties = [("Value", "10k")].into_iter().collect();
        let mut leaf = Symbol::new("R_10k_1%");
        leaf.extends = Some("R_10k".to_string());
        leaf.properties = [("Tolerance", "1%")].into_iter().collect();

        let out = import_library(vec![base, mid, leaf], LIB);

        assert!(out[0].is_own_template());
        assert_eq!(out[0].template_key(), Some((LIB, "R")));
        assert_eq!(out[1].template_key(), Some((LIB, "R")));
        assert_eq!(out[1].extends, None);
        assert_eq!(out[1].properties.get("Value"), Some("10k"));
        assert_eq!(out[1].properties.get("Footprint"), Some("R_0603"));
        assert_eq!(out[2].template_key(), Some((LIB, "R")));
        assert_eq!(out[2].properties.get("Tolerance"), Some("1%"));
        assert_eq!(out[2].properties.get("Value"), Some("10k"));
        let keys: Vec<&str> = out[2].properties.keys().collect();
        assert_eq!(keys, vec!["Reference", "Value", "Footprint", "Tolerance"]);
    }

    #[test]
    fn test_import_cycle_becomes_root() {
        let mut a = Symbol::new("A");
        a.extends = Some("B".to_string());
        let mut b = Symbol::new("B");
        b.extends = Some("A".to_string());

        let out = import_library(vec![a, b], LIB);

        assert!(out.iter().all(Symbol::is_own_template));
    }

    #[test]
    fn test_import_dangling_extends_becomes_root() {
        let mut orphan = Symbol::new("X_1");
        orphan.extends = Some("X".to_string());

        let out = import_library(vec![orphan], LIB);

        assert!(out[0].is_own_template());
        assert_eq!(out[0].extends, None);
    }

    #[test]
    fn test_import_then_build_restores_hierarchy() {
        let base = template("R");
        let mut derived = Symbol::new("R_10k");
        derived.extends = Some("R".to_string());
        derived.properties = [("Reference", "R"), ("Value", "10k")].into_iter().collect();

        let imported = import_library(vec![base.clone(), derived], LIB);
        let roots: Vec<&Symbol> = imported.iter().filter(|s| s.is_own_template()).collect();
        let out = build_library(&imported, &templates(&roots)).unwrap();

        let names: Vec<&str> = out.iter().map(Symbol::name).collect();
        assert_eq!(names, vec!["R", "R_10k"]);
        assert_eq!(out[0].properties, base.properties);
        assert_eq!(out[1].extends.as_deref(), Some("R"));
    }
}

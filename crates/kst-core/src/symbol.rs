//! In-memory symbol model

use crate::property::{merge, PropertyMap};
use crate::sexpr::Sexpr;
use serde::Serialize;
use std::collections::BTreeMap;

/// A schematic symbol: name, ordered properties, template provenance and
/// the nested units that carry its graphics and pins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Symbol {
    name: String,
    /// Ordered property values
    pub properties: PropertyMap,
    /// Locator of the library the template came from
    pub template_library: Option<String>,
    /// Name of the template symbol within `template_library`
    pub template_name: Option<String>,
    /// Name of the symbol this one is a delta against
    pub extends: Option<String>,
    #[serde(skip)]
    units: Vec<Unit>,
    /// Other symbol-level items (pin settings, bom flags...) in file order
    #[serde(skip)]
    pub attributes: Vec<Sexpr>,
    /// Placement and styling of each property, keyed by property name
    #[serde(skip)]
    pub property_layout: BTreeMap<String, Vec<Sexpr>>,
}

impl Symbol {
    /// Create an empty symbol with no provenance
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: PropertyMap::new(),
            template_library: None,
            template_name: None,
            extends: None,
            units: Vec::new(),
            attributes: Vec::new(),
            property_layout: BTreeMap::new(),
        }
    }

    /// Copy a template into a new symbol named `name` with `overrides` merged
    /// onto the template's properties.
    ///
    /// The template is cloned, so the caller's copy stays untouched.
    pub fn from_template<'a, I>(template: &Symbol, name: &str, library: &str, overrides: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut symbol = template.clone();
        symbol.set_name(name);
        symbol.properties = merge(&template.properties, overrides);
        symbol.template_library = Some(library.to_string());
        symbol.template_name = Some(template.name.clone());
        symbol.extends = None;
        symbol
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the symbol and every unit it owns.
    ///
    /// Unit names must start with the parent symbol name, so a plain field
    /// write would leave a library KiCad refuses to load.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
        for unit in &mut self.units {
            unit.prefix = self.name.clone();
        }
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Attach a unit, re-prefixing it with this symbol's name
    pub fn push_unit(&mut self, mut unit: Unit) {
        unit.prefix = self.name.clone();
        self.units.push(unit);
    }

    /// Merge overrides onto this symbol's properties in place
    pub fn apply_overrides<'a, I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.properties = merge(&self.properties, overrides);
    }

    /// Record where this symbol's template lives
    pub fn set_template(&mut self, library: impl Into<String>, name: impl Into<String>) {
        self.template_library = Some(library.into());
        self.template_name = Some(name.into());
    }

    /// Composite template key, if both provenance fields are set
    pub fn template_key(&self) -> Option<(&str, &str)> {
        match (&self.template_library, &self.template_name) {
            (Some(lib), Some(name)) => Some((lib.as_str(), name.as_str())),
            _ => None,
        }
    }

    /// Whether this symbol is its own template
    pub fn is_own_template(&self) -> bool {
        self.template_name.as_deref() == Some(self.name.as_str())
    }
}

/// A unit/body-style sub-symbol, named `<parent>_<unit>_<style>` in KiCad
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    prefix: String,
    /// Everything after the parent name, e.g. `_1_1`
    suffix: String,
    /// Graphics, pins and other items of the unit
    pub body: Vec<Sexpr>,
}

impl Unit {
    /// Split a unit name into parent prefix and `_<unit>_<style>` suffix.
    ///
    /// Uses `parent` when the name starts with `<parent>_`, otherwise the last two
    /// underscore-separated fields are taken as the suffix.
    pub fn parse(unit_name: &str, parent: &str, body: Vec<Sexpr>) -> Self {
        let has_parent_prefix = !parent.is_empty()
            && unit_name
                .strip_prefix(parent)
                .is_some_and(|rest| rest.starts_with('_'));
        let split = if has_parent_prefix {
            parent.len()
        } else {
            unit_name
                .rmatch_indices('_')
                .nth(1)
                .map(|(idx, _)| idx)
                .unwrap_or(unit_name.len())
        };
        Self {
            prefix: unit_name[..split].to_string(),
            suffix: unit_name[split..].to_string(),
            body,
        }
    }

    /// Full unit name
    pub fn name(&self) -> String {
        format!("{}{}", self.prefix, self.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resistor() -> Symbol {
        let mut symbol = Symbol::new("R");
        symbol.properties = [("Reference", "R"), ("Value", "R")].into_iter().collect();
        symbol.push_unit(Unit::parse("R_0_1", "R", Vec::new()));
        symbol.push_unit(Unit::parse("R_1_1", "R", Vec::new()));
        symbol
    }

    #[test]
    fn test_unit_parse_with_parent() {
        let unit = Unit::parse("Device_R_0_1", "Device_R", Vec::new());
        assert_eq!(unit.suffix, "_0_1");
        assert_eq!(unit.name(), "Device_R_0_1");
    }

    #[test]
    fn test_unit_parse_without_parent() {
        let unit = Unit::parse("Other_Name_2_1", "R", Vec::new());
        assert_eq!(unit.prefix, "Other_Name");
        assert_eq!(unit.suffix, "_2_1");
    }

    #[test]
    fn test_set_name_renames_units() {
        let mut symbol = resistor();
        symbol.set_name("R_10k");

        let names: Vec<String> = symbol.units().iter().map(Unit::name).collect();
        assert_eq!(names, vec!["R_10k_0_1", "R_10k_1_1"]);
    }

    #[test]
    fn test_from_template_copies() {
        let template = resistor();
        let symbol = Symbol::from_template(&template, "R_1k", "lib.kicad_sym", [("Value", "1k")]);

        assert_eq!(symbol.name(), "R_1k");
        assert_eq!(symbol.properties.get("Value"), Some("1k"));
        assert_eq!(symbol.template_key(), Some(("lib.kicad_sym", "R")));
        assert_eq!(symbol.units()[0].name(), "R_1k_0_1");

        // Template is untouched
        assert_eq!(template.name(), "R");
        assert_eq!(template.properties.get("Value"), Some("R"));
        assert_eq!(template.units()[0].name(), "R_0_1");
    }

    #[test]
    fn test_is_own_template() {
        let mut symbol = resistor();
        assert!(!symbol.is_own_template());

        symbol.set_template("lib.kicad_sym", "R");
        assert!(symbol.is_own_template());
    }
}

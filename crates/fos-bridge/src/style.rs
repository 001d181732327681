//! Inline Style Declarations
//!
//! Script writes inline styles with either script-style (`backgroundColor`)
//! or CSS-style (`background-color`) names. Names are normalised to camelCase
//! once, interned, and every change is forwarded to the renderer as a
//! `SetStyle` command.

use crate::atom::{Atom, AtomTable};
use crate::command::CommandKind;
use crate::context::ExecutionContext;
use crate::error::Result;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Convert a hyphenated property name to camelCase
///
/// Custom properties (`--name`) are returned unchanged. A hyphen only
/// capitalises the next character when it follows a non-hyphen character,
/// so vendor prefixes keep their leading hyphen.
pub fn to_camel_case(name: &str) -> String {
    if name.len() > 2 && name.starts_with("--") {
        return name.to_string();
    }

    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    let mut prev = None;
    for c in name.chars() {
        if c == '\0' {
            break;
        }
        if c == '-' && prev.is_some_and(|p| p != '-') {
            upper_next = true;
            prev = Some(c);
            continue;
        }
        if upper_next {
            out.push(c.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

/// Memoised property-name normalisation for one atom table
#[derive(Default)]
pub struct PropertyNameCache {
    names: Mutex<HashMap<Box<str>, Atom>>,
}

impl PropertyNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalised, interned form of `name`
    pub fn resolve(&self, atoms: &AtomTable, name: &str) -> Atom {
        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(atom) = names.get(name) {
            return atom.clone();
        }
        let atom = atoms.intern(&to_camel_case(name));
        names.insert(name.into(), atom.clone());
        atom
    }

    pub fn len(&self) -> usize {
        self.names.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for PropertyNameCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyNameCache").field("cached", &self.len()).finish()
    }
}

/// Inline style of one render target
pub struct StyleDeclaration {
    context: Arc<ExecutionContext>,
    target_id: i64,
    properties: Vec<(Atom, Atom)>,
}

impl StyleDeclaration {
    pub fn new(context: Arc<ExecutionContext>, target_id: i64) -> Self {
        Self { context, target_id, properties: Vec::new() }
    }

    pub fn target_id(&self) -> i64 {
        self.target_id
    }

    /// Number of set properties
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Current value, or the empty atom when unset
    pub fn get_property_value(&self, name: &str) -> Atom {
        let key = self.context.property_name(name);
        self.position(&key)
            .map(|index| self.properties[index].1.clone())
            .unwrap_or_else(|| self.context.atoms().empty())
    }

    /// Set a property; unchanged values append no command
    pub fn set_property(&mut self, name: &str, value: &str) -> Result<()> {
        let key = self.context.property_name(name);
        let value = self.context.atoms().intern(value);

        let index = self.position(&key);
        if index.is_some_and(|index| self.properties[index].1 == value) {
            return Ok(());
        }

        self.context
            .queue()
            .append(self.target_id, CommandKind::SetStyle, Some(key.as_str()), Some(value.as_str()), None)?;
        match index {
            Some(index) => self.properties[index].1 = value,
            None => self.properties.push((key, value)),
        }
        Ok(())
    }

    /// Remove a property, returning its old value (empty when unset)
    pub fn remove_property(&mut self, name: &str) -> Result<Atom> {
        let key = self.context.property_name(name);
        let Some(index) = self.position(&key) else {
            return Ok(self.context.atoms().empty());
        };

        self.context
            .queue()
            .append(self.target_id, CommandKind::SetStyle, Some(key.as_str()), Some(""), None)?;
        let (_, old) = self.properties.remove(index);
        Ok(old)
    }

    /// Serialise as `name: value;` pairs in insertion order
    pub fn css_text(&self) -> String {
        self.properties
            .iter()
            .map(|(name, value)| format!("{name}: {value};"))
            .collect()
    }

    /// Copy every property of `other` without emitting commands
    pub fn copy_from(&mut self, other: &StyleDeclaration) {
        for (name, value) in &other.properties {
            match self.position(name) {
                Some(index) => self.properties[index].1 = value.clone(),
                None => self.properties.push((name.clone(), value.clone())),
            }
        }
    }

    fn position(&self, key: &Atom) -> Option<usize> {
        self.properties.iter().position(|(name, _)| name == key)
    }
}

impl fmt::Debug for StyleDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StyleDeclaration")
            .field("target_id", &self.target_id)
            .field("properties", &self.properties)
            .finish()
    }
}

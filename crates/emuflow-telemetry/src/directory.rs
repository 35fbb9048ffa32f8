//! Reverse lookup from `(ctx, type, index)` to the alias it was emitted as.

use std::collections::HashMap;

use emuflow_codegen::Session;
use emuflow_types::MemType;
use serde::Serialize;

use crate::record::PublishEntry;

/// Alias names for the instances of a finalized program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasDirectory {
    names: HashMap<(u8, MemType, u16), String>,
}

impl AliasDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every instance of `session`. Take it after finalize so the
    /// indices match what the device was loaded with.
    pub fn from_session(session: &Session) -> Self {
        let mut dir = Self::new();
        for ctx in session.contexts() {
            for inst in ctx.instances() {
                dir.insert(ctx.id(), inst.ty, inst.index, inst.alias.clone());
            }
        }
        dir
    }

    pub fn insert(&mut self, ctx: u8, ty: MemType, index: u16, alias: impl Into<String>) {
        self.names.insert((ctx, ty, index), alias.into());
    }

    pub fn lookup(&self, ctx: u8, ty: MemType, index: u16) -> Option<&str> {
        self.names.get(&(ctx, ty, index)).map(String::as_str)
    }

    /// Alias of the instance a PUBLISH entry reports on.
    pub fn alias_of(&self, entry: &PublishEntry) -> Option<&str> {
        self.lookup(entry.ctx, entry.ty, entry.instance)
    }

    /// Pair each entry with its alias, for display.
    pub fn annotate<'e>(&self, entries: &'e [PublishEntry]) -> Vec<NamedEntry<'e>> {
        entries
            .iter()
            .map(|entry| NamedEntry {
                alias: self.alias_of(entry).map(str::to_string),
                entry,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedEntry<'e> {
    pub alias: Option<String>,
    #[serde(flatten)]
    pub entry: &'e PublishEntry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use emuflow_codegen::VarSpec;
    use emuflow_types::Value;

    #[test]
    fn directory_from_session() {
        let mut s = Session::new(1).unwrap();
        s.add_variable(0, "x", VarSpec::scalar(MemType::F32)).unwrap();
        s.add_variable(0, "y", VarSpec::scalar(MemType::F32)).unwrap();
        s.add_output("0_q_0", MemType::Bool, false).unwrap();

        let dir = AliasDirectory::from_session(&s);
        assert_eq!(dir.len(), 3);
        assert_eq!(dir.lookup(0, MemType::F32, 1), Some("y"));
        assert_eq!(dir.lookup(1, MemType::Bool, 0), Some("0_q_0"));
        assert_eq!(dir.lookup(0, MemType::U8, 0), None);

        let entries = vec![PublishEntry {
            instance: 0,
            ctx: 0,
            ty: MemType::F32,
            updated: true,
            values: vec![Value::F32(2.0)],
        }];
        let named = dir.annotate(&entries);
        assert_eq!(named[0].alias.as_deref(), Some("x"));
    }
}

//! The compilation session: every memory context plus the alias registry.
//!
//! Aliases are unique across all contexts. The registry maps each alias to
//! its `(context, type)` so lookups never scan every table.

use std::collections::{BTreeMap, HashMap};

use emuflow_types::reference::parse_block_output_alias;
use emuflow_types::{
    Diagnostic, EmuError, ErrorCode, Index, MemType, Ref, Result, MAX_CONTEXT_ID,
};
use tracing::{debug, warn};

use crate::access::{encode_access_path, DecodedIndex, DecodedRef};
use crate::memory::{Instance, InstanceFlags, MemoryContext, VarSpec};

#[derive(Debug, Clone)]
pub struct Session {
    contexts: BTreeMap<u8, MemoryContext>,
    registry: HashMap<String, (u8, MemType)>,
    blocks_context: u8,
}

impl Session {
    /// Create a session whose block outputs live in `blocks_context`.
    pub fn new(blocks_context: u8) -> Result<Self> {
        check_context(blocks_context)?;
        Ok(Self {
            contexts: BTreeMap::new(),
            registry: HashMap::new(),
            blocks_context,
        })
    }

    pub fn blocks_context(&self) -> u8 {
        self.blocks_context
    }

    // ── Registration ────────────────────────────────────────────────────────

    /// Register a user variable. Returns its index within `(ctx, type)`.
    pub fn add_variable(&mut self, ctx: u8, alias: &str, spec: VarSpec) -> Result<u16> {
        check_context(ctx)?;
        if ctx == self.blocks_context {
            return Err(EmuError::ReservedContext(ctx));
        }
        if parse_block_output_alias(alias).is_some() {
            return Err(EmuError::ReservedAlias(alias.to_string()));
        }
        self.insert(ctx, alias, spec)
    }

    /// Register a block output scalar in the blocks context.
    pub fn add_output(&mut self, alias: &str, ty: MemType, standalone: bool) -> Result<u16> {
        let spec = VarSpec::scalar(ty)
            .value(0.0)
            .flags(InstanceFlags::output(standalone));
        self.insert(self.blocks_context, alias, spec)
    }

    fn insert(&mut self, ctx: u8, alias: &str, spec: VarSpec) -> Result<u16> {
        if self.registry.contains_key(alias) {
            return Err(EmuError::DuplicateAlias(alias.to_string()));
        }
        let instance = Instance::from_spec(alias, spec)?;
        if instance.element_count() == 0 {
            debug!(alias, "zero-size array accepted, pruned at reindex");
        }
        let ty = instance.ty;
        let index = self
            .contexts
            .entry(ctx)
            .or_insert_with(|| MemoryContext::new(ctx))
            .insert(instance)?;
        self.registry.insert(alias.to_string(), (ctx, ty));
        Ok(index)
    }

    /// Remove an instance. Later entries of its `(ctx, type)` shift down.
    pub fn remove(&mut self, alias: &str) -> Result<Instance> {
        let (ctx, ty) = self.locate(alias)?;
        let removed = self
            .contexts
            .get_mut(&ctx)
            .and_then(|c| c.remove(ty, alias))
            .ok_or_else(|| EmuError::UnknownAlias(alias.to_string()))?;
        self.registry.remove(alias);
        Ok(removed)
    }

    /// Drop every block output from the blocks context.
    pub fn clear_outputs(&mut self) {
        if let Some(ctx) = self.contexts.get_mut(&self.blocks_context) {
            for inst in ctx.clear() {
                self.registry.remove(&inst.alias);
            }
        }
    }

    /// Prune zero-sized arrays and renumber every `(ctx, type)` sequence.
    ///
    /// Returns one warning per pruned instance.
    pub fn reindex(&mut self) -> Vec<Diagnostic> {
        let mut warnings = Vec::new();
        for ctx in self.contexts.values_mut() {
            for inst in ctx.reindex() {
                warn!(alias = %inst.alias, ctx = ctx.id(), "zero-size array pruned");
                self.registry.remove(&inst.alias);
                warnings.push(Diagnostic::warning(
                    ErrorCode::ZERO_SIZE_PRUNED,
                    format!("zero-size array '{}' pruned", inst.alias),
                ));
            }
        }
        warnings
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    pub fn contains(&self, alias: &str) -> bool {
        self.registry.contains_key(alias)
    }

    /// `(context, type)` of an alias.
    pub fn locate(&self, alias: &str) -> Result<(u8, MemType)> {
        self.registry
            .get(alias)
            .copied()
            .ok_or_else(|| EmuError::UnknownAlias(alias.to_string()))
    }

    pub fn get(&self, alias: &str) -> Result<&Instance> {
        let (ctx, ty) = self.locate(alias)?;
        self.contexts
            .get(&ctx)
            .and_then(|c| c.find(ty, alias))
            .ok_or_else(|| EmuError::UnknownAlias(alias.to_string()))
    }

    /// Reverse lookup of `(ctx, type, index)`.
    pub fn alias_at(&self, ctx: u8, ty: MemType, index: u16) -> Option<&str> {
        self.contexts
            .get(&ctx)
            .and_then(|c| c.get(ty, index))
            .map(|i| i.alias.as_str())
    }

    /// Contexts in ascending id order.
    pub fn contexts(&self) -> impl Iterator<Item = &MemoryContext> {
        self.contexts.values()
    }

    pub fn context(&self, id: u8) -> Option<&MemoryContext> {
        self.contexts.get(&id)
    }

    // ── References ──────────────────────────────────────────────────────────

    /// Encode a reference against the current indices.
    pub fn encode(&self, r: &Ref) -> Result<Vec<u8>> {
        encode_access_path(self, r)
    }

    /// Turn a decoded access path back into a symbolic reference.
    pub fn resolve_decoded(&self, decoded: &DecodedRef) -> Result<Ref> {
        let alias = self
            .alias_at(decoded.ctx, decoded.ty, decoded.instance)
            .ok_or_else(|| {
                EmuError::UnknownAlias(format!(
                    "ctx {} {} #{}",
                    decoded.ctx, decoded.ty, decoded.instance
                ))
            })?;
        let mut r = Ref::new(alias);
        for index in &decoded.indices {
            r.indices.push(match index {
                DecodedIndex::Static(i) => Index::Static(*i),
                DecodedIndex::Dynamic(inner) => Index::Dynamic(Box::new(self.resolve_decoded(inner)?)),
            });
        }
        Ok(r)
    }
}

fn check_context(ctx: u8) -> Result<()> {
    if ctx > MAX_CONTEXT_ID {
        return Err(EmuError::InvalidContext(ctx));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(1).unwrap()
    }

    #[test]
    fn aliases_are_global() {
        let mut s = session();
        s.add_variable(0, "x", VarSpec::scalar(MemType::F32)).unwrap();
        assert_eq!(
            s.add_variable(2, "x", VarSpec::scalar(MemType::U8)),
            Err(EmuError::DuplicateAlias("x".into()))
        );
    }

    #[test]
    fn reserved_context_and_alias() {
        let mut s = session();
        assert_eq!(
            s.add_variable(1, "x", VarSpec::scalar(MemType::F32)),
            Err(EmuError::ReservedContext(1))
        );
        assert_eq!(
            s.add_variable(0, "3_q_0", VarSpec::scalar(MemType::F32)),
            Err(EmuError::ReservedAlias("3_q_0".into()))
        );
        assert_eq!(
            s.add_variable(8, "y", VarSpec::scalar(MemType::F32)),
            Err(EmuError::InvalidContext(8))
        );
        assert!(Session::new(9).is_err());
    }

    #[test]
    fn user_variables_default_mutable() {
        let mut s = session();
        s.add_variable(0, "x", VarSpec::scalar(MemType::F32)).unwrap();
        assert!(s.get("x").unwrap().flags.mutable);
        s.add_output("0_q_0", MemType::Bool, false).unwrap();
        assert!(!s.get("0_q_0").unwrap().flags.mutable);
    }

    #[test]
    fn remove_then_reverse_lookup() {
        let mut s = session();
        for alias in ["a", "b", "c"] {
            s.add_variable(0, alias, VarSpec::scalar(MemType::I16)).unwrap();
        }
        s.remove("b").unwrap();
        assert_eq!(s.alias_at(0, MemType::I16, 1), Some("c"));
        assert_eq!(s.get("c").unwrap().index, 1);
        assert!(matches!(s.get("b"), Err(EmuError::UnknownAlias(_))));
    }

    #[test]
    fn clearing_outputs_keeps_variables() {
        let mut s = session();
        s.add_variable(0, "x", VarSpec::scalar(MemType::F32)).unwrap();
        s.add_output("0_q_0", MemType::Bool, false).unwrap();
        s.add_output("1_q_0", MemType::F32, false).unwrap();
        s.clear_outputs();
        assert!(!s.contains("0_q_0"));
        assert!(s.context(1).unwrap().is_empty());
        assert!(s.contains("x"));
        // Aliases are free again.
        assert_eq!(s.add_output("1_q_0", MemType::F32, false).unwrap(), 0);
    }

    #[test]
    fn reindex_warns_about_pruned() {
        let mut s = session();
        s.add_variable(0, "empty", VarSpec::array(MemType::U8, [4, 0])).unwrap();
        s.add_variable(0, "kept", VarSpec::array(MemType::U8, [2])).unwrap();
        let warnings = s.reindex();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, ErrorCode::ZERO_SIZE_PRUNED);
        assert!(!s.contains("empty"));
        assert_eq!(s.get("kept").unwrap().index, 0);
    }
}

//! The program builder: owns the compilation session and the block list.
//!
//! Blocks keep symbolic references, and a block-output reference always
//! names its source by construction id. `finalize` orders the blocks,
//! re-registers every block-output instance as `"{idx}_q_{k}"` after its
//! execution index and materializes a resolved copy of each block with its
//! references translated to those aliases. Validation and emission only see
//! the resolved copies, so a reference taken at any time stays bound to the
//! same block.

use std::collections::HashMap;

use emuflow_codegen::{Block, BlockSpec, Session, VarSpec};
use emuflow_types::reference::{block_output_alias, parse_block_output_alias};
use emuflow_types::{Diagnostic, Diagnostics, EmuError, Ref, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CompilerConfig;
use crate::dump::{self, Dump};
use crate::sort::schedule;

/// Stable handle to a block, valid across finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHandle {
    id: u32,
}

impl BlockHandle {
    /// Construction id of the block.
    pub fn id(self) -> u32 {
        self.id
    }
}

#[derive(Debug, Clone)]
pub struct Program {
    config: CompilerConfig,
    session: Session,
    blocks: Vec<Block>,
    /// Execution-order copies with references bound to execution labels.
    resolved: Vec<Block>,
    next_id: u32,
    finalized: bool,
    /// Pruning warnings; reindex reports each instance only once.
    pruned: Vec<Diagnostic>,
    diagnostics: Diagnostics,
}

impl Program {
    pub fn new(config: CompilerConfig) -> Result<Self> {
        let session = Session::new(config.blocks_context)?;
        Ok(Self {
            config,
            session,
            blocks: Vec::new(),
            resolved: Vec::new(),
            next_id: 0,
            finalized: false,
            pruned: Vec::new(),
            diagnostics: Diagnostics::empty(),
        })
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Blocks as constructed, in execution order once finalized.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Blocks as emitted: execution order, labels and references resolved.
    pub fn resolved(&self) -> Result<&[Block]> {
        if !self.finalized {
            return Err(EmuError::NotFinalized);
        }
        Ok(&self.resolved)
    }

    /// Resolved form of one block.
    pub fn resolved_block(&self, handle: BlockHandle) -> Result<&Block> {
        self.resolved()?
            .iter()
            .find(|b| b.id == handle.id)
            .ok_or(EmuError::UnknownBlock(handle.id))
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Warnings of the last finalize.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    // ── Variables ───────────────────────────────────────────────────────────

    pub fn add_variable(&mut self, ctx: u8, alias: &str, spec: VarSpec) -> Result<u16> {
        let index = self.session.add_variable(ctx, alias, spec)?;
        self.finalized = false;
        Ok(index)
    }

    /// Remove a user variable. Block outputs go away with their block only.
    pub fn remove_variable(&mut self, alias: &str) -> Result<()> {
        if parse_block_output_alias(alias).is_some() {
            return Err(EmuError::ReservedAlias(alias.to_string()));
        }
        self.session.remove(alias)?;
        self.finalized = false;
        Ok(())
    }

    // ── Blocks ──────────────────────────────────────────────────────────────

    /// Build a block and register its outputs in the blocks context.
    pub fn add_block(&mut self, spec: impl BlockSpec) -> Result<BlockHandle> {
        let mut block = spec.build()?;
        let id = self.next_id;
        block.id = id;
        block.label = id;

        let mut added: Vec<String> = Vec::with_capacity(block.outputs.len());
        for (k, def) in block.outputs.iter().enumerate() {
            let alias = block_output_alias(id, k);
            if let Err(e) = self.session.add_output(&alias, def.ty, def.standalone) {
                for alias in &added {
                    let _ = self.session.remove(alias);
                }
                return Err(e);
            }
            added.push(alias);
        }

        debug!(id, ty = %block.ty, outputs = added.len(), "block added");
        self.blocks.push(block);
        self.next_id += 1;
        self.finalized = false;
        Ok(BlockHandle { id })
    }

    pub fn block(&self, handle: BlockHandle) -> Result<&Block> {
        self.blocks
            .iter()
            .find(|b| b.id == handle.id)
            .ok_or(EmuError::UnknownBlock(handle.id))
    }

    fn block_mut(&mut self, handle: BlockHandle) -> Result<&mut Block> {
        self.blocks
            .iter_mut()
            .find(|b| b.id == handle.id)
            .ok_or(EmuError::UnknownBlock(handle.id))
    }

    /// Reference to output `k` of a block, keyed by its construction id.
    ///
    /// The reference stays valid across any number of finalize passes.
    pub fn output(&self, handle: BlockHandle, k: usize) -> Result<Ref> {
        let block = self.block(handle)?;
        if k >= block.outputs.len() {
            return Err(EmuError::OutOfRange(format!(
                "{} block {} has no output {k}",
                block.ty, block.id
            )));
        }
        Ok(Ref::block_output(block.id, k))
    }

    /// Bind input `slot` of a block after construction.
    pub fn connect(&mut self, handle: BlockHandle, slot: usize, r: impl Into<Ref>) -> Result<()> {
        self.block_mut(handle)?.connect(slot, r.into())?;
        self.finalized = false;
        Ok(())
    }

    // ── Finalize ────────────────────────────────────────────────────────────

    /// Reindex memory, order blocks, rename block outputs and validate.
    ///
    /// Running it again on an unchanged program is a no-op on the output.
    pub fn finalize(&mut self) -> Result<&Diagnostics> {
        self.finalized = false;
        let mut diagnostics = Diagnostics::empty();

        self.pruned.extend(self.session.reindex());
        for w in &self.pruned {
            diagnostics.push_warning(w.clone());
        }

        if self.blocks.len() > u16::MAX as usize {
            return Err(EmuError::OutOfRange(format!(
                "{} blocks, at most {}",
                self.blocks.len(),
                u16::MAX
            )));
        }

        let schedule = schedule(&self.blocks);
        for w in schedule.warnings {
            diagnostics.push_warning(w);
        }
        for &(pos, len) in &schedule.chain_lens {
            self.blocks[pos].set_chain_len(len);
        }
        let mut slots: Vec<Option<Block>> = std::mem::take(&mut self.blocks)
            .into_iter()
            .map(Some)
            .collect();
        self.blocks = schedule
            .order
            .iter()
            .filter_map(|&pos| slots[pos].take())
            .collect();

        self.resolved = self.relabel()?;

        for block in &self.resolved {
            for w in block.validate(&self.session)? {
                warn!(code = %w.code, "{}", w.message);
                diagnostics.push_warning(w);
            }
        }

        debug!(
            blocks = self.blocks.len(),
            warnings = diagnostics.total_warnings,
            "program finalized"
        );
        self.diagnostics = diagnostics;
        self.finalized = true;
        Ok(&self.diagnostics)
    }

    /// Re-register block outputs as `"{idx}_q_{k}"` in execution order and
    /// return copies of the blocks bound to those aliases.
    fn relabel(&mut self) -> Result<Vec<Block>> {
        self.session.clear_outputs();
        let mut labels: HashMap<u32, u32> = HashMap::with_capacity(self.blocks.len());
        for (idx, block) in self.blocks.iter().enumerate() {
            let idx = idx as u32;
            for (k, def) in block.outputs.iter().enumerate() {
                self.session
                    .add_output(&block_output_alias(idx, k), def.ty, def.standalone)?;
            }
            labels.insert(block.id, idx);
        }

        let mut resolved = Vec::with_capacity(self.blocks.len());
        for (idx, block) in self.blocks.iter().enumerate() {
            let mut copy = block.clone();
            copy.label = idx as u32;
            let mut dangling: Option<String> = None;
            copy.rewrite_refs(&mut |r| {
                if let Some((id, k)) = parse_block_output_alias(&r.alias) {
                    match labels.get(&id) {
                        Some(&label) => r.alias = block_output_alias(label, k),
                        None => {
                            dangling.get_or_insert_with(|| r.alias.clone());
                        }
                    }
                }
            });
            if let Some(alias) = dangling {
                return Err(EmuError::UnknownAlias(alias));
            }
            resolved.push(copy);
        }
        Ok(resolved)
    }

    // ── Emission ────────────────────────────────────────────────────────────

    /// Emit the dump. The program must be finalized.
    pub fn emit(&self) -> Result<Dump> {
        if !self.finalized {
            return Err(EmuError::NotFinalized);
        }
        dump::emit(&self.session, &self.resolved, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emuflow_codegen::blocks::{Math, SetGlobal};
    use emuflow_types::MemType;

    fn program() -> Program {
        let mut p = Program::new(CompilerConfig::default()).unwrap();
        p.add_variable(0, "x", VarSpec::scalar(MemType::F32)).unwrap();
        p.add_variable(0, "y", VarSpec::scalar(MemType::F32)).unwrap();
        p
    }

    #[test]
    fn outputs_follow_execution_order() {
        let mut p = program();
        // Block 0 reads block 1, so block 1 runs first.
        let reader = p.add_block(Math::new("a * 2").var("a", Ref::block_output(1, 0))).unwrap();
        let source = p.add_block(Math::new("a + 1").var("a", "x")).unwrap();
        assert_eq!(p.output(reader, 0).unwrap(), Ref::new("0_q_0"));
        p.finalize().unwrap();

        // Handles and stored references keep construction ids.
        assert_eq!(p.output(source, 0).unwrap(), Ref::new("1_q_0"));
        assert_eq!(p.block(reader).unwrap().in_conn[1], Some(Ref::new("1_q_0")));

        let resolved = p.resolved_block(reader).unwrap();
        assert_eq!(resolved.label, 1);
        assert_eq!(resolved.in_conn[1], Some(Ref::new("0_q_0")));
        assert_eq!(p.resolved_block(source).unwrap().label, 0);
        assert_eq!(p.session().get("0_q_0").unwrap().index, 0);
        assert_eq!(p.session().get("1_q_0").unwrap().index, 1);
    }

    #[test]
    fn captured_outputs_survive_finalize() {
        let mut p = program();
        let a = p.add_block(Math::new("b + 1").var("b", Ref::block_output(1, 0))).unwrap();
        let b = p.add_block(Math::new("x * 2").var("x", "x")).unwrap();
        let b_out = p.output(b, 0).unwrap();
        p.finalize().unwrap();

        let sink = p
            .add_block(SetGlobal {
                value: b_out.into(),
                target: Ref::new("y"),
            })
            .unwrap();
        p.finalize().unwrap();

        let b_label = p.resolved_block(b).unwrap().label;
        assert_eq!(p.resolved_block(a).unwrap().label, 2);
        assert_eq!(b_label, 0);
        assert_eq!(
            p.resolved_block(sink).unwrap().in_conn[0],
            Some(Ref::block_output(b_label, 0))
        );
        assert!(p.emit().is_ok());
    }

    #[test]
    fn dangling_block_reference_is_rejected() {
        let mut p = program();
        p.add_block(Math::new("a").var("a", Ref::block_output(7, 0))).unwrap();
        assert_eq!(
            p.finalize().unwrap_err(),
            EmuError::UnknownAlias("7_q_0".into())
        );
        assert!(matches!(p.resolved(), Err(EmuError::NotFinalized)));
    }

    #[test]
    fn emit_requires_finalize() {
        let mut p = program();
        assert_eq!(p.emit().unwrap_err(), EmuError::NotFinalized);
        p.finalize().unwrap();
        assert!(p.emit().is_ok());
        p.add_variable(0, "z", VarSpec::scalar(MemType::U8)).unwrap();
        assert_eq!(p.emit().unwrap_err(), EmuError::NotFinalized);
    }

    #[test]
    fn failed_build_consumes_no_id() {
        let mut p = program();
        let err = p
            .add_block(SetGlobal {
                value: 1.0.into(),
                target: Ref::new("y"),
            })
            .unwrap_err();
        assert!(matches!(err, EmuError::NotFoldable { .. }));
        let h = p.add_block(Math::new("a").var("a", "x")).unwrap();
        assert_eq!(h.id(), 0);
    }

    #[test]
    fn unknown_handles_and_outputs() {
        let mut p = program();
        let h = p.add_block(Math::new("a").var("a", "x")).unwrap();
        assert!(matches!(p.output(h, 1), Err(EmuError::OutOfRange(_))));
        let ghost = BlockHandle { id: 9 };
        assert_eq!(p.block(ghost).unwrap_err(), EmuError::UnknownBlock(9));
        assert_eq!(
            p.connect(ghost, 0, "x").unwrap_err(),
            EmuError::UnknownBlock(9)
        );
    }

    #[test]
    fn block_outputs_are_not_removable_variables() {
        let mut p = program();
        p.add_block(Math::new("a").var("a", "x")).unwrap();
        assert_eq!(
            p.remove_variable("0_q_0").unwrap_err(),
            EmuError::ReservedAlias("0_q_0".into())
        );
        p.remove_variable("x").unwrap();
        assert!(!p.session().contains("x"));
    }
}

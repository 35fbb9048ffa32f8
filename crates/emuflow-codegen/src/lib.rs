//! emuflow code generator: lays out memory and encodes blocks as packets.
//!
//! # Architecture
//!
//! A [`Session`] owns every [`MemoryContext`] and the global alias registry.
//! Blocks hold symbolic [`Ref`](emuflow_types::Ref)s; nothing is turned into
//! bytes until the [`access`] encoder runs against a reindexed session, so
//! renumbering instances never invalidates a stored reference.
//!
//! ## Packets produced here
//! - `0xF0` context config, `0xF1` instance descriptors
//! - `0xFA` scalar data, `0xFB` array data
//! - `0xB0` block header, `0xB1`/`0xB2` block input/output, `0xBA` block data

pub mod access;
pub mod blocks;
pub mod memory;
pub mod session;

pub use access::{decode_access_path, encode_access_path, DecodedIndex, DecodedRef};
pub use blocks::{Block, BlockConfig, BlockSpec, BlockType, Input, InputDef, OutputDef};
pub use memory::{Instance, InstanceFlags, MemoryContext, VarSpec};
pub use session::Session;

//! Symbolic references (access paths).
//!
//! A [`Ref`] names one element of one instance by alias. Indices are either
//! static (resolved at compile time) or dynamic (another reference whose
//! runtime value supplies the index):
//!
//! ```text
//! Ref   := { alias, indices: list<Index> }
//! Index := Static(u16) | Dynamic(Ref)
//! ```
//!
//! References stay symbolic until emission. Block outputs are named
//! `"{idx}_q_{k}"` and those names change when the blocks are sorted, so no
//! numeric instance index is ever captured here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One index of an access path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Index {
    /// Compile-time constant index.
    Static(u16),
    /// Index read from another instance at runtime.
    Dynamic(Box<Ref>),
}

impl Index {
    pub fn is_static(&self) -> bool {
        matches!(self, Index::Static(_))
    }
}

impl From<u16> for Index {
    fn from(i: u16) -> Self {
        Index::Static(i)
    }
}

impl From<Ref> for Index {
    fn from(r: Ref) -> Self {
        Index::Dynamic(Box::new(r))
    }
}

/// A symbolic reference to one element of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ref {
    pub alias: String,
    pub indices: Vec<Index>,
}

impl Ref {
    /// Reference a whole scalar (or an array, before indices are added).
    pub fn new(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            indices: Vec::new(),
        }
    }

    /// Append a static index.
    pub fn at(mut self, index: u16) -> Self {
        self.indices.push(Index::Static(index));
        self
    }

    /// Append a dynamic index read from `index` at runtime.
    pub fn at_dyn(mut self, index: Ref) -> Self {
        self.indices.push(Index::Dynamic(Box::new(index)));
        self
    }

    /// Reference to output `k` of the block currently labelled `label`.
    pub fn block_output(label: u32, k: usize) -> Self {
        Self::new(block_output_alias(label, k))
    }

    /// `true` iff every index is static (scalars trivially).
    pub fn is_resolved(&self) -> bool {
        self.indices.iter().all(Index::is_static)
    }

    /// If this reference names a block output, return `(label, output)`.
    pub fn block_output_parts(&self) -> Option<(u32, usize)> {
        parse_block_output_alias(&self.alias)
    }

    /// Visit this reference and every reference nested in its indices,
    /// outermost first.
    pub fn walk(&self, f: &mut impl FnMut(&Ref)) {
        f(self);
        for index in &self.indices {
            if let Index::Dynamic(inner) = index {
                inner.walk(f);
            }
        }
    }

    /// Mutable variant of [`Ref::walk`].
    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Ref)) {
        f(self);
        for index in &mut self.indices {
            if let Index::Dynamic(inner) = index {
                inner.walk_mut(f);
            }
        }
    }
}

impl From<&str> for Ref {
    fn from(alias: &str) -> Self {
        Ref::new(alias)
    }
}

impl From<String> for Ref {
    fn from(alias: String) -> Self {
        Ref::new(alias)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.alias)?;
        for index in &self.indices {
            match index {
                Index::Static(i) => write!(f, "[{i}]")?,
                Index::Dynamic(r) => write!(f, "[{r}]")?,
            }
        }
        Ok(())
    }
}

/// Alias of output `k` of the block labelled `label`.
pub fn block_output_alias(label: u32, k: usize) -> String {
    format!("{label}_q_{k}")
}

/// Parse an alias of the form `"{label}_q_{k}"`.
pub fn parse_block_output_alias(alias: &str) -> Option<(u32, usize)> {
    let (label, k) = alias.split_once("_q_")?;
    if label.is_empty() || k.is_empty() {
        return None;
    }
    if !label.bytes().all(|b| b.is_ascii_digit()) || !k.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((label.parse().ok()?, k.parse().ok()?))
}

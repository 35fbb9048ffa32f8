//! Memory contexts: typed instance tables and their packets.
//!
//! A context holds nine ordered sequences, one per [`MemType`]. An
//! instance's `index` is its position in its `(context, type)` sequence.
//!
//! ```text
//! 0xF0  ctx:u8  9 × (heap:u32, count:u16, rank:u16)
//! 0xF1  head:u16 dims:u16×n  head:u16 dims:u16×n  …
//! 0xFA  ctx:u8 type:u8 count:u16  (index:u16 value)…
//! 0xFB  ctx:u8 type:u8 count:u16  (inst:u16 start:u16 items:u16 item…)…
//! ```

use std::collections::HashMap;

use emuflow_types::wire::{HDR_ARRAY_DATA, HDR_CTX_CONFIG, HDR_INSTANCES, HDR_SCALAR_DATA};
use emuflow_types::{EmuError, MemType, Result, Value, Writer, MAX_DIMS};
use serde::{Deserialize, Serialize};

// ══════════════════════════════════════════════════════════════════════════════
// Flags & Specs
// ══════════════════════════════════════════════════════════════════════════════

/// Per-instance flags carried in the instance head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceFlags {
    /// Set by the runtime when the value changes.
    pub updated: bool,
    pub clearable: bool,
    /// The instance points outside context storage (selector placeholders).
    pub standalone: bool,
    pub mutable: bool,
}

impl InstanceFlags {
    /// Defaults for user variables: mutable, nothing else.
    pub fn variable() -> Self {
        Self {
            mutable: true,
            ..Self::default()
        }
    }

    /// Defaults for block outputs.
    pub fn output(standalone: bool) -> Self {
        Self {
            standalone,
            ..Self::default()
        }
    }
}

/// Declaration of a new instance.
///
/// ```
/// use emuflow_codegen::VarSpec;
/// use emuflow_types::MemType;
///
/// let limit = VarSpec::scalar(MemType::F32).value(10.0);
/// let grid = VarSpec::array(MemType::U16, [3, 3]).data([0.0; 9]);
/// # let _ = (limit, grid);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct VarSpec {
    pub ty: MemType,
    pub scalar: bool,
    pub dims: Vec<u16>,
    pub data: Option<Vec<f64>>,
    pub flags: InstanceFlags,
}

impl VarSpec {
    pub fn scalar(ty: MemType) -> Self {
        Self {
            ty,
            scalar: true,
            dims: Vec::new(),
            data: None,
            flags: InstanceFlags::variable(),
        }
    }

    pub fn array(ty: MemType, dims: impl Into<Vec<u16>>) -> Self {
        Self {
            ty,
            scalar: false,
            dims: dims.into(),
            data: None,
            flags: InstanceFlags::variable(),
        }
    }

    /// Initial value of a scalar.
    pub fn value(mut self, v: f64) -> Self {
        self.data = Some(vec![v]);
        self
    }

    /// Initial row-major data of an array.
    pub fn data(mut self, data: impl Into<Vec<f64>>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set the dimensions (an error for scalars at registration).
    pub fn dims(mut self, dims: impl Into<Vec<u16>>) -> Self {
        self.dims = dims.into();
        self
    }

    pub fn flags(mut self, flags: InstanceFlags) -> Self {
        self.flags = flags;
        self
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Instance
// ══════════════════════════════════════════════════════════════════════════════

/// A scalar or array living in one context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub alias: String,
    pub ty: MemType,
    /// Empty for scalars.
    pub dims: Vec<u16>,
    pub data: Option<Vec<Value>>,
    pub flags: InstanceFlags,
    pub index: u16,
}

impl Instance {
    /// Validate a declaration and build the instance (index unassigned).
    pub fn from_spec(alias: &str, spec: VarSpec) -> Result<Self> {
        if spec.scalar && !spec.dims.is_empty() {
            return Err(EmuError::ScalarWithDims(alias.to_string()));
        }
        if !spec.scalar && spec.dims.is_empty() {
            return Err(EmuError::OutOfRange(format!(
                "array '{alias}' declares no dimensions"
            )));
        }
        if spec.dims.len() > MAX_DIMS {
            return Err(EmuError::TooManyDims {
                alias: alias.to_string(),
                dims: spec.dims.len(),
            });
        }
        let expected: usize = spec.dims.iter().map(|&d| d as usize).product();
        if expected > u16::MAX as usize {
            return Err(EmuError::OutOfRange(format!(
                "array '{alias}' has {expected} elements, at most {} are addressable",
                u16::MAX
            )));
        }
        let data = match spec.data {
            Some(raw) => {
                if raw.len() != expected {
                    return Err(EmuError::DataLengthMismatch {
                        alias: alias.to_string(),
                        expected,
                        got: raw.len(),
                    });
                }
                Some(raw.into_iter().map(|n| Value::cast(spec.ty, n)).collect())
            }
            None => None,
        };
        Ok(Self {
            alias: alias.to_string(),
            ty: spec.ty,
            dims: spec.dims,
            data,
            flags: spec.flags,
            index: 0,
        })
    }

    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Number of elements (1 for scalars).
    pub fn element_count(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    /// The packed 16-bit instance head.
    pub fn head(&self, ctx: u8) -> u16 {
        let mut head = (ctx as u16) & 0x7;
        head |= ((self.dims.len() as u16) & 0xF) << 3;
        head |= ((self.ty.tag() as u16) & 0xF) << 7;
        head |= (self.flags.updated as u16) << 11;
        head |= (self.flags.clearable as u16) << 12;
        head |= (self.flags.standalone as u16) << 13;
        head |= (self.flags.mutable as u16) << 14;
        head
    }

    /// Head followed by the dimension sizes.
    fn descriptor(&self, ctx: u8) -> Vec<u8> {
        let mut w = Writer::new();
        w.u16(self.head(ctx));
        for &d in &self.dims {
            w.u16(d);
        }
        w.finish()
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// MemoryContext
// ══════════════════════════════════════════════════════════════════════════════

/// One numbered bucket of typed instances.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryContext {
    id: u8,
    tables: [Vec<Instance>; 9],
    /// Alias → position in its type's table.
    positions: HashMap<String, u16>,
}

impl MemoryContext {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            tables: Default::default(),
            positions: HashMap::new(),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// The `(ctx, type)` sequence in index order.
    pub fn table(&self, ty: MemType) -> &[Instance] {
        &self.tables[ty.tag() as usize]
    }

    /// Every instance, by type then index.
    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.tables.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(Vec::is_empty)
    }

    pub fn find(&self, ty: MemType, alias: &str) -> Option<&Instance> {
        let &index = self.positions.get(alias)?;
        self.get(ty, index).filter(|i| i.alias == alias)
    }

    pub fn get(&self, ty: MemType, index: u16) -> Option<&Instance> {
        self.table(ty).get(index as usize)
    }

    /// Append an instance, assigning the next index of its type.
    pub fn insert(&mut self, mut instance: Instance) -> Result<u16> {
        let id = self.id;
        let table = &mut self.tables[instance.ty.tag() as usize];
        let index = u16::try_from(table.len()).map_err(|_| {
            EmuError::OutOfRange(format!(
                "context {id} holds too many {} instances",
                instance.ty
            ))
        })?;
        instance.index = index;
        self.positions.insert(instance.alias.clone(), index);
        table.push(instance);
        Ok(index)
    }

    /// Remove an instance; later entries of the same type shift down by one.
    pub fn remove(&mut self, ty: MemType, alias: &str) -> Option<Instance> {
        let pos = self.find(ty, alias)?.index as usize;
        self.positions.remove(alias);
        let table = &mut self.tables[ty.tag() as usize];
        let removed = table.remove(pos);
        for (i, inst) in table.iter_mut().enumerate().skip(pos) {
            inst.index = i as u16;
            self.positions.insert(inst.alias.clone(), inst.index);
        }
        Some(removed)
    }

    /// Remove every instance.
    pub fn clear(&mut self) -> Vec<Instance> {
        self.positions.clear();
        self.tables.iter_mut().flat_map(std::mem::take).collect()
    }

    /// Drop zero-sized arrays and renumber every sequence by position.
    ///
    /// Returns the pruned instances.
    pub fn reindex(&mut self) -> Vec<Instance> {
        let mut pruned = Vec::new();
        for table in &mut self.tables {
            let (keep, drop): (Vec<_>, Vec<_>) = std::mem::take(table)
                .into_iter()
                .partition(|i| i.element_count() > 0);
            *table = keep;
            for (i, inst) in table.iter_mut().enumerate() {
                inst.index = i as u16;
            }
            pruned.extend(drop);
        }
        self.positions.clear();
        for inst in self.tables.iter().flatten() {
            self.positions.insert(inst.alias.clone(), inst.index);
        }
        pruned
    }

    // ── Packets ──────────────────────────────────────────────────────────────

    /// `0xF0`: per-type heap size, instance count and total rank.
    pub fn config_packet(&self) -> Vec<u8> {
        let mut w = Writer::with_header(HDR_CTX_CONFIG);
        w.u8(self.id);
        for ty in MemType::ALL {
            let table = self.table(ty);
            let heap: usize = table.iter().map(Instance::element_count).sum();
            let rank: usize = table.iter().map(|i| i.dims.len()).sum();
            w.u32(heap as u32).u16(table.len() as u16).u16(rank as u16);
        }
        w.finish()
    }

    /// `0xF1` packets; a descriptor never straddles two packets.
    pub fn descriptor_packets(&self, mtu: usize) -> Result<Vec<Vec<u8>>> {
        let mut out = Packetizer::new(mtu, vec![HDR_INSTANCES], None);
        for inst in self.instances() {
            out.push(&inst.descriptor(self.id))?;
        }
        Ok(out.finish())
    }

    /// `0xFA` packets, one stream per type, entries in index order.
    pub fn scalar_data_packets(&self, mtu: usize, omit_zero: bool) -> Result<Vec<Vec<u8>>> {
        let mut packets = Vec::new();
        for ty in MemType::ALL {
            let mut out = Packetizer::new(mtu, vec![HDR_SCALAR_DATA, self.id, ty.tag(), 0, 0], Some(3));
            for inst in self.table(ty).iter().filter(|i| i.is_scalar()) {
                let Some(value) = inst.data.as_ref().and_then(|d| d.first()) else {
                    continue;
                };
                if omit_zero && value.is_zero() {
                    continue;
                }
                let mut w = Writer::new();
                w.u16(inst.index).value(value);
                out.push(w.as_bytes())?;
            }
            packets.extend(out.finish());
        }
        Ok(packets)
    }

    /// `0xFB` packets. Arrays split into chunks on element boundaries.
    pub fn array_data_packets(&self, mtu: usize) -> Result<Vec<Vec<u8>>> {
        const CHUNK_HEADER: usize = 6;
        let mut packets = Vec::new();
        for ty in MemType::ALL {
            let size = ty.size();
            let mut out = Packetizer::new(mtu, vec![HDR_ARRAY_DATA, self.id, ty.tag(), 0, 0], Some(3));
            for inst in self.table(ty).iter().filter(|i| !i.is_scalar()) {
                let Some(data) = &inst.data else { continue };
                let mut start = 0;
                while start < data.len() {
                    if out.room() < CHUNK_HEADER + size {
                        out.flush();
                    }
                    let room = out.room();
                    if room < CHUNK_HEADER + size {
                        return Err(EmuError::MtuExceeded {
                            size: out.prefix_len() + CHUNK_HEADER + size,
                            mtu,
                        });
                    }
                    let items = ((room - CHUNK_HEADER) / size).min(data.len() - start);
                    let mut w = Writer::new();
                    w.u16(inst.index).u16(start as u16).u16(items as u16);
                    for v in &data[start..start + items] {
                        w.value(v);
                    }
                    out.push(w.as_bytes())?;
                    start += items;
                }
            }
            packets.extend(out.finish());
        }
        Ok(packets)
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Packetizer
// ══════════════════════════════════════════════════════════════════════════════

/// Fills MTU-bounded packets that share a prefix, with an optional u16
/// record count patched at `count_at` when a packet closes.
struct Packetizer {
    mtu: usize,
    prefix: Vec<u8>,
    count_at: Option<usize>,
    current: Vec<u8>,
    count: u16,
    packets: Vec<Vec<u8>>,
}

impl Packetizer {
    fn new(mtu: usize, prefix: Vec<u8>, count_at: Option<usize>) -> Self {
        Self {
            mtu,
            current: prefix.clone(),
            prefix,
            count_at,
            count: 0,
            packets: Vec::new(),
        }
    }

    fn prefix_len(&self) -> usize {
        self.prefix.len()
    }

    fn room(&self) -> usize {
        self.mtu.saturating_sub(self.current.len())
    }

    fn push(&mut self, record: &[u8]) -> Result<()> {
        if record.len() > self.room() {
            self.flush();
        }
        if record.len() > self.room() {
            return Err(EmuError::MtuExceeded {
                size: self.prefix.len() + record.len(),
                mtu: self.mtu,
            });
        }
        self.current.extend_from_slice(record);
        self.count += 1;
        Ok(())
    }

    fn flush(&mut self) {
        if self.count == 0 {
            return;
        }
        let mut packet = std::mem::replace(&mut self.current, self.prefix.clone());
        if let Some(at) = self.count_at {
            packet[at..at + 2].copy_from_slice(&self.count.to_le_bytes());
        }
        self.packets.push(packet);
        self.count = 0;
    }

    fn finish(mut self) -> Vec<Vec<u8>> {
        self.flush();
        self.packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(alias: &str, spec: VarSpec) -> Instance {
        Instance::from_spec(alias, spec).unwrap()
    }

    #[test]
    fn head_bitfield() {
        let a = inst("a", VarSpec::array(MemType::F32, [2, 3]));
        // ctx 0, dims 2, type 6, mutable
        assert_eq!(a.head(0), (2 << 3) | (6 << 7) | (1 << 14));
        let b = inst("b", VarSpec::scalar(MemType::Bool).flags(InstanceFlags::output(true)));
        assert_eq!(b.head(1), 1 | (8 << 7) | (1 << 13));
    }

    #[test]
    fn validation_errors() {
        assert!(matches!(
            Instance::from_spec("s", VarSpec::scalar(MemType::U8).dims([2])),
            Err(EmuError::ScalarWithDims(_))
        ));
        assert!(matches!(
            Instance::from_spec("t", VarSpec::array(MemType::U8, [1; 8])),
            Err(EmuError::TooManyDims { dims: 8, .. })
        ));
        assert!(matches!(
            Instance::from_spec("d", VarSpec::array(MemType::U8, [2, 2]).data([1.0, 2.0])),
            Err(EmuError::DataLengthMismatch {
                expected: 4,
                got: 2,
                ..
            })
        ));
    }

    #[test]
    fn remove_renumbers_later_entries() {
        let mut ctx = MemoryContext::new(0);
        for alias in ["a", "b", "c"] {
            ctx.insert(inst(alias, VarSpec::scalar(MemType::U8))).unwrap();
        }
        ctx.remove(MemType::U8, "a").unwrap();
        let indices: Vec<_> = ctx.table(MemType::U8).iter().map(|i| (i.alias.as_str(), i.index)).collect();
        assert_eq!(indices, vec![("b", 0), ("c", 1)]);
    }

    #[test]
    fn reindex_prunes_zero_sized() {
        let mut ctx = MemoryContext::new(0);
        ctx.insert(inst("empty", VarSpec::array(MemType::U8, [0]))).unwrap();
        ctx.insert(inst("full", VarSpec::array(MemType::U8, [2]))).unwrap();
        let pruned = ctx.reindex();
        assert_eq!(pruned.len(), 1);
        assert_eq!(ctx.find(MemType::U8, "full").map(|i| i.index), Some(0));
    }

    #[test]
    fn config_packet_layout() {
        let mut ctx = MemoryContext::new(2);
        ctx.insert(inst("m", VarSpec::array(MemType::U8, [2, 3]))).unwrap();
        let p = ctx.config_packet();
        assert_eq!(p.len(), 2 + 9 * 8);
        assert_eq!(&p[..2], &[0xF0, 0x02]);
        // U8 slot: heap 6, count 1, rank 2
        assert_eq!(&p[2..10], &[6, 0, 0, 0, 1, 0, 2, 0]);
    }

    #[test]
    fn scalar_data_omits_zero_and_absent() {
        let mut ctx = MemoryContext::new(0);
        ctx.insert(inst("z", VarSpec::scalar(MemType::F32).value(0.0))).unwrap();
        ctx.insert(inst("n", VarSpec::scalar(MemType::F32))).unwrap();
        ctx.insert(inst("v", VarSpec::scalar(MemType::F32).value(1.5))).unwrap();
        let packets = ctx.scalar_data_packets(512, true).unwrap();
        assert_eq!(
            packets,
            vec![vec![0xFA, 0x00, 0x06, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0xC0, 0x3F]]
        );
        let all = ctx.scalar_data_packets(512, false).unwrap();
        assert_eq!(all[0][3], 2);
    }

    #[test]
    fn descriptor_mtu_boundary() {
        let mut ctx = MemoryContext::new(0);
        ctx.insert(inst("a", VarSpec::array(MemType::U8, [1, 1, 1]))).unwrap();
        // 1 header byte + 2 head + 3 × 2 dims
        assert_eq!(ctx.descriptor_packets(9).unwrap().len(), 1);
        assert!(matches!(
            ctx.descriptor_packets(8),
            Err(EmuError::MtuExceeded { size: 9, mtu: 8 })
        ));
    }

    #[test]
    fn array_chunks_reassemble() {
        let mut ctx = MemoryContext::new(0);
        let data: Vec<f64> = (0..20).map(f64::from).collect();
        ctx.insert(inst("a", VarSpec::array(MemType::U16, [20]).data(data.clone()))).unwrap();
        let packets = ctx.array_data_packets(32).unwrap();
        assert!(packets.len() > 1);

        let mut rebuilt = Vec::new();
        for p in &packets {
            assert!(p.len() <= 32);
            let count = u16::from_le_bytes([p[3], p[4]]);
            let mut pos = 5;
            for _ in 0..count {
                let start = u16::from_le_bytes([p[pos + 2], p[pos + 3]]) as usize;
                let items = u16::from_le_bytes([p[pos + 4], p[pos + 5]]) as usize;
                assert_eq!(start, rebuilt.len());
                pos += 6;
                for _ in 0..items {
                    rebuilt.push(u16::from_le_bytes([p[pos], p[pos + 1]]) as f64);
                    pos += 2;
                }
            }
        }
        assert_eq!(rebuilt, data);
    }
}

//! End-to-end scenarios: program construction → finalize → dump bytes.

use emuflow_compiler::blocks::{
    Clock, Compare, Counter, For, Latch, Math, QSelector, Selector, SetGlobal,
};
use emuflow_compiler::{
    compile, compile_to_diagnostics, CompilerConfig, EmuError, ErrorCode, MemType, Program, Ref,
    VarSpec,
};

fn config() -> CompilerConfig {
    CompilerConfig {
        annotate: false,
        ..CompilerConfig::default()
    }
}

fn program_with(config: CompilerConfig) -> Program {
    Program::new(config).unwrap()
}

fn headers(dump: &emuflow_compiler::Dump) -> Vec<u8> {
    dump.packets().map(|p| p[0]).collect()
}

// ══════════════════════════════════════════════════════════════════════════════
// Scenario 1: single scalar
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn single_scalar() {
    let mut p = program_with(config());
    p.add_variable(0, "x", VarSpec::scalar(MemType::F32).value(1.5))
        .unwrap();
    let out = compile(&mut p).unwrap();
    let packets: Vec<&[u8]> = out.dump.packets().collect();
    assert_eq!(packets.len(), 7);

    let mut cfg = vec![0xF0, 0x00];
    for ty in MemType::ALL {
        if ty == MemType::F32 {
            cfg.extend([1, 0, 0, 0, 1, 0, 0, 0]);
        } else {
            cfg.extend([0; 8]);
        }
    }
    assert_eq!(packets[0], cfg.as_slice());
    // ctx 0, dims 0, type F32, mutable
    assert_eq!(packets[1], &[0xF1, 0x00, 0x43]);
    assert_eq!(
        packets[2],
        &[0xFA, 0x00, 0x06, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x3F]
    );
    assert_eq!(packets[3], &[0xAA, 0xAA]);
    assert_eq!(packets[4], &[0xC0, 0x00, 0x00]);
    assert_eq!(packets[5], &[0x00, 0x30]);
    assert_eq!(packets[6], &[0x00, 0x10]);
    assert!(out.diagnostics.warnings.is_empty());
}

#[test]
fn text_form_and_reset_prefix() {
    let mut p = program_with(CompilerConfig {
        reset_before_load: true,
        ..CompilerConfig::default()
    });
    p.add_variable(0, "x", VarSpec::scalar(MemType::U8).value(7.0))
        .unwrap();
    let out = compile(&mut p).unwrap();
    let text = out.dump.to_text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "# ORD_RESET_ALL # 0100");
    assert!(lines[1].starts_with("# ctx 0 config # F000"));
    assert_eq!(lines.last(), Some(&"# ORD_LOOP_START # 0010"));
    assert_eq!(out.sha256, out.dump.sha256());
}

// ══════════════════════════════════════════════════════════════════════════════
// Scenario 2: 2-D array split in chunks
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn array_is_chunked_under_mtu() {
    let mut p = program_with(CompilerConfig {
        mtu: 24,
        ..config()
    });
    let data: Vec<f64> = (0..9).map(f64::from).collect();
    p.add_variable(0, "m", VarSpec::array(MemType::U16, [3, 3]).data(data))
        .unwrap();
    let out = compile(&mut p).unwrap();

    let chunks: Vec<&[u8]> = out.dump.packets().filter(|p| p[0] == 0xFB).collect();
    assert_eq!(chunks.len(), 2);

    let mut values = Vec::new();
    let mut starts = Vec::new();
    for chunk in &chunks {
        assert!(chunk.len() <= 24);
        assert_eq!(&chunk[1..5], &[0x00, 0x01, 0x01, 0x00]);
        let start = u16::from_le_bytes([chunk[7], chunk[8]]);
        let items = u16::from_le_bytes([chunk[9], chunk[10]]) as usize;
        let payload = &chunk[11..];
        assert_eq!(payload.len(), items * 2);
        starts.push(start);
        values.extend(payload.chunks(2).map(|b| u16::from_le_bytes([b[0], b[1]])));
    }
    assert_eq!(starts[0], 0);
    assert!(starts[1] >= 1);
    assert_eq!(values, (0..9).collect::<Vec<u16>>());
}

#[test]
fn descriptor_boundary_is_the_mtu() {
    // 7-dim descriptor: head + 7 dims = 16 bytes, 17 with the header byte.
    let build = |mtu| {
        let mut p = program_with(CompilerConfig { mtu, ..config() });
        p.add_variable(0, "deep", VarSpec::array(MemType::U8, [1; 7]))
            .unwrap();
        compile(&mut p)
    };
    let out = build(17).unwrap();
    let descriptors: Vec<&[u8]> = out.dump.packets().filter(|p| p[0] == 0xF1).collect();
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].len(), 17);

    assert_eq!(
        build(16).unwrap_err(),
        EmuError::MtuExceeded { size: 17, mtu: 16 }
    );
}

// ══════════════════════════════════════════════════════════════════════════════
// Scenario 3: dynamic index
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn dynamic_index_reference() {
    let mut p = program_with(config());
    p.add_variable(0, "a", VarSpec::array(MemType::F32, [8]))
        .unwrap();
    p.add_variable(0, "i", VarSpec::scalar(MemType::U8)).unwrap();
    let r = Ref::new("a").at_dyn(Ref::new("i"));
    let h = p.add_block(Math::new("v * 2").var("v", r.clone())).unwrap();
    let out = compile(&mut p).unwrap();

    let expected = [0x06, 0x01, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00];
    assert_eq!(p.session().encode(&r).unwrap(), expected);

    let input = out
        .dump
        .packets()
        .find(|p| p[0] == 0xB1)
        .expect("input packet");
    // 0xB1 idx slot access-path
    assert_eq!(&input[..4], &[0xB1, 0x00, 0x00, 0x01]);
    assert_eq!(&input[4..], &expected);
    assert_eq!(p.block(h).unwrap().in_conn[1], Some(r));
}

// ══════════════════════════════════════════════════════════════════════════════
// Scenario 4: FOR clustering
// ══════════════════════════════════════════════════════════════════════════════

/// src → ctl → for → body_m → sink, constructed in scrambled order.
fn for_program() -> (Program, [emuflow_compiler::BlockHandle; 5]) {
    let mut p = program_with(config());
    p.add_variable(0, "x", VarSpec::scalar(MemType::F32).value(2.0))
        .unwrap();
    p.add_variable(0, "y", VarSpec::scalar(MemType::F32)).unwrap();

    let sink = p
        .add_block(SetGlobal {
            value: Ref::block_output(1, 0).into(),
            target: Ref::new("y"),
        })
        .unwrap();
    let body_m = p
        .add_block(
            Math::new("a * 2")
                .var("a", "x")
                .en(Ref::block_output(4, 0)),
        )
        .unwrap();
    let ctl = p
        .add_block(Compare::new("a > 0").var("a", Ref::block_output(3, 0)))
        .unwrap();
    let src = p.add_block(Math::new("a + 1").var("a", "x")).unwrap();
    let for_ = p
        .add_block(For {
            en: Ref::block_output(2, 0).into(),
            limit: 3.0.into(),
            ..Default::default()
        })
        .unwrap();
    (p, [src, ctl, for_, body_m, sink])
}

#[test]
fn for_body_follows_the_loop() {
    let (mut p, handles) = for_program();
    let [src, ctl, for_, body_m, sink] = handles;
    let out = compile(&mut p).unwrap();
    assert!(out.diagnostics.warnings.is_empty());

    let order: Vec<u32> = p.blocks().iter().map(|b| b.id).collect();
    assert_eq!(
        order,
        vec![src.id(), ctl.id(), for_.id(), body_m.id(), sink.id()]
    );
    assert_eq!(p.block(for_).unwrap().chain_len(), Some(2));

    // Stored references keep construction ids; resolved ones name execution indices.
    assert_eq!(p.block(ctl).unwrap().in_conn[1], Some(Ref::new("3_q_0")));
    let resolved = |h| p.resolved_block(h).unwrap().in_conn.clone();
    assert_eq!(resolved(ctl)[1], Some(Ref::new("0_q_0")));
    assert_eq!(resolved(for_)[0], Some(Ref::new("1_q_0")));
    assert_eq!(resolved(body_m)[0], Some(Ref::new("2_q_0")));
    assert_eq!(resolved(sink)[0], Some(Ref::new("3_q_0")));

    // FOR config packet: 0xBA idx=2 type=5 pid=1 chain_len=2 …
    let for_cfg = out
        .dump
        .packets()
        .find(|p| p[0] == 0xBA && p[3] == 0x05)
        .expect("for config");
    assert_eq!(&for_cfg[..7], &[0xBA, 0x02, 0x00, 0x05, 0x01, 0x02, 0x00]);

    // Code config carries the block count.
    let code = out.dump.packets().find(|p| p[0] == 0xC0).unwrap();
    assert_eq!(code, &[0xC0, 0x05, 0x00]);
}

#[test]
fn block_section_order() {
    let (mut p, _) = for_program();
    let out = compile(&mut p).unwrap();
    let h = headers(&out.dump);
    let code = h.iter().position(|&b| b == 0xC0).unwrap();
    // ctx 0 and ctx 1 (block outputs) both precede the code config.
    assert_eq!(h.iter().filter(|&&b| b == 0xF0).count(), 2);
    assert_eq!(h[code - 1], 0xAA);
    let block_headers: Vec<usize> = h
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == 0xB0)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(block_headers.len(), 5);
    assert_eq!(block_headers[0], code + 1);
    assert_eq!(&h[h.len() - 2..], &[0x00, 0x00]);
}

#[test]
fn finalize_is_idempotent() {
    let (mut p, _) = for_program();
    let first = compile(&mut p).unwrap();
    let second = compile(&mut p).unwrap();
    assert_eq!(first.dump, second.dump);
    assert_eq!(first.sha256, second.sha256);

    let (mut fresh, _) = for_program();
    assert_eq!(compile(&mut fresh).unwrap().sha256, first.sha256);
}

#[test]
fn outputs_are_ordered_in_the_blocks_context() {
    let (mut p, [src, ..]) = for_program();
    p.finalize().unwrap();
    let ctx = p.session().context(1).unwrap();
    let bools: Vec<&str> = ctx
        .table(MemType::Bool)
        .iter()
        .map(|i| i.alias.as_str())
        .collect();
    // ctl.Q, for.ENO
    assert_eq!(bools, vec!["1_q_0", "2_q_0"]);
    assert_eq!(p.output(src, 0).unwrap(), Ref::new("3_q_0"));
    assert_eq!(p.resolved_block(src).unwrap().label, 0);
}

/// Mixed kinds with a FOR nested in a FOR, constructed out of order.
#[test]
fn mixed_program_respects_dependencies() {
    let mut p = program_with(config());
    p.add_variable(0, "x", VarSpec::scalar(MemType::F32)).unwrap();
    p.add_variable(0, "y", VarSpec::scalar(MemType::F32)).unwrap();
    p.add_variable(0, "s", VarSpec::scalar(MemType::U8)).unwrap();

    let sink = p
        .add_block(SetGlobal {
            value: Ref::block_output(5, 0).into(),
            target: Ref::new("y"),
        })
        .unwrap();
    let latch = p
        .add_block(Latch {
            set: Ref::block_output(2, 0).into(),
            ..Default::default()
        })
        .unwrap();
    let cmp = p.add_block(Compare::new("a > 1").var("a", "x")).unwrap();
    let outer = p
        .add_block(For {
            en: Ref::block_output(2, 0).into(),
            limit: 2.0.into(),
            ..Default::default()
        })
        .unwrap();
    let inner = p
        .add_block(For {
            en: Ref::block_output(3, 0).into(),
            limit: 3.0.into(),
            ..Default::default()
        })
        .unwrap();
    let math = p
        .add_block(Math::new("a * 2").var("a", "x").en(Ref::block_output(4, 0)))
        .unwrap();
    let counter = p
        .add_block(Counter {
            cu: Ref::block_output(1, 0).into(),
            ..Default::default()
        })
        .unwrap();
    let clock = p
        .add_block(Clock {
            en: Ref::block_output(3, 0).into(),
            ..Default::default()
        })
        .unwrap();
    let qsel = p
        .add_block(QSelector {
            en: Ref::block_output(6, 0).into(),
            sel: Ref::new("s").into(),
            outputs: 2,
        })
        .unwrap();

    let out = compile(&mut p).unwrap();
    assert!(!out.diagnostics.has_warning(ErrorCode::CYCLE_OR_UNREACHABLE));

    let blocks = p.resolved().unwrap();
    for (idx, block) in blocks.iter().enumerate() {
        assert_eq!(block.label as usize, idx);
        for r in block.refs() {
            if let Some((label, _)) = r.block_output_parts() {
                assert!((label as usize) < idx, "block {idx} reads later block {label}");
            }
        }
    }

    let label = |h| p.resolved_block(h).unwrap().label;
    let body_of = |f, members: &[emuflow_compiler::BlockHandle]| {
        let start = label(f);
        let len = p.resolved_block(f).unwrap().chain_len().unwrap() as u32;
        assert_eq!(len as usize, members.len());
        for &m in members {
            assert!((start + 1..=start + len).contains(&label(m)));
        }
    };
    body_of(outer, &[inner, math, sink, clock]);
    body_of(inner, &[math, sink]);

    let ordered: Vec<u32> = [cmp, latch, counter, qsel, outer, inner, math, sink, clock]
        .into_iter()
        .map(label)
        .collect();
    assert_eq!(ordered, (0..9).collect::<Vec<_>>());
}

#[test]
fn long_chain_finalizes() {
    let mut p = program_with(config());
    p.add_variable(0, "x", VarSpec::scalar(MemType::F32)).unwrap();
    let mut prev = Ref::new("x");
    for _ in 0..20_000 {
        let h = p.add_block(Math::new("v + 1").var("v", prev)).unwrap();
        prev = p.output(h, 0).unwrap();
    }
    let diags = p.finalize().unwrap();
    assert_eq!(diags.total_warnings, 0);
    let order: Vec<u32> = p.blocks().iter().map(|b| b.id).collect();
    assert_eq!(order, (0..20_000).collect::<Vec<_>>());
}

// ══════════════════════════════════════════════════════════════════════════════
// Scenario 5: selector
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn selector_option_packets() {
    let mut p = program_with(config());
    p.add_variable(0, "s", VarSpec::scalar(MemType::U8)).unwrap();
    for alias in ["x", "y", "z"] {
        p.add_variable(0, alias, VarSpec::scalar(MemType::F32))
            .unwrap();
    }
    p.add_block(Selector {
        sel: Ref::new("s").into(),
        options: vec![Ref::new("x"), Ref::new("y"), Ref::new("z")],
    })
    .unwrap();
    let out = compile(&mut p).unwrap();

    let block: Vec<&[u8]> = out
        .dump
        .packets()
        .filter(|p| matches!(p[0], 0xB0 | 0xB1 | 0xB2 | 0xBA))
        .collect();
    assert_eq!(
        block.iter().map(|p| p[0]).collect::<Vec<_>>(),
        vec![0xB0, 0xB1, 0xB2, 0xBA, 0xBA, 0xBA]
    );
    for (n, packet) in block[3..].iter().enumerate() {
        assert_eq!(packet[4], 0x20 + n as u8);
        // F32 scalar n in ctx 0: header 0x0086, instance n
        assert_eq!(&packet[5..], &[0x86, 0x00, n as u8, 0x00]);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Warnings and errors
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn cycles_warn_but_emit() {
    let mut p = program_with(config());
    p.add_variable(0, "x", VarSpec::scalar(MemType::F32)).unwrap();
    p.add_block(Math::new("a + 1").var("a", Ref::block_output(1, 0)))
        .unwrap();
    p.add_block(Math::new("a + 1").var("a", Ref::block_output(0, 0)))
        .unwrap();
    let out = compile(&mut p).unwrap();
    assert!(out.diagnostics.has_warning(ErrorCode::CYCLE_OR_UNREACHABLE));
    assert_eq!(out.dump.packets().filter(|p| p[0] == 0xB0).count(), 2);
}

#[test]
fn pruned_arrays_warn_on_every_finalize() {
    let mut p = program_with(config());
    p.add_variable(0, "empty", VarSpec::array(MemType::U8, [0]))
        .unwrap();
    p.add_variable(0, "x", VarSpec::scalar(MemType::U8)).unwrap();
    let first = compile(&mut p).unwrap();
    assert!(first.diagnostics.has_warning(ErrorCode::ZERO_SIZE_PRUNED));
    assert!(!p.session().contains("empty"));
    let second = compile(&mut p).unwrap();
    assert!(second.diagnostics.has_warning(ErrorCode::ZERO_SIZE_PRUNED));
    assert_eq!(first.dump, second.dump);
}

#[test]
fn unknown_reference_fails_finalize() {
    let mut p = program_with(config());
    p.add_block(Math::new("a").var("a", "missing")).unwrap();
    let diags = compile_to_diagnostics(&mut p).unwrap_err();
    assert_eq!(diags.total_errors, 1);
    assert_eq!(diags.errors[0].code, ErrorCode::UNKNOWN_ALIAS);
    assert!(!p.is_finalized());
    assert_eq!(p.emit().unwrap_err(), EmuError::NotFinalized);
}

#[test]
fn connect_after_construction() {
    let mut p = program_with(config());
    p.add_variable(0, "x", VarSpec::scalar(MemType::F32)).unwrap();
    let h = p.add_block(Math::new("a + 1").var("a", Ref::new("x"))).unwrap();
    let g = p.add_block(Math::new("b * 2").var("b", emuflow_compiler::Input::None)).unwrap();
    let out = p.output(h, 0).unwrap();
    p.connect(g, 1, out.clone()).unwrap();
    assert_eq!(
        p.connect(g, 1, out).unwrap_err(),
        EmuError::InputInUse { block: 1, slot: 1 }
    );
    compile(&mut p).unwrap();
    assert_eq!(p.block(g).unwrap().mask(), 0b10);
}

#[test]
fn diagnostics_serialize_to_json() {
    let mut p = program_with(config());
    p.add_variable(0, "empty", VarSpec::array(MemType::U8, [0]))
        .unwrap();
    let out = compile(&mut p).unwrap();
    let json = serde_json::to_value(&out.diagnostics).unwrap();
    assert_eq!(json["total_warnings"], 1);
    assert_eq!(json["warnings"][0]["severity"], "warning");
}

// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

use std::io::Write;

use embedvm_types::CompileError;

use crate::image::Image;
use crate::insn::{InsnArena, InsnId};
use crate::section::Section;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SymbolKind {
    Data,
    Code,
    Address,
    Other,
}

impl SymbolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Data => "data",
            SymbolKind::Code => "code",
            SymbolKind::Address => "address",
            SymbolKind::Other => "other",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Symbol {
    pub addr: u16,
    pub name: String,
    pub kind: SymbolKind,
}

/// collect `(addr, name, kind)` for every named node, in tree order.
pub fn collect_symbols(arena: &InsnArena, root: Option<InsnId>) -> Vec<Symbol> {
    let mut symbols = vec![];
    collect_symbols_walk(arena, root, &mut symbols);
    symbols
}

fn collect_symbols_walk(arena: &InsnArena, mut node: Option<InsnId>, symbols: &mut Vec<Symbol>) {
    while let Some(id) = node {
        let insn = &arena[id];

        if let Some(name) = &insn.symbol {
            let kind = if insn.data_len > 0 {
                SymbolKind::Data
            } else if insn.opcode.is_some() {
                SymbolKind::Code
            } else if insn.set_addr.is_some() {
                SymbolKind::Address
            } else {
                SymbolKind::Other
            };
            symbols.push(Symbol {
                addr: insn.addr,
                name: name.clone(),
                kind,
            });
        }

        collect_symbols_walk(arena, insn.left, symbols);
        node = insn.right;
    }
}

/// the `.sym` stream: one `HHHH name (kind)` line per symbol.
pub fn write_symbols(
    f: &mut dyn Write,
    arena: &InsnArena,
    root: Option<InsnId>,
) -> Result<Vec<Symbol>, CompileError> {
    let symbols = collect_symbols(arena, root);
    for symbol in &symbols {
        writeln!(
            f,
            "{:04X} {} ({})",
            symbol.addr,
            symbol.name,
            symbol.kind.as_str()
        )?;
    }
    Ok(symbols)
}

/// the `.dbg` stream: a disassembly-like rendering of the laid-out
/// tree, grouped under symbol headings.
pub fn write_debug(
    f: &mut dyn Write,
    arena: &InsnArena,
    root: Option<InsnId>,
    code_len: u16,
) -> Result<(), CompileError> {
    write!(f, "\nTotal code and data length: {}", code_len)?;
    write_debug_walk(f, arena, root)?;
    write!(f, "\n\n")?;
    Ok(())
}

fn write_debug_walk(
    f: &mut dyn Write,
    arena: &InsnArena,
    mut node: Option<InsnId>,
) -> Result<(), CompileError> {
    while let Some(id) = node {
        let insn = &arena[id];

        if let Some(symbol) = &insn.symbol {
            write!(f, "\n\n{} @ {:04X}:", symbol, insn.addr)?;
        }

        write_debug_walk(f, arena, insn.left)?;

        if insn.opcode.is_some() || insn.data_len > 0 {
            if insn.data_len > 0 {
                write!(f, " D[{}]", insn.data_len)?;
            }

            if let Some(init) = &insn.init_data {
                write!(f, "=")?;
                for byte in init {
                    write!(f, "{:02X}", byte)?;
                }
            }

            if let Some(opcode) = insn.opcode {
                write!(f, " {:02X}", opcode)?;
            }

            if insn.arg_width == 1 {
                write!(f, ".{:02X}", insn.arg_val & 0xff)?;
            }

            if insn.arg_width == 2 {
                write!(f, ".{:04X}", insn.arg_val as u16)?;
            }

            if insn.arg_is_relative {
                write!(f, "r")?;
            } else if insn.arg_target.is_some() {
                write!(f, "a")?;
            }
        }

        node = insn.right;
    }
    Ok(())
}

/// the `.bin` stream: the raw image up to the last written byte.
pub fn write_binary(f: &mut dyn Write, image: &Image) -> Result<(), CompileError> {
    f.write_all(image.bytes())?;
    Ok(())
}

// the largest address within the section that was actually written,
// or None for a section with no written bytes at all
fn section_real_end(section: &Section, image: &Image) -> Option<u16> {
    let mut addr = section.end;
    loop {
        if image.is_written(addr) {
            return Some(addr);
        }
        if addr == section.begin {
            return None;
        }
        addr -= 1;
    }
}

/// the `.hdr` stream: symbol address macros plus per-section `BEGIN`,
/// `END` and `DATA` macros. every written byte must fall inside a
/// declared section.
pub fn write_header(
    f: &mut dyn Write,
    sections: &[Section],
    symbols: &[Symbol],
    image: &Image,
) -> Result<(), CompileError> {
    let mut covered = vec![false; 0x10000];

    for symbol in symbols {
        writeln!(f, "#define EMBEDVM_SYM_{} 0x{:04x}", symbol.name, symbol.addr)?;
    }

    for section in sections {
        writeln!(
            f,
            "#define EMBEDVM_SECT_{}_BEGIN 0x{:04x}",
            section.name, section.begin
        )?;
        writeln!(
            f,
            "#define EMBEDVM_SECT_{}_END 0x{:04x}",
            section.name, section.end
        )?;
        write!(f, "#define EMBEDVM_SECT_{}_DATA", section.name)?;
        if let Some(real_end) = section_real_end(section, image) {
            for addr in section.begin..=real_end {
                let separator = if addr == section.begin { " " } else { "," };
                write!(f, "{}{}", separator, image.byte_at(addr))?;
                covered[addr as usize] = true;
            }
        }
        writeln!(f)?;
    }

    for addr in 0..=0xffffu16 {
        if image.is_written(addr) && !covered[addr as usize] {
            return Err(CompileError::new(&format!(
                "data at 0x{:04x} is not covered by any section",
                addr
            )));
        }
    }

    Ok(())
}

fn intel_hex_record(
    f: &mut dyn Write,
    addr: u16,
    record_type: u8,
    data: &[u8],
) -> Result<(), CompileError> {
    let mut record = Vec::with_capacity(data.len() + 5);
    record.push(data.len() as u8);
    record.push((addr >> 8) as u8);
    record.push(addr as u8);
    record.push(record_type);
    record.extend_from_slice(data);

    let sum = record.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte));
    record.push(0u8.wrapping_sub(sum));

    write!(f, ":")?;
    for byte in &record {
        write!(f, "{:02x}", byte)?;
    }
    writeln!(f)?;
    Ok(())
}

/// the `.ihx` stream: type-0 records of up to 32 bytes covering the
/// written part of each section, then the single EOF record.
pub fn write_intel_hex(
    f: &mut dyn Write,
    sections: &[Section],
    image: &Image,
) -> Result<(), CompileError> {
    for section in sections {
        if let Some(real_end) = section_real_end(section, image) {
            let mut addr = section.begin;
            while addr <= real_end {
                let len = ((real_end - addr + 1) as usize).min(0x20);
                let data: Vec<u8> = (0..len).map(|i| image.byte_at(addr + i as u16)).collect();
                intel_hex_record(f, addr, 0, &data)?;
                match addr.checked_add(0x20) {
                    Some(next) => addr = next,
                    None => break,
                }
            }
        }
    }
    intel_hex_record(f, 0, 1, &[])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use embedvm_types::opcode::{OP_IMM16, OP_RET_VOID};
    use pretty_assertions::assert_eq;

    use crate::codegen::layout;
    use crate::image::Image;
    use crate::insn::{Insn, InsnArena, InsnId};
    use crate::section::{default_sections, Section};

    use super::{collect_symbols, write_debug, write_header, write_intel_hex, write_symbols, SymbolKind};

    fn chain(insns: Vec<Insn>) -> (InsnArena, Option<InsnId>) {
        let mut arena = InsnArena::new();
        let mut root = None;
        let mut prev: Option<InsnId> = None;
        for insn in insns {
            let id = arena.alloc(insn);
            match prev {
                Some(p) => arena[p].right = Some(id),
                None => root = Some(id),
            }
            prev = Some(id);
        }
        (arena, root)
    }

    fn named(name: &str, insn: Insn) -> Insn {
        Insn {
            symbol: Some(name.to_owned()),
            ..insn
        }
    }

    #[test]
    fn test_symbol_kinds_and_format() {
        let (mut arena, root) = chain(vec![
            named("table", Insn::data_init(vec![1, 2])),
            named("main", Insn::op(OP_RET_VOID)),
            named(
                "origin",
                Insn {
                    set_addr: Some(0x0100),
                    ..Insn::default()
                },
            ),
            named("marker", Insn::default()),
        ]);
        layout(&mut arena, root).unwrap();

        let symbols = collect_symbols(&arena, root);
        let kinds: Vec<SymbolKind> = symbols.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SymbolKind::Data,
                SymbolKind::Code,
                SymbolKind::Address,
                SymbolKind::Other
            ]
        );

        let mut buffer = vec![];
        write_symbols(&mut buffer, &arena, root).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(
            text,
            "0000 table (data)\n\
             0002 main (code)\n\
             0100 origin (address)\n\
             0100 marker (other)\n"
        );
    }

    #[test]
    fn test_debug_dump_format() {
        let (mut arena, root) = chain(vec![
            named("table", Insn::data_init(vec![0xaa, 0xbb])),
            named("main", Insn::op_val(OP_IMM16, 0x1234)),
            Insn::op(OP_RET_VOID),
        ]);
        let code_len = layout(&mut arena, root).unwrap();

        let mut buffer = vec![];
        write_debug(&mut buffer, &arena, root, code_len).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert_eq!(
            text,
            "\nTotal code and data length: 6\
             \n\ntable @ 0000: D[2]=AABB\
             \n\nmain @ 0002: 9A.1234 9C\n\n"
        );
    }

    #[test]
    fn test_header_covers_sections() {
        // data lands in SRAM, code is forced into CODE
        let (mut arena, root) = chain(vec![
            named("counter", Insn::data_init(vec![7, 8])),
            named(
                "main",
                Insn {
                    set_addr: Some(0x0200),
                    ..Insn::op(OP_RET_VOID)
                },
            ),
        ]);
        layout(&mut arena, root).unwrap();
        let image = Image::render(&arena, root).unwrap();
        let symbols = collect_symbols(&arena, root);

        let sections = vec![
            Section {
                name: "SRAM".to_owned(),
                begin: 0x0000,
                end: 0x00ff,
            },
            Section {
                name: "CODE".to_owned(),
                begin: 0x0100,
                end: 0x03ff,
            },
        ];

        let mut buffer = vec![];
        write_header(&mut buffer, &sections, &symbols, &image).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains("#define EMBEDVM_SYM_counter 0x0000\n"));
        assert!(text.contains("#define EMBEDVM_SYM_main 0x0200\n"));
        assert!(text.contains("#define EMBEDVM_SECT_SRAM_BEGIN 0x0000\n"));
        assert!(text.contains("#define EMBEDVM_SECT_SRAM_END 0x00ff\n"));
        // SRAM data stops at its last written byte
        assert!(text.contains("#define EMBEDVM_SECT_SRAM_DATA 7,8\n"));
        // CODE data covers 0x0100..0x0200, zero-filled up to the
        // forced symbol
        let code_data: &str = text
            .lines()
            .find(|line| line.starts_with("#define EMBEDVM_SECT_CODE_DATA"))
            .unwrap();
        let values: Vec<&str> = code_data
            .trim_start_matches("#define EMBEDVM_SECT_CODE_DATA ")
            .split(',')
            .collect();
        assert_eq!(values.len(), 0x101);
        assert_eq!(values[0], "0");
        assert_eq!(values[0x100], format!("{}", OP_RET_VOID));
    }

    #[test]
    fn test_header_rejects_uncovered_data() {
        let (mut arena, root) = chain(vec![named(
            "stray",
            Insn {
                set_addr: Some(0x0500),
                ..Insn::data_init(vec![1])
            },
        )]);
        layout(&mut arena, root).unwrap();
        let image = Image::render(&arena, root).unwrap();
        let symbols = collect_symbols(&arena, root);

        let sections = vec![Section {
            name: "SRAM".to_owned(),
            begin: 0x0000,
            end: 0x00ff,
        }];

        let mut buffer = vec![];
        let error = write_header(&mut buffer, &sections, &symbols, &image).unwrap_err();
        assert_eq!(
            error.message,
            "data at 0x0500 is not covered by any section".to_owned()
        );
    }

    #[test]
    fn test_intel_hex_records() {
        // a 32-byte block at 0x0100 with bytes 00..1f
        let (mut arena, root) = chain(vec![Insn {
            set_addr: Some(0x0100),
            ..Insn::data_init((0u8..0x20).collect())
        }]);
        layout(&mut arena, root).unwrap();
        let image = Image::render(&arena, root).unwrap();

        let sections = vec![Section {
            name: "CODE".to_owned(),
            begin: 0x0100,
            end: 0x01ff,
        }];

        let mut buffer = vec![];
        write_intel_hex(&mut buffer, &sections, &image).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        // checksum: two's complement of 0x20 + 0x01 + 0x00 + 0x00 +
        // sum(0..0x1f) = 0x21 + 0x1f0 -> low byte 0x11 -> 0xef
        assert_eq!(
            text,
            ":20010000000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1fef\n\
             :00000001ff\n"
        );
    }

    #[test]
    fn test_intel_hex_splits_long_sections() {
        let (mut arena, root) = chain(vec![Insn::data_init(vec![0x55; 40])]);
        layout(&mut arena, root).unwrap();
        let image = Image::render(&arena, root).unwrap();

        let mut buffer = vec![];
        write_intel_hex(&mut buffer, &default_sections(), &image).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with(":2000000055"));
        assert!(lines[1].starts_with(":0800200055"));
        assert_eq!(lines[2], ":00000001ff");
    }
}

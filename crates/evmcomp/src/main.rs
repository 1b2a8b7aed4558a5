// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// the compiler driver. `evmcomp FILE.evm` reads the source, runs
// parse -> assemble -> layout, and writes six sibling files next to
// the input:
//
//   FILE.ast   instruction tree dump
//   FILE.dbg   disassembly-like dump with the total length header
//   FILE.sym   one `HHHH name (kind)` line per symbol
//   FILE.bin   the raw image
//   FILE.hdr   C header with EMBEDVM_SYM_* / EMBEDVM_SECT_* macros
//   FILE.ihx   Intel HEX records of the declared sections
//
// exit code 0 on success, 1 with a message on stderr for usage errors
// and fatal compile errors.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

use embedvm_assembler::assembler::assemble_module;
use embedvm_binary::codegen::layout;
use embedvm_binary::image::Image;
use embedvm_binary::insn::write_tree;
use embedvm_binary::output::{
    write_binary, write_debug, write_header, write_intel_hex, write_symbols,
};
use embedvm_binary::section::default_sections;
use embedvm_parser::parser::parse_from_str;
use embedvm_types::CompileError;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let source_path = match args.as_slice() {
        [_, path] if !path.starts_with('-') => PathBuf::from(path),
        _ => {
            eprintln!("Usage: evmcomp [filename].evm");
            exit(1);
        }
    };

    if source_path.extension().and_then(|e| e.to_str()) != Some("evm")
        || source_path.file_stem().is_none()
    {
        eprintln!("Usage: evmcomp [filename].evm");
        exit(1);
    }

    if let Err(error) = compile_file(&source_path) {
        eprintln!("{}", error);
        exit(1);
    }
}

fn compile_file(source_path: &Path) -> Result<(), CompileError> {
    let source = std::fs::read_to_string(source_path)
        .map_err(|e| CompileError::new(&format!("{}: {}", source_path.display(), e)))?;

    let module = parse_from_str(&source)?;
    let mut assembled = assemble_module(&module)?;
    let code_len = layout(&mut assembled.arena, assembled.root)?;
    let image = Image::render(&assembled.arena, assembled.root)?;

    let sections = if assembled.sections.is_empty() {
        default_sections()
    } else {
        assembled.sections.clone()
    };

    let arena = &assembled.arena;
    let root = assembled.root;

    let mut ast = output_file(source_path, "ast")?;
    write_tree(&mut ast, arena, root)?;

    let mut dbg = output_file(source_path, "dbg")?;
    write_debug(&mut dbg, arena, root, code_len)?;

    let mut sym = output_file(source_path, "sym")?;
    let symbols = write_symbols(&mut sym, arena, root)?;

    let mut bin = output_file(source_path, "bin")?;
    write_binary(&mut bin, &image)?;

    let mut hdr = output_file(source_path, "hdr")?;
    write_header(&mut hdr, &sections, &symbols, &image)?;

    let mut ihx = output_file(source_path, "ihx")?;
    write_intel_hex(&mut ihx, &sections, &image)?;

    for writer in [&mut ast, &mut dbg, &mut sym, &mut bin, &mut hdr, &mut ihx] {
        writer.flush()?;
    }

    Ok(())
}

fn output_file(source_path: &Path, extension: &str) -> Result<BufWriter<File>, CompileError> {
    let path = source_path.with_extension(extension);
    let file = File::create(&path)
        .map_err(|e| CompileError::new(&format!("{}: {}", path.display(), e)))?;
    Ok(BufWriter::new(file))
}

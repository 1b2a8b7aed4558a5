// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

use embedvm_types::CompileError;

use crate::insn::{InsnArena, InsnId};

/// the rendered program: a 64 KiB scratch buffer plus a per-byte
/// "written" flag. writing the same cell twice means two tree nodes
/// claim the same address (overlapping sections or a symbol placed
/// twice) and aborts the compile.
#[derive(Debug)]
pub struct Image {
    data: Vec<u8>,
    written: Vec<bool>,
    len: usize,
}

impl Image {
    /// walk the laid-out tree and synthesize the image. the walk mirrors
    /// the layout pass: forced address, left subtree, data, opcode,
    /// argument bytes (big-endian), right subtree.
    pub fn render(arena: &InsnArena, root: Option<InsnId>) -> Result<Image, CompileError> {
        let mut image = Image {
            data: vec![0u8; 0x10000],
            written: vec![false; 0x10000],
            len: 0,
        };
        image.emit(arena, root, 0)?;
        Ok(image)
    }

    fn write_byte(&mut self, addr: u16, value: u8) -> Result<(), CompileError> {
        let index = addr as usize;
        if self.written[index] {
            return Err(CompileError::new(&format!(
                "double-write on memory cell 0x{:04x}",
                addr
            )));
        }
        self.data[index] = value;
        self.written[index] = true;
        if index + 1 > self.len {
            self.len = index + 1;
        }
        Ok(())
    }

    fn emit(
        &mut self,
        arena: &InsnArena,
        mut node: Option<InsnId>,
        mut addr: u16,
    ) -> Result<u16, CompileError> {
        while let Some(id) = node {
            let insn = &arena[id];

            if let Some(forced) = insn.set_addr {
                addr = forced;
            }
            debug_assert_eq!(addr, insn.addr);

            addr = self.emit(arena, insn.left, addr)?;
            debug_assert_eq!(addr, insn.inner_addr);

            if let Some(init) = &insn.init_data {
                for &byte in init {
                    self.write_byte(addr, byte)?;
                    addr = addr.wrapping_add(1);
                }
            } else {
                // uninitialized data occupies the range without
                // emitting anything
                addr = addr.wrapping_add(insn.data_len);
            }

            if let Some(opcode) = insn.opcode {
                self.write_byte(addr, opcode)?;
                addr = addr.wrapping_add(1);
            }

            if insn.arg_width == 2 {
                self.write_byte(addr, (insn.arg_val >> 8) as u8)?;
                addr = addr.wrapping_add(1);
            }

            if insn.arg_width >= 1 {
                self.write_byte(addr, insn.arg_val as u8)?;
                addr = addr.wrapping_add(1);
            }

            node = insn.right;
        }
        Ok(addr)
    }

    /// the binary image, truncated after the last written byte
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn byte_at(&self, addr: u16) -> u8 {
        self.data[addr as usize]
    }

    pub fn is_written(&self, addr: u16) -> bool {
        self.written[addr as usize]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use embedvm_types::opcode::{OP_IMM16, OP_RET_VOID};
    use pretty_assertions::assert_eq;

    use crate::codegen::layout;
    use crate::insn::{Insn, InsnArena, InsnId};

    use super::Image;

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

    #[test]
    fn test_render_opcodes_and_arguments() {
        let (mut arena, root) = chain(vec![
            Insn::op_val(OP_IMM16, 0x1234),
            Insn::op(OP_RET_VOID),
        ]);
        layout(&mut arena, root).unwrap();

        let image = Image::render(&arena, root).unwrap();
        // 0x1234 does not fit a short literal form, the argument stays
        // big-endian 16-bit
        assert_eq!(image.bytes(), &[0x9a, 0x12, 0x34, 0x9c]);
    }

    #[test]
    fn test_render_data_and_truncation() {
        let (mut arena, root) = chain(vec![
            Insn::data_init(vec![0xaa, 0xbb]),
            Insn::data(4),
            Insn::op(OP_RET_VOID),
            Insn::data(100),
        ]);
        layout(&mut arena, root).unwrap();

        let image = Image::render(&arena, root).unwrap();
        // uninitialized data leaves zeroes and, at the tail, is
        // truncated away entirely
        assert_eq!(image.bytes(), &[0xaa, 0xbb, 0, 0, 0, 0, 0x9c]);
        assert_eq!(image.len(), 7);
        assert!(image.is_written(0));
        assert!(!image.is_written(2));
        assert!(image.is_written(6));
    }

    #[test]
    fn test_render_honors_forced_addresses() {
        let (mut arena, root) = chain(vec![
            Insn::data_init(vec![0x11]),
            Insn {
                set_addr: Some(0x0010),
                ..Insn::op(OP_RET_VOID)
            },
        ]);
        layout(&mut arena, root).unwrap();

        let image = Image::render(&arena, root).unwrap();
        assert_eq!(image.len(), 0x11);
        assert_eq!(image.byte_at(0x0000), 0x11);
        assert_eq!(image.byte_at(0x0010), OP_RET_VOID);
        assert!(!image.is_written(0x0008));
    }

    #[test]
    fn test_double_write_is_fatal() {
        // two nodes forced onto the same address
        let (mut arena, root) = chain(vec![
            Insn {
                set_addr: Some(0x0020),
                ..Insn::data_init(vec![1, 2, 3])
            },
            Insn {
                set_addr: Some(0x0022),
                ..Insn::op(OP_RET_VOID)
            },
        ]);
        layout(&mut arena, root).unwrap();

        let error = Image::render(&arena, root).unwrap_err();
        assert_eq!(
            error.message,
            "double-write on memory cell 0x0022".to_owned()
        );
    }
}

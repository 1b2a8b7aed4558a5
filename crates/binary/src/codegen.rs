// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// address layout runs to a fixed point:
//
// 1. assign addresses by the in-order walk, honoring forced addresses
// 2. resolve every symbolic reference against the assigned addresses
// 3. shrink: re-encode operands that fit a narrower form, widen the
//    ones that no longer fit
//
// shortening one operand shifts every following address, which can push
// another displacement out of the 1-byte range; widening shifts them
// back, which could re-shorten the first one and oscillate forever.
// the `arg_grew_again` bit breaks the cycle: an operand that had to
// grow back stays wide, so the total size is monotone and the loop
// settles. ten iterations are far more than the two-widths-per-node
// bound needs; not settling within them is a compiler bug.

use embedvm_types::opcode::{OP_IMM16, OP_IMM_S8, OP_IMM_TINY, OP_IMM_U8};
use embedvm_types::CompileError;

use crate::insn::{InsnArena, InsnId};

pub const MAX_LAYOUT_ITERATIONS: usize = 10;

/// run the layout fixed point. returns the total length of code and
/// data, i.e. one past the highest assigned address.
pub fn layout(arena: &mut InsnArena, root: Option<InsnId>) -> Result<u16, CompileError> {
    for _ in 0..MAX_LAYOUT_ITERATIONS {
        let mut code_len = 0;
        assign_addresses(arena, root, 0, &mut code_len);
        resolve_references(arena);
        if !shrink(arena) {
            return Ok(code_len);
        }
    }

    Err(CompileError::new(
        "instruction layout did not converge after 10 iterations",
    ))
}

// pass 1: in-order walk carrying the running address. recursion only
// descends into left subtrees; right spines are walked iteratively so
// instruction chains do not grow the call stack.
fn assign_addresses(
    arena: &mut InsnArena,
    mut node: Option<InsnId>,
    mut addr: u16,
    code_len: &mut u16,
) -> u16 {
    while let Some(id) = node {
        if let Some(forced) = arena[id].set_addr {
            addr = forced;
        }
        arena[id].addr = addr;

        let left = arena[id].left;
        addr = assign_addresses(arena, left, addr, code_len);
        arena[id].inner_addr = addr;

        addr = addr.wrapping_add(arena[id].own_len());
        if addr > *code_len {
            *code_len = addr;
        }

        node = arena[id].right;
    }
    addr
}

// pass 2: arguments with a symbolic target become the target's address,
// or the displacement from this node's own emission start for
// pc-relative forms.
fn resolve_references(arena: &mut InsnArena) {
    for index in 0..arena.nodes.len() {
        if let Some(target) = arena.nodes[index].arg_target {
            let target_addr = arena.nodes[target].addr;
            let insn = &mut arena.nodes[index];
            let value = if insn.arg_is_relative {
                target_addr.wrapping_sub(insn.inner_addr)
            } else {
                target_addr
            };
            insn.arg_val = value as i16;
        }
    }
}

// pass 3: pick operand widths. returns whether anything changed.
fn shrink(arena: &mut InsnArena) -> bool {
    let mut did_something = false;

    for insn in arena.nodes.iter_mut() {
        let opcode = match insn.opcode {
            Some(opcode) => opcode,
            None => continue,
        };

        if (OP_IMM_TINY..=OP_IMM_S8).contains(&opcode) {
            // already one of the short literal forms
            continue;
        }

        if opcode == OP_IMM16 {
            if insn.arg_target.is_some() {
                // address constants keep the 2-byte argument, the
                // target may still move between iterations
                continue;
            }
            if (-4..=3).contains(&insn.arg_val) {
                insn.opcode = Some(OP_IMM_TINY + (insn.arg_val & 0x07) as u8);
                insn.arg_width = 0;
                did_something = true;
            } else if (0..=255).contains(&insn.arg_val) {
                insn.opcode = Some(OP_IMM_U8);
                insn.arg_width = 1;
                did_something = true;
            } else if (-128..=127).contains(&insn.arg_val) {
                insn.opcode = Some(OP_IMM_S8);
                insn.arg_width = 1;
                did_something = true;
            }
            continue;
        }

        if insn.arg_width != 0 {
            debug_assert!(insn.arg_target.is_some());

            let needed_bytes: u8 = if insn.arg_is_relative {
                if (-128..=127).contains(&insn.arg_val) {
                    1
                } else {
                    2
                }
            } else if (0..=255).contains(&insn.arg_val) {
                1
            } else {
                2
            };

            if needed_bytes != insn.arg_width {
                if needed_bytes == 1 && !insn.arg_grew_again {
                    insn.opcode = Some(opcode - 1);
                    insn.arg_width = 1;
                    did_something = true;
                }
                if needed_bytes == 2 {
                    insn.opcode = Some(opcode + 1);
                    insn.arg_width = 2;
                    insn.arg_grew_again = true;
                    did_something = true;
                }
            }
        }
    }

    did_something
}

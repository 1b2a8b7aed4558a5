// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// translation from the module AST into the instruction tree. items and
// statements become a right-leaning chain of nodes, so the in-order
// walk reproduces the source order. symbolic operands are authored in
// their wide encoding; the layout pass narrows whatever fits.
//
// functions, data items and labels share one flat namespace per module,
// and references may point forward, so targets are connected in a
// second pass once every name is known.

use std::collections::HashMap;

use embedvm_binary::insn::{Insn, InsnArena, InsnId};
use embedvm_binary::section::Section;
use embedvm_parser::ast::{AddressOperand, ItemNode, ModuleNode, Statement};
use embedvm_types::opcode::{
    binary_opcode, bury_opcode, compare_opcode, dig_opcode, local_get_opcode, local_set_opcode,
    memory_opcode, release_opcode, reserve_opcode, unary_opcode, user_call_opcode, AddrMode,
    OP_BR_FALSE_REL16, OP_BR_TRUE_REL16, OP_CALL_POP, OP_CALL_REL16, OP_DROP, OP_IMM16,
    OP_JUMP_POP, OP_JUMP_REL16, OP_PUSH_SFP, OP_PUSH_SP, OP_RET, OP_RET_VOID,
};
use embedvm_types::CompileError;

#[derive(Debug)]
pub struct AssembledModule {
    pub arena: InsnArena,
    pub root: Option<InsnId>,
    pub sections: Vec<Section>,
}

pub fn assemble_module(module: &ModuleNode) -> Result<AssembledModule, CompileError> {
    let mut assembler = Assembler {
        arena: InsnArena::new(),
        root: None,
        tail: None,
        symbols: HashMap::new(),
        references: vec![],
    };

    for item in &module.items {
        match item {
            ItemNode::Data(data) => assembler.assemble_data(data)?,
            ItemNode::Function(function) => assembler.assemble_function(function)?,
        }
    }

    assembler.connect_references()?;

    let sections = module
        .sections
        .iter()
        .map(|section| Section {
            name: section.name.clone(),
            begin: section.begin,
            end: section.end,
        })
        .collect();

    Ok(AssembledModule {
        arena: assembler.arena,
        root: assembler.root,
        sections,
    })
}

struct Assembler {
    arena: InsnArena,
    root: Option<InsnId>,
    tail: Option<InsnId>,
    symbols: HashMap<String, InsnId>,
    references: Vec<(InsnId, String)>,
}

impl Assembler {
    fn append(&mut self, insn: Insn) -> InsnId {
        let id = self.arena.alloc(insn);
        match self.tail {
            Some(tail) => self.arena[tail].right = Some(id),
            None => self.root = Some(id),
        }
        self.tail = Some(id);
        id
    }

    fn define_symbol(&mut self, name: &str, id: InsnId) -> Result<(), CompileError> {
        if self.symbols.insert(name.to_owned(), id).is_some() {
            return Err(CompileError::new(&format!(
                "duplicate symbol \"{}\"",
                name
            )));
        }
        Ok(())
    }

    // an opcode whose wide argument is the address of `name`
    fn append_abs(&mut self, opcode: u8, name: &str) {
        let id = self.append(Insn {
            opcode: Some(opcode),
            arg_width: 2,
            ..Default::default()
        });
        self.references.push((id, name.to_owned()));
    }

    // an opcode whose wide argument is the displacement to `name`
    fn append_rel(&mut self, opcode: u8, name: &str) {
        let id = self.append(Insn {
            opcode: Some(opcode),
            arg_width: 2,
            arg_is_relative: true,
            ..Default::default()
        });
        self.references.push((id, name.to_owned()));
    }

    fn assemble_data(&mut self, data: &embedvm_parser::ast::DataNode) -> Result<(), CompileError> {
        let insn = Insn {
            symbol: Some(data.name.clone()),
            set_addr: data.fixed_addr,
            data_len: data.len,
            init_data: data.init.clone(),
            ..Default::default()
        };
        let id = self.append(insn);
        self.define_symbol(&data.name, id)
    }

    // the function's symbol and forced address ride on its first
    // instruction node, so the symbol table reports functions as code.
    // an empty body or a leading label (which owns its node's symbol
    // slot) gets a separate, zero-length head node.
    fn assemble_function(
        &mut self,
        function: &embedvm_parser::ast::FunctionNode,
    ) -> Result<(), CompileError> {
        let first_is_plain = matches!(function.body.first(), Some(statement) if !matches!(statement, Statement::Label(_)));

        let head = if first_is_plain {
            self.assemble_statement(&function.body[0])?;
            let id = self.tail.expect("statement appended a node");
            self.arena[id].symbol = Some(function.name.clone());
            self.arena[id].set_addr = function.fixed_addr;
            id
        } else {
            self.append(Insn {
                symbol: Some(function.name.clone()),
                set_addr: function.fixed_addr,
                ..Default::default()
            })
        };
        self.define_symbol(&function.name, head)?;

        let skip = if first_is_plain { 1 } else { 0 };
        for statement in function.body.iter().skip(skip) {
            self.assemble_statement(statement)?;
        }

        Ok(())
    }

    fn assemble_statement(&mut self, statement: &Statement) -> Result<(), CompileError> {
        match statement {
            Statement::Label(name) => {
                let id = self.append(Insn::default());
                self.arena[id].symbol = Some(name.clone());
                self.define_symbol(name, id)?;
            }

            Statement::LocalGet(sfa) => {
                self.append(Insn::op(local_get_opcode(*sfa)));
            }
            Statement::LocalSet(sfa) => {
                self.append(Insn::op(local_set_opcode(*sfa)));
            }
            Statement::Binary(op) => {
                self.append(Insn::op(binary_opcode(*op)));
            }
            Statement::Unary(op) => {
                self.append(Insn::op(unary_opcode(*op)));
            }
            Statement::Compare(op) => {
                self.append(Insn::op(compare_opcode(*op)));
            }

            Statement::Imm(value) => {
                self.append(Insn::op_val(OP_IMM16, *value));
            }
            Statement::ImmSymbol(name) => {
                self.append_abs(OP_IMM16, name);
            }

            Statement::Ret => {
                self.append(Insn::op(OP_RET));
            }
            Statement::RetVoid => {
                self.append(Insn::op(OP_RET_VOID));
            }
            Statement::Drop => {
                self.append(Insn::op(OP_DROP));
            }
            Statement::CallPop => {
                self.append(Insn::op(OP_CALL_POP));
            }
            Statement::JumpPop => {
                self.append(Insn::op(OP_JUMP_POP));
            }
            Statement::PushSp => {
                self.append(Insn::op(OP_PUSH_SP));
            }
            Statement::PushSfp => {
                self.append(Insn::op(OP_PUSH_SFP));
            }

            Statement::Jump(name) => {
                self.append_rel(OP_JUMP_REL16, name);
            }
            Statement::Call(name) => {
                self.append_rel(OP_CALL_REL16, name);
            }
            Statement::BrTrue(name) => {
                self.append_rel(OP_BR_TRUE_REL16, name);
            }
            Statement::BrFalse(name) => {
                self.append_rel(OP_BR_FALSE_REL16, name);
            }

            Statement::UserCall(funcid) => {
                self.append(Insn::op(user_call_opcode(*funcid)));
            }

            Statement::Memory(op, operand) => match operand {
                AddressOperand::Absolute(name) => {
                    self.append_abs(memory_opcode(*op, AddrMode::Abs16), name);
                }
                AddressOperand::Indexed(name) => {
                    self.append_abs(memory_opcode(*op, AddrMode::Index16), name);
                }
                AddressOperand::Popped => {
                    self.append(Insn::op(memory_opcode(*op, AddrMode::Pop)));
                }
            },

            Statement::Bury(depth) => {
                self.append(Insn::op(bury_opcode(*depth)));
            }
            Statement::Dig(depth) => {
                self.append(Insn::op(dig_opcode(*depth)));
            }
            Statement::Reserve(count) => {
                self.append(Insn::op(reserve_opcode(*count)));
            }
            Statement::Release(count) => {
                self.append(Insn::op(release_opcode(*count)));
            }
        }

        Ok(())
    }

    fn connect_references(&mut self) -> Result<(), CompileError> {
        for (id, name) in &self.references {
            match self.symbols.get(name) {
                Some(&target) => {
                    self.arena[*id].arg_target = Some(target);
                }
                None => {
                    return Err(CompileError::new(&format!("unknown symbol \"{}\"", name)));
                }
            }
        }
        Ok(())
    }
}

// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// source text example:
//
// (module
//     (section $SRAM 0x0000 0x00ff)
//     (section $CODE 0x0100 0x03ff)
//     (data $counter 2)
//     (data $table (at 0x0020) b"00112233")
//     (function $main (at 0x0100)
//         (imm 3)
//         (imm 4)
//         (add)
//         (ret)))
//
// every instruction statement is one parenthesized node; the statement
// names follow the instruction families of the VM.

use std::iter::Peekable;
use std::vec::IntoIter;

use embedvm_types::opcode::{BinaryOp, CompareOp, MemOp, UnaryOp};
use embedvm_types::CompileError;

use crate::ast::{
    AddressOperand, DataNode, FunctionNode, ItemNode, ModuleNode, SectionNode, Statement,
};
use crate::lexer::{lex, Located, Token};

pub fn parse_from_str(source: &str) -> Result<ModuleNode, CompileError> {
    parse(lex(source)?)
}

pub fn parse(tokens: Vec<Located>) -> Result<ModuleNode, CompileError> {
    let mut parser = Parser {
        tokens: tokens.into_iter().peekable(),
        line: 1,
    };

    let module = parser.parse_module()?;

    if parser.tokens.peek().is_some() {
        return Err(parser.error("unexpected tokens after the module"));
    }

    Ok(module)
}

struct Parser {
    tokens: Peekable<IntoIter<Located>>,
    line: usize,
}

impl Parser {
    fn error(&self, message: &str) -> CompileError {
        CompileError::new(&format!("line {}: {}", self.line, message))
    }

    fn next_token(&mut self) -> Option<Token> {
        let located = self.tokens.next()?;
        self.line = located.line;
        Some(located.token)
    }

    fn peek_token(&mut self) -> Option<&Token> {
        self.tokens.peek().map(|located| &located.token)
    }

    fn expect_left_paren(&mut self) -> Result<(), CompileError> {
        match self.next_token() {
            Some(Token::LeftParen) => Ok(()),
            _ => Err(self.error("expected \"(\"")),
        }
    }

    fn expect_right_paren(&mut self) -> Result<(), CompileError> {
        match self.next_token() {
            Some(Token::RightParen) => Ok(()),
            _ => Err(self.error("expected \")\"")),
        }
    }

    fn expect_symbol(&mut self) -> Result<String, CompileError> {
        match self.next_token() {
            Some(Token::Symbol(name)) => Ok(name),
            _ => Err(self.error("expected a keyword")),
        }
    }

    fn expect_identifier(&mut self) -> Result<String, CompileError> {
        match self.next_token() {
            Some(Token::Identifier(name)) => Ok(name),
            _ => Err(self.error("expected an identifier (\"$name\")")),
        }
    }

    fn expect_number(&mut self, min: i32, max: i32) -> Result<i32, CompileError> {
        match self.next_token() {
            Some(Token::Number(value)) => {
                if value < min || value > max {
                    Err(self.error(&format!(
                        "number {} out of range {}..{}",
                        value, min, max
                    )))
                } else {
                    Ok(value)
                }
            }
            _ => Err(self.error("expected a number")),
        }
    }

    fn expect_address(&mut self) -> Result<u16, CompileError> {
        Ok(self.expect_number(0, 0xffff)? as u16)
    }

    fn parse_module(&mut self) -> Result<ModuleNode, CompileError> {
        self.expect_left_paren()?;
        let keyword = self.expect_symbol()?;
        if keyword != "module" {
            return Err(self.error("expected \"module\""));
        }

        let mut sections = vec![];
        let mut items = vec![];

        while let Some(Token::LeftParen) = self.peek_token() {
            self.next_token();
            let keyword = self.expect_symbol()?;
            match keyword.as_str() {
                "section" => sections.push(self.parse_section()?),
                "data" => items.push(ItemNode::Data(self.parse_data()?)),
                "function" => items.push(ItemNode::Function(self.parse_function()?)),
                _ => {
                    return Err(self.error(&format!("unknown module item \"{}\"", keyword)));
                }
            }
        }

        self.expect_right_paren()?;
        Ok(ModuleNode { sections, items })
    }

    fn parse_section(&mut self) -> Result<SectionNode, CompileError> {
        let name = self.expect_identifier()?;
        let begin = self.expect_address()?;
        let end = self.expect_address()?;
        if begin > end {
            return Err(self.error(&format!("section \"{}\" begins after it ends", name)));
        }
        self.expect_right_paren()?;
        Ok(SectionNode { name, begin, end })
    }

    // '(' 'at' addr ')', the optional forced start address of a data
    // or function item
    fn parse_optional_fixed_addr(&mut self) -> Result<Option<u16>, CompileError> {
        if let Some(Token::LeftParen) = self.peek_token() {
            let mut ahead = self.tokens.clone();
            ahead.next();
            if let Some(Located {
                token: Token::Symbol(keyword),
                ..
            }) = ahead.peek()
            {
                if keyword == "at" {
                    self.next_token();
                    self.next_token();
                    let addr = self.expect_address()?;
                    self.expect_right_paren()?;
                    return Ok(Some(addr));
                }
            }
        }
        Ok(None)
    }

    fn parse_data(&mut self) -> Result<DataNode, CompileError> {
        let name = self.expect_identifier()?;
        let fixed_addr = self.parse_optional_fixed_addr()?;

        let (len, init) = match self.next_token() {
            Some(Token::Number(len)) => {
                if !(0..=0xffff).contains(&len) {
                    return Err(self.error(&format!("data length {} out of range", len)));
                }
                (len as u16, None)
            }
            Some(Token::Bytes(bytes)) => (bytes.len() as u16, Some(bytes)),
            _ => {
                return Err(self.error("expected a data length or a bytes literal"));
            }
        };

        self.expect_right_paren()?;
        Ok(DataNode {
            name,
            fixed_addr,
            len,
            init,
        })
    }

    fn parse_function(&mut self) -> Result<FunctionNode, CompileError> {
        let name = self.expect_identifier()?;
        let fixed_addr = self.parse_optional_fixed_addr()?;

        let mut body = vec![];
        while let Some(Token::LeftParen) = self.peek_token() {
            self.next_token();
            let keyword = self.expect_symbol()?;
            body.push(self.parse_statement(&keyword)?);
        }

        self.expect_right_paren()?;
        Ok(FunctionNode {
            name,
            fixed_addr,
            body,
        })
    }

    fn parse_statement(&mut self, keyword: &str) -> Result<Statement, CompileError> {
        let statement = match keyword {
            "label" => Statement::Label(self.expect_identifier()?),

            "local_get" => Statement::LocalGet(self.expect_number(-32, 31)? as i8),
            "local_set" => Statement::LocalSet(self.expect_number(-32, 31)? as i8),

            "add" => Statement::Binary(BinaryOp::Add),
            "sub" => Statement::Binary(BinaryOp::Sub),
            "mul" => Statement::Binary(BinaryOp::Mul),
            "div" => Statement::Binary(BinaryOp::Div),
            "rem" => Statement::Binary(BinaryOp::Rem),
            "shl" => Statement::Binary(BinaryOp::Shl),
            "shr" => Statement::Binary(BinaryOp::Shr),
            "and" => Statement::Binary(BinaryOp::And),
            "or" => Statement::Binary(BinaryOp::Or),
            "xor" => Statement::Binary(BinaryOp::Xor),
            "logic_and" => Statement::Binary(BinaryOp::LogicAnd),
            "logic_or" => Statement::Binary(BinaryOp::LogicOr),

            "not" => Statement::Unary(UnaryOp::Not),
            "neg" => Statement::Unary(UnaryOp::Neg),
            "logic_not" => Statement::Unary(UnaryOp::LogicNot),

            "lt" => Statement::Compare(CompareOp::Lt),
            "le" => Statement::Compare(CompareOp::Le),
            "eq" => Statement::Compare(CompareOp::Eq),
            "ne" => Statement::Compare(CompareOp::Ne),
            "ge" => Statement::Compare(CompareOp::Ge),
            "gt" => Statement::Compare(CompareOp::Gt),

            "imm" => match self.next_token() {
                Some(Token::Number(value)) => {
                    // 32768..65535 are accepted as unsigned address
                    // constants and wrap to the signed cell value
                    Statement::Imm(value as i16)
                }
                Some(Token::Identifier(name)) => Statement::ImmSymbol(name),
                _ => {
                    return Err(self.error("expected a number or an identifier"));
                }
            },

            "ret" => Statement::Ret,
            "ret_void" => Statement::RetVoid,
            "drop" => Statement::Drop,
            "call_pop" => Statement::CallPop,
            "jump_pop" => Statement::JumpPop,
            "push_sp" => Statement::PushSp,
            "push_sfp" => Statement::PushSfp,

            "jump" => Statement::Jump(self.expect_identifier()?),
            "call" => Statement::Call(self.expect_identifier()?),
            "br_true" => Statement::BrTrue(self.expect_identifier()?),
            "br_false" => Statement::BrFalse(self.expect_identifier()?),

            "user_call" => Statement::UserCall(self.expect_number(0, 15)? as u8),

            "load8_u" => Statement::Memory(MemOp::LoadU8, self.parse_address_operand()?),
            "load8_s" => Statement::Memory(MemOp::LoadS8, self.parse_address_operand()?),
            "load16" => Statement::Memory(MemOp::Load16, self.parse_address_operand()?),
            "store8" => Statement::Memory(MemOp::Store8, self.parse_address_operand()?),
            "store16" => Statement::Memory(MemOp::Store16, self.parse_address_operand()?),

            "bury" => Statement::Bury(self.expect_number(0, 5)? as u8),
            "dig" => Statement::Dig(self.expect_number(0, 5)? as u8),

            "reserve" => Statement::Reserve(self.expect_number(1, 8)? as u8),
            "release" => Statement::Release(self.expect_number(1, 8)? as u8),

            _ => {
                return Err(self.error(&format!("unknown instruction \"{}\"", keyword)));
            }
        };

        self.expect_right_paren()?;
        Ok(statement)
    }

    fn parse_address_operand(&mut self) -> Result<AddressOperand, CompileError> {
        match self.next_token() {
            Some(Token::Identifier(name)) => Ok(AddressOperand::Absolute(name)),
            Some(Token::LeftParen) => {
                let keyword = self.expect_symbol()?;
                let operand = match keyword.as_str() {
                    "pop" => AddressOperand::Popped,
                    "index" => AddressOperand::Indexed(self.expect_identifier()?),
                    _ => {
                        return Err(
                            self.error(&format!("unknown address operand \"{}\"", keyword))
                        );
                    }
                };
                self.expect_right_paren()?;
                Ok(operand)
            }
            _ => Err(self.error("expected \"$name\", \"(index $name)\" or \"(pop)\"")),
        }
    }
}

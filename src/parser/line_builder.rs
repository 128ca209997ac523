/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

use crate::ast::*;
use crate::errors::LiftError;
use crate::parser::Rule;
use crate::registers::Register;
use anyhow::Result;
use pest::iterators::Pair;

// Build an instruction line item from a pest `instruction` pair. The raw
// source slice is kept for the asm("…") escape in the output.
pub fn build_instruction(pair: Pair<Rule>) -> Result<LineItem> {
    let line = pair.as_span().start_pos().line_col().0;
    let raw = pair.as_str().trim_end().to_string();
    let mut inner = pair.into_inner();
    let mnemonic = inner
        .next()
        .ok_or_else(|| LiftError::StructuralError {
            line,
            reason: "Expected a mnemonic.".to_string(),
        })?
        .as_str()
        .to_ascii_lowercase();

    let mut operands = Vec::new();
    if let Some(list) = inner.next() {
        for op_pair in list.into_inner().filter(|p| p.as_rule() == Rule::operand) {
            operands.push(build_operand(op_pair));
        }
    }

    Ok(LineItem::Instruction {
        instr: Instr::Generic { mnemonic, operands },
        raw,
    })
}

// Operand errors never fail the line; they surface as garbage operands that
// the analyses treat conservatively.
pub fn build_operand(pair: Pair<Rule>) -> Operand {
    match pair.into_inner().next() {
        Some(inner) => match inner.as_rule() {
            Rule::expr => build_expr(inner),
            Rule::garbage => Operand::Garbage(inner.as_str().trim().to_string()),
            _ => Operand::Garbage(inner.as_str().trim().to_string()),
        },
        None => Operand::Garbage(String::new()),
    }
}

fn build_expr(pair: Pair<Rule>) -> Operand {
    let mut inner = pair.into_inner();
    let first = match inner.next() {
        Some(p) => p,
        None => return Operand::Garbage(String::new()),
    };
    let mut acc = build_primary(first);
    while let Some(sign_pair) = inner.next() {
        let sign = build_sign(&sign_pair);
        let rhs = match inner.next() {
            Some(p) => build_primary(p),
            None => Operand::Garbage(sign_pair.as_str().to_string()),
        };
        acc = Operand::Binary(sign, Box::new(acc), Box::new(rhs));
    }
    acc
}

fn build_primary(pair: Pair<Rule>) -> Operand {
    let text = pair.as_str().to_string();
    let inner = match pair.into_inner().next() {
        Some(p) => p,
        None => return Operand::Garbage(text),
    };
    match inner.as_rule() {
        Rule::mem => match inner.into_inner().next() {
            Some(addr) => Operand::Memory(Box::new(build_expr(addr))),
            None => Operand::Garbage(text),
        },
        Rule::signed => {
            let mut parts = inner.into_inner();
            match (parts.next(), parts.next()) {
                (Some(sign_pair), Some(expr_pair)) => Operand::Unary(
                    build_sign(&sign_pair),
                    Box::new(build_expr(expr_pair)),
                ),
                _ => Operand::Garbage(text),
            }
        }
        Rule::number => build_number(inner.as_str()),
        Rule::string => {
            let quoted = inner.as_str();
            Operand::Str(quoted[1..quoted.len() - 1].to_string())
        }
        Rule::here => Operand::Here,
        Rule::ident => match Register::from_name(inner.as_str()) {
            Some(reg) => Operand::Register(reg),
            None => Operand::Symbol(inner.as_str().to_string()),
        },
        _ => Operand::Garbage(text),
    }
}

fn build_number(text: &str) -> Operand {
    let (body, hex) = match text.as_bytes().last() {
        Some(b'h') | Some(b'H') => (&text[..text.len() - 1], true),
        _ => (text, false),
    };
    let radix = if hex { 16 } else { 10 };
    match i32::from_str_radix(body, radix) {
        Ok(value) => Operand::Number { value, hex },
        Err(_) => Operand::Garbage(format!("invalid number `{}`", text)),
    }
}

fn build_sign(pair: &Pair<Rule>) -> Sign {
    if pair.as_str() == "-" {
        Sign::Minus
    } else {
        Sign::Plus
    }
}

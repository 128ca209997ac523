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
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub name: String,
    pub value: Operand,
    pub comments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub name: String,
    pub leading_comments: Vec<String>,
    pub trailing_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrEntry {
    pub instr: Instr,
    pub raw: String,
    pub line_number: usize,
    pub leading_comments: Vec<String>,
    pub trailing_comment: Option<String>,
}

/// The frozen instruction stream plus its index-keyed side tables. Labels
/// map to the index of the next following instruction; a trailing label maps
/// to `instrs.len()`.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub instrs: Vec<InstrEntry>,
    pub labels: BTreeMap<String, usize>,
    pub labels_at: BTreeMap<usize, Vec<Label>>,
    pub constants: Vec<Constant>,
}

/// Pass 0: hoist `NAME EQU value` pairs out of the line stream. A label
/// immediately followed by an `equ` instruction becomes a stored constant
/// carrying the comments of both lines; everything else keeps its order.
fn extract_constants(lines: Vec<AssemblyLine>) -> (Vec<AssemblyLine>, Vec<Constant>) {
    let mut kept = Vec::new();
    let mut constants = Vec::new();
    let mut iter = lines.into_iter().peekable();

    while let Some(line) = iter.next() {
        let LineItem::Label(name) = &line.item else {
            kept.push(line);
            continue;
        };
        let is_equ = matches!(
            iter.peek(),
            Some(AssemblyLine {
                item: LineItem::Instruction {
                    instr: Instr::Generic { mnemonic, operands },
                    ..
                },
                ..
            }) if mnemonic == "equ" && !operands.is_empty()
        );
        if !is_equ {
            kept.push(line);
            continue;
        }

        let equ_line = iter.next().expect("peeked line");
        let LineItem::Instruction {
            instr: Instr::Generic { operands, .. },
            ..
        } = equ_line.item
        else {
            unreachable!("peek matched an equ instruction");
        };

        let mut comments = line.leading_comments.clone();
        comments.extend(line.trailing_comment.clone());
        comments.extend(equ_line.leading_comments);
        comments.extend(equ_line.trailing_comment);

        constants.push(Constant {
            name: name.clone(),
            value: operands.into_iter().next().expect("non-empty operands"),
            comments,
        });
    }

    (kept, constants)
}

/// Pass 1: build the instruction stream and the label index tables.
pub fn build_program(lines: Vec<AssemblyLine>) -> Result<Program, LiftError> {
    let (lines, constants) = extract_constants(lines);

    let mut program = Program {
        constants,
        ..Program::default()
    };

    for line in lines {
        match line.item {
            LineItem::Label(name) => {
                let index = program.instrs.len();
                if program.labels.contains_key(&name) {
                    return Err(LiftError::SemanticError {
                        line: line.line_number,
                        reason: format!("Duplicate label definition: {}", name),
                    });
                }
                program.labels.insert(name.clone(), index);
                program.labels_at.entry(index).or_default().push(Label {
                    name,
                    leading_comments: line.leading_comments,
                    trailing_comment: line.trailing_comment,
                });
            }
            LineItem::Instruction { instr, raw } => {
                program.instrs.push(InstrEntry {
                    instr,
                    raw,
                    line_number: line.line_number,
                    leading_comments: line.leading_comments,
                    trailing_comment: line.trailing_comment,
                });
            }
        }
    }

    Ok(program)
}

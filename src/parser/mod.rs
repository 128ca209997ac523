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

mod line_builder;
mod structure;

use crate::ast::*;
use crate::errors::LiftError;
use anyhow::Result;
use line_builder::build_instruction;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;

// Derive the parser from our grammar file.
#[derive(Parser)]
#[grammar = "./grammar.pest"]
pub struct AsmParser;

// Main parsing function that takes the entire source code string.
pub fn parse_source(source: &str) -> Result<Vec<AssemblyLine>> {
    // A control-Z byte is the historic end-of-file marker; everything after
    // it is junk from the original medium.
    let source = match source.find('\u{1a}') {
        Some(pos) => &source[..pos],
        None => source,
    };

    let mut pairs = AsmParser::parse(Rule::program, source).map_err(LiftError::PestError)?;
    let program = pairs
        .next()
        .ok_or_else(|| LiftError::StructuralError {
            line: 1,
            reason: "Empty parse result.".to_string(),
        })?;

    let mut lines = Vec::new();
    // Comments on otherwise empty lines lead the next item.
    let mut pending_comments: Vec<String> = Vec::new();

    for line_pair in program
        .into_inner()
        .filter(|p| p.as_rule() == Rule::line)
    {
        let line_number = line_pair.as_span().start_pos().line_col().0;
        let mut items: Vec<LineItem> = Vec::new();
        let mut trailing: Option<String> = None;

        for pair in line_pair.into_inner() {
            match pair.as_rule() {
                Rule::label_def => {
                    items.push(LineItem::Label(label_name(pair, line_number)?));
                }
                Rule::statement => {
                    collect_statement(pair, line_number, &mut items)?;
                }
                Rule::comment => {
                    trailing = Some(comment_text(pair));
                }
                _ => {}
            }
        }

        if items.is_empty() {
            if let Some(comment) = trailing {
                pending_comments.push(comment);
            }
            continue;
        }

        let last = items.len() - 1;
        for (pos, item) in items.into_iter().enumerate() {
            lines.push(AssemblyLine {
                line_number,
                item,
                leading_comments: if pos == 0 {
                    std::mem::take(&mut pending_comments)
                } else {
                    Vec::new()
                },
                trailing_comment: if pos == last { trailing.take() } else { None },
            });
        }
    }

    // Recognise typed variants of mov and the jump family; anything that
    // does not fit stays generic.
    for line in &mut lines {
        if let LineItem::Instruction { instr, .. } = &mut line.item {
            *instr = structure::recognize(instr.clone());
        }
    }

    Ok(lines)
}

fn collect_statement(
    pair: Pair<Rule>,
    line_number: usize,
    items: &mut Vec<LineItem>,
) -> Result<()> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| LiftError::StructuralError {
            line: line_number,
            reason: "Expected an inner statement rule.".to_string(),
        })?;
    match inner.as_rule() {
        Rule::labeled_storage => {
            let mut parts = inner.into_inner();
            let name = parts
                .next()
                .ok_or_else(|| LiftError::StructuralError {
                    line: line_number,
                    reason: "Expected a name before the storage directive.".to_string(),
                })?
                .as_str()
                .to_string();
            items.push(LineItem::Label(name));
            let instr_pair = parts.next().ok_or_else(|| LiftError::StructuralError {
                line: line_number,
                reason: "Expected a storage directive after the name.".to_string(),
            })?;
            items.push(build_instruction(instr_pair)?);
        }
        Rule::instruction => {
            items.push(build_instruction(inner)?);
        }
        _ => {}
    }
    Ok(())
}

fn label_name(pair: Pair<Rule>, line_number: usize) -> Result<String> {
    Ok(pair
        .into_inner()
        .next()
        .ok_or_else(|| LiftError::StructuralError {
            line: line_number,
            reason: "Expected a label name.".to_string(),
        })?
        .as_str()
        .to_string())
}

fn comment_text(pair: Pair<Rule>) -> String {
    // Keep the text after the `;` byte verbatim.
    pair.as_str()[1..].to_string()
}

// ------------- unit tests -------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Register;

    fn instr_of(line: &AssemblyLine) -> &Instr {
        match &line.item {
            LineItem::Instruction { instr, .. } => instr,
            other => panic!("expected an instruction, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_register_move() {
        let lines = parse_source("MOV AX, BX\n").unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(
            instr_of(&lines[0]),
            &Instr::Move {
                dst: MoveArg::Register(Register::Ax),
                src: MoveArg::Register(Register::Bx),
            }
        );
    }

    #[test]
    fn test_parse_label_then_instruction() {
        let lines = parse_source("start:\n  ret\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].item, LineItem::Label("start".to_string()));
        assert_eq!(
            instr_of(&lines[1]),
            &Instr::Generic {
                mnemonic: "ret".to_string(),
                operands: vec![],
            }
        );
    }

    #[test]
    fn test_parse_label_and_instruction_on_one_line() {
        let lines = parse_source("loop1: dec cx\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].item, LineItem::Label("loop1".to_string()));
        assert_eq!(
            instr_of(&lines[1]),
            &Instr::Generic {
                mnemonic: "dec".to_string(),
                operands: vec![Operand::Register(Register::Cx)],
            }
        );
    }

    #[test]
    fn test_parse_equ_line_defines_label() {
        let lines = parse_source("BUFLEN EQU 0FFH\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].item, LineItem::Label("BUFLEN".to_string()));
        assert_eq!(
            instr_of(&lines[1]),
            &Instr::Generic {
                mnemonic: "equ".to_string(),
                operands: vec![Operand::Number {
                    value: 0xFF,
                    hex: true,
                }],
            }
        );
    }

    #[test]
    fn test_parse_db_keeps_directive_operands() {
        let lines = parse_source("msg DB 'hi', 13, 10\n").unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].item, LineItem::Label("msg".to_string()));
        assert_eq!(
            instr_of(&lines[1]),
            &Instr::Generic {
                mnemonic: "db".to_string(),
                operands: vec![
                    Operand::Str("hi".to_string()),
                    Operand::Number {
                        value: 13,
                        hex: false,
                    },
                    Operand::Number {
                        value: 10,
                        hex: false,
                    },
                ],
            }
        );
    }

    #[test]
    fn test_parse_memory_operand_expression() {
        let lines = parse_source("mov ax, [bx+2]\n").unwrap();
        assert_eq!(
            instr_of(&lines[0]),
            &Instr::Move {
                dst: MoveArg::Register(Register::Ax),
                src: MoveArg::Memory(EffectiveAddr {
                    base: Some(Register::Bx),
                    index: None,
                    disp: Some(Operand::Number {
                        value: 2,
                        hex: false,
                    }),
                }),
            }
        );
    }

    #[test]
    fn test_parse_memory_with_unexpected_base_stays_generic() {
        // ax cannot address memory; the move keeps its generic form.
        let lines = parse_source("mov cx, [ax]\n").unwrap();
        match instr_of(&lines[0]) {
            Instr::Generic { mnemonic, .. } => assert_eq!(mnemonic, "mov"),
            other => panic!("expected generic fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_conditional_jump() {
        let lines = parse_source("jnz retry\n").unwrap();
        assert_eq!(
            instr_of(&lines[0]),
            &Instr::CondJump {
                cond: Cond::NotZero,
                target: Operand::Symbol("retry".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_garbage_operand_recovers() {
        let lines = parse_source("mov ax, 12@#\nret\n").unwrap();
        assert_eq!(lines.len(), 2);
        match instr_of(&lines[0]) {
            Instr::Generic { mnemonic, operands } => {
                assert_eq!(mnemonic, "mov");
                assert_eq!(operands[0], Operand::Register(Register::Ax));
                assert!(matches!(&operands[1], Operand::Garbage(text) if text.contains("12@#")));
            }
            other => panic!("expected generic fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_comment_attachment() {
        let source = "; sets up the loop\nstart: mov cx, dx ; counter\n";
        let lines = parse_source(source).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].leading_comments, vec![" sets up the loop"]);
        assert_eq!(lines[0].trailing_comment, None);
        assert_eq!(lines[1].trailing_comment, Some(" counter".to_string()));
    }

    #[test]
    fn test_control_z_truncates() {
        let lines = parse_source("ret\n\u{1a}complete junk !!!\n").unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn test_dollar_and_expressions() {
        let lines = parse_source("dw $-2\n").unwrap();
        assert_eq!(
            instr_of(&lines[0]),
            &Instr::Generic {
                mnemonic: "dw".to_string(),
                operands: vec![Operand::Binary(
                    Sign::Minus,
                    Box::new(Operand::Here),
                    Box::new(Operand::Number {
                        value: 2,
                        hex: false,
                    }),
                )],
            }
        );
    }
}

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
use crate::registers::Register;

/// Convert `mov` and the jump family into their typed variants. Anything
/// that does not fit the expected operand shapes keeps its generic form.
pub fn recognize(instr: Instr) -> Instr {
    let structured = match &instr {
        Instr::Generic { mnemonic, operands } => try_structure(mnemonic, operands),
        _ => None,
    };
    structured.unwrap_or(instr)
}

fn try_structure(mnemonic: &str, operands: &[Operand]) -> Option<Instr> {
    match mnemonic {
        "mov" if operands.len() == 2 => {
            match (move_arg(&operands[0]), move_arg(&operands[1])) {
                (Some(dst @ (MoveArg::Register(_) | MoveArg::Memory(_))), Some(src)) => {
                    Some(Instr::Move { dst, src })
                }
                _ => None,
            }
        }
        "jmp" if operands.len() == 1 && !matches!(operands[0], Operand::Garbage(_)) => {
            Some(Instr::Jump {
                target: operands[0].clone(),
            })
        }
        _ => {
            let cond = Cond::from_mnemonic(mnemonic)?;
            if operands.len() == 1 && !matches!(operands[0], Operand::Garbage(_)) {
                Some(Instr::CondJump {
                    cond,
                    target: operands[0].clone(),
                })
            } else {
                None
            }
        }
    }
}

fn move_arg(op: &Operand) -> Option<MoveArg> {
    match op {
        Operand::Register(reg) => Some(MoveArg::Register(*reg)),
        Operand::Memory(addr) => effective_addr(addr).map(MoveArg::Memory),
        Operand::Garbage(_) => None,
        other => Some(MoveArg::Immediate(other.clone())),
    }
}

// Classify an address expression as base + index + displacement. Base is
// restricted to bx/bp and index to si/di; any other register inside the
// brackets fails the classification.
fn effective_addr(expr: &Operand) -> Option<EffectiveAddr> {
    let mut terms = Vec::new();
    flatten_terms(expr, Sign::Plus, &mut terms);

    let mut addr = EffectiveAddr::default();
    for (sign, term) in terms {
        match term {
            Operand::Register(reg) => {
                if sign == Sign::Minus {
                    return None;
                }
                match reg {
                    Register::Bx | Register::Bp => {
                        if addr.base.replace(*reg).is_some() {
                            return None;
                        }
                    }
                    Register::Si | Register::Di => {
                        if addr.index.replace(*reg).is_some() {
                            return None;
                        }
                    }
                    _ => return None,
                }
            }
            Operand::Garbage(_) => return None,
            other => {
                if contains_register(other) {
                    return None;
                }
                let term = if sign == Sign::Minus {
                    Operand::Unary(Sign::Minus, Box::new(other.clone()))
                } else {
                    other.clone()
                };
                addr.disp = Some(match addr.disp.take() {
                    Some(prev) => Operand::Binary(Sign::Plus, Box::new(prev), Box::new(term)),
                    None => term,
                });
            }
        }
    }
    Some(addr)
}

fn flatten_terms<'a>(expr: &'a Operand, sign: Sign, out: &mut Vec<(Sign, &'a Operand)>) {
    match expr {
        Operand::Binary(op, lhs, rhs) => {
            flatten_terms(lhs, sign, out);
            flatten_terms(rhs, combine(sign, *op), out);
        }
        other => out.push((sign, other)),
    }
}

fn combine(outer: Sign, inner: Sign) -> Sign {
    if outer == inner { Sign::Plus } else { Sign::Minus }
}

fn contains_register(op: &Operand) -> bool {
    match op {
        Operand::Register(_) => true,
        Operand::Memory(inner) | Operand::Unary(_, inner) => contains_register(inner),
        Operand::Binary(_, lhs, rhs) => contains_register(lhs) || contains_register(rhs),
        _ => false,
    }
}

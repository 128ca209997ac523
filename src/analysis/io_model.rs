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

//! Per-mnemonic source/destination register sets, including the implicit
//! flag effects. This table is the single place the analysers learn the
//! platform from.

use crate::ast::{EffectiveAddr, Instr, MoveArg, Operand};
use crate::registers::{RegSet, Register};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrIo {
    pub uses: RegSet,
    pub defines: RegSet,
}

use Register::*;

const ARITH_FLAGS: &[Register] = &[Flags];
const HALF_FLAGS: &[Register] = &[Sf, Zf, Af, Pf, Cf];
// inc/dec leave cf alone
const INC_FLAGS: &[Register] = &[Of, Sf, Zf, Af, Pf];

pub fn instruction_io(instr: &Instr) -> InstrIo {
    let mut io = InstrIo::default();
    match instr {
        Instr::Move { dst, src } => {
            move_arg_reads(src, &mut io.uses);
            match dst {
                MoveArg::Register(reg) => {
                    io.defines.insert(*reg);
                }
                MoveArg::Memory(addr) => addr_regs(addr, &mut io.uses),
                MoveArg::Immediate(op) => operand_regs(op, &mut io.uses),
            }
        }
        // Unconditional jumps and calls transfer control; the analysers
        // handle them structurally, not through this table.
        Instr::Jump { .. } => {}
        Instr::CondJump { cond, .. } => {
            io.uses.extend(cond.uses());
        }
        Instr::Generic { mnemonic, operands } => {
            generic_io(mnemonic, operands, &mut io);
        }
    }
    io
}

fn generic_io(mnemonic: &str, operands: &[Operand], io: &mut InstrIo) {
    let dst = operands.first();
    match mnemonic {
        "add" | "sub" | "and" | "or" | "xor" | "adc" | "sbb" | "neg" => {
            let same_regs = matches!(
                (operands.first(), operands.get(1)),
                (Some(Operand::Register(a)), Some(Operand::Register(b))) if a == b
            );
            if (mnemonic == "and" || mnemonic == "or") && same_regs {
                // and a,a / or a,a only sample the register.
                all_operand_regs(operands, &mut io.uses);
                io.defines.extend(ARITH_FLAGS);
                return;
            }
            if mnemonic == "xor" && same_regs {
                // xor r,r zeroes r without consuming it.
                define_dst(dst, io);
                io.defines.extend(ARITH_FLAGS);
                return;
            }
            all_operand_regs(operands, &mut io.uses);
            if mnemonic == "adc" || mnemonic == "sbb" {
                io.uses.insert(Cf);
            }
            define_dst(dst, io);
            io.defines.extend(ARITH_FLAGS);
        }
        "cmp" | "test" => {
            all_operand_regs(operands, &mut io.uses);
            io.defines.extend(ARITH_FLAGS);
        }
        "not" => {
            all_operand_regs(operands, &mut io.uses);
            define_dst(dst, io);
        }
        "inc" | "dec" => {
            all_operand_regs(operands, &mut io.uses);
            define_dst(dst, io);
            io.defines.extend(INC_FLAGS);
        }
        "mul" => {
            all_operand_regs(operands, &mut io.uses);
            if byte_sized(dst) {
                io.uses.insert(Al);
                io.defines.extend([Al, Ah]);
            } else {
                io.uses.insert(Ax);
                io.defines.extend([Ax, Dx]);
            }
            io.defines.extend(ARITH_FLAGS);
        }
        "div" => {
            all_operand_regs(operands, &mut io.uses);
            if byte_sized(dst) {
                io.uses.extend([Al, Ah]);
                io.defines.extend([Al, Ah]);
            } else {
                io.uses.extend([Ax, Dx]);
                io.defines.extend([Ax, Dx]);
            }
            io.defines.extend(ARITH_FLAGS);
        }
        "aam" => {
            io.uses.insert(Al);
            io.defines.extend([Al, Ah]);
            io.defines.extend(ARITH_FLAGS);
        }
        "lahf" => {
            io.uses.extend(HALF_FLAGS);
            io.defines.insert(Ah);
        }
        "sahf" => {
            io.uses.insert(Ah);
            io.defines.extend(HALF_FLAGS);
        }
        "lodb" => {
            io.uses.insert(Si);
            io.defines.insert(Al);
        }
        "lodw" => {
            io.uses.insert(Si);
            io.defines.insert(Ax);
        }
        "stob" => {
            io.uses.extend([Al, Di]);
        }
        "stow" => {
            io.uses.extend([Ax, Di]);
        }
        "movb" | "movw" => {
            io.uses.extend([Si, Di]);
        }
        "cmpb" => {
            io.uses.extend([Si, Di, Al]);
            io.defines.extend(ARITH_FLAGS);
        }
        "scab" => {
            io.uses.extend([Di, Al]);
            io.defines.extend(ARITH_FLAGS);
        }
        "rcl" | "rcr" => {
            all_operand_regs(operands, &mut io.uses);
            io.uses.insert(Cf);
            define_dst(dst, io);
            io.defines.extend([Cf, Of]);
        }
        "rol" | "ror" => {
            all_operand_regs(operands, &mut io.uses);
            define_dst(dst, io);
            io.defines.extend([Cf, Of]);
        }
        "shl" | "shr" => {
            all_operand_regs(operands, &mut io.uses);
            define_dst(dst, io);
            io.defines.extend(ARITH_FLAGS);
        }
        "push" => {
            io.uses.insert(Sp);
            all_operand_regs(operands, &mut io.uses);
            io.defines.insert(Sp);
        }
        "pop" => {
            io.uses.insert(Sp);
            io.defines.insert(Sp);
            match dst {
                Some(Operand::Register(reg)) => {
                    io.defines.insert(*reg);
                }
                Some(op) => operand_regs(op, &mut io.uses),
                None => {}
            }
        }
        "ret" => {
            io.uses.insert(Sp);
            io.defines.insert(Sp);
        }
        // Control transfer and the rep prefixes are handled structurally or
        // deliberately left empty.
        "jmp" | "call" | "int" | "rep" | "repe" | "repne" => {}
        // Declarations assemble no machine state.
        "db" | "dw" | "ds" | "dm" | "equ" | "org" | "align" | "put" => {}
        _ => {}
    }
}

pub fn is_known(mnemonic: &str) -> bool {
    matches!(
        mnemonic,
        "add"
            | "sub"
            | "and"
            | "or"
            | "xor"
            | "adc"
            | "sbb"
            | "neg"
            | "cmp"
            | "test"
            | "not"
            | "inc"
            | "dec"
            | "mul"
            | "div"
            | "aam"
            | "lahf"
            | "sahf"
            | "lodb"
            | "lodw"
            | "stob"
            | "stow"
            | "movb"
            | "movw"
            | "cmpb"
            | "scab"
            | "rcl"
            | "rcr"
            | "rol"
            | "ror"
            | "shl"
            | "shr"
            | "push"
            | "pop"
            | "ret"
            | "mov"
            | "jmp"
            | "call"
            | "int"
            | "rep"
            | "repe"
            | "repne"
            | "db"
            | "dw"
            | "ds"
            | "dm"
            | "equ"
            | "org"
            | "align"
            | "put"
    ) || crate::ast::Cond::from_mnemonic(mnemonic).is_some()
}

fn define_dst(dst: Option<&Operand>, io: &mut InstrIo) {
    if let Some(Operand::Register(reg)) = dst {
        io.defines.insert(*reg);
    }
}

fn byte_sized(op: Option<&Operand>) -> bool {
    matches!(op, Some(Operand::Register(reg)) if reg.is_byte())
}

fn all_operand_regs(operands: &[Operand], out: &mut RegSet) {
    for op in operands {
        operand_regs(op, out);
    }
}

fn operand_regs(op: &Operand, out: &mut RegSet) {
    match op {
        Operand::Register(reg) => {
            out.insert(*reg);
        }
        Operand::Memory(inner) | Operand::Unary(_, inner) => operand_regs(inner, out),
        Operand::Binary(_, lhs, rhs) => {
            operand_regs(lhs, out);
            operand_regs(rhs, out);
        }
        _ => {}
    }
}

fn addr_regs(addr: &EffectiveAddr, out: &mut RegSet) {
    out.extend(addr.base);
    out.extend(addr.index);
    if let Some(disp) = &addr.disp {
        operand_regs(disp, out);
    }
}

fn move_arg_reads(arg: &MoveArg, out: &mut RegSet) {
    match arg {
        MoveArg::Register(reg) => {
            out.insert(*reg);
        }
        MoveArg::Memory(addr) => addr_regs(addr, out),
        MoveArg::Immediate(op) => operand_regs(op, out),
    }
}

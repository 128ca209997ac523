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

use crate::registers::Register;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

// Represents all possible forms an operand expression can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Register(Register),
    /// Numeric literal; `hex` remembers the `H`-suffixed spelling.
    Number { value: i32, hex: bool },
    Str(String),
    /// A named symbol: a label or constant reference.
    Symbol(String),
    /// Memory indirection `[addr-expr]`.
    Memory(Box<Operand>),
    Binary(Sign, Box<Operand>, Box<Operand>),
    Unary(Sign, Box<Operand>),
    /// The `$` program-counter symbol.
    Here,
    /// An operand that failed to parse; carries the offending text.
    Garbage(String),
}

/// Condition tested by a conditional jump. Mnemonic aliases (`je`/`jz`,
/// `ja`/`jnbe`, …) collapse onto one variant each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Zero,
    NotZero,
    Carry,
    NotCarry,
    Above,
    BelowOrEqual,
    Less,
    GreaterOrEqual,
    LessOrEqual,
    Greater,
    Sign,
    NotSign,
    Overflow,
    NotOverflow,
    Parity,
    NotParity,
    CxZero,
}

impl Cond {
    pub fn from_mnemonic(mnemonic: &str) -> Option<Cond> {
        let cond = match mnemonic {
            "je" | "jz" => Cond::Zero,
            "jne" | "jnz" => Cond::NotZero,
            "jc" | "jb" | "jnae" => Cond::Carry,
            "jnc" | "jnb" | "jae" => Cond::NotCarry,
            "ja" | "jnbe" => Cond::Above,
            "jna" | "jbe" => Cond::BelowOrEqual,
            "jl" | "jnge" => Cond::Less,
            "jnl" | "jge" => Cond::GreaterOrEqual,
            "jle" | "jng" => Cond::LessOrEqual,
            "jnle" | "jg" => Cond::Greater,
            "js" => Cond::Sign,
            "jns" => Cond::NotSign,
            "jo" => Cond::Overflow,
            "jno" => Cond::NotOverflow,
            "jp" | "jpe" => Cond::Parity,
            "jnp" | "jpo" => Cond::NotParity,
            "jcxz" => Cond::CxZero,
            _ => return None,
        };
        Some(cond)
    }

    /// Exactly the machine state the condition tests.
    pub fn uses(&self) -> &'static [Register] {
        use Register::*;
        match self {
            Cond::Zero | Cond::NotZero => &[Zf],
            Cond::Carry | Cond::NotCarry => &[Cf],
            Cond::Above | Cond::BelowOrEqual => &[Cf, Zf],
            Cond::Less | Cond::GreaterOrEqual => &[Sf, Of],
            Cond::LessOrEqual | Cond::Greater => &[Of, Sf, Zf],
            Cond::Sign | Cond::NotSign => &[Sf],
            Cond::Overflow | Cond::NotOverflow => &[Of],
            Cond::Parity | Cond::NotParity => &[Pf],
            Cond::CxZero => &[Cx],
        }
    }
}

/// A memory operand of a structured instruction, classified as
/// base + index + displacement. Base is restricted to `bx`/`bp`, index to
/// `si`/`di`; anything else fails classification.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EffectiveAddr {
    pub base: Option<Register>,
    pub index: Option<Register>,
    pub disp: Option<Operand>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MoveArg {
    Register(Register),
    Memory(EffectiveAddr),
    Immediate(Operand),
}

// A parsed instruction. `mov` and the jump family are recognised into typed
// variants by a post-pass; everything else stays generic.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Generic {
        mnemonic: String,
        operands: Vec<Operand>,
    },
    Move {
        dst: MoveArg,
        src: MoveArg,
    },
    Jump {
        target: Operand,
    },
    CondJump {
        cond: Cond,
        target: Operand,
    },
}

impl Instr {
    pub fn mnemonic(&self) -> &str {
        match self {
            Instr::Generic { mnemonic, .. } => mnemonic,
            Instr::Move { .. } => "mov",
            Instr::Jump { .. } => "jmp",
            Instr::CondJump { .. } => "jcc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineItem {
    Label(String),
    Instruction {
        instr: Instr,
        /// Original source text, kept verbatim for the `asm("…")` escape.
        raw: String,
    },
}

// Represents a single parsed line item together with the comments attached
// to it by the tokenizer.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyLine {
    pub line_number: usize,
    pub item: LineItem,
    pub leading_comments: Vec<String>,
    pub trailing_comment: Option<String>,
}

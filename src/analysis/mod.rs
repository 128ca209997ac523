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

pub mod functions;
pub mod io_model;
pub mod liveness;
pub mod writes;

use crate::ast::{Instr, Operand};
use crate::program::Program;
use crate::registers::RegSet;
use std::collections::{BTreeMap, BTreeSet};
use writes::Cell;

/// Frozen results of the three fixpoint passes.
pub struct Analysis {
    pub writes: Vec<Cell>,
    pub entries: BTreeSet<usize>,
    pub live_before: Vec<RegSet>,
    pub function_returns: BTreeMap<usize, RegSet>,
}

pub fn analyze(program: &Program) -> Analysis {
    // Unknown mnemonics degrade to empty IO; say so once per mnemonic.
    let mut warned = BTreeSet::new();
    for entry in &program.instrs {
        if let Instr::Generic { mnemonic, .. } = &entry.instr {
            if !io_model::is_known(mnemonic) && warned.insert(mnemonic.clone()) {
                log::warn!(
                    "unknown mnemonic `{}` (line {}); treating as no-effect",
                    mnemonic,
                    entry.line_number
                );
            }
        }
    }

    let writes = writes::compute(program);
    let entries = functions::discover(program, &writes);
    let liveness = liveness::compute(program, &writes, &entries);
    Analysis {
        writes,
        entries,
        live_before: liveness.live_before,
        function_returns: liveness.function_returns,
    }
}

/// Where a jump operand leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpTarget {
    /// A known label: the index of the next instruction after it.
    Index(usize),
    /// The historic `jcc ret` idiom: a target named `ret` that is not a
    /// defined label acts as a return from the enclosing function.
    Return,
    Unknown,
}

pub fn resolve_target(target: &Operand, program: &Program) -> JumpTarget {
    match target {
        Operand::Symbol(name) => match program.labels.get(name) {
            Some(&index) => JumpTarget::Index(index),
            None if name.eq_ignore_ascii_case("ret") => JumpTarget::Return,
            None => JumpTarget::Unknown,
        },
        _ => JumpTarget::Unknown,
    }
}

/// The label index a `call` transfers to, when its operand names one.
pub fn call_target(instr: &Instr, program: &Program) -> Option<usize> {
    let Instr::Generic { mnemonic, operands } = instr else {
        return None;
    };
    if mnemonic != "call" {
        return None;
    }
    match operands.first() {
        Some(Operand::Symbol(name)) => program.labels.get(name).copied(),
        _ => None,
    }
}

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

//! Backward liveness with inter-procedural return propagation: which
//! registers may be consumed before being overwritten, and which registers
//! each discovered function actually returns to its callers.

use crate::analysis::writes::Cell;
use crate::analysis::{JumpTarget, call_target, io_model, resolve_target};
use crate::ast::Instr;
use crate::program::Program;
use crate::registers::{RegSet, decompose_coverings, expand_aliases};
use std::collections::BTreeMap;

pub struct LivenessResult {
    /// Registers live on entry to each instruction, sub-register-decomposed.
    pub live_before: Vec<RegSet>,
    /// Per entry, the registers its callers might consume of those it
    /// writes.
    pub function_returns: BTreeMap<usize, RegSet>,
}

pub fn compute(
    program: &Program,
    cells: &[Cell],
    entries: &std::collections::BTreeSet<usize>,
) -> LivenessResult {
    let count = program.instrs.len();

    // Call and return wiring for the discovered entries.
    let mut call_origins: BTreeMap<usize, Vec<usize>> =
        entries.iter().map(|&entry| (entry, Vec::new())).collect();
    for (index, entry) in program.instrs.iter().enumerate() {
        if let Some(target) = call_target(&entry.instr, program) {
            if let Some(origins) = call_origins.get_mut(&target) {
                origins.push(index);
            }
        }
    }
    let mut returning_entries: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for &entry in entries {
        if let Some(summary) = &cells[entry] {
            for &ret_index in &summary.returns_at {
                returning_entries.entry(ret_index).or_default().push(entry);
            }
        }
    }

    let mut live: Vec<RegSet> = vec![RegSet::new(); count];
    let mut function_returns: BTreeMap<usize, RegSet> =
        entries.iter().map(|&entry| (entry, RegSet::new())).collect();

    loop {
        // The return sets depend on liveness after every call site, so they
        // are refreshed at the top of each outer pass.
        let mut returns_changed = false;
        for &entry in entries {
            let written = written_domain(cells, entry);
            let mut returned = RegSet::new();
            for &origin in &call_origins[&entry] {
                returned.extend(
                    live_at(&live, origin + 1, count)
                        .intersection(&written)
                        .copied(),
                );
            }
            let slot = function_returns.get_mut(&entry).expect("seeded entry");
            if *slot != returned {
                *slot = returned;
                returns_changed = true;
            }
        }

        let mut changed = false;
        for index in (0..count).rev() {
            let new = transfer(
                program,
                cells,
                &returning_entries,
                &function_returns,
                &live,
                index,
            );
            if !new.is_subset(&live[index]) {
                live[index].extend(new);
                changed = true;
            }
        }

        if !changed && !returns_changed {
            break;
        }
    }

    LivenessResult {
        live_before: live,
        function_returns,
    }
}

fn transfer(
    program: &Program,
    cells: &[Cell],
    returning_entries: &BTreeMap<usize, Vec<usize>>,
    function_returns: &BTreeMap<usize, RegSet>,
    live: &[RegSet],
    index: usize,
) -> RegSet {
    let count = program.instrs.len();
    let fall_through = live_at(live, index + 1, count);
    let instr = &program.instrs[index].instr;

    match instr {
        Instr::Jump { target } => match resolve_target(target, program) {
            JumpTarget::Index(to) => live_at(live, to, count),
            JumpTarget::Return => return_contribution(returning_entries, function_returns, index),
            JumpTarget::Unknown => RegSet::new(),
        },
        Instr::CondJump { cond, target } => {
            let mut out = fall_through;
            out.extend(cond.uses());
            match resolve_target(target, program) {
                JumpTarget::Index(to) => out.extend(live_at(live, to, count)),
                JumpTarget::Return => {
                    out.extend(return_contribution(
                        returning_entries,
                        function_returns,
                        index,
                    ));
                }
                JumpTarget::Unknown => {}
            }
            out
        }
        Instr::Generic { mnemonic, .. } if mnemonic == "ret" => {
            return_contribution(returning_entries, function_returns, index)
        }
        _ => {
            if let Some(target) = call_target(instr, program) {
                // Through the callee, plus whatever the callee leaves
                // untouched of the continuation's needs.
                let written = written_domain(cells, target);
                let mut out = live_at(live, target, count);
                out.extend(
                    fall_through
                        .iter()
                        .filter(|reg| !written.contains(reg))
                        .copied(),
                );
                return out;
            }
            let io = io_model::instruction_io(instr);
            let mut out = decompose_coverings(&fall_through);
            let killed = expand_aliases(&io.defines);
            out.retain(|reg| !killed.contains(reg));
            out.extend(io.uses);
            out
        }
    }
}

// Union of the return sets of every function this ret (or jump-to-ret)
// concludes.
fn return_contribution(
    returning_entries: &BTreeMap<usize, Vec<usize>>,
    function_returns: &BTreeMap<usize, RegSet>,
    index: usize,
) -> RegSet {
    let mut out = RegSet::new();
    if let Some(owners) = returning_entries.get(&index) {
        for owner in owners {
            if let Some(returned) = function_returns.get(owner) {
                out.extend(returned.iter().copied());
            }
        }
    }
    out
}

fn written_domain(cells: &[Cell], entry: usize) -> RegSet {
    cells
        .get(entry)
        .and_then(|cell| cell.as_ref())
        .map(|summary| summary.writes.keys().copied().collect())
        .unwrap_or_default()
}

// Live set after an instruction; past the end of the stream nothing is.
fn live_at(live: &[RegSet], index: usize, count: usize) -> RegSet {
    if index < count {
        live[index].clone()
    } else {
        RegSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{functions, writes};
    use crate::parser::parse_source;
    use crate::program::build_program;
    use crate::registers::Register::{self, *};

    fn analyse(source: &str) -> (Program, LivenessResult) {
        let program = build_program(parse_source(source).unwrap()).unwrap();
        let cells = writes::compute(&program);
        let entries = functions::discover(&program, &cells);
        let result = compute(&program, &cells, &entries);
        (program, result)
    }

    fn set(regs: &[Register]) -> RegSet {
        regs.iter().copied().collect()
    }

    #[test]
    fn test_lone_copy_consumes_its_source() {
        // The source of a copy counts as consumed even when nothing reads
        // the destination afterwards.
        let (_, result) = analyse("MOV AX, BX\n");
        assert_eq!(result.live_before[0], set(&[Bx]));
    }

    #[test]
    fn test_flag_liveness_through_conditional() {
        // zf is live at the jz, consumed before the cmp defines it.
        let (_, result) = analyse("CMP AX, BX\nJZ L\nMOV CX, DX\nL: RET\n");
        assert_eq!(result.live_before[0], set(&[Ax, Bx, Dx]));
        assert!(result.live_before[1].contains(&Zf));
        assert!(!result.live_before[0].contains(&Zf));
    }

    #[test]
    fn test_function_with_no_consumed_results() {
        // nothing is read after the call, so F returns nothing.
        let (program, result) = analyse("CALL F\nRET\nF: RET\n");
        let entry = program.labels["F"];
        assert_eq!(result.function_returns[&entry], RegSet::new());
        assert_eq!(result.live_before[0], RegSet::new());
    }

    #[test]
    fn test_interprocedural_return() {
        // the caller consumes ax, and F writes it.
        let (program, result) =
            analyse("CALL F\nMOV BX, AX\nRET\nF: MOV AX, 1\nRET\n");
        let entry = program.labels["F"];
        assert_eq!(result.function_returns[&entry], set(&[Ax]));
        // ax is live on return inside F's body (at its ret).
        assert_eq!(result.live_before[4], set(&[Ax]));
        // …but not before F's own write to ax.
        assert!(!result.live_before[3].contains(&Ax));
        // The call itself needs nothing.
        assert_eq!(result.live_before[0], RegSet::new());
    }

    #[test]
    fn test_call_passes_through_untouched_registers() {
        // si is consumed after the call and F never writes it, so it is
        // live before the call; ax is rewritten by F and is not.
        let (_, result) = analyse(
            "CALL F\nMOV BX, SI\nMOV CX, AX\nRET\nF: MOV AX, 1\nRET\n",
        );
        assert!(result.live_before[0].contains(&Si));
        assert!(!result.live_before[0].contains(&Ax));
    }

    #[test]
    fn test_conditional_jump_to_ret_returns_registers() {
        let source = "\
CALL F\nMOV BX, AX\nRET\n\
F: MOV AX, 1\nOR CX, CX\nJZ RET\nMOV AX, 2\nRET\n";
        let (program, result) = analyse(source);
        let entry = program.labels["F"];
        assert_eq!(result.function_returns[&entry], set(&[Ax]));
        // The jz is one of F's returns, so ax must be live going into it
        // (the first mov of F supplies it).
        assert!(result.live_before[5].contains(&Ax));
        assert!(result.live_before[5].contains(&Zf));
    }

    #[test]
    fn test_half_register_liveness_decomposes() {
        // Writing al leaves ah alive through the decomposed storage form.
        let (_, result) = analyse("MOV AL, 1\nSTOB\nMOV CL, AH\nRET\n");
        assert!(result.live_before[0].contains(&Ah));
        assert!(!result.live_before[0].contains(&Al));
        assert!(!result.live_before[0].contains(&Ax));
    }
}

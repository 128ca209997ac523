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

//! Backward fixpoint computing, for every index, what the suffix of the
//! instruction stream starting there does to registers if it is reached.

use crate::analysis::{JumpTarget, io_model, resolve_target};
use crate::ast::{Instr, MoveArg, Operand};
use crate::program::Program;
use crate::registers::{RegSet, Register, expand_aliases};
use std::collections::{BTreeMap, BTreeSet};

/// What a destination register holds at the end of the suffix, relative to
/// machine state on entry. Lattice order: absent < Reg/Stack < Any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteVal {
    /// Whatever register `r` held on entry.
    Reg(Register),
    /// The bytes that lay at this stack offset on entry.
    Stack { offset: i32, size: u8 },
    /// Clobbered to an unknown value.
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpDelta {
    Known(i32),
    Any,
}

impl Default for SpDelta {
    fn default() -> Self {
        SpDelta::Known(0)
    }
}

impl SpDelta {
    fn shift(self, delta: i32) -> SpDelta {
        match self {
            SpDelta::Known(value) => SpDelta::Known(value + delta),
            SpDelta::Any => SpDelta::Any,
        }
    }
}

pub type WriteMap = BTreeMap<Register, WriteVal>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteSummary {
    pub writes: WriteMap,
    /// Indices of the `ret`s this suffix eventually executes. Empty means
    /// the suffix runs off the end of the stream without returning.
    pub returns_at: BTreeSet<usize>,
    /// Abstract stack-pointer delta from entry.
    pub sp: SpDelta,
}

/// One analysis cell. `None` is the bottom: the suffix never returns and
/// never reaches the end of the stream, so it writes nothing observable.
pub type Cell = Option<WriteSummary>;

pub fn compute(program: &Program) -> Vec<Cell> {
    let count = program.instrs.len();
    let mut cells: Vec<Cell> = vec![None; count];

    loop {
        let mut changed = false;
        // Reverse index order accelerates straight-line flow.
        for index in (0..count).rev() {
            let new = transfer(program, index, &cells);
            let joined = merge(&cells[index], &new);
            if joined != cells[index] {
                cells[index] = joined;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    cells
}

fn transfer(program: &Program, index: usize, cells: &[Cell]) -> Cell {
    let next = successor(program, index + 1, cells);
    let instr = &program.instrs[index].instr;

    match instr {
        Instr::Move { dst, src } => match (dst, src) {
            // A stack-pointer reset invalidates every stack alias the
            // successor suffix established.
            (MoveArg::Register(Register::Sp), _) => clobber_suffix(next),
            (MoveArg::Register(dst), MoveArg::Register(src)) => {
                seq(&next, &move_delta(*dst, *src))
            }
            _ => seq(&next, &any_delta(&io_model::instruction_io(instr).defines)),
        },
        Instr::Jump { target } => match resolve_target(target, program) {
            JumpTarget::Index(target) => successor(program, target, cells),
            JumpTarget::Return => Some(returning_at(index)),
            JumpTarget::Unknown => None,
        },
        Instr::CondJump { target, .. } => {
            let taken = match resolve_target(target, program) {
                JumpTarget::Index(target) => successor(program, target, cells),
                JumpTarget::Return => Some(returning_at(index)),
                JumpTarget::Unknown => None,
            };
            merge(&taken, &next)
        }
        Instr::Generic { mnemonic, operands } => match mnemonic.as_str() {
            // A push makes the pushed register appear at stack offset 0 for
            // the rest of the suffix.
            "push" => pop_through(&next, 2, register_operand(operands)),
            "pop" => match register_operand(operands) {
                Some(reg) => {
                    let through = push_through(&next, 2);
                    seq(&through, &pop_delta(reg))
                }
                None => push_through(&next, 2),
            },
            "ret" => Some(returning_at(index)),
            // Known simplification: calls and interrupts fall through as if
            // they defined nothing.
            "call" | "int" => next,
            _ => seq(&next, &any_delta(&io_model::instruction_io(instr).defines)),
        },
    }
}

// The suffix starting at `index`; past the last instruction execution runs
// off the end, a valid terminal continuation that executes no ret.
fn successor(program: &Program, index: usize, cells: &[Cell]) -> Cell {
    if index < program.instrs.len() {
        cells[index].clone()
    } else {
        Some(WriteSummary::default())
    }
}

fn returning_at(index: usize) -> WriteSummary {
    WriteSummary {
        writes: WriteMap::new(),
        returns_at: BTreeSet::from([index]),
        sp: SpDelta::Known(0),
    }
}

fn register_operand(operands: &[Operand]) -> Option<Register> {
    match operands.first() {
        Some(Operand::Register(reg)) => Some(*reg),
        _ => None,
    }
}

/// "Subtract `delta` from sp, then run `next`": stack slots recede.
pub fn push_through(next: &Cell, delta: i32) -> Cell {
    let next = next.as_ref()?;
    let mut writes = WriteMap::new();
    for (key, value) in &next.writes {
        let shifted = match value {
            WriteVal::Stack { offset, size } => WriteVal::Stack {
                offset: offset + delta,
                size: *size,
            },
            other => other.clone(),
        };
        writes.insert(*key, shifted);
    }
    Some(WriteSummary {
        writes,
        returns_at: next.returns_at.clone(),
        sp: next.sp.shift(delta),
    })
}

/// A read from the top of the stack before `next` runs. A binding at offset
/// 0 of size 2 is restored to `result` (and its halves to the matching
/// halves); bindings cut by the pop become unknown; deeper slots shift up.
pub fn pop_through(next: &Cell, delta: i32, result: Option<Register>) -> Cell {
    let next = next.as_ref()?;
    let mut writes = WriteMap::new();
    let mut restores: Vec<(Register, Register)> = Vec::new();
    for (key, value) in &next.writes {
        match value {
            WriteVal::Stack { offset, size } => match result {
                Some(result) if *offset == 0 && *size == 2 => restores.push((*key, result)),
                _ if *offset < delta => {
                    writes.insert(*key, WriteVal::Any);
                }
                _ => {
                    writes.insert(
                        *key,
                        WriteVal::Stack {
                            offset: offset - delta,
                            size: *size,
                        },
                    );
                }
            },
            other => {
                writes.insert(*key, other.clone());
            }
        }
    }
    // Restores win over the adjacent-garbage bindings from the first pass.
    for (key, result) in restores {
        writes.insert(key, WriteVal::Reg(result));
        let key_subs = key.sub_fields();
        let result_subs = result.sub_fields();
        if key_subs.len() == result_subs.len() {
            for (sub_key, sub_result) in key_subs.iter().zip(result_subs) {
                writes.insert(*sub_key, WriteVal::Reg(*sub_result));
            }
        }
    }
    drop_identities(&mut writes);
    Some(WriteSummary {
        writes,
        returns_at: next.returns_at.clone(),
        sp: next.sp.shift(-delta),
    })
}

/// Sequence a single-instruction write map before `next`: "this holds `r`
/// afterwards" composed with "the instruction just defined `r`".
pub fn seq(next: &Cell, delta_map: &WriteMap) -> Cell {
    let next = next.as_ref()?;
    let mut writes = WriteMap::new();
    for (key, value) in &next.writes {
        let composed = match value {
            WriteVal::Reg(reg) => delta_map
                .get(reg)
                .cloned()
                .unwrap_or(WriteVal::Reg(*reg)),
            other => other.clone(),
        };
        writes.insert(*key, composed);
    }
    for (key, value) in delta_map {
        if !next.writes.contains_key(key) {
            writes.insert(*key, value.clone());
        }
    }
    drop_identities(&mut writes);
    Some(WriteSummary {
        writes,
        returns_at: next.returns_at.clone(),
        sp: next.sp,
    })
}

/// Elementwise join of two suffixes reaching the same instruction.
pub fn merge(a: &Cell, b: &Cell) -> Cell {
    let (a, b) = match (a, b) {
        (None, other) | (other, None) => return other.clone(),
        (Some(a), Some(b)) => (a, b),
    };
    let mut writes = WriteMap::new();
    let keys: BTreeSet<Register> = a.writes.keys().chain(b.writes.keys()).copied().collect();
    for key in keys {
        let value = match (a.writes.get(&key), b.writes.get(&key)) {
            (Some(x), Some(y)) if x == y => x.clone(),
            _ => WriteVal::Any,
        };
        writes.insert(key, value);
    }
    let returns_at = a.returns_at.union(&b.returns_at).copied().collect();
    let sp = if a.sp == b.sp { a.sp } else { SpDelta::Any };
    Some(WriteSummary {
        writes,
        returns_at,
        sp,
    })
}

// A key never maps to itself.
fn drop_identities(writes: &mut WriteMap) {
    writes.retain(|key, value| !matches!(value, WriteVal::Reg(reg) if reg == key));
}

// Every alias of every declared destination becomes unknown.
fn any_delta(defines: &RegSet) -> WriteMap {
    expand_aliases(defines)
        .into_iter()
        .map(|reg| (reg, WriteVal::Any))
        .collect()
}

// mov dst, src over plain registers: aliases go unknown, then the copy is
// recorded, including the matching byte halves. A self-move produces pure
// identity bindings, which seq erases into a no-op.
fn move_delta(dst: Register, src: Register) -> WriteMap {
    let mut map = any_delta(&RegSet::from([dst]));
    map.insert(dst, WriteVal::Reg(src));
    for (sub_dst, sub_src) in dst.sub_fields().iter().zip(src.sub_fields()) {
        map.insert(*sub_dst, WriteVal::Reg(*sub_src));
    }
    map
}

// pop dst: aliases go unknown, then dst holds the popped bytes.
fn pop_delta(dst: Register) -> WriteMap {
    let mut map = any_delta(&RegSet::from([dst]));
    map.insert(dst, WriteVal::Stack { offset: 0, size: 2 });
    map
}

// The successor survives in returns_at only; every binding and the stack
// delta are invalidated.
fn clobber_suffix(next: Cell) -> Cell {
    let next = next?;
    let writes = next
        .writes
        .keys()
        .map(|key| (*key, WriteVal::Any))
        .collect();
    Some(WriteSummary {
        writes,
        returns_at: next.returns_at,
        sp: SpDelta::Any,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::program::build_program;
    use Register::*;

    fn analyse(source: &str) -> Vec<Cell> {
        compute(&build_program(parse_source(source).unwrap()).unwrap())
    }

    fn binding(cell: &Cell, reg: Register) -> Option<&WriteVal> {
        cell.as_ref().and_then(|summary| summary.writes.get(&reg))
    }

    #[test]
    fn test_register_copy_records_halves() {
        // a lone register copy runs off the end of the stream.
        let cells = analyse("MOV AX, BX\n");
        let summary = cells[0].as_ref().unwrap();
        assert_eq!(summary.writes[&Ax], WriteVal::Reg(Bx));
        assert_eq!(summary.writes[&Ah], WriteVal::Reg(Bh));
        assert_eq!(summary.writes[&Al], WriteVal::Reg(Bl));
        assert_eq!(summary.writes.len(), 3);
        assert!(summary.returns_at.is_empty());
        assert_eq!(summary.sp, SpDelta::Known(0));
    }

    #[test]
    fn test_push_pop_round_trip() {
        // the pushed register is restored through the stack slot.
        let cells = analyse("PUSH BX\nPOP AX\nRET\n");
        let summary = cells[0].as_ref().unwrap();
        assert_eq!(summary.writes[&Ax], WriteVal::Reg(Bx));
        assert_eq!(summary.writes[&Ah], WriteVal::Reg(Bh));
        assert_eq!(summary.writes[&Al], WriteVal::Reg(Bl));
        assert_eq!(summary.returns_at, BTreeSet::from([2]));
        assert_eq!(summary.sp, SpDelta::Known(0));
    }

    #[test]
    fn test_stack_pointer_reset_clobbers() {
        // mov sp,… invalidates the aliasing, not the reachability.
        let cells = analyse("PUSH AX\nMOV SP, BX\nPOP AX\nRET\n");
        let summary = cells[0].as_ref().unwrap();
        assert_eq!(summary.sp, SpDelta::Any);
        assert_eq!(summary.writes[&Ax], WriteVal::Any);
        assert_eq!(summary.writes[&Ah], WriteVal::Any);
        assert_eq!(summary.writes[&Al], WriteVal::Any);
        assert_eq!(summary.returns_at, BTreeSet::from([3]));
    }

    #[test]
    fn test_self_push_pop_leaves_no_binding() {
        let cells = analyse("PUSH AX\nPOP AX\nRET\n");
        let summary = cells[0].as_ref().unwrap();
        assert!(summary.writes.is_empty(), "writes: {:?}", summary.writes);
        assert_eq!(summary.sp, SpDelta::Known(0));
    }

    #[test]
    fn test_self_move_is_a_no_op() {
        let cells = analyse("MOV AX, AX\nRET\n");
        let summary = cells[0].as_ref().unwrap();
        assert!(summary.writes.is_empty(), "writes: {:?}", summary.writes);
        assert_eq!(summary.returns_at, BTreeSet::from([1]));
        assert_eq!(summary.sp, SpDelta::Known(0));
    }

    #[test]
    fn test_pop_alone_binds_stack_slot() {
        let cells = analyse("POP AX\nRET\n");
        let summary = cells[0].as_ref().unwrap();
        assert_eq!(summary.writes[&Ax], WriteVal::Stack { offset: 0, size: 2 });
        assert_eq!(summary.writes[&Ah], WriteVal::Any);
        assert_eq!(summary.writes[&Al], WriteVal::Any);
        assert_eq!(summary.sp, SpDelta::Known(2));
    }

    #[test]
    fn test_move_composes_through_suffix() {
        // bx ends up holding what ax held on entry; ax is clobbered after.
        let cells = analyse("MOV BX, AX\nMOV AX, 5\nRET\n");
        let summary = cells[0].as_ref().unwrap();
        assert_eq!(summary.writes[&Bx], WriteVal::Reg(Ax));
        assert_eq!(summary.writes[&Ax], WriteVal::Any);
    }

    #[test]
    fn test_infinite_loop_is_no_return() {
        let cells = analyse("spin: jmp spin\n");
        assert_eq!(cells[0], None);
    }

    #[test]
    fn test_conditional_merge_raises_disagreement() {
        // One path zeroes cx, the other leaves it; merged it is unknown.
        let cells = analyse("jz skip\nmov cx, dx\nskip: ret\n");
        assert_eq!(binding(&cells[0], Cx), Some(&WriteVal::Any));
        // Both paths return at index 2.
        assert_eq!(
            cells[0].as_ref().unwrap().returns_at,
            BTreeSet::from([2])
        );
    }

    #[test]
    fn test_jump_to_ret_symbol_returns() {
        let cells = analyse("cmp ax, bx\njz ret\nmov cx, dx\nret\n");
        // The jz can return at its own index or fall through to the ret.
        assert_eq!(
            cells[1].as_ref().unwrap().returns_at,
            BTreeSet::from([1, 3])
        );
    }

    #[test]
    fn test_call_falls_through_defining_nothing() {
        let cells = analyse("call helper\nret\nhelper: mov ax, 1\nret\n");
        let summary = cells[0].as_ref().unwrap();
        // The call's own write effect is its fall-through suffix.
        assert!(summary.writes.is_empty());
        assert_eq!(summary.returns_at, BTreeSet::from([1]));
    }

    #[test]
    fn test_lattice_only_rises() {
        // Convergence respects absent < Reg/Stack < Any for every cell.
        let source = "top: push bx\npop ax\njz top\nret\n";
        let program = build_program(parse_source(source).unwrap()).unwrap();
        let count = program.instrs.len();
        let mut cells: Vec<Cell> = vec![None; count];
        loop {
            let mut changed = false;
            for index in (0..count).rev() {
                let new = transfer(&program, index, &cells);
                let joined = merge(&cells[index], &new);
                if joined != cells[index] {
                    rank_must_not_drop(&cells[index], &joined);
                    cells[index] = joined;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        assert_eq!(cells, compute(&program));
    }

    fn rank_must_not_drop(old: &Cell, new: &Cell) {
        let Some(old) = old else { return };
        let new = new.as_ref().expect("a returning cell cannot become bottom");
        for (key, value) in &old.writes {
            match (value, new.writes.get(key)) {
                (_, Some(WriteVal::Any)) => {}
                (old_value, Some(new_value)) => assert_eq!(old_value, new_value),
                (WriteVal::Any, None) => panic!("binding for {} dropped from Any", key),
                _ => {}
            }
        }
        assert!(new.returns_at.is_superset(&old.returns_at));
    }
}

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

//! Labels instruction indices as function entries: call targets seed the
//! set, and labelled code reachable from two different owners with a
//! consistent stack pointer is promoted to an entry of its own.

use crate::analysis::{JumpTarget, call_target, resolve_target};
use crate::ast::Instr;
use crate::program::Program;
use crate::analysis::writes::{Cell, SpDelta};
use std::collections::{BTreeMap, BTreeSet};

pub fn discover(program: &Program, cells: &[Cell]) -> BTreeSet<usize> {
    let count = program.instrs.len();

    let mut entries: BTreeSet<usize> = program
        .instrs
        .iter()
        .filter_map(|entry| call_target(&entry.instr, program))
        .filter(|&target| target < count)
        .collect();

    let graph = label_graph(program);

    loop {
        let mut owner: BTreeMap<usize, usize> = BTreeMap::new();
        let mut promoted: BTreeSet<usize> = BTreeSet::new();

        for &entry in &entries {
            let mut stack = vec![entry];
            while let Some(node) = stack.pop() {
                let Some(successors) = graph.get(&node) else {
                    continue;
                };
                for &succ in successors {
                    if entries.contains(&succ) {
                        continue;
                    }
                    match owner.get(&succ) {
                        None => {
                            owner.insert(succ, entry);
                            stack.push(succ);
                        }
                        Some(&other) if other != entry => {
                            if eligible(cells, succ) {
                                promoted.insert(succ);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let before = entries.len();
        entries.extend(promoted);
        if entries.len() == before {
            break;
        }
    }

    entries
}

// Adjacency over labelled indices: fall-through to the next labelled index
// unless a ret or an unconditional jump intervenes, plus explicit jump
// edges.
fn label_graph(program: &Program) -> BTreeMap<usize, BTreeSet<usize>> {
    let count = program.instrs.len();
    let nodes: Vec<usize> = program
        .labels_at
        .keys()
        .copied()
        .filter(|&index| index < count)
        .collect();
    let mut graph: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();

    for (pos, &node) in nodes.iter().enumerate() {
        let region_end = nodes.get(pos + 1).copied().unwrap_or(count);
        let successors = graph.entry(node).or_default();
        let mut falls_through = true;

        for index in node..region_end {
            match &program.instrs[index].instr {
                Instr::Jump { target } => {
                    if let JumpTarget::Index(to) = resolve_target(target, program) {
                        if to < count {
                            successors.insert(to);
                        }
                    }
                    falls_through = false;
                    break;
                }
                Instr::CondJump { target, .. } => {
                    if let JumpTarget::Index(to) = resolve_target(target, program) {
                        if to < count {
                            successors.insert(to);
                        }
                    }
                }
                Instr::Generic { mnemonic, .. } if mnemonic == "ret" => {
                    falls_through = false;
                    break;
                }
                _ => {}
            }
        }

        if falls_through && region_end < count {
            successors.insert(region_end);
        }
    }

    graph
}

// A node can start a function if its abstract stack pointer is consistent
// with an entry. A no-return suffix leaves it unconstrained.
fn eligible(cells: &[Cell], index: usize) -> bool {
    match &cells[index] {
        None => true,
        Some(summary) => matches!(summary.sp, SpDelta::Known(0) | SpDelta::Any),
    }
}

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

//! Renders the annotated pseudo-C transcription: constants, a `main` body
//! of `asm("…");` escapes, and the analysis results as comments.

use crate::analysis::Analysis;
use crate::analysis::writes::{Cell, WriteVal};
use crate::ast::{Operand, Sign};
use crate::program::Program;
use crate::registers::{RegSet, Register, expand_coverings};

pub fn emit(program: &Program, analysis: &Analysis) -> String {
    let mut out = String::new();

    for constant in &program.constants {
        for comment in &constant.comments {
            out.push_str(&format!("//{}\n", comment));
        }
        out.push_str(&format!(
            "const int {} = {};\n",
            constant.name,
            render_value(&constant.value)
        ));
    }
    if !program.constants.is_empty() {
        out.push('\n');
    }

    out.push_str("int main() {\n");

    let count = program.instrs.len();
    for index in 0..=count {
        if let Some(labels) = program.labels_at.get(&index) {
            if analysis.entries.contains(&index) {
                out.push_str("    // function\n");
                out.push_str(&returns_comment(
                    analysis.function_returns.get(&index),
                ));
            }
            for label in labels {
                for comment in &label.leading_comments {
                    out.push_str(&format!("    //{}\n", comment));
                }
                match &label.trailing_comment {
                    Some(comment) => out.push_str(&format!("{}: //{}\n", label.name, comment)),
                    None => out.push_str(&format!("{}:\n", label.name)),
                }
            }
        }
        if index < count {
            let entry = &program.instrs[index];
            for comment in &entry.leading_comments {
                out.push_str(&format!("    //{}\n", comment));
            }
            out.push_str(&writes_comment(&analysis.writes[index]));
            match &entry.trailing_comment {
                Some(comment) => {
                    out.push_str(&format!("    asm(\"{}\"); //{}\n", escape(&entry.raw), comment))
                }
                None => out.push_str(&format!("    asm(\"{}\");\n", escape(&entry.raw))),
            }
        }
    }

    out.push_str("}\n");
    out
}

// One write-summary comment, bindings in name-sorted order.
fn writes_comment(cell: &Cell) -> String {
    let Some(summary) = cell else {
        return "    // writes: no return\n".to_string();
    };
    let mut bindings: Vec<_> = summary.writes.iter().collect();
    bindings.sort_by_key(|(reg, _)| reg.name());
    let parts: Vec<String> = bindings
        .into_iter()
        .map(|(reg, value)| match value {
            WriteVal::Any => reg.name().to_string(),
            WriteVal::Reg(src) => format!("{}={}", reg, src),
            WriteVal::Stack { offset, .. } => {
                if *offset >= 0 {
                    format!("{}=[sp+{}]", reg, offset)
                } else {
                    format!("{}=[sp-{}]", reg, -offset)
                }
            }
        })
        .collect();
    if parts.is_empty() {
        "    // writes:\n".to_string()
    } else {
        format!("    // writes: {}\n", parts.join(", "))
    }
}

fn returns_comment(returned: Option<&RegSet>) -> String {
    // Close the set over coverings, then list maximal names only: a whole
    // register subsumes its halves.
    let mut closed = returned.map(expand_coverings).unwrap_or_default();
    let covers: Vec<Register> = closed
        .iter()
        .copied()
        .filter(Register::is_covering)
        .collect();
    for cover in covers {
        for sub in cover.sub_fields() {
            closed.remove(sub);
        }
    }
    let mut names: Vec<&str> = closed.iter().map(|reg| reg.name()).collect();
    names.sort_unstable();
    if names.is_empty() {
        "    // returns:\n".to_string()
    } else {
        format!("    // returns: {}\n", names.join(", "))
    }
}

fn render_value(value: &Operand) -> String {
    match value {
        Operand::Register(reg) => reg.name().to_string(),
        Operand::Number { value, hex } => {
            if *hex {
                format!("0x{:X}", value)
            } else {
                value.to_string()
            }
        }
        Operand::Str(text) => format!("\"{}\"", text),
        Operand::Symbol(name) => name.clone(),
        Operand::Memory(inner) => format!("[{}]", render_value(inner)),
        Operand::Binary(sign, lhs, rhs) => format!(
            "{} {} {}",
            render_value(lhs),
            sign_text(*sign),
            render_value(rhs)
        ),
        Operand::Unary(sign, inner) => format!("{}{}", sign_text(*sign), render_value(inner)),
        Operand::Here => "$".to_string(),
        Operand::Garbage(text) => text.clone(),
    }
}

fn sign_text(sign: Sign) -> &'static str {
    match sign {
        Sign::Plus => "+",
        Sign::Minus => "-",
    }
}

fn escape(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::analyze;
    use crate::parser::parse_source;
    use crate::program::build_program;

    fn transcribe(source: &str) -> String {
        let program = build_program(parse_source(source).unwrap()).unwrap();
        let analysis = analyze(&program);
        emit(&program, &analysis)
    }

    #[test]
    fn test_push_pop_round_trip_output() {
        let output = transcribe("PUSH BX\nPOP AX\nRET\n");
        assert_eq!(
            output,
            "int main() {\n\
             \x20   // writes: ah=bh, al=bl, ax=bx\n\
             \x20   asm(\"PUSH BX\");\n\
             \x20   // writes: ah, al, ax=[sp+0]\n\
             \x20   asm(\"POP AX\");\n\
             \x20   // writes:\n\
             \x20   asm(\"RET\");\n\
             }\n"
        );
    }

    #[test]
    fn test_constants_and_comments_round_trip() {
        let source = "; counts down\nTEN EQU 0AH\nSTART: MOV CX, BX ; init\nRET\n";
        let output = transcribe(source);
        assert!(output.starts_with("// counts down\nconst int TEN = 0xA;\n\n"));
        assert!(output.contains("START:\n"));
        assert!(output.contains("    asm(\"MOV CX, BX\"); // init\n"));
    }

    #[test]
    fn test_no_return_marker() {
        let output = transcribe("spin: jmp spin\n");
        assert!(output.contains("    // writes: no return\n"));
        assert!(output.contains("    asm(\"jmp spin\");\n"));
    }

    #[test]
    fn test_function_markers() {
        let output = transcribe("CALL F\nMOV BX, AX\nRET\nF: MOV AX, 1\nRET\n");
        assert!(output.contains("    // function\n    // returns: ax\nF:\n"));
    }

    #[test]
    fn test_string_operands_are_escaped() {
        let output = transcribe("msg DB \"hi there\"\n");
        assert!(output.contains("    asm(\"DB \\\"hi there\\\"\");\n"));
    }

    #[test]
    fn test_trailing_label_is_emitted() {
        let output = transcribe("ret\ndone:\n");
        assert!(output.ends_with("    asm(\"ret\");\ndone:\n}\n"));
    }
}

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

pub mod analysis;
pub mod ast;
pub mod emitter;
pub mod errors;
pub mod file_reader;
pub mod parser;
pub mod program;
pub mod registers;

use std::path::Path;

use anyhow::{Context, Result};
use file_reader::FileReader;

extern crate pest;
extern crate pest_derive;

/// Transcribe one assembly source file into annotated pseudo-C.
pub fn lift<F: FileReader>(source_path: &Path, reader: &F) -> Result<String> {
    let source = reader
        .read_to_string(source_path)
        .with_context(|| format!("Failed to read input file: {}", source_path.display()))?;

    let lines = parser::parse_source(&source).context("Failed during parsing stage")?;

    let program = program::build_program(lines).context("Failed while building label tables")?;

    let analysis = analysis::analyze(&program);

    Ok(emitter::emit(&program, &analysis))
}

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

use anyhow::{Context, Result};
use clap::Parser as clap_parser;
use lift86::file_reader::AsmFileReader;
use lift86::lift;
use std::fs;
use std::path::PathBuf;

#[derive(clap_parser)]
#[clap(version = "0.1.0")]
struct Opts {
    /// Assembly source to transcribe
    #[clap(default_value = "input.asm")]
    input: PathBuf,
    /// Annotated pseudo-C output
    #[clap(default_value = "output.c")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();
    let opts: Opts = Opts::parse();

    let reader = AsmFileReader;
    let transcript = lift(&opts.input, &reader)?;

    fs::write(&opts.output, transcript)
        .with_context(|| format!("Failed to write output file: {}", opts.output.display()))?;
    println!(
        "Transcribed {} to {}",
        opts.input.display(),
        opts.output.display()
    );

    Ok(())
}

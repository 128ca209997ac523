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

use std::collections::BTreeSet;
use std::fmt;

/// The 8086 register universe as the analyses see it: the sixteen machine
/// registers plus two pseudo-registers (`flags`, `hflags`) grouping the
/// condition bits as sub-fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Register {
    Al,
    Cl,
    Dl,
    Bl,
    Ah,
    Ch,
    Dh,
    Bh,
    Ax,
    Cx,
    Dx,
    Bx,
    Sp,
    Bp,
    Si,
    Di,
    Flags,
    HFlags,
    Sf,
    Zf,
    Af,
    Pf,
    Cf,
    Of,
    Df,
    If,
    Tf,
}

pub type RegSet = BTreeSet<Register>;

use Register::*;

// Sub-field relation. The four general-purpose pairs are coverings (the
// whole register is exactly the union of its parts); the flag groups are not.
const SUB_FIELDS: &[(Register, &[Register])] = &[
    (Ax, &[Ah, Al]),
    (Cx, &[Ch, Cl]),
    (Dx, &[Dh, Dl]),
    (Bx, &[Bh, Bl]),
    (Flags, &[Sf, Zf, Af, Pf, Cf, Of, Df, If, Tf]),
    (HFlags, &[Sf, Zf, Af, Pf, Cf]),
];

const COVERINGS: &[Register] = &[Ax, Cx, Dx, Bx];

impl Register {
    pub fn name(&self) -> &'static str {
        match self {
            Al => "al",
            Cl => "cl",
            Dl => "dl",
            Bl => "bl",
            Ah => "ah",
            Ch => "ch",
            Dh => "dh",
            Bh => "bh",
            Ax => "ax",
            Cx => "cx",
            Dx => "dx",
            Bx => "bx",
            Sp => "sp",
            Bp => "bp",
            Si => "si",
            Di => "di",
            Flags => "flags",
            HFlags => "hflags",
            Sf => "sf",
            Zf => "zf",
            Af => "af",
            Pf => "pf",
            Cf => "cf",
            Of => "of",
            Df => "df",
            If => "if",
            Tf => "tf",
        }
    }

    // Only the sixteen machine registers may appear in source text; the
    // pseudo-registers and flag bits are synthesised by the analyses.
    pub fn from_name(name: &str) -> Option<Register> {
        let reg = match name.to_ascii_lowercase().as_str() {
            "al" => Al,
            "cl" => Cl,
            "dl" => Dl,
            "bl" => Bl,
            "ah" => Ah,
            "ch" => Ch,
            "dh" => Dh,
            "bh" => Bh,
            "ax" => Ax,
            "cx" => Cx,
            "dx" => Dx,
            "bx" => Bx,
            "sp" => Sp,
            "bp" => Bp,
            "si" => Si,
            "di" => Di,
            _ => return None,
        };
        Some(reg)
    }

    pub fn sub_fields(&self) -> &'static [Register] {
        SUB_FIELDS
            .iter()
            .find(|(reg, _)| reg == self)
            .map(|(_, subs)| *subs)
            .unwrap_or(&[])
    }

    // Reverse lookup over the sub-field map.
    pub fn super_registers(&self) -> Vec<Register> {
        SUB_FIELDS
            .iter()
            .filter(|(_, subs)| subs.contains(self))
            .map(|(reg, _)| *reg)
            .collect()
    }

    pub fn is_covering(&self) -> bool {
        COVERINGS.contains(self)
    }

    pub fn is_byte(&self) -> bool {
        matches!(self, Al | Cl | Dl | Bl | Ah | Ch | Dh | Bh)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The set plus every sub-field of every member.
pub fn expand_sub_registers(set: &RegSet) -> RegSet {
    let mut out = set.clone();
    for reg in set {
        out.extend(reg.sub_fields());
    }
    out
}

/// Every name whose storage overlaps a member: sub-fields first, then every
/// super-register of any member. Writing `ah` invalidates `ax`; writing `ax`
/// invalidates `ah` and `al`.
pub fn expand_aliases(set: &RegSet) -> RegSet {
    let expanded = expand_sub_registers(set);
    let mut out = expanded.clone();
    for reg in &expanded {
        out.extend(reg.super_registers());
    }
    out
}

/// Sub-fields added, then any covering whose parts are all present. Liveness
/// uses this so that live `{ah, al}` reads as live `ax`.
pub fn expand_coverings(set: &RegSet) -> RegSet {
    let mut out = expand_sub_registers(set);
    for &cover in COVERINGS {
        if cover.sub_fields().iter().all(|sub| out.contains(sub)) {
            out.insert(cover);
        }
    }
    out
}

/// Canonical storage form for liveness: whole coverings replaced by their
/// parts.
pub fn decompose_coverings(set: &RegSet) -> RegSet {
    let mut out = RegSet::new();
    for &reg in set {
        if reg.is_covering() {
            out.extend(reg.sub_fields());
        } else {
            out.insert(reg);
        }
    }
    out
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;
use thiserror::Error;

/// The provisioning flavour of an ATECC608, as reported by `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipType {
    /// Blank chip: keys and certificates are created during manufacturing.
    TrustCustom,
    /// Pre-provisioned by Microchip with a fixed certificate chain.
    TrustAndGo,
    /// Pre-provisioned, with some slots left configurable.
    TrustFlex,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid ATECC608 type: {0:?}")]
pub struct UnknownChipType(pub String);

impl ChipType {
    // Checked in this order; the first match wins.
    const ALL: [ChipType; 3] =
        [ChipType::TrustCustom, ChipType::TrustAndGo, ChipType::TrustFlex];

    /// The name the firmware uses for this type.
    pub fn marker(self) -> &'static str {
        match self {
            ChipType::TrustCustom => "TrustCustom",
            ChipType::TrustAndGo => "Trust&Go",
            ChipType::TrustFlex => "TrustFlex",
        }
    }

    /// The Microchip part number of the pre-provisioned variants.
    pub fn part_number(self) -> &'static str {
        match self {
            ChipType::TrustCustom => "ATECC608-TCSM",
            ChipType::TrustAndGo => "ATECC608-TNGTLS",
            ChipType::TrustFlex => "ATECC608-TFLXTLS",
        }
    }

    /// Determine the chip type from the output of `init`.
    pub fn classify(init_output: &str) -> Result<ChipType, UnknownChipType> {
        ChipType::ALL
            .into_iter()
            .find(|chip| init_output.contains(chip.marker()))
            .ok_or_else(|| UnknownChipType(init_output.trim().to_string()))
    }
}

impl fmt::Display for ChipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.marker())
    }
}

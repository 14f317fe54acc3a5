// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Provisioning of ATECC608 secure elements attached to ESP32 boards.

pub mod chip;
pub mod config;
pub mod extract;
pub mod manifest;
pub mod workflow;

pub use chip::{ChipType, UnknownChipType};
pub use config::{ConfigError, ProvisionConfig, RunFlags, Settings, TargetChip};
pub use workflow::{Outcome, ProvisionError, ProvisioningWorkflow};

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource footprint of tasks and executors.
//!
//! The full accounting arithmetic lives with the master; the agent only
//! needs to sum footprints per executor and compare against limits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A declared resource footprint: fractional CPUs plus memory and disk
/// in megabytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default)]
    pub cpus: f64,
    #[serde(default)]
    pub mem_mb: u64,
    #[serde(default)]
    pub disk_mb: u64,
}

impl Resources {
    pub fn new(cpus: f64, mem_mb: u64, disk_mb: u64) -> Self {
        Self { cpus, mem_mb, disk_mb }
    }

    pub fn is_empty(&self) -> bool {
        self.cpus <= 0.0 && self.mem_mb == 0 && self.disk_mb == 0
    }

    /// Whether `other` fits inside this footprint on every dimension.
    pub fn contains(&self, other: &Resources) -> bool {
        self.cpus + f64::EPSILON >= other.cpus
            && self.mem_mb >= other.mem_mb
            && self.disk_mb >= other.disk_mb
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, rhs: Resources) -> Resources {
        Resources {
            cpus: self.cpus + rhs.cpus,
            mem_mb: self.mem_mb.saturating_add(rhs.mem_mb),
            disk_mb: self.disk_mb.saturating_add(rhs.disk_mb),
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Resources) {
        *self = *self + rhs;
    }
}

impl Sub for Resources {
    type Output = Resources;

    fn sub(self, rhs: Resources) -> Resources {
        Resources {
            cpus: (self.cpus - rhs.cpus).max(0.0),
            mem_mb: self.mem_mb.saturating_sub(rhs.mem_mb),
            disk_mb: self.disk_mb.saturating_sub(rhs.disk_mb),
        }
    }
}

impl SubAssign for Resources {
    fn sub_assign(&mut self, rhs: Resources) {
        *self = *self - rhs;
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpus={}; mem={}MB; disk={}MB",
            self.cpus, self.mem_mb, self.disk_mb
        )
    }
}

#[cfg(test)]
#[path = "resources_tests.rs"]
mod tests;

//! Kubernetes resource quantities
//!
//! Parses CPU and memory quantity strings (`"500m"`, `"2"`, `"16Gi"`,
//! `"512Mi"`, `"1e3"`) into floats. CPU is kept in cores and memory in bytes;
//! every scoring formula works on these normalized values.

use crate::error::QuantityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// Bytes in one GiB
pub const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Tolerance used when comparing accumulated float usage against capacity
const CAPACITY_EPSILON: f64 = 1e-9;

/// Parse a raw Kubernetes quantity into a plain float
pub fn parse_quantity(raw: &str) -> Result<f64, QuantityError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(QuantityError::Empty);
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| QuantityError::Invalid(raw.to_string()))?;

    let multiplier = match suffix {
        "" => 1.0,
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" | "K" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => GIB,
        "Ti" => GIB * 1024.0,
        "Pi" => GIB * 1024.0 * 1024.0,
        "Ei" => GIB * 1024.0 * 1024.0 * 1024.0,
        exp if exp.len() > 1 && (exp.starts_with('e') || exp.starts_with('E')) => {
            let power: i32 = exp[1..]
                .parse()
                .map_err(|_| QuantityError::Invalid(raw.to_string()))?;
            10f64.powi(power)
        }
        _ => return Err(QuantityError::Invalid(raw.to_string())),
    };

    let result = value * multiplier;
    if result < 0.0 {
        return Err(QuantityError::Negative(raw.to_string()));
    }
    if !result.is_finite() {
        return Err(QuantityError::Invalid(raw.to_string()));
    }

    Ok(result)
}

/// A CPU + memory pair (cores, bytes)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceAmount {
    pub cpu_cores: f64,
    pub memory_bytes: f64,
}

impl ResourceAmount {
    pub fn new(cpu_cores: f64, memory_bytes: f64) -> Self {
        Self {
            cpu_cores,
            memory_bytes,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// Build from quantity strings such as `("500m", "1Gi")`
    pub fn parse(cpu: &str, memory: &str) -> Result<Self, QuantityError> {
        Ok(Self {
            cpu_cores: parse_quantity(cpu)?,
            memory_bytes: parse_quantity(memory)?,
        })
    }

    /// Convenience constructor taking memory in GiB
    pub fn from_gib(cpu_cores: f64, memory_gib: f64) -> Self {
        Self::new(cpu_cores, memory_gib * GIB)
    }

    pub fn memory_gib(&self) -> f64 {
        self.memory_bytes / GIB
    }

    /// True if both dimensions are within `capacity`
    pub fn fits_within(&self, capacity: &ResourceAmount) -> bool {
        self.cpu_cores <= capacity.cpu_cores + CAPACITY_EPSILON
            && self.memory_bytes <= capacity.memory_bytes + CAPACITY_EPSILON
    }
}

impl Add for ResourceAmount {
    type Output = ResourceAmount;

    fn add(self, rhs: Self) -> Self::Output {
        ResourceAmount::new(
            self.cpu_cores + rhs.cpu_cores,
            self.memory_bytes + rhs.memory_bytes,
        )
    }
}

impl AddAssign for ResourceAmount {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for ResourceAmount {
    type Output = ResourceAmount;

    fn sub(self, rhs: Self) -> Self::Output {
        ResourceAmount::new(
            self.cpu_cores - rhs.cpu_cores,
            self.memory_bytes - rhs.memory_bytes,
        )
    }
}

impl SubAssign for ResourceAmount {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl std::iter::Sum for ResourceAmount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ResourceAmount::zero(), |acc, r| acc + r)
    }
}

impl fmt::Display for ResourceAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} CPU / {:.2}Gi", self.cpu_cores, self.memory_gib())
    }
}

/// Replica placement — the diversity triple controlling how copies of a
/// volume spread across data centers, racks, and nodes.
///
/// Encoded on the wire and in configuration as three digits `xyz`:
/// `x` other data centers, `y` other racks in the same data center,
/// `z` other nodes in the same rack. Each digit is 0–2. The total copy
/// count is `x + y + z + 1`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MasterError, MasterResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ReplicaPlacement {
    pub other_data_centers: u8,
    pub other_racks: u8,
    pub other_nodes: u8,
}

impl ReplicaPlacement {
    pub fn new(other_data_centers: u8, other_racks: u8, other_nodes: u8) -> MasterResult<Self> {
        let rp = Self {
            other_data_centers,
            other_racks,
            other_nodes,
        };
        if other_data_centers > 2 || other_racks > 2 || other_nodes > 2 {
            return Err(MasterError::InvalidReplication(rp.to_string()));
        }
        Ok(rp)
    }

    /// Parse the three-digit string form, e.g. `"001"`.
    pub fn parse(s: &str) -> MasterResult<Self> {
        let digits: Vec<u8> = s
            .chars()
            .map(|c| c.to_digit(10).map(|d| d as u8))
            .collect::<Option<Vec<u8>>>()
            .ok_or_else(|| MasterError::InvalidReplication(s.to_string()))?;
        if digits.len() != 3 {
            return Err(MasterError::InvalidReplication(s.to_string()));
        }
        Self::new(digits[0], digits[1], digits[2])
    }

    /// Decode from the single-byte form `100*x + 10*y + z`.
    pub fn from_byte(b: u8) -> MasterResult<Self> {
        Self::new(b / 100, (b / 10) % 10, b % 10)
    }

    /// Encode to the single-byte form.
    pub fn to_byte(self) -> u8 {
        self.other_data_centers * 100 + self.other_racks * 10 + self.other_nodes
    }

    /// Number of physical copies each volume carries.
    pub fn copy_count(self) -> usize {
        (self.other_data_centers + self.other_racks + self.other_nodes) as usize + 1
    }
}

impl fmt::Display for ReplicaPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.other_data_centers, self.other_racks, self.other_nodes
        )
    }
}

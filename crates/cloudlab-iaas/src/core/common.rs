use serde::{Deserialize, Serialize};

/// Amounts of host resources, either requested by a VM or available on a host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    /// Number of processing elements (cores).
    pub pes: u32,
    /// Memory in MB.
    pub ram: u64,
    /// Network bandwidth in MB/s.
    pub bw: u64,
    /// Storage in MB.
    pub storage: u64,
}

impl Resources {
    pub fn new(pes: u32, ram: u64, bw: u64, storage: u64) -> Self {
        Self { pes, ram, bw, storage }
    }

    /// Returns the first resource kind for which `request` does not fit into `self`.
    pub fn check_fits(&self, request: &Resources) -> AllocationVerdict {
        if request.pes > self.pes {
            AllocationVerdict::NotEnoughPes
        } else if request.ram > self.ram {
            AllocationVerdict::NotEnoughRam
        } else if request.bw > self.bw {
            AllocationVerdict::NotEnoughBandwidth
        } else if request.storage > self.storage {
            AllocationVerdict::NotEnoughStorage
        } else {
            AllocationVerdict::Success
        }
    }

    pub fn saturating_sub(&self, other: &Resources) -> Resources {
        Resources {
            pes: self.pes.saturating_sub(other.pes),
            ram: self.ram.saturating_sub(other.ram),
            bw: self.bw.saturating_sub(other.bw),
            storage: self.storage.saturating_sub(other.storage),
        }
    }

    pub fn add(&self, other: &Resources) -> Resources {
        Resources {
            pes: self.pes + other.pes,
            ram: self.ram + other.ram,
            bw: self.bw + other.bw,
            storage: self.storage + other.storage,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AllocationVerdict {
    NotEnoughPes,
    NotEnoughMips,
    NotEnoughRam,
    NotEnoughBandwidth,
    NotEnoughStorage,
    HostNotFound,
    Success,
}

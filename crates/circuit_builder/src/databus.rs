//! Databus columns.
//!
//! The databus passes values between circuits of a folding chain: a circuit
//! publishes calldata it received and return data it produced, and reads them
//! back through busread gates.

/// Which databus column a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusId {
    CallData,
    SecondaryCallData,
    ReturnData,
}

impl BusId {
    pub const ALL: [BusId; 3] = [BusId::CallData, BusId::SecondaryCallData, BusId::ReturnData];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// One databus column: witness indices plus how often each entry was read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusVector {
    entries: Vec<u32>,
    read_counts: Vec<u32>,
}

impl BusVector {
    pub fn append(&mut self, witness_index: u32) {
        self.entries.push(witness_index);
        self.read_counts.push(0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        self.entries.get(index).copied()
    }

    pub fn increment_read_count(&mut self, index: usize) {
        self.read_counts[index] += 1;
    }

    pub fn read_count(&self, index: usize) -> u32 {
        self.read_counts[index]
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }
}

/// The three databus columns of a circuit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBus {
    columns: [BusVector; 3],
}

impl DataBus {
    pub fn column(&self, bus: BusId) -> &BusVector {
        &self.columns[bus.index()]
    }

    pub fn column_mut(&mut self, bus: BusId) -> &mut BusVector {
        &mut self.columns[bus.index()]
    }

    /// Length of the longest column.
    pub fn max_size(&self) -> usize {
        self.columns.iter().map(BusVector::len).max().unwrap_or(0)
    }
}

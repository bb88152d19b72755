//! Raw bank image: every data bank back to back, each padded to capacity.

use crate::model::ProcessedProject;
use crate::writer::GeneratedFile;

pub const BANK_IMAGE: &str = "banks.bin";

pub fn emit(project: &ProcessedProject) -> GeneratedFile {
    let capacity = project.allocation.capacity;
    let mut contents = Vec::with_capacity(project.allocation.banks.len() * capacity);
    for bank in &project.allocation.banks {
        let mut bytes = bank.bytes();
        bytes.resize(capacity, 0);
        contents.extend_from_slice(&bytes);
    }
    GeneratedFile {
        path: BANK_IMAGE.into(),
        contents,
    }
}

//! Bitmap codec for program account data
//!
//! The on-chain program records each completed transaction by flipping the
//! bit at its tracking id inside the program data account. Account-change
//! notifications therefore carry a bitmap, and the lifecycle tracker needs
//! the reverse mapping from raw bytes to the set of active ids.

use std::collections::HashSet;

/// Decode the set of ids whose bit is set in the account data bitmap
pub fn ids_from_account_data(data: &[u8]) -> HashSet<usize> {
    let mut ids = HashSet::new();
    for (byte_index, byte) in data.iter().enumerate() {
        if *byte == 0 {
            continue;
        }
        for bit in 0..8 {
            if byte & (1 << bit) != 0 {
                ids.insert(byte_index * 8 + bit);
            }
        }
    }
    ids
}

/// Encode the instruction payload that asks the program to flip `id`'s bit
pub fn instruction_data(id: usize) -> Vec<u8> {
    (id as u32).to_le_bytes().to_vec()
}

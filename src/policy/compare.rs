//! Operand comparisons for PolicyNV and PolicyCounterTimer.
//!
//! Both operands are big-endian byte strings of equal length. Signed
//! comparisons treat them as two's complement integers.

use std::cmp::Ordering;

use crate::error::TpmError;
use crate::tpm_types::TPM_EO;

/// Largest operandB accepted by either assertion
pub const MAX_OPERAND_SIZE: usize = 64;

pub(crate) fn check_operand_size(operand_b: &[u8]) -> Result<(), TpmError> {
    if operand_b.len() > MAX_OPERAND_SIZE {
        return Err(TpmError::OutOfRange("operandB"));
    }
    Ok(())
}

fn unsigned_cmp(a: &[u8], b: &[u8]) -> Ordering {
    // equal lengths, so lexicographic order is numeric order
    a.cmp(b)
}

fn signed_cmp(a: &[u8], b: &[u8]) -> Ordering {
    let a_negative = a.first().is_some_and(|byte| byte & 0x80 != 0);
    let b_negative = b.first().is_some_and(|byte| byte & 0x80 != 0);
    match (a_negative, b_negative) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        // same sign: two's complement orders like unsigned
        _ => unsigned_cmp(a, b),
    }
}

/// Evaluate `a <operation> b`.
pub fn check_condition(operation: TPM_EO, a: &[u8], b: &[u8]) -> Result<bool, TpmError> {
    if a.len() != b.len() {
        return Err(TpmError::SizeMismatch {
            what: "operandA",
            expected: b.len(),
            actual: a.len(),
        });
    }
    let holds = match operation {
        TPM_EO::EQ => a == b,
        TPM_EO::NEQ => a != b,
        TPM_EO::SIGNED_GT => signed_cmp(a, b).is_gt(),
        TPM_EO::UNSIGNED_GT => unsigned_cmp(a, b).is_gt(),
        TPM_EO::SIGNED_LT => signed_cmp(a, b).is_lt(),
        TPM_EO::UNSIGNED_LT => unsigned_cmp(a, b).is_lt(),
        TPM_EO::SIGNED_GE => signed_cmp(a, b).is_ge(),
        TPM_EO::UNSIGNED_GE => unsigned_cmp(a, b).is_ge(),
        TPM_EO::SIGNED_LE => signed_cmp(a, b).is_le(),
        TPM_EO::UNSIGNED_LE => unsigned_cmp(a, b).is_le(),
        TPM_EO::BITSET => a.iter().zip(b).all(|(x, y)| x & y == *y),
        TPM_EO::BITCLEAR => a.iter().zip(b).all(|(x, y)| x & y == 0),
    };
    Ok(holds)
}

//! Bit scatter/gather over named, ordered bit lines.
//!
//! Words are MSB-first: line `i` of an `n`-line word sits at bit `n - i - 1`.

use crate::ds::Word;
use crate::error::BitfieldError;

/// Multi-hot mask over `word` with a bit set for every line in `active`.
///
/// Every name in `active` must belong to `word`.
pub(crate) fn build_mask<S: AsRef<str>>(word: &Word, active: &[S]) -> Result<u64, BitfieldError> {
    let mut mask = 0u64;
    for name in active {
        let idx = word.position(name.as_ref())?;
        mask |= 1u64 << (word.len() - idx - 1);
    }
    Ok(mask)
}

/// Reassembles the value carried by `selected` lines of `word`, MSB-first in
/// the order of `selected`.
///
/// A name selected twice is read twice, so such selections cannot be inverted.
pub(crate) fn extract_bits<S: AsRef<str>>(
    value: u64,
    word: &Word,
    selected: &[S],
) -> Result<u64, BitfieldError> {
    let offsets = line_offsets(word, selected)?;
    Ok(gather_bits(value, &offsets))
}

/// Physical bit offsets (LSB = 0) of `selected` lines inside `word`.
fn line_offsets<S: AsRef<str>>(
    word: &Word,
    selected: &[S],
) -> Result<Vec<u32>, BitfieldError> {
    selected
        .iter()
        .map(|name| {
            let idx = word.position(name.as_ref())?;
            Ok((word.len() - idx - 1) as u32)
        })
        .collect()
}

/// Writes the `offsets.len()`-bit `value` into a word, its MSB at
/// `offsets[0]`, its next bit at `offsets[1]` and so on.
pub(crate) fn scatter_bits(value: u64, offsets: &[u32]) -> u64 {
    let width = offsets.len();
    offsets
        .iter()
        .enumerate()
        .fold(0, |word, (j, &offset)| {
            let bit = (value >> (width - j - 1)) & 1;
            word | (bit << offset)
        })
}

/// Inverse of [`scatter_bits`]: reads `offsets` in order, MSB-first.
pub(crate) fn gather_bits(word: u64, offsets: &[u32]) -> u64 {
    offsets
        .iter()
        .fold(0, |value, &offset| (value << 1) | ((word >> offset) & 1))
}

/// Mask of the low `width` bits.
pub(crate) fn low_mask(width: usize) -> u64 {
    if width >= u64::BITS as usize {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

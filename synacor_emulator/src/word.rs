/// Raw 16 bit cell as it appears in memory, on the stack or in a register.
pub type Word = u16;

pub const ADDRESS_SIZE: usize = 2;
pub const LITERAL_MAX: Word = 32767;
pub const LITERAL_MODULO: u32 = 32768;
pub const REGISTER_MIN: Word = 32768;
pub const REGISTER_MAX: Word = 32775;
pub const REGISTER_COUNT: usize = 8;

#[inline(always)]
pub fn is_literal(raw: Word) -> bool {
    raw <= LITERAL_MAX
}

#[inline(always)]
pub fn is_register(raw: Word) -> bool {
    (REGISTER_MIN..=REGISTER_MAX).contains(&raw)
}

/// Reduces an intermediate result back into the 15 bit literal range.
#[inline(always)]
pub fn wrap(value: u32) -> Word {
    (value % LITERAL_MODULO) as Word
}

/// Byte offset of a word address, the unit the debugger talks in.
#[inline(always)]
pub fn byte_offset(address: usize) -> usize {
    address * ADDRESS_SIZE
}

/// Decodes a little endian image into words. A trailing odd byte is dropped.
pub fn words_from_le_bytes(data: &[u8]) -> Vec<Word> {
    data.chunks_exact(ADDRESS_SIZE)
        .map(|pair| Word::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

//! Two-level Huffman decoding tables.
//!
//! Codes up to `root_bits` long resolve with one lookup of the low bits of
//! the bit buffer (deflate stores codes starting at the most significant
//! bit, so table indices are bit-reversed codes). Longer codes go through a
//! second table reached from a link entry.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Longest code deflate allows
pub const MAX_BITS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// No code maps here; hitting it means corrupt data
    Invalid,
    /// `bits` is the full code length
    Symbol { bits: u8, value: u16 },
    /// Second-level table of `1 << bits` entries starting at `offset`
    Link { offset: u32, bits: u8 },
}

#[derive(Debug, Clone)]
pub struct HuffmanTable {
    entries: Vec<Entry>,
    root_bits: u32,
    max_len: u32,
    complete: bool,
}

fn reverse(code: u32, len: u32) -> u32 {
    code.reverse_bits() >> (32 - len)
}

impl HuffmanTable {
    /// Build the table for code `lengths` (0 = symbol unused).
    ///
    /// `root_bits` is shrunk to the longest code, or grown to the shortest.
    /// Over-subscribed sets are rejected; incomplete ones are built and
    /// reported through [`is_complete`](Self::is_complete).
    pub fn build(lengths: &[u8], root_bits: u32) -> Result<Self> {
        let mut count = [0u16; MAX_BITS + 1];
        for &len in lengths {
            if len as usize > MAX_BITS {
                return Err(Error::BadGzipData);
            }
            count[len as usize] += 1;
        }
        count[0] = 0;

        let max_len = (1..=MAX_BITS).rev().find(|&l| count[l] != 0).unwrap_or(0) as u32;
        if max_len == 0 {
            return Ok(Self {
                entries: vec![Entry::Invalid; 2],
                root_bits: 1,
                max_len: 0,
                complete: true,
            });
        }
        let min_len = (1..=MAX_BITS).find(|&l| count[l] != 0).unwrap_or(MAX_BITS) as u32;
        let root = root_bits.min(max_len).max(min_len);

        let mut left: i32 = 1;
        for &n in &count[1..] {
            left <<= 1;
            left -= n as i32;
            if left < 0 {
                return Err(Error::BadGzipData);
            }
        }

        let mut next_code = [0u32; MAX_BITS + 1];
        let mut code = 0u32;
        for len in 1..=MAX_BITS {
            code = (code + count[len - 1] as u32) << 1;
            next_code[len] = code;
        }

        // (symbol, length, reversed code)
        let mut codes = Vec::with_capacity(lengths.len());
        for (symbol, &len) in lengths.iter().enumerate() {
            if len != 0 {
                let len = len as u32;
                codes.push((symbol as u16, len, reverse(next_code[len as usize], len)));
                next_code[len as usize] += 1;
            }
        }

        let root_size = 1usize << root;
        let root_mask = root_size as u32 - 1;

        let mut sub_bits = vec![0u8; root_size];
        for &(_, len, rev) in &codes {
            if len > root {
                let slot = &mut sub_bits[(rev & root_mask) as usize];
                *slot = (*slot).max((len - root) as u8);
            }
        }

        let mut entries = vec![Entry::Invalid; root_size];
        for (index, &bits) in sub_bits.iter().enumerate() {
            if bits != 0 {
                entries[index] = Entry::Link {
                    offset: entries.len() as u32,
                    bits,
                };
                entries.resize(entries.len() + (1 << bits), Entry::Invalid);
            }
        }

        for &(value, len, rev) in &codes {
            let symbol = Entry::Symbol { bits: len as u8, value };
            if len <= root {
                let mut i = rev as usize;
                while i < root_size {
                    entries[i] = symbol;
                    i += 1 << len;
                }
            } else if let Entry::Link { offset, bits } = entries[(rev & root_mask) as usize] {
                let mut i = (rev >> root) as usize;
                while i < 1 << bits {
                    entries[offset as usize + i] = symbol;
                    i += 1 << (len - root);
                }
            }
        }

        Ok(Self {
            entries,
            root_bits: root,
            max_len,
            complete: left == 0,
        })
    }

    pub fn root_bits(&self) -> u32 {
        self.root_bits
    }

    pub fn max_len(&self) -> u32 {
        self.max_len
    }

    /// Every bit pattern decodes to some symbol
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    #[inline]
    pub fn entry(&self, index: usize) -> Entry {
        self.entries.get(index).copied().unwrap_or(Entry::Invalid)
    }
}

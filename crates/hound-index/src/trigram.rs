//! Trigram extraction. A trigram is three consecutive content bytes packed
//! big-endian into the low 24 bits of a `u32`.

use fnv::FnvHashSet;

pub type Trigram = u32;

/// Pack three bytes into a 24-bit trigram.
#[inline]
pub fn pack(b0: u8, b1: u8, b2: u8) -> Trigram {
    ((b0 as u32) << 16) | ((b1 as u32) << 8) | (b2 as u32)
}

/// Unpack a trigram back into its three bytes.
#[inline]
pub fn unpack(t: Trigram) -> [u8; 3] {
    [(t >> 16) as u8, (t >> 8) as u8, t as u8]
}

/// Iterator over every 3-byte window of `bytes`, including duplicates.
pub fn trigrams(bytes: &[u8]) -> impl Iterator<Item = Trigram> + '_ {
    bytes
        .windows(3)
        .map(|w| pack(w[0], w[1], w[2]))
}

/// The set of distinct trigrams occurring in one file, deduplicated before
/// posting emission. Order is unspecified.
pub fn file_trigram_set(bytes: &[u8]) -> FnvHashSet<Trigram> {
    let mut set = FnvHashSet::default();
    for t in trigrams(bytes) {
        set.insert(t);
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let t = pack(b'a', b'b', b'c');
        assert_eq!(t, 0x616263);
        assert_eq!(unpack(t), [b'a', b'b', b'c']);
    }

    #[test]
    fn windows_overlap() {
        let tris: Vec<_> = trigrams(b"abcd").collect();
        assert_eq!(tris, vec![pack(b'a', b'b', b'c'), pack(b'b', b'c', b'd')]);
    }

    #[test]
    fn short_input_yields_nothing() {
        assert_eq!(trigrams(b"ab").count(), 0);
        assert_eq!(trigrams(b"").count(), 0);
    }

    #[test]
    fn set_dedups_repeats() {
        let set = file_trigram_set(b"aaaaaa");
        assert_eq!(set.len(), 1);
        assert!(set.contains(&pack(b'a', b'a', b'a')));
    }
}

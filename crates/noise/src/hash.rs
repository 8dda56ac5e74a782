/// FNV-1a over the bytes of a string.
///
/// Used to turn arbitrary seed strings into a 64-bit RNG seed. Every string,
/// including the empty one, hashes to a valid seed.
pub fn fnv1a_64(input: &str) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325; // FNV offset basis
    for &b in input.as_bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x0100_0000_01b3);
    }
    h
}

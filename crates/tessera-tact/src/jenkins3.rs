//! Bob Jenkins' lookup3 hash, as used for path-name lookups in the root
//! manifest. Not a cryptographic hash.

/// Reversibly mix three lanes.
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c) ^ c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a) ^ a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b) ^ b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c) ^ c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a) ^ a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b) ^ b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

/// Final avalanche of the three lanes.
fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c = (*c ^ *b).wrapping_sub(b.rotate_left(14));
    *a = (*a ^ *c).wrapping_sub(c.rotate_left(11));
    *b = (*b ^ *a).wrapping_sub(a.rotate_left(25));
    *c = (*c ^ *b).wrapping_sub(b.rotate_left(16));
    *a = (*a ^ *c).wrapping_sub(c.rotate_left(4));
    *b = (*b ^ *a).wrapping_sub(a.rotate_left(14));
    *c = (*c ^ *b).wrapping_sub(b.rotate_left(24));
}

/// `hashlittle2`: hash a byte string into two 32-bit values, seeded by
/// `pc` and `pb`. Returns `(pc, pb)`.
pub fn hashlittle2(key: &[u8], pc: u32, pb: u32) -> (u32, u32) {
    let mut a = 0xdeadbeef_u32
        .wrapping_add(key.len() as u32)
        .wrapping_add(pc);
    let mut b = a;
    let mut c = a.wrapping_add(pb);

    if key.is_empty() {
        return (c, b);
    }

    let mut k = key;
    while k.len() > 12 {
        // The original reinterprets the input as unaligned u32 triples;
        // copying through from_le_bytes sidesteps the alignment games.
        a = a.wrapping_add(u32::from_le_bytes([k[0], k[1], k[2], k[3]]));
        b = b.wrapping_add(u32::from_le_bytes([k[4], k[5], k[6], k[7]]));
        c = c.wrapping_add(u32::from_le_bytes([k[8], k[9], k[10], k[11]]));
        mix(&mut a, &mut b, &mut c);
        k = &k[12..];
    }

    // Short final block: missing high bytes read as zero.
    let mut tail = [0u8; 12];
    tail[..k.len()].copy_from_slice(k);
    a = a.wrapping_add(u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]));
    if k.len() > 4 {
        b = b.wrapping_add(u32::from_le_bytes([tail[4], tail[5], tail[6], tail[7]]));
    }
    if k.len() > 8 {
        c = c.wrapping_add(u32::from_le_bytes([tail[8], tail[9], tail[10], tail[11]]));
    }

    final_mix(&mut a, &mut b, &mut c);
    (c, b)
}

/// Hash a file path the way the root manifest's name hashes are built:
/// uppercase the path, turn `/` into `\`, then merge the two lookup3
/// words with `pc` as the high half.
pub fn path_hash(path: &str) -> u64 {
    let normalised = path.to_ascii_uppercase().replace('/', "\\");
    let (pc, pb) = hashlittle2(normalised.as_bytes(), 0, 0);
    (u64::from(pc) << 32) | u64::from(pb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        // Self-test values from lookup3.c: hashlittle("", 0) and friends.
        assert_eq!(hashlittle2(b"", 0, 0).0, 0xdeadbeef);
        assert_eq!(hashlittle2(b"", 0, 0xdeadbeef).1, 0xdeadbeef);
        let (pc, pb) = hashlittle2(b"Four score and seven years ago", 0, 0);
        assert_eq!(pc, 0x17770551);
        assert_eq!(pb, 0xce7226e6);
    }

    #[test]
    fn path_normalisation() {
        assert_eq!(
            path_hash("interface/icons/example.blp"),
            path_hash("INTERFACE\\ICONS\\EXAMPLE.BLP")
        );
        assert_ne!(path_hash("a"), path_hash("b"));
    }
}

//! Test fixtures and helper functions.

/// Encode one ISO-BMFF box.
pub fn mp4_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&((8 + payload.len()) as u32).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn ftyp() -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(b"isom");
    payload.extend_from_slice(&0x200u32.to_be_bytes());
    payload.extend_from_slice(b"isommp41");
    mp4_box(b"ftyp", &payload)
}

fn moov() -> Vec<u8> {
    mp4_box(b"moov", &[0u8; 8])
}

fn mdat(len: usize) -> Vec<u8> {
    mp4_box(b"mdat", &vec![0xAB; len.saturating_sub(8)])
}

/// A structurally valid faststart mp4 of exactly `total_len` bytes
/// (`ftyp`, `moov`, `mdat`). `total_len` must be at least 48.
pub fn mp4_bytes(total_len: usize) -> Vec<u8> {
    let mut out = ftyp();
    out.extend(moov());
    let rest = total_len.saturating_sub(out.len());
    out.extend(mdat(rest));
    out
}

/// A valid mp4 with the index after the media data.
pub fn mp4_bytes_moov_last(total_len: usize) -> Vec<u8> {
    let mut out = ftyp();
    let rest = total_len.saturating_sub(out.len() + 16);
    out.extend(mdat(rest));
    out.extend(moov());
    out
}

/// An mp4-looking file with no `moov` box.
pub fn mp4_bytes_without_moov(total_len: usize) -> Vec<u8> {
    let mut out = ftyp();
    let rest = total_len.saturating_sub(out.len());
    out.extend(mdat(rest));
    out
}

/// Two megabytes of valid mp4.
pub fn large_mp4() -> Vec<u8> {
    mp4_bytes(2 * 1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_sizes_are_exact() {
        assert_eq!(mp4_bytes(4096).len(), 4096);
        assert_eq!(mp4_bytes_moov_last(4096).len(), 4096);
        assert_eq!(mp4_bytes_without_moov(4096).len(), 4096);
        assert_eq!(&mp4_bytes(64)[4..8], b"ftyp");
    }
}

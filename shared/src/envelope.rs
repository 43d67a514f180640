//! Optional datagram length prefix.
//!
//! Some clients prepend a big-endian `u16` holding the total datagram length
//! (prefix included). It is only treated as a prefix when it matches the
//! datagram length exactly; anything else is a bare frame.

pub const LENGTH_PREFIX_BYTES: usize = 2;

/// Returns the frame inside a datagram, without its length prefix if it had one.
pub fn strip_length_prefix(datagram: &[u8]) -> &[u8] {
    if datagram.len() > LENGTH_PREFIX_BYTES {
        let declared = usize::from(u16::from_be_bytes([datagram[0], datagram[1]]));
        if declared == datagram.len() {
            return &datagram[LENGTH_PREFIX_BYTES..];
        }
    }
    datagram
}

/// Prepends the length prefix. Returns `None` if the result would not fit
/// in a `u16`.
pub fn with_length_prefix(frame: &[u8]) -> Option<Vec<u8>> {
    let total = u16::try_from(frame.len() + LENGTH_PREFIX_BYTES).ok()?;
    let mut datagram = Vec::with_capacity(usize::from(total));
    datagram.extend_from_slice(&total.to_be_bytes());
    datagram.extend_from_slice(frame);
    Some(datagram)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_matching_prefix() {
        let datagram = [0x00, 0x05, 0x18, 0xAA, 0xBB];
        assert_eq!(strip_length_prefix(&datagram), &[0x18, 0xAA, 0xBB]);
    }

    #[test]
    fn test_keep_non_matching_prefix() {
        let datagram = [0x18, 0x01, 0x02, 0x03];
        assert_eq!(strip_length_prefix(&datagram), &datagram);

        // Too short to carry a prefix and a body
        let tiny = [0x00, 0x02];
        assert_eq!(strip_length_prefix(&tiny), &tiny);
    }

    #[test]
    fn test_prefix_roundtrip() {
        let frame = [0x40];
        let datagram = with_length_prefix(&frame).unwrap();
        assert_eq!(datagram, vec![0x00, 0x03, 0x40]);
        assert_eq!(strip_length_prefix(&datagram), &frame);

        let huge = vec![0u8; u16::MAX as usize];
        assert!(with_length_prefix(&huge).is_none());
    }
}

//! Packet footer framing
//!
//! A packet is a concatenation of N variable-length views followed by a footer
//! of `N + 1` little-endian u32 offsets:
//!
//! ```text
//! | view 0 | view 1 | ... | view N-1 | off[0] | off[1] | ... | off[N] |
//! ```
//!
//! `off[0]` is always 0, offsets never decrease, and `off[N]` equals the payload
//! length (everything before the footer). View `i` spans `off[i]..off[i + 1]`.
//! The view count is not stored; producer and consumer agree on it out of band.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::{BuilderError, Result};

/// Width of one footer offset in bytes.
pub const FOOTER_WORD: usize = 4;

/// Footer codec for multi-view packets.
pub struct PacketFooter;

impl PacketFooter {
    /// Footer size for `count` views.
    pub const fn footer_len(count: usize) -> usize {
        FOOTER_WORD * (count + 1)
    }

    /// Split `buffer` into `count` views using its trailing footer.
    ///
    /// The returned views share `buffer`'s storage.
    pub fn split(buffer: &Bytes, count: usize) -> Result<Vec<Bytes>> {
        if count == 0 {
            return Err(BuilderError::malformed_footer("view count must be positive"));
        }

        let footer_len = Self::footer_len(count);
        if buffer.len() < footer_len {
            return Err(BuilderError::malformed_footer(format!(
                "buffer of {} bytes cannot hold a {}-byte footer for {} views",
                buffer.len(),
                footer_len,
                count
            )));
        }

        let payload_len = buffer.len() - footer_len;
        let offsets: Vec<usize> = buffer[payload_len..]
            .chunks_exact(FOOTER_WORD)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]) as usize)
            .collect();

        if offsets[0] != 0 {
            return Err(BuilderError::malformed_footer(format!(
                "first offset is {} instead of 0",
                offsets[0]
            )));
        }

        for (i, pair) in offsets.windows(2).enumerate() {
            if pair[1] < pair[0] {
                return Err(BuilderError::malformed_footer(format!(
                    "offset {} ({}) is below offset {} ({})",
                    i + 1,
                    pair[1],
                    i,
                    pair[0]
                )));
            }
        }

        let last = offsets[count];
        if last != payload_len {
            return Err(BuilderError::malformed_footer(format!(
                "final offset {} does not match payload length {}",
                last, payload_len
            )));
        }

        trace!("Split {}-byte packet into {} views", payload_len, count);
        Ok(offsets.windows(2).map(|pair| buffer.slice(pair[0]..pair[1])).collect())
    }

    /// Concatenate `views` and append their footer.
    ///
    /// Fails with `MalformedFooter` when the payload does not fit u32 offsets.
    pub fn build<B: AsRef<[u8]>>(views: &[B]) -> Result<Bytes> {
        let offsets = Self::offsets(views.iter().map(|v| v.as_ref().len()))?;
        let payload_len: usize = views.iter().map(|v| v.as_ref().len()).sum();
        let mut out = BytesMut::with_capacity(payload_len + Self::footer_len(views.len()));

        for view in views {
            out.extend_from_slice(view.as_ref());
        }
        for offset in offsets {
            out.put_u32_le(offset);
        }

        Ok(out.freeze())
    }

    fn offsets(lens: impl Iterator<Item = usize>) -> Result<Vec<u32>> {
        let mut offsets = vec![0u32];
        let mut end = 0u32;
        for len in lens {
            end = u32::try_from(len)
                .ok()
                .and_then(|len| end.checked_add(len))
                .ok_or_else(|| {
                    BuilderError::malformed_footer(format!(
                        "payload past {end} bytes does not fit a u32 offset"
                    ))
                })?;
            offsets.push(end);
        }
        Ok(offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn footer_words(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    proptest! {
        #[test]
        fn prop_split_inverts_build(
            views in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..8)
        ) {
            let packet = PacketFooter::build(&views).unwrap();
            let split = PacketFooter::split(&packet, views.len()).unwrap();

            prop_assert_eq!(split.len(), views.len());
            for (got, want) in split.iter().zip(&views) {
                prop_assert_eq!(got.as_ref(), want.as_slice());
            }
        }

        #[test]
        fn prop_wrong_count_is_rejected_or_consistent(
            views in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..16), 2..6)
        ) {
            // Reading with fewer views misplaces the footer, which must be detected
            // unless the misread words happen to form a valid footer.
            let packet = PacketFooter::build(&views).unwrap();
            if let Ok(split) = PacketFooter::split(&packet, views.len() - 1) {
                let total: usize = split.iter().map(|v| v.len()).sum();
                prop_assert_eq!(total, packet.len() - PacketFooter::footer_len(views.len() - 1));
            }
        }
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let offsets = PacketFooter::offsets([16, 32].into_iter()).unwrap();
        assert_eq!(offsets, vec![0, 16, 48]);

        let err = PacketFooter::offsets([u32::MAX as usize, 1].into_iter()).unwrap_err();
        assert!(matches!(err, BuilderError::MalformedFooter { .. }));
        let err = PacketFooter::offsets([u32::MAX as usize + 1].into_iter()).unwrap_err();
        assert!(matches!(err, BuilderError::MalformedFooter { .. }));
    }

    #[test]
    fn zero_count_is_rejected() {
        let packet = PacketFooter::build(&[b"abc"]).unwrap();
        assert!(matches!(PacketFooter::split(&packet, 0), Err(BuilderError::MalformedFooter { .. })));
    }

    #[test]
    fn empty_buffer_is_rejected() {
        let err = PacketFooter::split(&Bytes::new(), 1).unwrap_err();
        assert!(matches!(err, BuilderError::MalformedFooter { .. }));
    }

    #[test]
    fn non_monotonic_offsets_are_rejected() {
        let mut raw = b"aabb".to_vec();
        raw.extend(footer_words(&[0, 3, 2, 4]));
        let err = PacketFooter::split(&Bytes::from(raw), 3).unwrap_err();
        assert!(err.to_string().contains("below"), "{err}");
    }

    #[test]
    fn offsets_past_payload_are_rejected() {
        let mut raw = b"aabb".to_vec();
        raw.extend(footer_words(&[0, 2, 9]));
        let err = PacketFooter::split(&Bytes::from(raw), 2).unwrap_err();
        assert!(matches!(err, BuilderError::MalformedFooter { .. }));
    }

    #[test]
    fn empty_views_survive_round_trip() {
        let views: [&[u8]; 3] = [b"", b"xyz", b""];
        let packet = PacketFooter::build(&views).unwrap();
        assert_eq!(packet.len(), 3 + PacketFooter::footer_len(3));

        let split = PacketFooter::split(&packet, 3).unwrap();
        assert!(split[0].is_empty());
        assert_eq!(split[1].as_ref(), b"xyz");
        assert!(split[2].is_empty());
    }
}

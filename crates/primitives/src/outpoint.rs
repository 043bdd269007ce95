//! Transaction outpoint type.

use std::fmt;

use aurumd_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::hash256_hex;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
}

impl OutPoint {
    pub fn null() -> Self {
        Self {
            hash: [0u8; 32],
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash == [0u8; 32] && self.index == u32::MAX
    }

    /// Abbreviated `txid:index` form used in log lines.
    pub fn to_string_short(&self) -> String {
        let hex = hash256_hex(&self.hash);
        format!("{}:{}", &hex[..16.min(hex.len())], self.index)
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", hash256_hex(&self.hash), self.index)
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.hash);
        encoder.write_u32_le(self.index);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let hash = decoder.read_hash()?;
        let index = decoder.read_u32_le()?;
        Ok(Self { hash, index })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    #[test]
    fn round_trip() {
        let outpoint = OutPoint {
            hash: [0xab; 32],
            index: 7,
        };
        let bytes = encode(&outpoint);
        assert_eq!(bytes.len(), 36);
        let decoded: OutPoint = decode(&bytes).expect("decode");
        assert_eq!(decoded, outpoint);
    }

    #[test]
    fn null_detection() {
        assert!(OutPoint::null().is_null());
        let real = OutPoint {
            hash: [1u8; 32],
            index: 0,
        };
        assert!(!real.is_null());
    }
}

//! Coinbase output shape used by payment validation and block fillers.
//!
//! The coordination layer never stores or relays full transactions; it
//! only inspects and amends coinbase output lists handed in by the chain.

use aurumd_consensus::money::Amount;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Vec<u8>) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }
}

impl Encodable for TxOut {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
    }
}

impl Decodable for TxOut {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let value = decoder.read_i64_le()?;
        let script_pubkey = decoder.read_var_bytes()?;
        Ok(Self {
            value,
            script_pubkey,
        })
    }
}

pub fn total_output_value(outputs: &[TxOut]) -> Amount {
    outputs.iter().map(|out| out.value).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    #[test]
    fn round_trip() {
        let out = TxOut::new(5_000_000_000, vec![0x76, 0xa9]);
        let decoded: TxOut = decode(&encode(&out)).expect("decode");
        assert_eq!(decoded, out);
    }

    #[test]
    fn totals() {
        let outs = [TxOut::new(10, vec![]), TxOut::new(32, vec![])];
        assert_eq!(total_output_value(&outs), 42);
    }
}

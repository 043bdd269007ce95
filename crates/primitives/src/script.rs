//! Payee script construction, Base58Check addresses, and WIF keys.

use aurumd_consensus::Network;

use crate::hash::sha256d;

/// Canonical size of a pay-to-pubkey-hash script.
pub const P2PKH_SCRIPT_SIZE: usize = 25;

#[derive(Debug, PartialEq, Eq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
    UnknownPrefix,
}

/// Standard P2PKH locking script over a 20-byte key hash.
pub fn p2pkh_script(key_hash: &[u8; 20]) -> Vec<u8> {
    const OP_DUP: u8 = 0x76;
    const OP_HASH160: u8 = 0xa9;
    const OP_EQUALVERIFY: u8 = 0x88;
    const OP_CHECKSIG: u8 = 0xac;

    let mut script = Vec::with_capacity(P2PKH_SCRIPT_SIZE);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(key_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == P2PKH_SCRIPT_SIZE
        && script[0] == 0x76
        && script[1] == 0xa9
        && script[2] == 0x14
        && script[23] == 0x88
        && script[24] == 0xac
}

pub fn script_pubkey_to_address(script: &[u8], network: Network) -> Option<String> {
    if !is_p2pkh(script) {
        return None;
    }
    let prefix = pubkey_address_prefix(network);
    let hash = &script[3..23];
    let mut payload = Vec::with_capacity(prefix.len() + hash.len());
    payload.extend_from_slice(prefix);
    payload.extend_from_slice(hash);
    Some(base58check_encode(&payload))
}

pub fn secret_key_to_wif(secret: &[u8; 32], network: Network) -> String {
    let mut payload = Vec::with_capacity(34);
    payload.push(wif_prefix(network));
    payload.extend_from_slice(secret);
    // operator keys are always compressed
    payload.push(0x01);
    base58check_encode(&payload)
}

pub fn wif_to_secret_key(wif: &str, network: Network) -> Result<[u8; 32], AddressError> {
    let payload = base58check_decode(wif)?;
    if payload.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    if payload[0] != wif_prefix(network) {
        return Err(AddressError::UnknownPrefix);
    }

    if payload.len() == 33 || (payload.len() == 34 && payload[33] == 0x01) {
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&payload[1..33]);
        return Ok(secret);
    }

    Err(AddressError::InvalidLength)
}

fn pubkey_address_prefix(network: Network) -> &'static [u8] {
    match network {
        Network::Mainnet => &[0x17],
        Network::Testnet | Network::Regtest => &[0x53],
    }
}

fn wif_prefix(network: Network) -> u8 {
    match network {
        Network::Mainnet => 0x80,
        Network::Testnet | Network::Regtest => 0xEF,
    }
}

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = base58_decode(input)?;
    if bytes.len() < 4 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    let digest = sha256d(payload);
    if checksum != &digest[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    let checksum = sha256d(payload);
    data.extend_from_slice(&checksum[..4]);
    base58_encode(&data)
}

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let mut bytes = Vec::new();
    for ch in input.bytes() {
        let value = base58_value(ch).ok_or(AddressError::InvalidCharacter)? as u32;
        let mut carry = value;
        for byte in bytes.iter_mut().rev() {
            let val = (*byte as u32) * 58 + carry;
            *byte = (val & 0xff) as u8;
            carry = val >> 8;
        }
        while carry > 0 {
            bytes.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let leading_zeros = input.bytes().take_while(|b| *b == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend_from_slice(&bytes);
    Ok(out)
}

fn base58_encode(data: &[u8]) -> String {
    if data.is_empty() {
        return String::new();
    }
    let mut digits = vec![0u8];
    for byte in data {
        let mut carry = *byte as u32;
        for digit in digits.iter_mut().rev() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 58) as u8;
            carry = value / 58;
        }
        while carry > 0 {
            digits.insert(0, (carry % 58) as u8);
            carry /= 58;
        }
    }
    let leading_zeros = data.iter().take_while(|b| **b == 0u8).count();
    let mut out = String::with_capacity(leading_zeros + digits.len());
    for _ in 0..leading_zeros {
        out.push('1');
    }
    for digit in digits {
        out.push(ALPHABET[digit as usize] as char);
    }
    out
}

fn base58_value(byte: u8) -> Option<u8> {
    ALPHABET
        .iter()
        .position(|value| *value == byte)
        .map(|pos| pos as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn p2pkh_script_shape() {
        let script = p2pkh_script(&[0x11; 20]);
        assert_eq!(script.len(), P2PKH_SCRIPT_SIZE);
        assert!(is_p2pkh(&script));
        assert!(!is_p2pkh(&script[..24]));
    }

    #[test]
    fn wif_round_trip() {
        let secret = [0x42u8; 32];
        let wif = secret_key_to_wif(&secret, Network::Mainnet);
        let decoded = wif_to_secret_key(&wif, Network::Mainnet).expect("wif");
        assert_eq!(decoded, secret);
        assert_eq!(
            wif_to_secret_key(&wif, Network::Testnet),
            Err(AddressError::UnknownPrefix)
        );
    }

    #[test]
    fn wif_rejects_bad_checksum() {
        let secret = [0x42u8; 32];
        let mut wif = secret_key_to_wif(&secret, Network::Mainnet);
        let last = wif.pop().expect("nonempty");
        wif.push(if last == '2' { '3' } else { '2' });
        assert!(wif_to_secret_key(&wif, Network::Mainnet).is_err());
    }

    #[test]
    fn address_from_script() {
        let script = p2pkh_script(&[0x99; 20]);
        let address = script_pubkey_to_address(&script, Network::Mainnet).expect("address");
        assert!(!address.is_empty());
        assert!(script_pubkey_to_address(&[0u8; 10], Network::Mainnet).is_none());
    }
}

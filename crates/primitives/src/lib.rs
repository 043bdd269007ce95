//! Core wire types and consensus serialization.

pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod script;
pub mod transaction;

pub use encoding::{decode, encode, Decodable, DecodeError, Decoder, Encodable, Encoder};
pub use hash::{hash160, hash256_hex, sha256, sha256d};
pub use outpoint::OutPoint;
pub use script::{
    p2pkh_script, script_pubkey_to_address, secret_key_to_wif, wif_to_secret_key, AddressError,
    P2PKH_SCRIPT_SIZE,
};
pub use transaction::TxOut;

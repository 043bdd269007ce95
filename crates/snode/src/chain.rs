//! Read-only view of the base chain.
//!
//! The block index, UTXO set, and header state live in the surrounding
//! process; the coordination layer reaches them through this trait.

use aurumd_consensus::money::Amount;
use aurumd_consensus::Hash256;
use aurumd_primitives::OutPoint;

#[derive(Clone, Debug)]
pub struct Utxo {
    pub value: Amount,
    pub script_pubkey: Vec<u8>,
    /// Height of the block the output was created in.
    pub height: i64,
}

pub trait ChainView: Send + Sync {
    fn tip_height(&self) -> i64;
    fn block_hash(&self, height: i64) -> Option<Hash256>;
    fn block_height(&self, hash: &Hash256) -> Option<i64>;
    fn block_time(&self, height: i64) -> Option<i64>;
    fn utxo(&self, outpoint: &OutPoint) -> Option<Utxo>;
    /// True once the best header equals the best block.
    fn headers_at_tip(&self) -> bool;
    fn in_initial_block_download(&self) -> bool;
}

pub fn utxo_confirmations(chain: &dyn ChainView, outpoint: &OutPoint) -> Option<i64> {
    let utxo = chain.utxo(outpoint)?;
    Some(chain.tip_height() - utxo.height + 1)
}

//! Coinbase synthesis and block (re-)assembly for stratumd.
//!
//! This crate owns the consensus-critical byte-level work the Template
//! Manager needs: building the coinbase transaction around a gap for each
//! miner's extranonce, and assembling the final block handed to
//! `submitblock` once a share clears the network target.

pub mod block;
pub mod coinbase;

pub use block::{assemble_block, serialize_header, HeaderFields};
pub use coinbase::{
    add_witness_for_submission, build_coinbase, coinbase_txid, realize_coinbase, CoinbaseParts,
    CoinbaseSpec,
};

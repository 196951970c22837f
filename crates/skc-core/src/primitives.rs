// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// STAKECHAIN (SKC) - CHAIN PRIMITIVES
//
// UTXO transactions and blocks. Identity hashes are SHA3-256 over the
// canonical bincode encoding, hex-encoded.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

use crate::{address_hash, Address, Amount, ADDRESS_PREFIX, WITNESS_SCALE_FACTOR};

/// OP_RETURN: marks an unspendable data-carrier output
pub const OP_RETURN: u8 = 0x6a;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;
const PUSH_20: u8 = 0x14;

/// Serialized header size used for block weight accounting
pub const BLOCK_HEADER_SIZE: u64 = 80;

/// Reference to a specific output of a previous transaction
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
    pub txid: String,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }

    /// Coinbase inputs reference the null outpoint
    pub fn null() -> Self {
        Self {
            txid: String::new(),
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_empty() && self.vout == u32::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Output locking script. Only two shapes matter to the ledger:
/// pay-to-pubkey-hash and OP_RETURN data carriers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// `OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG`
    pub fn pay_to_address(address: &str) -> Option<Self> {
        let hash = address_hash(address)?;
        let mut bytes = Vec::with_capacity(25);
        bytes.extend_from_slice(&[OP_DUP, OP_HASH160, PUSH_20]);
        bytes.extend_from_slice(&hash);
        bytes.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        Some(Self(bytes))
    }

    /// `OP_RETURN` followed by raw payload bytes
    pub fn data_carrier(payload: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(payload.len() + 1);
        bytes.push(OP_RETURN);
        bytes.extend_from_slice(payload);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_data_carrier(&self) -> bool {
        self.0.first() == Some(&OP_RETURN)
    }

    /// The single address this script pays to, if it is pay-to-pubkey-hash
    pub fn address(&self) -> Option<Address> {
        let b = &self.0;
        if b.len() != 25
            || b[0] != OP_DUP
            || b[1] != OP_HASH160
            || b[2] != PUSH_20
            || b[23] != OP_EQUALVERIFY
            || b[24] != OP_CHECKSIG
        {
            return None;
        }
        Some(format!("{}{}", ADDRESS_PREFIX, hex::encode(&b[3..23])))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    /// Unlocking data. Script evaluation lives outside the ledger.
    pub script_sig: Vec<u8>,
}

impl TxIn {
    pub fn spending(prevout: OutPoint) -> Self {
        Self {
            prevout,
            script_sig: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn new(value: Amount, script_pubkey: Script) -> Self {
        Self {
            value,
            script_pubkey,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Coinbase paying `outputs`. The height goes into the unlocking data
    /// so that every coinbase has a distinct txid.
    pub fn coinbase(height: u64, outputs: Vec<TxOut>) -> Self {
        Self {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::null(),
                script_sig: height.to_le_bytes().to_vec(),
            }],
            outputs,
            lock_time: 0,
        }
    }

    /// Canonical encoding. Serializing plain structs into a Vec cannot fail,
    /// an empty buffer is returned if it ever does.
    pub fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Transaction id: SHA3-256 of the canonical encoding
    pub fn txid(&self) -> String {
        hex::encode(Sha3_256::digest(self.encode()))
    }

    /// Serialized size in bytes
    pub fn vsize(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(0)
    }

    pub fn weight(&self) -> u64 {
        self.vsize() * WITNESS_SCALE_FACTOR
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    /// Sum of output values, `None` on overflow
    pub fn value_out(&self) -> Option<Amount> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub prev_hash: String,
    pub merkle_root: String,
    pub timestamp: u64,
    pub nonce: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Assemble a block on top of `prev_hash`; the merkle root is filled in here.
    pub fn new(prev_hash: impl Into<String>, timestamp: u64, transactions: Vec<Transaction>) -> Self {
        let merkle_root = Self::compute_merkle_root(&transactions);
        Self {
            header: BlockHeader {
                prev_hash: prev_hash.into(),
                merkle_root,
                timestamp,
                nonce: 0,
            },
            transactions,
        }
    }

    /// Flat SHA3 commitment over the ordered txids
    pub fn compute_merkle_root(transactions: &[Transaction]) -> String {
        let mut hasher = Sha3_256::new();
        for tx in transactions {
            hasher.update(tx.txid().as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    pub fn hash(&self) -> String {
        let mut hasher = Sha3_256::new();
        hasher.update(self.header.prev_hash.as_bytes());
        hasher.update(self.header.merkle_root.as_bytes());
        hasher.update(self.header.timestamp.to_le_bytes());
        hasher.update(self.header.nonce.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn weight(&self) -> u64 {
        BLOCK_HEADER_SIZE * WITNESS_SCALE_FACTOR
            + self.transactions.iter().map(Transaction::weight).sum::<u64>()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }
}

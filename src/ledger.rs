//! The proof-of-work audit ledger: entries, blocks and the chain.
//!
//! The chain is a linear in-process log, not a consensus system. Blocks are
//! addressed by position (position *is* the index), sealed by a small
//! proof-of-work search, and linked by hash so retroactive edits are
//! detectable via [`Blockchain::validate`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Leading zero hex digits required of a mined block hash.
pub const DEFAULT_DIFFICULTY: usize = 2;

/// Amount credited to the miner address after each sealed block.
pub const MINER_REWARD: f64 = 10.0;

/// Nonce budget for a single mining run. At difficulty 2 the expected search
/// is ~256 attempts, so hitting this means something is badly wrong.
const MAX_MINE_ATTEMPTS: u64 = 1 << 24;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("failed to serialize for hashing: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("mining exhausted after {attempts} attempts at difficulty {difficulty}")]
    MiningExhausted { attempts: u64, difficulty: usize },
}

/// Current UTC time as unix seconds.
pub fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A ledger entry before it has been hashed into the pending buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryDraft {
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl EntryDraft {
    /// Content digest over the draft fields. Deterministic: identical field
    /// values always produce the identical hash.
    pub fn content_hash(&self) -> Result<String, LedgerError> {
        Ok(sha256_hex(&serde_json::to_vec(self)?))
    }

    /// Consume the draft into an immutable entry carrying its content hash.
    pub fn seal(self) -> Result<LedgerEntry, LedgerError> {
        let hash = self.content_hash()?;
        Ok(LedgerEntry {
            from: self.from,
            to: self.to,
            amount: self.amount,
            timestamp: self.timestamp,
            memo: self.memo,
            hash,
        })
    }
}

/// A hashed ledger entry. Immutable once sealed into a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// SHA-256 hex over the canonical JSON of the other fields.
    pub hash: String,
}

/// An entry annotated with the block that sealed it.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedEntry {
    #[serde(flatten)]
    pub entry: LedgerEntry,
    pub block_index: u64,
    pub block_hash: String,
}

/// Hashed view of a block. The field order here is the serialization
/// contract: changing it invalidates every previously stored hash.
#[derive(Serialize)]
struct BlockDigest<'a> {
    index: u64,
    timestamp: i64,
    transactions: &'a [LedgerEntry],
    previous_hash: &'a str,
    nonce: u64,
}

/// One sealed batch of ledger entries with tamper-evident linkage to its
/// predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain, 0 = genesis.
    pub index: u64,
    /// Unix seconds at construction time.
    pub timestamp: i64,
    /// Sealed entries, insertion order = mining order.
    pub transactions: Vec<LedgerEntry>,
    /// Hash of the prior block, `"0"` for genesis.
    pub previous_hash: String,
    /// Proof-of-work counter, only mutated during mining.
    pub nonce: u64,
    /// SHA-256 hex over all other fields including the nonce.
    pub hash: String,
}

impl Block {
    pub fn new(
        index: u64,
        timestamp: i64,
        transactions: Vec<LedgerEntry>,
        previous_hash: String,
    ) -> Result<Self, LedgerError> {
        let mut block = Block {
            index,
            timestamp,
            transactions,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    /// Recompute the digest from the current field values. Invoked
    /// identically at construction, during mining and during validation.
    pub fn compute_hash(&self) -> Result<String, LedgerError> {
        let digest = BlockDigest {
            index: self.index,
            timestamp: self.timestamp,
            transactions: &self.transactions,
            previous_hash: &self.previous_hash,
            nonce: self.nonce,
        };
        Ok(sha256_hex(&serde_json::to_vec(&digest)?))
    }

    fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
        difficulty <= hash.len() && hash.as_bytes()[..difficulty].iter().all(|b| *b == b'0')
    }

    /// Brute-force the nonce until the hash carries `difficulty` leading
    /// zero hex digits, giving up after `max_attempts` so a misconfigured
    /// difficulty fails retryably instead of pinning the thread forever.
    ///
    /// Returns the number of attempts on success.
    pub fn mine(&mut self, difficulty: usize, max_attempts: u64) -> Result<u64, LedgerError> {
        let mut attempts = 0u64;
        while !Self::meets_difficulty(&self.hash, difficulty) {
            if attempts >= max_attempts {
                return Err(LedgerError::MiningExhausted {
                    attempts,
                    difficulty,
                });
            }
            self.nonce += 1;
            self.hash = self.compute_hash()?;
            attempts += 1;
        }
        Ok(attempts)
    }
}

/// The append-only chain plus its pending-entry buffer.
///
/// Owns its blocks exclusively; all mutation goes through chain operations.
/// Callers are expected to wrap the chain in a mutex so seal -> mine ->
/// append -> reseed happens under one exclusive lock.
#[derive(Debug)]
pub struct Blockchain {
    blocks: Vec<Block>,
    pending: Vec<LedgerEntry>,
    difficulty: usize,
    miner_reward: f64,
    mine_budget: u64,
}

impl Blockchain {
    /// Fresh chain holding only a genesis block.
    pub fn new(difficulty: usize) -> Result<Self, LedgerError> {
        let genesis = Block::new(0, now_unix(), vec![], "0".to_string())?;
        Ok(Blockchain {
            blocks: vec![genesis],
            pending: vec![],
            difficulty,
            miner_reward: MINER_REWARD,
            mine_budget: MAX_MINE_ATTEMPTS,
        })
    }

    /// Rebuild a chain from previously persisted blocks (sorted by index).
    /// An empty slice falls back to a fresh genesis chain.
    pub fn with_blocks(blocks: Vec<Block>, difficulty: usize) -> Result<Self, LedgerError> {
        if blocks.is_empty() {
            return Self::new(difficulty);
        }
        Ok(Blockchain {
            blocks,
            pending: vec![],
            difficulty,
            miner_reward: MINER_REWARD,
            mine_budget: MAX_MINE_ATTEMPTS,
        })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    pub fn pending(&self) -> &[LedgerEntry] {
        &self.pending
    }

    /// The latest sealed block. The chain always holds at least genesis.
    pub fn tip(&self) -> &Block {
        self.blocks.last().expect("chain always holds genesis")
    }

    /// Hash the given draft, append it to the pending buffer and return the
    /// hash. No validation of amount sign or address existence happens here;
    /// balance checks are the caller's job.
    pub fn create_transaction(&mut self, draft: EntryDraft) -> Result<String, LedgerError> {
        let entry = draft.seal()?;
        let hash = entry.hash.clone();
        self.pending.push(entry);
        Ok(hash)
    }

    /// Seal the pending buffer into a new block chained on the current tip,
    /// mine it, append it, then reseed the buffer with a single reward entry
    /// for `miner`. Returns the new block's hash.
    ///
    /// On mining exhaustion the chain and the pending buffer are left
    /// untouched, so the call can simply be retried.
    pub fn mine_pending_transactions(&mut self, miner: &str) -> Result<String, LedgerError> {
        let mut block = Block::new(
            self.blocks.len() as u64,
            now_unix(),
            self.pending.clone(),
            self.tip().hash.clone(),
        )?;
        let attempts = block.mine(self.difficulty, self.mine_budget)?;
        tracing::info!(index = block.index, attempts, hash = %block.hash, "block mined");

        let hash = block.hash.clone();
        self.blocks.push(block);

        // The reward only reaches a block if another mining call follows.
        let reward = EntryDraft {
            from: "System".to_string(),
            to: miner.to_string(),
            amount: self.miner_reward,
            timestamp: now_unix(),
            memo: Some("miner reward".to_string()),
        };
        self.pending = vec![reward.seal()?];

        Ok(hash)
    }

    /// Net balance of `address` over every sealed entry, in chain order.
    /// May be negative; the ledger does not enforce value conservation.
    pub fn balance_of(&self, address: &str) -> f64 {
        let mut balance = 0.0;
        for block in &self.blocks {
            for entry in &block.transactions {
                if entry.from == address {
                    balance -= entry.amount;
                }
                if entry.to == address {
                    balance += entry.amount;
                }
            }
        }
        balance
    }

    /// Every sealed entry touching `address`, annotated with its block.
    pub fn history_of(&self, address: &str) -> Vec<AnnotatedEntry> {
        let mut entries = vec![];
        for block in &self.blocks {
            for entry in &block.transactions {
                if entry.from == address || entry.to == address {
                    entries.push(AnnotatedEntry {
                        entry: entry.clone(),
                        block_index: block.index,
                        block_hash: block.hash.clone(),
                    });
                }
            }
        }
        entries
    }

    /// Check every block's stored hash against its recomputed digest and its
    /// back-reference against the prior block's hash. Returns one finding
    /// per violation; an empty list means the chain is intact.
    pub fn validate(&self) -> Vec<String> {
        let mut findings = vec![];

        if self.blocks[0].previous_hash != "0" {
            findings.push("genesis previous_hash should be \"0\"".to_string());
        }

        for i in 1..self.blocks.len() {
            let block = &self.blocks[i];

            match block.compute_hash() {
                Ok(recomputed) if recomputed != block.hash => {
                    findings.push(format!("block {} hash mismatch", block.index));
                }
                Err(e) => {
                    findings.push(format!("block {} digest failed: {e}", block.index));
                }
                Ok(_) => {}
            }

            if block.previous_hash != self.blocks[i - 1].hash {
                findings.push(format!("block {} previous_hash mismatch", block.index));
            }
        }

        findings
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    #[cfg(test)]
    pub fn blocks_mut(&mut self) -> &mut Vec<Block> {
        &mut self.blocks
    }

    #[cfg(test)]
    pub fn set_mine_budget(&mut self, budget: u64) {
        self.mine_budget = budget;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(from: &str, to: &str, amount: f64) -> EntryDraft {
        EntryDraft {
            from: from.to_string(),
            to: to.to_string(),
            amount,
            timestamp: 1_700_000_000,
            memo: None,
        }
    }

    #[test]
    fn entry_hash_is_deterministic() {
        let a = draft("A", "B", 100.0).content_hash().unwrap();
        let b = draft("A", "B", 100.0).content_hash().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, draft("A", "B", 100.01).content_hash().unwrap());
    }

    #[test]
    fn fresh_chain_is_valid() {
        let chain = Blockchain::new(DEFAULT_DIFFICULTY).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.tip().previous_hash, "0");
        assert!(chain.is_valid());
    }

    #[test]
    fn mined_hash_meets_difficulty() {
        let mut chain = Blockchain::new(DEFAULT_DIFFICULTY).unwrap();
        chain.create_transaction(draft("A", "B", 5.0)).unwrap();
        let hash = chain.mine_pending_transactions("miner1").unwrap();
        assert!(hash.starts_with("00"));
        assert_eq!(hash, chain.tip().hash);
    }

    #[test]
    fn blocks_link_to_their_predecessor() {
        let mut chain = Blockchain::new(DEFAULT_DIFFICULTY).unwrap();
        chain.create_transaction(draft("A", "B", 1.0)).unwrap();
        chain.mine_pending_transactions("m").unwrap();
        chain.mine_pending_transactions("m").unwrap();

        let blocks = chain.blocks();
        for i in 1..blocks.len() {
            assert_eq!(blocks[i].previous_hash, blocks[i - 1].hash);
        }
    }

    #[test]
    fn tampering_with_a_sealed_entry_is_detected() {
        let mut chain = Blockchain::new(DEFAULT_DIFFICULTY).unwrap();
        chain.create_transaction(draft("A", "B", 100.0)).unwrap();
        chain.mine_pending_transactions("m").unwrap();
        assert!(chain.is_valid());

        chain.blocks_mut()[1].transactions[0].amount = 1_000_000.0;
        assert!(!chain.is_valid());
    }

    #[test]
    fn rewriting_linkage_is_detected() {
        let mut chain = Blockchain::new(DEFAULT_DIFFICULTY).unwrap();
        chain.create_transaction(draft("A", "B", 2.0)).unwrap();
        chain.mine_pending_transactions("m").unwrap();

        chain.blocks_mut()[1].previous_hash = "0".repeat(64);
        assert!(!chain.is_valid());
    }

    #[test]
    fn transfers_between_two_addresses_conserve_value() {
        let mut chain = Blockchain::new(DEFAULT_DIFFICULTY).unwrap();
        chain.create_transaction(draft("A", "B", 100.0)).unwrap();
        chain.create_transaction(draft("B", "A", 40.0)).unwrap();
        chain.mine_pending_transactions("m").unwrap();

        assert_eq!(chain.balance_of("A"), -60.0);
        assert_eq!(chain.balance_of("B"), 60.0);
        assert_eq!(chain.balance_of("A") + chain.balance_of("B"), 0.0);
    }

    #[test]
    fn end_to_end_mine_scenario() {
        let mut chain = Blockchain::new(DEFAULT_DIFFICULTY).unwrap();
        chain.create_transaction(draft("A", "B", 100.0)).unwrap();
        chain.mine_pending_transactions("miner1").unwrap();

        assert_eq!(chain.balance_of("A"), -100.0);
        assert_eq!(chain.balance_of("B"), 100.0);
        assert!(chain.is_valid());
        assert_eq!(chain.len(), 2);

        // The reward sits in the pending buffer, not in a block yet.
        assert_eq!(chain.balance_of("miner1"), 0.0);
        assert_eq!(chain.pending().len(), 1);
        assert_eq!(chain.pending()[0].from, "System");
    }

    #[test]
    fn history_is_annotated_with_the_sealing_block() {
        let mut chain = Blockchain::new(DEFAULT_DIFFICULTY).unwrap();
        chain.create_transaction(draft("A", "B", 100.0)).unwrap();
        chain.mine_pending_transactions("miner1").unwrap();

        let history = chain.history_of("A");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].block_index, 1);
        assert_eq!(history[0].block_hash, chain.blocks()[1].hash);
        assert_eq!(history[0].entry.amount, 100.0);

        assert!(chain.history_of("nobody").is_empty());
    }

    #[test]
    fn exhausted_mining_leaves_the_chain_untouched() {
        // Difficulty 64 would need an all-zero hash; the budget trips first.
        let mut chain = Blockchain::new(64).unwrap();
        chain.set_mine_budget(16);
        chain.create_transaction(draft("A", "B", 1.0)).unwrap();

        let err = chain.mine_pending_transactions("m").unwrap_err();
        assert!(matches!(err, LedgerError::MiningExhausted { .. }));
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.pending().len(), 1);
        assert_eq!(chain.pending()[0].from, "A");
    }

    #[test]
    fn rebuilding_from_blocks_preserves_validity() {
        let mut chain = Blockchain::new(DEFAULT_DIFFICULTY).unwrap();
        chain.create_transaction(draft("A", "B", 7.0)).unwrap();
        chain.mine_pending_transactions("m").unwrap();

        let rebuilt =
            Blockchain::with_blocks(chain.blocks().to_vec(), DEFAULT_DIFFICULTY).unwrap();
        assert_eq!(rebuilt.len(), 2);
        assert!(rebuilt.is_valid());
        assert_eq!(rebuilt.balance_of("B"), 7.0);
    }
}

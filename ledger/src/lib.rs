//! Append-only vote and audit ledger for Agora
//!
//! Every vote cast in a channel and every moderation or governance action
//! taken there is written here once and never touched again. Entries are
//! hashed over their canonical JSON payload and chained per channel, so a
//! dispute can be settled by replaying the chain.
//!
//! # Key Components
//!
//! - [`VoteLedger`]: Per-channel store of [`VoteRecord`]s and [`AuditEntry`]s
//! - [`content_hash`]: SHA-256 over the canonical payload
//! - [`AuditAction`]: Tag describing what an audit entry records
//!
//! # Example
//!
//! ```
//! use agora_ledger::{AuditAction, VoteLedger};
//!
//! let ledger = VoteLedger::new();
//! let entry = ledger
//!     .append("general", AuditAction::ContentPinned, &serde_json::json!({"message_id": "m1"}))
//!     .unwrap();
//! assert_eq!(entry.sequence, 0);
//! assert!(ledger.verify_channel("general").is_ok());
//! ```

pub mod hash;
pub mod ledger;
pub mod types;

// Re-export main types
pub use hash::{chain_hash, content_hash, GENESIS_HASH};
pub use ledger::{LedgerStats, VoteLedger, SYSTEM_CHANNEL};
pub use types::*;

//! Compact binary encoding for inbox contract payloads.
//!
//! Every payload is a fixed-order sequence of big-endian integers truncated to
//! 8, 16, 24 or 48 bits, 20-byte addresses, 32-byte hashes and length-prefixed
//! arrays. The layouts match the on-chain decoder byte for byte, so
//! `decode(encode(x)) == x` holds for every field.

pub mod error;
pub mod hashing;
pub mod pack;
pub mod propose_input;
pub mod proposed;
pub mod prove_input;
pub mod proved;
pub mod types;

pub use error::CodecError;
pub use hashing::{compose_transition_key, hash_checkpoint, hash_core_state, hash_proposal, hash_transition};
pub use propose_input::{decode_propose_input, encode_propose_input, propose_input_size};
pub use proposed::{decode_proposed_event, encode_proposed_event, proposed_event_size};
pub use prove_input::{decode_prove_input, encode_prove_input, prove_input_size};
pub use proved::{decode_proved_event, encode_proved_event, proved_event_size};
pub use types::*;

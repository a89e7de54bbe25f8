//! Canonical serialization and cryptographic primitives.
//!
//! Everything content-addressed in the runtime (envelopes, responses, WAL
//! entries, execution records, fingerprints) hashes through one canonical
//! JSON encoding: keys sorted lexicographically at every nesting level, no
//! insignificant whitespace, UTF-8. Signatures are Ed25519 over the UTF-8
//! bytes of the entry hash, verified against an offline key registry.

#![deny(unsafe_code)]

pub mod canonical;
pub mod signing;

pub use canonical::{canonical_bytes, canonical_json, hash_of, hash_value, sha256_hex};
pub use signing::{KeyRegistry, SigningError, WalSigner};

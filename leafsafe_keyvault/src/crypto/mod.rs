//! Cryptographic core - PBKDF2, HKDF, AES-GCM, HMAC, CSPRNG, wiping.

pub mod aead;
pub mod kdf;
pub mod wipe;

pub use aead::{
    aes_gcm_decrypt, aes_gcm_encrypt, ct_eq, hmac_sha256, hmac_verify, random_bytes, HMAC_LEN,
    KEY_LEN, MAX_RANDOM_BYTES, NONCE_LEN, TAG_LEN,
};
pub use kdf::{hkdf_sha256, pbkdf2_sha512, sha256_hex};
pub use wipe::{wipe as wipe_buffer, wipe_collection, DeferredWipe, WipeFields};

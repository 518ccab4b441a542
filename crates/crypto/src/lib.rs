//! # earshot-crypto
//!
//! Transport-Entschluesselung fuer den Earshot-Empfangspfad.
//!
//! ## Module
//! - `nonce` - 24-Byte-Nonce-Konstruktion fuer die drei Verschluesselungsmodi
//! - `secretbox` - Authentifizierte XSalsa20-Poly1305 Ver-/Entschluesselung
//! - `error` - Fehlertypen

pub mod error;
pub mod nonce;
pub mod secretbox;

// Bequeme Re-Exports
pub use error::{CryptoError, CryptoResult};
pub use nonce::{nonce_erstellen, EncryptionMode, NONCE_LAENGE, SCHLUESSEL_LAENGE};
pub use secretbox::{decrypt_payload, encrypt_payload};

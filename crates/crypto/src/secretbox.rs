//! Authentifizierte Transport-Entschluesselung (XSalsa20-Poly1305)
//!
//! Entschluesselt den Ciphertext-Bereich eines Voice-Datagramms mit dem
//! Session-Schluessel. Die Integritaet wird vor der Klartext-Herausgabe
//! verifiziert: manipulierte oder abgeschnittene Daten liefern einen
//! Fehler, niemals Muell-Klartext.

use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Key, Nonce, XSalsa20Poly1305};

use crate::error::{CryptoError, CryptoResult};
use crate::nonce::{NONCE_LAENGE, SCHLUESSEL_LAENGE};

/// Entschluesselt einen Ciphertext mit Session-Schluessel und Nonce
///
/// Deterministisch und frei von Seiteneffekten. Der Auth-Tag wird
/// verifiziert bevor der Klartext zurueckgegeben wird.
///
/// # Fehler
/// - `UngueltigeSchluesselLaenge` wenn der Schluessel nicht 32 Bytes hat
/// - `Entschluesselung` bei Tag-Mismatch (Manipulation, falscher
///   Schluessel oder falsche Nonce)
pub fn decrypt_payload(
    ciphertext: &[u8],
    schluessel: &[u8],
    nonce: &[u8; NONCE_LAENGE],
) -> CryptoResult<Vec<u8>> {
    let cipher = cipher_erstellen(schluessel)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| CryptoError::Entschluesselung(e.to_string()))
}

/// Verschluesselt einen Klartext mit Session-Schluessel und Nonce
///
/// Gegenstueck zu [`decrypt_payload`] – verwendet von Tests und
/// Loopback-Werkzeugen.
pub fn encrypt_payload(
    klartext: &[u8],
    schluessel: &[u8],
    nonce: &[u8; NONCE_LAENGE],
) -> CryptoResult<Vec<u8>> {
    let cipher = cipher_erstellen(schluessel)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), klartext)
        .map_err(|e| CryptoError::Verschluesselung(e.to_string()))
}

fn cipher_erstellen(schluessel: &[u8]) -> CryptoResult<XSalsa20Poly1305> {
    if schluessel.len() != SCHLUESSEL_LAENGE {
        return Err(CryptoError::UngueltigeSchluesselLaenge {
            erwartet: SCHLUESSEL_LAENGE,
            erhalten: schluessel.len(),
        });
    }
    Ok(XSalsa20Poly1305::new(Key::from_slice(schluessel)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

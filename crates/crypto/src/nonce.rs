//! Nonce-Konstruktion fuer die drei Transport-Verschluesselungsmodi
//!
//! Jedes eingehende Datagramm traegt seine Nonce-Quelle je nach Modus an
//! einer anderen Stelle. Der Aufrufer stellt einen wiederverwendbaren
//! 24-Byte-Scratch-Puffer, der pro Router-Instanz gehalten wird (kein
//! Aliasing zwischen unabhaengigen Sessions).
//!
//! ```text
//! Modus    Nonce-Quelle                    Ciphertext-Ende
//! ------   ------------------------------  ----------------
//! Normal   erste 12 Bytes (RTP-Header)     Datagramm-Ende
//! Suffix   letzte 24 Bytes                 Ende - 24
//! Lite     letzte 4 Bytes                  Ende - 4
//! ```
//!
//! Der Ciphertext beginnt in allen Modi bei Byte-Offset 12 (Ende des
//! festen RTP-Headers).

use crate::error::{CryptoError, CryptoResult};

/// Nonce-Laenge der Secretbox (XSalsa20-Poly1305)
pub const NONCE_LAENGE: usize = 24;

/// Schluessel-Laenge der Secretbox
pub const SCHLUESSEL_LAENGE: usize = 32;

/// Laenge des festen RTP-Headers – der Ciphertext beginnt dahinter
const RTP_HEADER_LAENGE: usize = 12;

/// Laenge des Nonce-Suffix im Lite-Modus
const LITE_SUFFIX_LAENGE: usize = 4;

// ---------------------------------------------------------------------------
// EncryptionMode
// ---------------------------------------------------------------------------

/// Transport-Verschluesselungsmodus einer Voice-Session
///
/// Wird beim Session-Handshake als Protokoll-String ausgehandelt und ist
/// fuer die Lebensdauer der Session konstant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionMode {
    /// Nonce = RTP-Header (erste 12 Bytes), mit Nullen auf 24 aufgefuellt
    #[default]
    Normal,
    /// Nonce = letzte 24 Bytes des Datagramms
    Suffix,
    /// Nonce = letzte 4 Bytes des Datagramms, mit Nullen auf 24 aufgefuellt
    Lite,
}

impl EncryptionMode {
    /// Parst den Modus aus dem Handshake-Protokoll-String
    ///
    /// # Fehler
    /// - `UngueltigerModus` bei unbekanntem String (Programmierfehler –
    ///   der Modus wird upstream beim Handshake validiert)
    pub fn from_wire_name(name: &str) -> CryptoResult<Self> {
        match name {
            "xsalsa20_poly1305" => Ok(Self::Normal),
            "xsalsa20_poly1305_suffix" => Ok(Self::Suffix),
            "xsalsa20_poly1305_lite" => Ok(Self::Lite),
            andere => Err(CryptoError::UngueltigerModus(andere.to_string())),
        }
    }

    /// Gibt den Handshake-Protokoll-String zurueck
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Normal => "xsalsa20_poly1305",
            Self::Suffix => "xsalsa20_poly1305_suffix",
            Self::Lite => "xsalsa20_poly1305_lite",
        }
    }
}

impl std::fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ---------------------------------------------------------------------------
// Nonce-Konstruktion
// ---------------------------------------------------------------------------

/// Befuellt den 24-Byte-Scratch-Puffer mit der Nonce des Datagramms
///
/// Gibt den Byte-Offset zurueck, an dem der Ciphertext endet. Der
/// Ciphertext beginnt immer bei Offset 12 (Ende des RTP-Headers).
///
/// # Fehler
/// - `DatagrammZuKurz` wenn das Datagramm die Nonce-Quelle des Modus
///   nicht vollstaendig enthaelt
pub fn nonce_erstellen(
    modus: EncryptionMode,
    datagramm: &[u8],
    puffer: &mut [u8; NONCE_LAENGE],
) -> CryptoResult<usize> {
    puffer.fill(0);

    match modus {
        EncryptionMode::Normal => {
            if datagramm.len() < RTP_HEADER_LAENGE {
                return Err(zu_kurz(modus, datagramm.len(), RTP_HEADER_LAENGE));
            }
            puffer[..RTP_HEADER_LAENGE].copy_from_slice(&datagramm[..RTP_HEADER_LAENGE]);
            Ok(datagramm.len())
        }
        EncryptionMode::Suffix => {
            let minimum = RTP_HEADER_LAENGE + NONCE_LAENGE;
            if datagramm.len() < minimum {
                return Err(zu_kurz(modus, datagramm.len(), minimum));
            }
            let ende = datagramm.len() - NONCE_LAENGE;
            puffer.copy_from_slice(&datagramm[ende..]);
            Ok(ende)
        }
        EncryptionMode::Lite => {
            let minimum = RTP_HEADER_LAENGE + LITE_SUFFIX_LAENGE;
            if datagramm.len() < minimum {
                return Err(zu_kurz(modus, datagramm.len(), minimum));
            }
            let ende = datagramm.len() - LITE_SUFFIX_LAENGE;
            puffer[..LITE_SUFFIX_LAENGE].copy_from_slice(&datagramm[ende..]);
            Ok(ende)
        }
    }
}

fn zu_kurz(modus: EncryptionMode, laenge: usize, minimum: usize) -> CryptoError {
    CryptoError::DatagrammZuKurz {
        modus: modus.wire_name(),
        laenge,
        minimum,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

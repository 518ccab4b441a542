//! Fehlertypen der Voice-Receive-Engine
//!
//! Alle Fehler sind pro Paket lokal und nie fatal fuer den Router:
//! ein fehlerhaftes Paket beendet niemals die Session.

use earshot_crypto::CryptoError;
use thiserror::Error;

/// Fehler beim Verarbeiten eines einzelnen Voice-Datagramms
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Session-Handshake noch nicht abgeschlossen – Paket wird verworfen
    #[error("Session-Schluessel fehlt")]
    SchluesselFehlt,

    /// Auth-Tag ungueltig: Manipulation, Korruption oder falscher Schluessel
    #[error("Entschluesselung fehlgeschlagen: {0}")]
    Entschluesselung(String),

    /// Header-Extension-Laenge weist ueber das Puffer-Ende hinaus
    #[error("Ungueltige Header-Extension: {0}")]
    UngueltigeExtension(String),
}

impl From<CryptoError> for VoiceError {
    fn from(fehler: CryptoError) -> Self {
        match fehler {
            CryptoError::KeinSchluessel => Self::SchluesselFehlt,
            andere => Self::Entschluesselung(andere.to_string()),
        }
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;

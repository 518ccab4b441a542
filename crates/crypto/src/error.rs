//! Fehlertypen fuer das Kryptografie-Subsystem

use thiserror::Error;

/// Fehler im Kryptografie-Subsystem
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Kein Session-Schluessel vorhanden")]
    KeinSchluessel,

    #[error("Entschluesselung fehlgeschlagen: {0}")]
    Entschluesselung(String),

    #[error("Verschluesselung fehlgeschlagen: {0}")]
    Verschluesselung(String),

    #[error("Unbekannter Verschluesselungsmodus: {0}")]
    UngueltigerModus(String),

    #[error("Datagramm zu kurz fuer Modus {modus}: {laenge} Bytes (erwartet mindestens {minimum})")]
    DatagrammZuKurz {
        modus: &'static str,
        laenge: usize,
        minimum: usize,
    },

    #[error("Ungueltige Schluessel-Laenge: erwartet {erwartet}, erhalten {erhalten}")]
    UngueltigeSchluesselLaenge { erwartet: usize, erhalten: usize },
}

pub type CryptoResult<T> = Result<T, CryptoError>;

//! RTP-Paketlayout und Header-Extension-Parsing
//!
//! Direkte Byte-Zugriffe, kein serde (Performance-kritischer Empfangspfad).
//!
//! ## Festes RTP-Header-Layout (12 Bytes)
//!
//! ```text
//! Offset  Len  Beschreibung
//! ------  ---  -----------
//!  0       1   Version/Flags
//!  1       1   Payload-Type
//!  2       2   Sequenznummer (big-endian)
//!  4       4   Zeitstempel (big-endian, 48 kHz-Ticks)
//!  8       4   SSRC – Synchronisation Source (big-endian)
//! 12+      N   Ciphertext (und je nach Modus ein Nonce-Suffix)
//! ```
//!
//! Nach der Entschluesselung kann der Klartext mit einer One-Byte-Profile
//! Header-Extension (RFC 8285) beginnen: 2 Bytes Profilmarker `0xBE 0xDE`,
//! 2 Bytes Laenge in 32-Bit-Worten, danach die Extension-Daten.

use std::io;

/// Laenge des festen RTP-Headers in Bytes
pub const RTP_HEADER_LAENGE: usize = 12;

/// Byte-Offset der SSRC im festen RTP-Header
pub const SSRC_OFFSET: usize = 8;

/// Profilmarker der One-Byte-Header-Extension (RFC 8285)
pub const EXTENSION_PROFIL: [u8; 2] = [0xBE, 0xDE];

/// Kanonischer Opus-Silence-Frame (DTX-Keep-Alive, "kein Audio")
pub const SILENCE_FRAME: [u8; 3] = [0xF8, 0xFF, 0xFE];

/// Liest die SSRC aus einem rohen Datagramm (Bytes 8..12, big-endian)
///
/// # Fehler
/// - `InvalidData` wenn das Datagramm kuerzer als der feste RTP-Header ist
pub fn ssrc_lesen(datagramm: &[u8]) -> io::Result<u32> {
    if datagramm.len() < RTP_HEADER_LAENGE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Datagramm zu kurz: {} Bytes (erwartet mindestens {})",
                datagramm.len(),
                RTP_HEADER_LAENGE
            ),
        ));
    }

    Ok(u32::from_be_bytes([
        datagramm[SSRC_OFFSET],
        datagramm[SSRC_OFFSET + 1],
        datagramm[SSRC_OFFSET + 2],
        datagramm[SSRC_OFFSET + 3],
    ]))
}

/// Prueft ob der Klartext exakt dem kanonischen Silence-Frame entspricht
pub fn ist_silence_frame(klartext: &[u8]) -> bool {
    klartext == SILENCE_FRAME
}

/// Entfernt die optionale One-Byte-Header-Extension vom Klartext
///
/// Gibt den Klartext unveraendert zurueck, wenn der Profilmarker fehlt –
/// dadurch ist die Operation idempotent (erneuter Aufruf auf bereits
/// gestrippten Daten ist ein No-Op).
///
/// # Fehler
/// - `InvalidData` wenn das Laengenfeld ueber das Puffer-Ende hinausweist
pub fn extension_entfernen(klartext: &[u8]) -> io::Result<&[u8]> {
    if klartext.len() < 4 || klartext[0..2] != EXTENSION_PROFIL {
        return Ok(klartext);
    }

    // Laenge in 32-Bit-Worten bei Offset 2, Block = 4 Bytes Header + 4*N Daten
    let laenge_worte = u16::from_be_bytes([klartext[2], klartext[3]]) as usize;
    let block_laenge = 4 + 4 * laenge_worte;

    if block_laenge > klartext.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Extension-Laenge ueberschreitet Puffer: Block {} Bytes, Klartext {} Bytes",
                block_laenge,
                klartext.len()
            ),
        ));
    }

    Ok(&klartext[block_laenge..])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Session-Zustand – Krypto-Kontext und SSRC-Verzeichnis
//!
//! Beides gehoert der Verbindungsschicht und wird mit dem Router ueber
//! `Clone`-Handles (innerer Arc) geteilt. Der Router liest nur:
//! - den Krypto-Kontext pro Paket (kann bis zum Handshake-Abschluss leer sein)
//! - das SSRC-Verzeichnis fuer die Zuordnung SSRC -> Benutzer

use dashmap::DashMap;
use earshot_core::types::UserId;
use earshot_crypto::{EncryptionMode, SCHLUESSEL_LAENGE};
use parking_lot::RwLock;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// SessionCrypto
// ---------------------------------------------------------------------------

/// Kryptografischer Kontext einer Voice-Session
///
/// Wird beim Session-Handshake gesetzt und ist danach konstant.
#[derive(Clone, Copy)]
pub struct SessionCrypto {
    /// Symmetrischer Session-Schluessel (Secretbox, 32 Bytes)
    pub secret_key: [u8; SCHLUESSEL_LAENGE],
    /// Ausgehandelter Nonce-Modus
    pub mode: EncryptionMode,
}

impl std::fmt::Debug for SessionCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Schluessel wird niemals geloggt
        f.debug_struct("SessionCrypto")
            .field("secret_key", &"[REDACTED]")
            .field("mode", &self.mode)
            .finish()
    }
}

/// Geteilter Slot fuer den Session-Krypto-Kontext
///
/// Leer bis der Handshake abgeschlossen ist. Ein fehlender Kontext ist ein
/// harter Fehler pro Paket, aber nicht fatal fuer den Router.
#[derive(Clone, Default)]
pub struct CryptoSlot {
    inner: Arc<RwLock<Option<SessionCrypto>>>,
}

impl CryptoSlot {
    /// Erstellt einen leeren Slot
    pub fn neu() -> Self {
        Self::default()
    }

    /// Setzt den Krypto-Kontext (Handshake abgeschlossen)
    pub fn setzen(&self, crypto: SessionCrypto) {
        *self.inner.write() = Some(crypto);
        tracing::info!(modus = %crypto.mode, "Session-Schluessel gesetzt");
    }

    /// Entfernt den Krypto-Kontext (Session-Reset)
    pub fn loeschen(&self) {
        *self.inner.write() = None;
        tracing::debug!("Session-Schluessel geloescht");
    }

    /// Gibt eine Kopie des aktuellen Kontexts zurueck
    pub fn aktuell(&self) -> Option<SessionCrypto> {
        *self.inner.read()
    }

    /// Prueft ob ein Schluessel vorhanden ist
    pub fn ist_bereit(&self) -> bool {
        self.inner.read().is_some()
    }
}

// ---------------------------------------------------------------------------
// SSRC-Verzeichnis
// ---------------------------------------------------------------------------

/// Verzeichnis-Eintrag eines Call-Teilnehmers
#[derive(Debug, Clone, Copy)]
pub struct SsrcEintrag {
    /// Zugeordneter Benutzer
    pub user_id: UserId,
    /// Sendet dieser Teilnehmer auch Video?
    pub has_video: bool,
    /// Zuletzt vom Gateway gemeldete Speaking-Bitmask (0 = unbekannt)
    pub speaking_flags: u16,
}

/// SSRC -> Teilnehmer Verzeichnis
///
/// Wird von der Verbindungsschicht bei Join/Leave gepflegt; der Router
/// liest nur (DashMap, lock-free Reads im Hot Path).
#[derive(Clone, Default)]
pub struct SsrcDirectory {
    inner: Arc<DashMap<u32, SsrcEintrag>>,
}

impl SsrcDirectory {
    /// Erstellt ein leeres Verzeichnis
    pub fn neu() -> Self {
        Self::default()
    }

    /// Traegt einen Teilnehmer ein (ueberschreibt einen bestehenden Eintrag)
    pub fn eintragen(&self, ssrc: u32, eintrag: SsrcEintrag) {
        tracing::info!(
            ssrc,
            user_id = %eintrag.user_id,
            has_video = eintrag.has_video,
            "SSRC eingetragen"
        );
        self.inner.insert(ssrc, eintrag);
    }

    /// Entfernt einen Teilnehmer (Leave)
    pub fn entfernen(&self, ssrc: u32) -> Option<SsrcEintrag> {
        let entfernt = self.inner.remove(&ssrc).map(|(_, e)| e);
        if let Some(e) = &entfernt {
            tracing::info!(ssrc, user_id = %e.user_id, "SSRC entfernt");
        }
        entfernt
    }

    /// Sucht den Eintrag zu einer SSRC (Hot Path)
    pub fn lookup(&self, ssrc: u32) -> Option<SsrcEintrag> {
        self.inner.get(&ssrc).map(|r| *r)
    }

    /// Anzahl eingetragener Teilnehmer
    pub fn anzahl(&self) -> usize {
        self.inner.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

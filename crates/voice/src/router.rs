//! Packet-Router – Orchestrator des Empfangspfads
//!
//! Verarbeitet ein rohes Datagramm vollstaendig und synchron:
//!
//! ```text
//! Datagramm
//!     |
//!     v
//! rtp::ssrc_lesen()                  <- SSRC aus Bytes 8..12
//!     |
//!     v
//! SsrcDirectory::lookup()            <- exakt, dann SSRC-1 Fallback
//!     |
//!     +--> unbekannt: stilles Verwerfen (erwartetes Rauschen)
//!     |
//!     v
//! nonce_erstellen() + decrypt_payload() + extension_entfernen()
//!     |                              <- hoechstens einmal pro Paket
//!     +--> Silence-Filter fuer Video-Teilnehmer
//!     |
//!     v
//! SpeakingDebouncer::paket_beobachtet()   (Seitenkanal)
//! StreamRegistry::audio_zustellen() / zustellen(Video)
//! ```
//!
//! `route()` enthaelt keine Suspension-Points: Entschluesselung und Parsing
//! sind synchrone, zeitlich begrenzte Operationen. Das einzige asynchrone
//! Element (Debounce-Timer) laeuft ausserhalb des Hot Path.
//!
//! Der Router nimmt `&mut self`: eine Instanz pro Session, single-threaded
//! bedient. Der 24-Byte-Nonce-Scratch-Puffer gehoert der Instanz und wird
//! nie zwischen Sessions geteilt.

use crate::error::{VoiceError, VoiceResult};
use crate::session::{CryptoSlot, SsrcDirectory};
use crate::speaking::SpeakingDebouncer;
use crate::streams::{StreamKind, StreamRegistry};
use bytes::Bytes;
use earshot_core::event::SpeakingEvent;
use earshot_core::types::UserId;
use earshot_crypto::{decrypt_payload, nonce_erstellen, NONCE_LAENGE};
use earshot_protocol::rtp;
use std::time::Duration;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration des Packet-Routers
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Ruhefenster des Speaking-Debouncers
    pub sprech_pause: Duration,
    /// Groesse der Speaking-Ereignis-Queue
    pub event_queue_groesse: usize,
    /// Groesse der Fehler-Queue
    pub fehler_queue_groesse: usize,
    /// Groesse der Zustell-Queue pro Stream
    pub stream_queue_groesse: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            sprech_pause: crate::speaking::SPRECH_PAUSE,
            event_queue_groesse: 256,
            fehler_queue_groesse: 64,
            stream_queue_groesse: crate::streams::STREAM_QUEUE_GROESSE,
        }
    }
}

/// Ereignis-Kanaele einer Session (Empfaenger-Seiten)
pub struct SessionEvents {
    /// Entprellte Speaking-Start/Stop-Ereignisse
    pub speaking_rx: mpsc::Receiver<SpeakingEvent>,
    /// Paketfehler gemaess Sichtbarkeitsregel (nur bei registriertem Sink)
    pub fehler_rx: mpsc::Receiver<VoiceError>,
}

// ---------------------------------------------------------------------------
// PacketRouter
// ---------------------------------------------------------------------------

/// Demultiplexer einer Voice-Session
///
/// Eine Instanz pro Session; `route()` wird single-threaded aufgerufen
/// (ein Datagramm vollstaendig vor dem naechsten).
pub struct PacketRouter {
    crypto_slot: CryptoSlot,
    verzeichnis: SsrcDirectory,
    streams: StreamRegistry,
    debouncer: SpeakingDebouncer,
    fehler_tx: mpsc::Sender<VoiceError>,
    /// Wiederverwendeter Nonce-Scratch-Puffer dieser Instanz
    nonce_puffer: [u8; NONCE_LAENGE],
}

impl PacketRouter {
    /// Erstellt einen Router mit Standard-Konfiguration
    pub fn neu(crypto_slot: CryptoSlot, verzeichnis: SsrcDirectory) -> (Self, SessionEvents) {
        Self::mit_config(RouterConfig::default(), crypto_slot, verzeichnis)
    }

    /// Erstellt einen Router mit eigener Konfiguration
    pub fn mit_config(
        config: RouterConfig,
        crypto_slot: CryptoSlot,
        verzeichnis: SsrcDirectory,
    ) -> (Self, SessionEvents) {
        let (speaking_tx, speaking_rx) = mpsc::channel(config.event_queue_groesse);
        let (fehler_tx, fehler_rx) = mpsc::channel(config.fehler_queue_groesse);

        let router = Self {
            crypto_slot,
            verzeichnis,
            streams: StreamRegistry::mit_queue_groesse(config.stream_queue_groesse),
            debouncer: SpeakingDebouncer::mit_pause(speaking_tx, config.sprech_pause),
            fehler_tx,
            nonce_puffer: [0u8; NONCE_LAENGE],
        };
        let events = SessionEvents {
            speaking_rx,
            fehler_rx,
        };
        (router, events)
    }

    /// Gibt ein Handle auf die Stream-Registry zurueck
    ///
    /// Ueber dieses Handle fordert die Verbindungsschicht Audio-/Video-
    /// Streams fuer Konsumenten an.
    pub fn streams(&self) -> StreamRegistry {
        self.streams.clone()
    }

    /// Gibt alle aktuell sprechenden Teilnehmer zurueck
    pub fn aktive_sprecher(&self) -> Vec<(UserId, u32)> {
        self.debouncer.aktive_sprecher()
    }

    /// Verarbeitet ein eingehendes Datagramm vollstaendig
    ///
    /// Hot Path: frueher Ausstieg bei unbekanntem Verkehr, Entschluesselung
    /// hoechstens einmal pro Paket. Fehler sind pro Paket lokal und beenden
    /// die Session nie.
    pub fn route(&mut self, datagramm: &[u8]) {
        // 1. SSRC extrahieren
        let ssrc = match rtp::ssrc_lesen(datagramm) {
            Ok(ssrc) => ssrc,
            Err(fehler) => {
                tracing::debug!(fehler = %fehler, "Datagramm ohne RTP-Header verworfen");
                return;
            }
        };

        // 2. Verzeichnis-Lookup: exakt, dann SSRC-1
        //
        // Der Fallback stammt aus einer Video-Substream-Konvention des
        // Upstream-Protokolls (Sekundaer-Stream = Primaer-SSRC minus 1)
        // und wird bewusst beibehalten.
        let eintrag = match self.verzeichnis.lookup(ssrc).or_else(|| {
            ssrc.checked_sub(1)
                .and_then(|vorgaenger| self.verzeichnis.lookup(vorgaenger))
        }) {
            Some(eintrag) => eintrag,
            None => {
                // 3. Erwartetes Rauschen waehrend Join/Leave – kein Fehler
                tracing::trace!(ssrc, "Unbekannte SSRC verworfen");
                return;
            }
        };

        // Entschluesselung wird pro Paket hoechstens einmal ausgefuehrt
        let mut klartext: Option<Bytes> = None;

        // 4. Silence-Filter fuer Video-Teilnehmer (Codec-Keep-Alive darf
        //    weder Sprechen signalisieren noch den Video-Stream erreichen)
        if eintrag.has_video {
            match self.entschluesseln_und_strippen(datagramm) {
                Ok(nutzdaten) => {
                    if rtp::ist_silence_frame(&nutzdaten) {
                        tracing::trace!(ssrc, user_id = %eintrag.user_id, "Silence-Frame verworfen");
                        return;
                    }
                    klartext = Some(nutzdaten);
                }
                Err(fehler) => {
                    self.fehler_melden(&eintrag.user_id, fehler);
                    return;
                }
            }
        }

        // 5. Debouncer genau einmal pro nicht verworfenem Paket
        self.debouncer.paket_beobachtet(ssrc, &eintrag);

        // 6. Entschluesseln falls Schritt 4 es nicht schon getan hat
        let nutzdaten = match klartext {
            Some(nutzdaten) => nutzdaten,
            None => match self.entschluesseln_und_strippen(datagramm) {
                Ok(nutzdaten) => nutzdaten,
                Err(fehler) => {
                    self.fehler_melden(&eintrag.user_id, fehler);
                    return;
                }
            },
        };

        // 7. Audio: Silence-Frame beendet OnSilence-Sinks statt zuzustellen
        let ist_silence = rtp::ist_silence_frame(&nutzdaten);
        self.streams
            .audio_zustellen(&eintrag.user_id, nutzdaten.clone(), ist_silence);

        // 8. Video: kein Silence-getriggertes Ende
        self.streams
            .zustellen(&eintrag.user_id, StreamKind::Video, nutzdaten);
    }

    /// Beendet die Session: bricht alle Timer ab und schliesst alle Sinks
    ///
    /// Idempotent; Konsumenten sehen ihr Stream-Ende genau einmal.
    pub fn herunterfahren(&mut self) {
        self.debouncer.alle_abbrechen();
        self.streams.alle_schliessen();
        tracing::info!("Voice-Router heruntergefahren");
    }

    // -----------------------------------------------------------------------
    // Interne Hilfsfunktionen
    // -----------------------------------------------------------------------

    /// Entschluesselt ein Datagramm und entfernt die Header-Extension
    fn entschluesseln_und_strippen(&mut self, datagramm: &[u8]) -> VoiceResult<Bytes> {
        let crypto = self
            .crypto_slot
            .aktuell()
            .ok_or(VoiceError::SchluesselFehlt)?;

        let ciphertext_ende = nonce_erstellen(crypto.mode, datagramm, &mut self.nonce_puffer)?;
        let klartext = decrypt_payload(
            &datagramm[rtp::RTP_HEADER_LAENGE..ciphertext_ende],
            &crypto.secret_key,
            &self.nonce_puffer,
        )?;

        let gestrippt = rtp::extension_entfernen(&klartext)
            .map_err(|fehler| VoiceError::UngueltigeExtension(fehler.to_string()))?;
        Ok(Bytes::copy_from_slice(gestrippt))
    }

    /// Meldet einen Paketfehler gemaess Sichtbarkeitsregel
    ///
    /// Fehler werden nur auf den Fehler-Kanal gelegt wenn fuer den Benutzer
    /// ein Sink registriert ist – genau ein Ereignis pro fehlerhaftem Paket.
    fn fehler_melden(&self, user_id: &UserId, fehler: VoiceError) {
        if !self.streams.hat_stream(user_id) {
            tracing::trace!(user_id = %user_id, fehler = %fehler, "Paketfehler ohne Konsument unterdrueckt");
            return;
        }

        tracing::debug!(user_id = %user_id, fehler = %fehler, "Paketfehler");
        if self.fehler_tx.try_send(fehler).is_err() {
            tracing::warn!(user_id = %user_id, "Fehler-Queue voll oder geschlossen");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

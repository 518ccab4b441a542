//! Stream-Registry – lazily erstellte Audio-/Video-Sinks pro Benutzer
//!
//! Pro Benutzer existiert hoechstens ein Audio- und ein Video-Sink
//! gleichzeitig; ein zweiter `holen_oder_erstellen`-Aufruf gibt ein Handle
//! auf denselben Stream zurueck. Pakete fuer Benutzer ohne registrierten
//! Stream werden verworfen (kein Buffering vor der ersten Anforderung).
//!
//! ## Lebenszyklus eines Sinks
//! - erstellt beim ersten `holen_oder_erstellen`-Aufruf
//! - entfernt sobald der Konsument das letzte Handle fallen laesst
//!   (Drop-Guard auf dem Handle-Kern deregistriert den Eintrag sofort)
//! - Audio-Sinks mit [`EndPolicy::OnSilence`] zusaetzlich beim gerouteten
//!   Silence-Frame via [`StreamRegistry::signal_end`]
//! - alle zusammen bei [`StreamRegistry::alle_schliessen`] (Session-Ende)
//!
//! Jeder Exit-Pfad entfernt den Eintrag explizit; das Entfernen ist auf
//! allen Pfaden idempotent.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use earshot_core::types::UserId;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};

/// Groesse der Zustell-Queue pro Stream (Pakete)
pub const STREAM_QUEUE_GROESSE: usize = 64;

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Ende-Verhalten eines Audio-Streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndPolicy {
    /// Stream endet wenn ein Silence-Frame fuer den Benutzer geroutet wird
    OnSilence,
    /// Stream endet nur durch den Konsumenten oder beim Session-Ende
    Manual,
}

/// Art des Streams
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Entschluesselte Opus-Frames
    Audio,
    /// Rohe VP8-Chunks (Container-Framing ist Sache des Konsumenten)
    Video,
}

/// Konsumenten-Handle eines Streams
///
/// `Clone`-faehig: ein zweiter `holen_oder_erstellen`-Aufruf fuer denselben
/// Benutzer liefert ein Handle auf denselben unterliegenden Kanal. Faellt
/// das letzte Handle, deregistriert der Drop-Guard des Kerns den Eintrag
/// sofort aus der Registry.
#[derive(Clone)]
pub struct StreamHandle {
    kern: Arc<HandleKern>,
}

impl StreamHandle {
    /// Empfaengt das naechste Nutzdaten-Paket
    ///
    /// Gibt `None` zurueck wenn der Stream beendet wurde (Silence-Ende,
    /// Session-Ende oder Registry-Teardown).
    pub async fn empfangen(&self) -> Option<Bytes> {
        self.kern.rx.lock().await.recv().await
    }

    /// Benutzer dieses Streams
    pub fn user_id(&self) -> UserId {
        self.kern.user_id
    }

    /// Art dieses Streams
    pub fn kind(&self) -> StreamKind {
        self.kern.kind
    }
}

/// Konsumenten-Seite eines Sinks, geteilt von allen Handle-Klonen
struct HandleKern {
    user_id: UserId,
    kind: StreamKind,
    rx: Mutex<mpsc::Receiver<Bytes>>,
    /// Rueckverweis fuer die Deregistrierung beim letzten Handle-Drop;
    /// schwach, damit Handles die Registry nicht am Leben halten
    registry: Weak<StreamRegistryInner>,
}

impl Drop for HandleKern {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let map = match self.kind {
            StreamKind::Audio => &registry.audio,
            StreamKind::Video => &registry.video,
        };
        // Nur den eigenen, jetzt toten Eintrag entfernen – ein bereits
        // neu erstellter Nachfolger hat einen lebendigen Kern
        let entfernt = map.remove_if(&self.user_id, |_, e| e.rx_slot.strong_count() == 0);
        if entfernt.is_some() {
            tracing::debug!(user_id = %self.user_id, kind = ?self.kind, "Konsument hat Stream geschlossen – Eintrag entfernt");
        }
    }
}

/// Registry-Seite eines Sinks
struct SinkEintrag {
    /// Zustell-Queue (Router-Seite)
    tx: mpsc::Sender<Bytes>,
    /// Ende-Verhalten (Video immer `Manual`)
    end_policy: EndPolicy,
    /// Schwache Referenz auf die Konsumenten-Seite – fuer idempotente
    /// Erstellung und Erkennung eines geschlossenen Konsumenten
    rx_slot: Weak<HandleKern>,
}

// ---------------------------------------------------------------------------
// StreamRegistry
// ---------------------------------------------------------------------------

/// Registry aller Audio-/Video-Sinks einer Session
///
/// Thread-safe und `Clone`-faehig (innerer Arc).
#[derive(Clone)]
pub struct StreamRegistry {
    inner: Arc<StreamRegistryInner>,
}

struct StreamRegistryInner {
    audio: DashMap<UserId, SinkEintrag>,
    video: DashMap<UserId, SinkEintrag>,
    queue_groesse: usize,
}

impl StreamRegistry {
    /// Erstellt eine leere Registry mit Standard-Queue-Groesse
    pub fn neu() -> Self {
        Self::mit_queue_groesse(STREAM_QUEUE_GROESSE)
    }

    /// Erstellt eine leere Registry mit eigener Queue-Groesse
    pub fn mit_queue_groesse(queue_groesse: usize) -> Self {
        Self {
            inner: Arc::new(StreamRegistryInner {
                audio: DashMap::new(),
                video: DashMap::new(),
                queue_groesse,
            }),
        }
    }

    /// Gibt den Audio-Stream eines Benutzers zurueck, erstellt ihn bei Bedarf
    ///
    /// Idempotent: existiert bereits ein lebendiger Stream, wird dessen
    /// Handle zurueckgegeben und `end_policy` ignoriert.
    pub fn audio_stream(&self, user_id: UserId, end_policy: EndPolicy) -> StreamHandle {
        self.holen_oder_erstellen(StreamKind::Audio, user_id, end_policy)
    }

    /// Gibt den Video-Stream eines Benutzers zurueck, erstellt ihn bei Bedarf
    ///
    /// Video-Streams enden nie durch Silence (immer [`EndPolicy::Manual`]).
    pub fn video_stream(&self, user_id: UserId) -> StreamHandle {
        self.holen_oder_erstellen(StreamKind::Video, user_id, EndPolicy::Manual)
    }

    fn holen_oder_erstellen(
        &self,
        kind: StreamKind,
        user_id: UserId,
        end_policy: EndPolicy,
    ) -> StreamHandle {
        let map = self.map_fuer(kind);
        match map.entry(user_id) {
            Entry::Occupied(mut besetzt) => {
                if let Some(kern) = besetzt.get().rx_slot.upgrade() {
                    return StreamHandle { kern };
                }
                // Konsument hat den alten Stream geschlossen -> neuer Kanal
                let (eintrag, handle) = self.eintrag_erstellen(kind, user_id, end_policy);
                besetzt.insert(eintrag);
                handle
            }
            Entry::Vacant(frei) => {
                let (eintrag, handle) = self.eintrag_erstellen(kind, user_id, end_policy);
                frei.insert(eintrag);
                tracing::debug!(user_id = %user_id, ?kind, "Stream erstellt");
                handle
            }
        }
    }

    fn eintrag_erstellen(
        &self,
        kind: StreamKind,
        user_id: UserId,
        end_policy: EndPolicy,
    ) -> (SinkEintrag, StreamHandle) {
        let (tx, rx) = mpsc::channel(self.inner.queue_groesse);
        let kern = Arc::new(HandleKern {
            user_id,
            kind,
            rx: Mutex::new(rx),
            registry: Arc::downgrade(&self.inner),
        });
        let eintrag = SinkEintrag {
            tx,
            end_policy,
            rx_slot: Arc::downgrade(&kern),
        };
        (eintrag, StreamHandle { kern })
    }

    /// Stellt Nutzdaten an den registrierten Sink zu
    ///
    /// No-Op wenn kein Stream registriert ist. Bei voller Queue wird das
    /// Paket verworfen (UDP-Semantik, nicht-blockierend). Ein geschlossener
    /// Konsument wird hier erkannt und der Eintrag entfernt.
    ///
    /// Gibt `true` zurueck wenn ein lebendiger Sink registriert war.
    pub fn zustellen(&self, user_id: &UserId, kind: StreamKind, nutzdaten: Bytes) -> bool {
        let map = self.map_fuer(kind);
        let tx = match map.get(user_id) {
            Some(eintrag) => eintrag.tx.clone(),
            None => return false,
        };

        match tx.try_send(nutzdaten) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(user_id = %user_id, ?kind, "Stream-Queue voll – Paket verworfen");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Normalfall ist die Deregistrierung durch den Drop-Guard;
                // hier wird nur ein verbliebener Eintrag nachgeraeumt
                if map.remove(user_id).is_some() {
                    tracing::debug!(user_id = %user_id, ?kind, "Toten Stream-Eintrag entfernt");
                }
                false
            }
        }
    }

    /// Stellt Audio zu oder beendet den Sink beim Silence-End-Marker
    ///
    /// Ein Silence-Frame beendet Sinks mit [`EndPolicy::OnSilence`];
    /// an `Manual`-Sinks wird er als normales Paket zugestellt.
    pub fn audio_zustellen(&self, user_id: &UserId, nutzdaten: Bytes, ist_silence: bool) {
        if ist_silence {
            let policy = self.inner.audio.get(user_id).map(|e| e.end_policy);
            if policy == Some(EndPolicy::OnSilence) {
                self.signal_end(user_id);
                return;
            }
        }
        self.zustellen(user_id, StreamKind::Audio, nutzdaten);
    }

    /// Beendet den Audio-Sink eines Benutzers, falls er `OnSilence` ist
    ///
    /// Der Sender wird fallen gelassen; der Konsument sieht das natuerliche
    /// Stream-Ende (`empfangen()` -> `None`). Idempotent.
    pub fn signal_end(&self, user_id: &UserId) {
        let entfernt = self
            .inner
            .audio
            .remove_if(user_id, |_, e| e.end_policy == EndPolicy::OnSilence);
        if entfernt.is_some() {
            tracing::debug!(user_id = %user_id, "Audio-Stream nach Silence beendet");
        }
    }

    /// Prueft ob fuer den Benutzer irgendein Sink registriert ist
    ///
    /// Grundlage der Fehler-Sichtbarkeitsregel: Paketfehler werden nur
    /// gemeldet wenn jemand zuhoert.
    pub fn hat_stream(&self, user_id: &UserId) -> bool {
        self.inner.audio.contains_key(user_id) || self.inner.video.contains_key(user_id)
    }

    /// Schliesst alle Sinks (Session-Teardown)
    ///
    /// Konsumenten sehen das natuerliche Stream-Ende genau einmal; ein
    /// gleichzeitiges Konsumenten-Close ist unkritisch (Entfernen ist
    /// idempotent).
    pub fn alle_schliessen(&self) {
        let audio = self.inner.audio.len();
        let video = self.inner.video.len();
        self.inner.audio.clear();
        self.inner.video.clear();
        if audio + video > 0 {
            tracing::info!(audio, video, "Alle Streams geschlossen");
        }
    }

    /// Anzahl registrierter Audio-Streams
    pub fn audio_anzahl(&self) -> usize {
        self.inner.audio.len()
    }

    /// Anzahl registrierter Video-Streams
    pub fn video_anzahl(&self) -> usize {
        self.inner.video.len()
    }

    fn map_fuer(&self, kind: StreamKind) -> &DashMap<UserId, SinkEintrag> {
        match kind {
            StreamKind::Audio => &self.inner.audio,
            StreamKind::Video => &self.inner.video,
        }
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn nutzdaten(byte: u8) -> Bytes {
        Bytes::from(vec![byte; 8])
    }

    #[tokio::test]
    async fn audio_stream_erstellen_ist_idempotent() {
        let registry = StreamRegistry::neu();
        let uid = UserId::new();

        let h1 = registry.audio_stream(uid, EndPolicy::OnSilence);
        let h2 = registry.audio_stream(uid, EndPolicy::Manual);

        // Beide Handles zeigen auf denselben Kanal, keine Doppel-Registrierung
        assert!(Arc::ptr_eq(&h1.kern, &h2.kern));
        assert_eq!(registry.audio_anzahl(), 1);

        registry.zustellen(&uid, StreamKind::Audio, nutzdaten(0xAB));
        assert_eq!(h1.empfangen().await.unwrap(), nutzdaten(0xAB));
    }

    #[tokio::test]
    async fn zustellen_ohne_stream_ist_noop() {
        let registry = StreamRegistry::neu();
        let uid = UserId::new();

        assert!(!registry.zustellen(&uid, StreamKind::Audio, nutzdaten(1)));
        assert!(!registry.hat_stream(&uid));
    }

    #[tokio::test]
    async fn konsument_schliesst_stream() {
        let registry = StreamRegistry::neu();
        let uid = UserId::new();

        let handle = registry.audio_stream(uid, EndPolicy::Manual);
        assert!(registry.hat_stream(&uid));
        drop(handle);

        // Drop-Guard hat den Eintrag bereits vor dem Zustellversuch entfernt
        assert_eq!(registry.audio_anzahl(), 0);
        assert!(!registry.zustellen(&uid, StreamKind::Audio, nutzdaten(1)));
    }

    #[tokio::test]
    async fn handle_drop_deregistriert_sofort() {
        let registry = StreamRegistry::neu();
        let uid = UserId::new();

        let handle = registry.video_stream(uid);
        assert!(registry.hat_stream(&uid));

        // Ohne jeden Zustellversuch: der Eintrag verschwindet beim Drop,
        // hat_stream meldet den Benutzer sofort als unbeobachtet
        drop(handle);
        assert!(!registry.hat_stream(&uid));
        assert_eq!(registry.video_anzahl(), 0);
    }

    #[tokio::test]
    async fn letztes_handle_schliesst_den_stream() {
        let registry = StreamRegistry::neu();
        let uid = UserId::new();

        let h1 = registry.audio_stream(uid, EndPolicy::Manual);
        let h2 = h1.clone();

        drop(h1);
        assert!(registry.hat_stream(&uid), "Klon haelt den Stream am Leben");

        registry.zustellen(&uid, StreamKind::Audio, nutzdaten(3));
        assert_eq!(h2.empfangen().await.unwrap(), nutzdaten(3));

        drop(h2);
        assert!(!registry.hat_stream(&uid));
    }

    #[tokio::test]
    async fn neuer_stream_nach_konsumenten_close() {
        let registry = StreamRegistry::neu();
        let uid = UserId::new();

        let alt = registry.audio_stream(uid, EndPolicy::Manual);
        drop(alt);

        // Nach dem Drop ist der alte Eintrag weg; der Aufruf erstellt frisch
        let neu = registry.audio_stream(uid, EndPolicy::Manual);
        registry.zustellen(&uid, StreamKind::Audio, nutzdaten(7));
        assert_eq!(neu.empfangen().await.unwrap(), nutzdaten(7));
    }

    #[tokio::test]
    async fn signal_end_beendet_nur_on_silence() {
        let registry = StreamRegistry::neu();
        let uid_silence = UserId::new();
        let uid_manual = UserId::new();

        let h_silence = registry.audio_stream(uid_silence, EndPolicy::OnSilence);
        let h_manual = registry.audio_stream(uid_manual, EndPolicy::Manual);

        registry.signal_end(&uid_silence);
        registry.signal_end(&uid_manual);

        // OnSilence-Sink sieht das natuerliche Ende
        assert!(h_silence.empfangen().await.is_none());
        assert_eq!(registry.audio_anzahl(), 1, "Manual-Sink bleibt registriert");

        registry.zustellen(&uid_manual, StreamKind::Audio, nutzdaten(2));
        assert_eq!(h_manual.empfangen().await.unwrap(), nutzdaten(2));
    }

    #[tokio::test]
    async fn audio_zustellen_silence_semantik() {
        let registry = StreamRegistry::neu();
        let uid_silence = UserId::new();
        let uid_manual = UserId::new();

        let h_silence = registry.audio_stream(uid_silence, EndPolicy::OnSilence);
        let h_manual = registry.audio_stream(uid_manual, EndPolicy::Manual);

        let silence = Bytes::from_static(&[0xF8, 0xFF, 0xFE]);
        registry.audio_zustellen(&uid_silence, silence.clone(), true);
        registry.audio_zustellen(&uid_manual, silence.clone(), true);

        assert!(h_silence.empfangen().await.is_none(), "OnSilence endet");
        assert_eq!(
            h_manual.empfangen().await.unwrap(),
            silence,
            "Manual erhaelt den Silence-Frame als Paket"
        );
    }

    #[tokio::test]
    async fn video_stream_endet_nicht_durch_silence() {
        let registry = StreamRegistry::neu();
        let uid = UserId::new();

        let handle = registry.video_stream(uid);
        registry.signal_end(&uid);

        assert_eq!(registry.video_anzahl(), 1);
        registry.zustellen(&uid, StreamKind::Video, nutzdaten(9));
        assert_eq!(handle.empfangen().await.unwrap(), nutzdaten(9));
    }

    #[tokio::test]
    async fn alle_schliessen_gibt_sinks_frei() {
        let registry = StreamRegistry::neu();
        let uid = UserId::new();

        let audio = registry.audio_stream(uid, EndPolicy::Manual);
        let video = registry.video_stream(uid);

        registry.alle_schliessen();
        // Zweiter Aufruf ist idempotent
        registry.alle_schliessen();

        assert!(audio.empfangen().await.is_none());
        assert!(video.empfangen().await.is_none());
        assert_eq!(registry.audio_anzahl(), 0);
        assert_eq!(registry.video_anzahl(), 0);
    }

    #[tokio::test]
    async fn volle_queue_verwirft_pakete() {
        let registry = StreamRegistry::mit_queue_groesse(2);
        let uid = UserId::new();
        let handle = registry.audio_stream(uid, EndPolicy::Manual);

        for i in 0..5u8 {
            registry.zustellen(&uid, StreamKind::Audio, nutzdaten(i));
        }

        // Nur die ersten beiden Pakete passen in die Queue
        assert_eq!(handle.empfangen().await.unwrap(), nutzdaten(0));
        assert_eq!(handle.empfangen().await.unwrap(), nutzdaten(1));
        assert!(registry.hat_stream(&uid), "Stream bleibt trotz Drop registriert");
    }
}

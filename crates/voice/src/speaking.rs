//! Speaking-Debouncer – flankengetriggerte Start/Stop-Ereignisse pro SSRC
//!
//! Uebersetzt "ein Paket ist angekommen" in entprellte Sprecher-Ereignisse:
//! das erste Paket einer SSRC loest ein Start-Ereignis aus und armiert einen
//! One-Shot-Timer; jedes weitere Paket setzt nur die Deadline des bestehenden
//! Timers zurueck (Kern der Entprellung). Laeuft der Timer ab, wird ein
//! Stop-Ereignis gemeldet und der Eintrag entfernt.
//!
//! Der Timer ist ein abbrechbarer tokio-Task pro SSRC, der ueber einen
//! watch-Kanal zurueckgesetzt wird – er wird pro Paket NICHT neu erstellt
//! und haelt den Prozess nicht alleine am Leben. [`alle_abbrechen`] bricht
//! beim Session-Teardown alle ausstehenden Timer synchron ab.
//!
//! [`alle_abbrechen`]: SpeakingDebouncer::alle_abbrechen

use crate::session::SsrcEintrag;
use dashmap::DashMap;
use earshot_core::event::SpeakingEvent;
use earshot_core::types::UserId;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Ruhefenster nach dem letzten Paket bis zum Stop-Ereignis
///
/// 250 ms liegen sicher ueber normalen Inter-Paket-Abstaenden (20 ms
/// Opus-Frames) und fuehlen sich trotzdem noch reaktionsschnell an.
pub const SPRECH_PAUSE: Duration = Duration::from_millis(250);

/// Standard-Bitmask fuer Start-Ereignisse wenn das Verzeichnis keine kennt
pub const STANDARD_SPEAKING_FLAG: u16 = 0x0001;

// ---------------------------------------------------------------------------
// SpeakingDebouncer
// ---------------------------------------------------------------------------

/// Eintrag eines aktuell sprechenden Teilnehmers
struct SprecherEintrag {
    user_id: UserId,
    /// Setzt die Timer-Deadline zurueck (letzter Schreiber gewinnt)
    reset_tx: watch::Sender<Instant>,
    /// Timer-Task – wird beim Teardown abgebrochen
    timer: JoinHandle<()>,
}

/// Debouncer-Zustand aller SSRCs einer Session
///
/// Thread-safe und `Clone`-faehig (innerer Arc). Nur SSRCs, die im
/// Verzeichnis bekannt sind, betreten die Zustandsmaschine – der Router
/// filtert unbekannten Verkehr vorher.
#[derive(Clone)]
pub struct SpeakingDebouncer {
    inner: Arc<DebouncerInner>,
}

struct DebouncerInner {
    /// SSRC -> Timer-Eintrag; existiert genau zwischen Start und Stop
    sprecher: DashMap<u32, SprecherEintrag>,
    /// SSRCs, fuer die bereits eine Ersatz-Bitmask gewaehlt wurde
    ///
    /// Ersetzt die implizite Mutation des geteilten Verzeichnis-Eintrags:
    /// der Latch gehoert dem Debouncer, das Verzeichnis bleibt unangetastet.
    initial_flags: DashMap<u32, u16>,
    notify_tx: mpsc::Sender<SpeakingEvent>,
    pause: Duration,
}

impl SpeakingDebouncer {
    /// Erstellt einen Debouncer mit dem Standard-Ruhefenster (250 ms)
    pub fn neu(notify_tx: mpsc::Sender<SpeakingEvent>) -> Self {
        Self::mit_pause(notify_tx, SPRECH_PAUSE)
    }

    /// Erstellt einen Debouncer mit eigenem Ruhefenster
    pub fn mit_pause(notify_tx: mpsc::Sender<SpeakingEvent>, pause: Duration) -> Self {
        Self {
            inner: Arc::new(DebouncerInner {
                sprecher: DashMap::new(),
                initial_flags: DashMap::new(),
                notify_tx,
                pause,
            }),
        }
    }

    /// Meldet ein eingetroffenes Paket fuer eine SSRC
    ///
    /// Idle -> Speaking: Start-Ereignis + Timer armieren.
    /// Speaking -> Speaking: nur die Deadline zuruecksetzen.
    pub fn paket_beobachtet(&self, ssrc: u32, eintrag: &SsrcEintrag) {
        let neue_deadline = Instant::now() + self.inner.pause;

        if let Some(sprecher) = self.inner.sprecher.get(&ssrc) {
            // Bestehender Timer wird zurueckgesetzt, nicht neu erstellt
            let _ = sprecher.reset_tx.send(neue_deadline);
            return;
        }

        // Idle -> Speaking Flanke
        let flags = if eintrag.speaking_flags != 0 {
            eintrag.speaking_flags
        } else {
            // Ersatz-Bitmask hoechstens einmal pro Session waehlen
            *self
                .inner
                .initial_flags
                .entry(ssrc)
                .or_insert(STANDARD_SPEAKING_FLAG)
        };

        let start = SpeakingEvent::start(eintrag.user_id, ssrc, flags);
        if self.inner.notify_tx.try_send(start).is_err() {
            tracing::debug!(ssrc, "Speaking-Start nicht zustellbar – verworfen");
        }
        tracing::trace!(ssrc, user_id = %eintrag.user_id, "Speaking-Start");

        let (reset_tx, timer) = self.timer_starten(ssrc, eintrag.user_id, neue_deadline);
        self.inner.sprecher.insert(
            ssrc,
            SprecherEintrag {
                user_id: eintrag.user_id,
                reset_tx,
                timer,
            },
        );
    }

    /// Startet den One-Shot-Timer-Task fuer eine SSRC
    fn timer_starten(
        &self,
        ssrc: u32,
        user_id: UserId,
        deadline: Instant,
    ) -> (watch::Sender<Instant>, JoinHandle<()>) {
        let (reset_tx, mut reset_rx) = watch::channel(deadline);
        let inner: Weak<DebouncerInner> = Arc::downgrade(&self.inner);

        let timer = tokio::spawn(async move {
            loop {
                let deadline = *reset_rx.borrow_and_update();
                tokio::select! {
                    biased;
                    geaendert = reset_rx.changed() => {
                        if geaendert.is_err() {
                            // Sender weg (Eintrag entfernt) -> Timer beenden
                            break;
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        // Ein Reset kann nach Ablauf der alten Deadline, aber
                        // vor dem naechsten Poll eintreffen. Letzter Schreiber
                        // gewinnt: erst nachlesen, dann feuern.
                        if *reset_rx.borrow_and_update() > deadline {
                            continue;
                        }
                        if let Some(inner) = inner.upgrade() {
                            inner.sprecher.remove(&ssrc);
                            // Zustellfehler nach Session-Ende wird geschluckt,
                            // der Eintrag ist trotzdem bereinigt
                            let stop = SpeakingEvent::stop(user_id, ssrc);
                            let _ = inner.notify_tx.try_send(stop);
                            tracing::trace!(ssrc, user_id = %user_id, "Speaking-Stop");
                        }
                        break;
                    }
                }
            }
        });

        (reset_tx, timer)
    }

    /// Gibt alle aktuell sprechenden Teilnehmer zurueck
    pub fn aktive_sprecher(&self) -> Vec<(UserId, u32)> {
        self.inner
            .sprecher
            .iter()
            .map(|e| (e.user_id, *e.key()))
            .collect()
    }

    /// Bricht alle ausstehenden Timer ab (Session-Teardown)
    ///
    /// Es werden keine Stop-Ereignisse mehr erzeugt. Idempotent.
    pub fn alle_abbrechen(&self) {
        let ssrcs: Vec<u32> = self.inner.sprecher.iter().map(|e| *e.key()).collect();
        for ssrc in ssrcs {
            if let Some((_, eintrag)) = self.inner.sprecher.remove(&ssrc) {
                eintrag.timer.abort();
            }
        }
        self.inner.initial_flags.clear();
        tracing::debug!("Alle Speaking-Timer abgebrochen");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn test_eintrag(flags: u16) -> SsrcEintrag {
        SsrcEintrag {
            user_id: UserId::new(),
            has_video: false,
            speaking_flags: flags,
        }
    }

    fn kanal() -> (mpsc::Sender<SpeakingEvent>, mpsc::Receiver<SpeakingEvent>) {
        mpsc::channel(32)
    }

    #[tokio::test(start_paused = true)]
    async fn eine_start_stop_flanke_pro_burst() {
        let (tx, mut rx) = kanal();
        let debouncer = SpeakingDebouncer::neu(tx);
        let eintrag = test_eintrag(0);

        // Burst: Pakete alle 100 ms, deutlich unter dem 250-ms-Fenster
        debouncer.paket_beobachtet(0x10, &eintrag);
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            debouncer.paket_beobachtet(0x10, &eintrag);
        }

        let start = rx.try_recv().expect("genau ein Start-Ereignis");
        assert!(start.spricht());
        assert_eq!(start.user_id, eintrag.user_id);
        assert!(rx.try_recv().is_err(), "kein zweites Start-Ereignis im Burst");
        assert_eq!(debouncer.aktive_sprecher().len(), 1);

        // Ruhefenster verstreichen lassen
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stop = rx.try_recv().expect("genau ein Stop-Ereignis");
        assert!(!stop.spricht());
        assert_eq!(stop.ssrc, 0x10);
        assert!(rx.try_recv().is_err());
        assert!(debouncer.aktive_sprecher().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_ueber_fenster_erzeugt_zweites_paar() {
        let (tx, mut rx) = kanal();
        let debouncer = SpeakingDebouncer::neu(tx);
        let eintrag = test_eintrag(0);

        debouncer.paket_beobachtet(7, &eintrag);
        tokio::time::sleep(Duration::from_millis(300)).await;
        debouncer.paket_beobachtet(7, &eintrag);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut starts = 0;
        let mut stops = 0;
        while let Ok(event) = rx.try_recv() {
            if event.spricht() {
                starts += 1;
            } else {
                stops += 1;
            }
        }
        assert_eq!(starts, 2);
        assert_eq!(stops, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_bitmask_nie_null() {
        let (tx, mut rx) = kanal();
        let debouncer = SpeakingDebouncer::neu(tx);

        // Verzeichnis kennt keine Flags -> Ersatz-Bitmask
        let ohne_flags = test_eintrag(0);
        debouncer.paket_beobachtet(1, &ohne_flags);
        assert_eq!(rx.try_recv().unwrap().speaking, STANDARD_SPEAKING_FLAG);

        // Verzeichnis-Flags haben Vorrang
        let mit_flags = test_eintrag(0x0005);
        debouncer.paket_beobachtet(2, &mit_flags);
        assert_eq!(rx.try_recv().unwrap().speaking, 0x0005);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_nach_abgelaufener_deadline_gewinnt() {
        let (tx, mut rx) = kanal();
        let debouncer = SpeakingDebouncer::neu(tx);
        let eintrag = test_eintrag(1);

        // Die Deadline verstreicht bevor der Timer-Task wieder gepollt wird;
        // erst danach landet der Reset des naechsten Pakets. Der spaetere
        // Reset muss gewinnen, auch wenn Timer-Ablauf und Reset beim
        // naechsten Poll gleichzeitig anstehen.
        for _ in 0..50 {
            debouncer.paket_beobachtet(0x77, &eintrag);
            let _ = rx.try_recv();

            tokio::time::advance(Duration::from_millis(300)).await;
            if debouncer.aktive_sprecher().is_empty() {
                // Timer hat regulaer gefeuert bevor ein Reset anstand
                let _ = rx.try_recv();
                continue;
            }

            debouncer.paket_beobachtet(0x77, &eintrag);
            for _ in 0..3 {
                tokio::task::yield_now().await;
            }
            assert_eq!(
                debouncer.aktive_sprecher().len(),
                1,
                "Reset nach Deadline-Ablauf ging verloren"
            );
            assert!(rx.try_recv().is_err(), "kein Stop trotz erfolgreichem Reset");

            // Zyklus sauber beenden
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert!(debouncer.aktive_sprecher().is_empty());
            let _ = rx.try_recv();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abbrechen_unterdrueckt_stop_ereignisse() {
        let (tx, mut rx) = kanal();
        let debouncer = SpeakingDebouncer::neu(tx);
        let eintrag = test_eintrag(1);

        debouncer.paket_beobachtet(0x42, &eintrag);
        let _ = rx.try_recv().expect("Start-Ereignis");

        debouncer.alle_abbrechen();
        assert!(debouncer.aktive_sprecher().is_empty());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err(), "kein Stop nach Teardown");

        // Teardown ist idempotent
        debouncer.alle_abbrechen();
    }

    #[tokio::test(start_paused = true)]
    async fn geschlossener_empfaenger_wird_geschluckt() {
        let (tx, rx) = kanal();
        let debouncer = SpeakingDebouncer::neu(tx);
        drop(rx);

        let eintrag = test_eintrag(1);
        debouncer.paket_beobachtet(9, &eintrag);
        assert_eq!(debouncer.aktive_sprecher().len(), 1);

        // Timer feuert ins Leere – Eintrag wird trotzdem bereinigt
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(debouncer.aktive_sprecher().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unabhaengige_ssrcs_haben_eigene_timer() {
        let (tx, mut rx) = kanal();
        let debouncer = SpeakingDebouncer::neu(tx);
        let a = test_eintrag(1);
        let b = test_eintrag(1);

        debouncer.paket_beobachtet(100, &a);
        tokio::time::sleep(Duration::from_millis(150)).await;
        debouncer.paket_beobachtet(200, &b);

        // SSRC 100 laeuft bei 250 ms ab, SSRC 200 erst bei 400 ms
        tokio::time::sleep(Duration::from_millis(150)).await;
        let sprecher = debouncer.aktive_sprecher();
        assert_eq!(sprecher.len(), 1);
        assert_eq!(sprecher[0].1, 200);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(debouncer.aktive_sprecher().is_empty());

        let ereignisse: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(ereignisse.len(), 4, "zwei Start- und zwei Stop-Ereignisse");
    }
}

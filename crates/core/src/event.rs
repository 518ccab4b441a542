//! Ereignis-Typen der Voice-Receive-Engine
//!
//! Sprecher-Ereignisse werden vom Debouncer flankengetriggert erzeugt
//! und ueber einen tokio-Kanal an die Verbindungsschicht gemeldet.

use crate::types::UserId;
use serde::{Deserialize, Serialize};

/// Sprecher-Zustandsaenderung eines Call-Teilnehmers
///
/// `speaking` ist eine Bitmask (0 = verstummt). Der Debouncer garantiert,
/// dass ein Start-Ereignis immer eine Bitmask != 0 traegt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakingEvent {
    /// Betroffener Benutzer
    pub user_id: UserId,
    /// SSRC des Streams, der das Ereignis ausgeloest hat
    pub ssrc: u32,
    /// Speaking-Bitmask (0 = Sprechen beendet)
    pub speaking: u16,
}

impl SpeakingEvent {
    /// Erstellt ein Start-Ereignis (Bitmask muss != 0 sein)
    pub fn start(user_id: UserId, ssrc: u32, speaking: u16) -> Self {
        debug_assert_ne!(speaking, 0, "Start-Ereignis braucht Bitmask != 0");
        Self {
            user_id,
            ssrc,
            speaking,
        }
    }

    /// Erstellt ein Stop-Ereignis
    pub fn stop(user_id: UserId, ssrc: u32) -> Self {
        Self {
            user_id,
            ssrc,
            speaking: 0,
        }
    }

    /// Prueft ob der Teilnehmer laut diesem Ereignis spricht
    pub fn spricht(&self) -> bool {
        self.speaking != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_und_stop_flanken() {
        let uid = UserId::new();
        let start = SpeakingEvent::start(uid, 0xCAFE, 1);
        assert!(start.spricht());

        let stop = SpeakingEvent::stop(uid, 0xCAFE);
        assert!(!stop.spricht());
        assert_eq!(stop.speaking, 0);
    }

    #[test]
    fn event_ist_serde_kompatibel() {
        let event = SpeakingEvent::start(UserId::new(), 42, 0x0005);
        let json = serde_json::to_string(&event).unwrap();
        let zurueck: SpeakingEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, zurueck);
    }
}

//! earshot-voice – Empfangs-Demultiplexer fuer verschluesselte Gruppen-Calls
//!
//! Sitzt zwischen dem verschluesselten RTP-Transport und den Media-Konsumenten
//! pro Sprecher: entschluesselt eingehende Datagramme, entfernt die optionale
//! RTP-Header-Extension, filtert Silence-Frames, leitet Nutzdaten an die
//! Audio-/Video-Sinks des jeweiligen Benutzers und erzeugt entprellte
//! Speaking-Start/Stop-Ereignisse.
//!
//! ## Module
//! - [`router`] – Packet-Router (Orchestrator des Empfangspfads)
//! - [`streams`] – Lazily erstellte Audio-/Video-Sinks pro Benutzer
//! - [`speaking`] – Speaking-Debouncer mit 250-ms-Ruhefenster
//! - [`session`] – Session-Krypto-Kontext und SSRC-Verzeichnis
//! - [`error`] – Fehlertypen
//!
//! ## Nebenlaeufigkeit
//! Eine Session wird single-threaded bedient: ein Datagramm wird vollstaendig
//! geroutet bevor das naechste akzeptiert wird. Mehrere Sessions sind
//! unabhaengig (eigene Router-Instanz, eigener Nonce-Puffer). Das einzige
//! asynchrone Element ist der Debounce-Timer ausserhalb des Hot Path.

pub mod error;
pub mod router;
pub mod session;
pub mod speaking;
pub mod streams;

pub use error::{VoiceError, VoiceResult};
pub use router::{PacketRouter, RouterConfig, SessionEvents};
pub use session::{CryptoSlot, SessionCrypto, SsrcDirectory, SsrcEintrag};
pub use speaking::{SpeakingDebouncer, SPRECH_PAUSE, STANDARD_SPEAKING_FLAG};
pub use streams::{EndPolicy, StreamHandle, StreamKind, StreamRegistry};

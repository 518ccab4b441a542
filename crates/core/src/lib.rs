//! earshot-core – Gemeinsame Typen und Ereignisse
//!
//! Dieses Crate stellt die fundamentalen Bausteine bereit, die von allen
//! anderen Earshot-Crates gemeinsam genutzt werden.

pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use event::SpeakingEvent;
pub use types::{SessionId, UserId};

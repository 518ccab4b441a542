//! earshot-protocol – RTP-Paketlayout (Empfangsrichtung)
//!
//! Definiert die Byte-Offsets des festen RTP-Headers, die Erkennung der
//! optionalen One-Byte-Header-Extension und den kanonischen Silence-Frame.
//! Alles hier ist reines Parsing ohne Seiteneffekte.

pub mod rtp;

pub use rtp::{
    extension_entfernen, ist_silence_frame, ssrc_lesen, EXTENSION_PROFIL, RTP_HEADER_LAENGE,
    SILENCE_FRAME,
};

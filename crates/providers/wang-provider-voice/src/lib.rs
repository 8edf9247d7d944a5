//! Speech synthesis provider for Wang Bot
//!
//! Implements [`wang_core::SpeechBackend`] over Google Cloud Text-to-Speech.
//!
//! ```no_run
//! use wang_provider_voice::{GoogleSpeechEngine, VoiceSettings};
//!
//! let engine = GoogleSpeechEngine::new(Some("api-key".into()), VoiceSettings::default());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod google;
mod types;

pub use google::GoogleSpeechEngine;
pub use types::{SpeechError, VoiceGender, VoiceSettings};

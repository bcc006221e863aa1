//! External capability collaborators: screen text recognition and speech
//! capture. Both are single-call wrappers around third-party providers with
//! no internal state; a missing provider surfaces as
//! [`error::CaptureError::MissingCapability`] naming the absent binary.

pub mod error;
pub mod screen;
pub mod voice;

pub use error::CaptureError;
pub use screen::{ScreenText, recognize_screen_text};
pub use voice::{VoiceCommand, recognize_speech};

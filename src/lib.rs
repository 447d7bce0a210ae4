/// Daily Quote Bot Library
/// 
/// This library provides the pieces of a once-a-day posting bot: configuration,
/// content catalogs and rotation, holiday overrides, persisted state, the
/// pre-flight gatekeeper, image generation, compositing and publishing.

pub mod compose;
pub mod config;
pub mod content;
pub mod gatekeeper;
pub mod holiday;
pub mod pipeline;
pub mod publish;
pub mod render;
pub mod selector;
pub mod state;

pub mod client;
pub mod messages;

pub use client::{AgentError, AgentSession, ElevenLabsSignedUrlMinter};
pub use messages::{ClientMessage, ServerMessage};

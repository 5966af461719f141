//! External HTTP surface (§6, "HTTP surface"). One module per concern,
//! mirroring the teacher's `api/` + `twilio/webhook.rs` split.

pub mod call_status;
pub mod outbound;
pub mod status;
pub mod twiml;

pub mod channel;
pub mod contact;
pub mod lead;
pub mod message;
pub mod outbox;
pub mod session;
pub mod tenant;
pub mod webhook;

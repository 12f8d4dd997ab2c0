pub mod adapter;
pub mod bridge;
pub mod registry;

pub use adapter::{
    AdapterError, ChannelAdapter, LoginCode, NoopChannelAdapter, SecondFactorVerdict, SendReceipt,
};
pub use bridge::{HttpBridgeAdapter, HttpBridgeSettings};
pub use registry::AdapterRegistry;

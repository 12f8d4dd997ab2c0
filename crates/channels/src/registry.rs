use std::collections::HashMap;
use std::sync::Arc;

use courier_core::domain::channel::Channel;

use crate::adapter::{ChannelAdapter, NoopChannelAdapter};

/// Channel-to-adapter lookup handed to the runtime services. Channels with no
/// configured bridge fall back to the noop adapter so callers always get an
/// adapter back and failures surface as transient delivery errors.
pub struct AdapterRegistry {
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self { adapters: HashMap::new() }
    }

    pub fn register(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(adapter.channel(), adapter);
        self
    }

    pub fn get(&self, channel: Channel) -> Arc<dyn ChannelAdapter> {
        match self.adapters.get(&channel) {
            Some(adapter) => Arc::clone(adapter),
            None => Arc::new(NoopChannelAdapter::new(channel)),
        }
    }

    pub fn configured(&self, channel: Channel) -> bool {
        self.adapters.contains_key(&channel)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use courier_core::domain::channel::Channel;
    use courier_core::domain::tenant::TenantId;
    use uuid::Uuid;

    use super::AdapterRegistry;
    use crate::adapter::{AdapterError, ChannelAdapter, NoopChannelAdapter};

    #[tokio::test]
    async fn unregistered_channel_falls_back_to_noop() {
        let registry = AdapterRegistry::new()
            .register(Arc::new(NoopChannelAdapter::new(Channel::Whatsapp)));

        assert!(registry.configured(Channel::Whatsapp));
        assert!(!registry.configured(Channel::Telegram));

        let adapter = registry.get(Channel::Telegram);
        assert_eq!(adapter.channel(), Channel::Telegram);

        let tenant_id = TenantId(Uuid::new_v4());
        let result = adapter.send(&tenant_id, "dana_dev", "hi", &[]).await;
        assert!(matches!(result, Err(AdapterError::Unreachable(_))));
    }
}

use serde::{Deserialize, Serialize};

/// Chat provider a tenant can be reached through.
///
/// Adding a provider means adding a variant here plus a `ChannelAdapter`
/// implementation; the engines never branch on concrete providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Whatsapp,
    Telegram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whatsapp => "whatsapp",
            Self::Telegram => "telegram",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "whatsapp" => Some(Self::Whatsapp),
            "telegram" => Some(Self::Telegram),
            _ => None,
        }
    }

    /// Providers that gate sending behind the interactive login flow.
    pub fn requires_login_session(&self) -> bool {
        match self {
            Self::Whatsapp => true,
            Self::Telegram => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Channel;

    #[test]
    fn channel_round_trips_from_storage_encoding() {
        for channel in [Channel::Whatsapp, Channel::Telegram] {
            assert_eq!(Channel::parse(channel.as_str()), Some(channel));
        }
    }

    #[test]
    fn unknown_channel_is_rejected() {
        assert_eq!(Channel::parse("carrier-pigeon"), None);
    }
}

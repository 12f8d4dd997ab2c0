//! Canonicalization rules behind identity resolution.
//!
//! The matching order itself (exact pass, canonical pass, create) is driven by
//! the ingestion pipeline; this module only answers "what identifier values
//! should be looked up" and "what is the canonical peer for this sender", so
//! the rules stay deterministic and unit-testable without storage.

use serde::{Deserialize, Serialize};

use crate::domain::channel::Channel;
use crate::domain::contact::{ChannelIdentifier, IdentifierKind, SenderIdentifiers};

/// Regional dialing quirk: numbers written with one leading digit sequence
/// that canonically starts with another (trunk prefixes and the like).
/// Tenant-configured; nothing regional is baked in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitSwap {
    pub match_prefix: String,
    pub replacement: String,
}

/// Tenant-configurable phone canonicalization strategy.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNormalization {
    /// Country prefix prepended to numbers that arrive in local format.
    pub default_country_prefix: Option<String>,
    pub leading_digit_swap: Option<DigitSwap>,
}

impl PhoneNormalization {
    /// Canonical digit string for a raw phone value, or `None` when the value
    /// has no digits at all. Formatting punctuation is always stripped; the
    /// configured swap and country-prefix rules apply afterwards, in that
    /// order.
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        let mut digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return None;
        }

        if let Some(swap) = &self.leading_digit_swap {
            if digits.starts_with(&swap.match_prefix) {
                digits = format!("{}{}", swap.replacement, &digits[swap.match_prefix.len()..]);
            }
        }

        if let Some(prefix) = &self.default_country_prefix {
            if !digits.starts_with(prefix.as_str()) {
                digits = format!("{prefix}{digits}");
            }
        }

        Some(digits)
    }
}

/// Canonical peer string per provider convention.
pub fn normalize_peer(channel: Channel, raw: &str, normalization: &PhoneNormalization) -> String {
    match channel {
        Channel::Whatsapp => {
            // Peers arrive either as bare numbers or as jid-style
            // `<digits>@<host>` strings.
            let bare = raw.split('@').next().unwrap_or(raw);
            normalization.canonicalize(bare).unwrap_or_else(|| bare.trim().to_string())
        }
        Channel::Telegram => raw.trim().trim_start_matches('@').to_ascii_lowercase(),
    }
}

/// Lookup values for the two resolution passes: identifiers exactly as
/// presented, then canonicalized variants that differ from the raw form.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolutionCandidates {
    pub exact: Vec<ChannelIdentifier>,
    pub canonical: Vec<ChannelIdentifier>,
}

pub fn resolution_candidates(
    sender: &SenderIdentifiers,
    channel: Channel,
    normalization: &PhoneNormalization,
) -> ResolutionCandidates {
    let exact = sender.as_identifiers();
    let mut canonical = Vec::new();

    if let Some(phone) = &sender.phone {
        if let Some(canon) = normalization.canonicalize(phone) {
            if &canon != phone {
                canonical.push(ChannelIdentifier::new(IdentifierKind::Phone, canon));
            }
        }
    }
    if let Some(raw_peer) = &sender.raw_peer {
        let canon = normalize_peer(channel, raw_peer, normalization);
        if &canon != raw_peer {
            canonical.push(ChannelIdentifier::new(IdentifierKind::RawPeer, canon));
        }
    }
    if let Some(username) = &sender.username {
        let canon = username.trim().trim_start_matches('@').to_ascii_lowercase();
        if &canon != username {
            canonical.push(ChannelIdentifier::new(IdentifierKind::Username, canon));
        }
    }

    ResolutionCandidates { exact, canonical }
}

/// Canonical identifier set to store on a newly created contact, deduplicated
/// across the raw and canonical forms.
pub fn stored_identifiers(
    sender: &SenderIdentifiers,
    channel: Channel,
    normalization: &PhoneNormalization,
) -> Vec<ChannelIdentifier> {
    let mut out = Vec::new();
    if let Some(value) = &sender.provider_user_id {
        out.push(ChannelIdentifier::new(IdentifierKind::ProviderUserId, value.clone()));
    }
    if let Some(phone) = &sender.phone {
        let value = normalization.canonicalize(phone).unwrap_or_else(|| phone.clone());
        out.push(ChannelIdentifier::new(IdentifierKind::Phone, value));
    }
    if let Some(username) = &sender.username {
        let value = username.trim().trim_start_matches('@').to_ascii_lowercase();
        out.push(ChannelIdentifier::new(IdentifierKind::Username, value));
    }
    if let Some(raw_peer) = &sender.raw_peer {
        let value = normalize_peer(channel, raw_peer, normalization);
        if !out.iter().any(|stored| stored.value == value) {
            out.push(ChannelIdentifier::new(IdentifierKind::RawPeer, value));
        }
    }
    out
}

/// The conversation key for this sender, per provider convention. `None` when
/// the envelope carries nothing addressable.
pub fn derive_peer(
    sender: &SenderIdentifiers,
    channel: Channel,
    normalization: &PhoneNormalization,
) -> Option<String> {
    if let Some(raw_peer) = &sender.raw_peer {
        return Some(normalize_peer(channel, raw_peer, normalization));
    }
    if let Some(phone) = &sender.phone {
        if let Some(canon) = normalization.canonicalize(phone) {
            return Some(canon);
        }
    }
    if let Some(user_id) = &sender.provider_user_id {
        return Some(user_id.clone());
    }
    sender
        .username
        .as_ref()
        .map(|username| username.trim().trim_start_matches('@').to_ascii_lowercase())
}

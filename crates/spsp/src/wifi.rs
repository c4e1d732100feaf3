// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wireless channel control capability.
//!
//! The local-layer engine needs to hop channels during bridge discovery and
//! pin the channel of the chosen bridge afterwards. How channels are actually
//! switched is platform business; the engine only sees this trait.

/// Usable wireless channel range, as restricted by the configured country.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelRestrictions {
    /// Lowest usable channel.
    pub low: u8,
    /// Highest usable channel.
    pub high: u8,
}

/// Channel control as required by the local-layer engine.
pub trait WifiChannelControl: Send + Sync + 'static {
    /// Currently configured channel.
    fn channel(&self) -> u8;

    /// Switches to `channel`.
    fn set_channel(&self, channel: u8);

    /// Channel bounds usable in the current regulatory domain.
    fn channel_restrictions(&self) -> ChannelRestrictions;
}

impl<W: WifiChannelControl + ?Sized> WifiChannelControl for std::sync::Arc<W> {
    fn channel(&self) -> u8 {
        (**self).channel()
    }

    fn set_channel(&self, channel: u8) {
        (**self).set_channel(channel);
    }

    fn channel_restrictions(&self) -> ChannelRestrictions {
        (**self).channel_restrictions()
    }
}

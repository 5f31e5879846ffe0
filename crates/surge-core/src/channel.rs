//! Channel name grammar.
//!
//! A channel name can carry several affixes, all configurable:
//!
//! - a private prefix (`$orders:...`) requiring a signed subscription,
//! - a namespace before the first namespace boundary (`chat:lobby`),
//! - a user allow-list after the last user boundary (`dialog#alice,bob`),
//! - a client allow-list after the last client boundary (`session&C1`).
//!
//! All functions here are total over any channel string and never panic.

use crate::config::Config;

/// Whether the channel requires a signed private subscription.
#[must_use]
pub fn is_private(config: &Config, channel: &str) -> bool {
    channel.starts_with(&config.channel_private_prefix)
}

/// Extract the namespace name from a channel.
///
/// The private prefix is stripped first; the namespace is everything before
/// the first namespace boundary, or empty when the channel lives in the root
/// namespace.
#[must_use]
pub fn namespace_name<'a>(config: &Config, channel: &'a str) -> &'a str {
    let rest = channel
        .strip_prefix(&config.channel_private_prefix)
        .unwrap_or(channel);
    match rest.split_once(&config.channel_namespace_boundary) {
        Some((namespace, _)) => namespace,
        None => "",
    }
}

/// Whether a user may subscribe to the channel.
///
/// The segment after the last user boundary is a separator-joined list of
/// allowed user ids. A channel without a user boundary admits every user.
#[must_use]
pub fn user_allowed(config: &Config, channel: &str, user: &str) -> bool {
    let Some((_, allowed)) = channel.rsplit_once(&config.channel_user_boundary) else {
        return true;
    };
    allowed
        .split(&config.channel_user_separator)
        .any(|candidate| candidate == user)
}

/// Whether a specific client connection may subscribe to the channel.
///
/// The segment after the last client boundary names a single allowed client
/// id. A channel without a client boundary admits every client.
#[must_use]
pub fn client_allowed(config: &Config, channel: &str, client: &str) -> bool {
    match channel.rsplit_once(&config.channel_client_boundary) {
        Some((_, allowed)) => allowed == client,
        None => true,
    }
}

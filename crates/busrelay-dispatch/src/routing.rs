//! Routing decision: which destinations receive a message.

use busrelay_core::DestinationConfig;
use tracing::warn;

use crate::transform::Record;

/// Default routing value: the discriminators of all default targets, comma separated.
#[must_use]
pub fn default_routing(destinations: &[DestinationConfig]) -> String {
    destinations
        .iter()
        .filter(|d| d.default_target)
        .map(|d| d.routing_discriminator.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Resolve the target set of `record`.
///
/// The routing field may hold one token or several separated by commas; each
/// token selects the destinations whose routing discriminator equals it.
/// Unknown tokens are logged and ignored. When nothing matches, the default
/// targets are used. The result keeps configuration order and has no
/// duplicates.
#[must_use]
pub fn resolve_targets<'a>(
    record: &Record,
    routing_field: &str,
    destinations: &'a [DestinationConfig],
) -> Vec<&'a DestinationConfig> {
    let tokens: Vec<String> = record
        .text(routing_field)
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    for token in &tokens {
        if !destinations.iter().any(|d| d.routing_discriminator == *token) {
            warn!(routing_field, token = %token, "Ignoring unknown routing token");
        }
    }

    let selected: Vec<&DestinationConfig> = destinations
        .iter()
        .filter(|d| tokens.iter().any(|t| *t == d.routing_discriminator))
        .collect();

    if selected.is_empty() {
        destinations.iter().filter(|d| d.default_target).collect()
    } else {
        selected
    }
}

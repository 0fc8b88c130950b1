//! Rule engine: resolves an event's origin to a destination set.
//!
//! Pure: no I/O, no state. The owner-self fallback is applied by the
//! dispatcher, not here.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::error::RuleError;
use crate::model::{AccountId, ChatId, RuleRecord};

/// Result of evaluating one owner's rules for one origin.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Union of destinations over all matching rules.
    pub destinations: BTreeSet<ChatId>,
    /// How many rules matched.
    pub matched: usize,
    /// Rules that could not be evaluated.
    pub skipped: Vec<RuleError>,
}

pub struct RuleEngine;

impl RuleEngine {
    /// Union the destinations of every rule owned by `owner` whose sources
    /// are empty or contain `origin`. Malformed rules are skipped.
    pub fn resolve_destinations(
        owner: AccountId,
        origin: ChatId,
        rules: &[RuleRecord],
    ) -> Resolution {
        let mut resolution = Resolution::default();

        for record in rules.iter().filter(|r| r.owner == owner) {
            let rule = match record.parse() {
                Ok(rule) => rule,
                Err(e) => {
                    warn!(account_id = owner, rule_id = %record.id, error = %e, "Skipping malformed rule");
                    resolution.skipped.push(e);
                    continue;
                }
            };

            if rule.matches(origin) {
                debug!(
                    account_id = owner,
                    rule_id = %rule.id,
                    destinations = ?rule.destinations,
                    "Rule matched"
                );
                resolution.matched += 1;
                resolution.destinations.extend(rule.destinations);
            }
        }

        resolution
    }
}

use thiserror::Error;

use crate::domain::{ApprovedSession, ChainId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("session does not cover {required}; approved chains: [{}]", approved.join(", "))]
pub struct ValidationFailure {
    pub required: ChainId,
    /// Chains present in the session, deduplicated in first-seen order.
    pub approved: Vec<String>,
}

/// Accept the session if `required` is listed in its namespace chains or is
/// the chain segment of any `namespace:chainId:address` account. Wallets that
/// omit `chains` and only fill `accounts` are therefore accepted.
pub fn validate_session(
    session: &ApprovedSession,
    required: &ChainId,
) -> Result<(), ValidationFailure> {
    let required_str = required.to_string();

    if let Some(ns) = session.namespaces.get(required.namespace()) {
        let in_chains = ns.chains.iter().any(|c| c.trim() == required_str);
        let in_accounts = ns.accounts.iter().any(|acc| {
            account_chain(acc).is_some_and(|(namespace, reference)| {
                namespace == required.namespace() && reference == required.reference()
            })
        });
        if in_chains || in_accounts {
            return Ok(());
        }
    }

    Err(ValidationFailure {
        required: required.clone(),
        approved: approved_chains(session),
    })
}

/// Every chain the session mentions, from `chains` and from account prefixes.
pub fn approved_chains(session: &ApprovedSession) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut push = |chain: String| {
        if !seen.contains(&chain) {
            seen.push(chain);
        }
    };
    for ns in session.namespaces.values() {
        for chain in &ns.chains {
            let chain = chain.trim();
            if !chain.is_empty() {
                push(chain.to_owned());
            }
        }
        for acc in &ns.accounts {
            if let Some((namespace, reference)) = account_chain(acc) {
                push(format!("{namespace}:{reference}"));
            }
        }
    }
    seen
}

fn account_chain(account: &str) -> Option<(&str, &str)> {
    let mut parts = account.trim().splitn(3, ':');
    let namespace = parts.next().filter(|s| !s.is_empty())?;
    let reference = parts.next().filter(|s| !s.is_empty())?;
    parts.next().filter(|s| !s.is_empty())?;
    Some((namespace, reference))
}

/*!
 * Join claims with pharmacy attributes and revert events
 */

use std::collections::{HashMap, HashSet};

use crate::config::UnknownPharmacyPolicy;
use crate::data_types::*;

/// A claim with its revert status attached
///
/// The claim's chain is looked up through [`JoinedClaims::chain_of`].
#[derive(Debug, Clone, Copy)]
pub struct JoinedClaim<'a> {
    pub claim: &'a ClaimRecord,
    pub reverted: bool,
}

/// Output of the join stage
#[derive(Debug, Clone)]
pub struct JoinedClaims<'a> {
    pub claims: Vec<JoinedClaim<'a>>,
    /// Pharmacy NPI to chain name
    pub chains: HashMap<&'a Npi, &'a str>,
    /// Claims seen with an unknown pharmacy, whether dropped or retained
    pub unknown_pharmacy_claims: usize,
    /// Revert events whose claim is not among the loaded claims
    pub unmatched_reverts: usize,
}

impl<'a> JoinedClaims<'a> {
    /// Map pharmacies to chains and flag reverted claims
    ///
    /// Under [`UnknownPharmacyPolicy::Drop`] claims with an unknown pharmacy are
    /// left out entirely. When several pharmacy records share an NPI the first
    /// one wins.
    pub fn build(
        pharmacies: &'a [PharmacyRecord],
        claims: &'a [ClaimRecord],
        reverts: &'a [RevertRecord],
        policy: UnknownPharmacyPolicy,
    ) -> Self {
        let mut chains: HashMap<&'a Npi, &'a str> = HashMap::with_capacity(pharmacies.len());
        for pharmacy in pharmacies {
            if let Some(existing) = chains.get(&pharmacy.npi) {
                if *existing != pharmacy.chain {
                    log::warn!(
                        "Pharmacy {} listed under both '{}' and '{}'; keeping '{}'",
                        pharmacy.npi, existing, pharmacy.chain, existing
                    );
                }
                continue;
            }
            chains.insert(&pharmacy.npi, pharmacy.chain.as_str());
        }

        let reverted_ids: HashSet<&ClaimId> = reverts.iter().map(|r| &r.claim_id).collect();

        let mut unknown_pharmacy_claims = 0;
        let mut joined = Vec::with_capacity(claims.len());
        for claim in claims {
            if !chains.contains_key(&claim.npi) {
                unknown_pharmacy_claims += 1;
                if policy == UnknownPharmacyPolicy::Drop {
                    continue;
                }
            }
            joined.push(JoinedClaim {
                claim,
                reverted: reverted_ids.contains(&claim.id),
            });
        }

        let claim_ids: HashSet<&ClaimId> = claims.iter().map(|c| &c.id).collect();
        let unmatched_reverts = reverted_ids
            .iter()
            .filter(|id| !claim_ids.contains(*id))
            .count();

        log::info!(
            "Joined {} of {} claims ({} with unknown pharmacy, policy {:?})",
            joined.len(),
            claims.len(),
            unknown_pharmacy_claims,
            policy
        );
        if unmatched_reverts > 0 {
            log::info!("{} revert(s) reference no loaded claim", unmatched_reverts);
        }

        Self {
            claims: joined,
            chains,
            unknown_pharmacy_claims,
            unmatched_reverts,
        }
    }

    /// Chain of a pharmacy, if known
    pub fn chain_of(&self, npi: &Npi) -> Option<&'a str> {
        self.chains.get(npi).copied()
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Joined claims that were reverted
    pub fn reverted_count(&self) -> usize {
        self.claims.iter().filter(|c| c.reverted).count()
    }
}

/*!
 * Aggregation of joined claims into the three reports
 *
 * - per (pharmacy, drug) claim metrics
 * - cheapest chains per drug
 * - most common prescribed quantities per drug
 *
 * Grouping goes through `BTreeMap`s so every report comes out in key order and
 * identical inputs produce identical output.
 */

use std::collections::{BTreeMap, HashMap};

use crate::config::{PipelineConfig, PriceBasis};
use crate::data_types::*;
use crate::join::JoinedClaims;

/// Analytics engine over a joined claim table
pub struct ClaimsAnalytics<'a> {
    joined: &'a JoinedClaims<'a>,
    price_basis: PriceBasis,
    top_chains: usize,
    top_quantities: usize,
}

#[derive(Default)]
struct MetricAccumulator {
    claim_count: usize,
    revert_count: usize,
    priced_claims: usize,
    unit_price_sum: f64,
    total_price: f64,
}

impl<'a> ClaimsAnalytics<'a> {
    /// Create an analytics engine with default ranking sizes
    pub fn new(joined: &'a JoinedClaims<'a>) -> Self {
        Self {
            joined,
            price_basis: PriceBasis::default(),
            top_chains: crate::constants::DEFAULT_TOP_CHAINS,
            top_quantities: crate::constants::DEFAULT_TOP_QUANTITIES,
        }
    }

    /// Create an analytics engine following a pipeline configuration
    pub fn with_config(joined: &'a JoinedClaims<'a>, config: &PipelineConfig) -> Self {
        Self::new(joined)
            .with_price_basis(config.price_basis)
            .with_top_chains(config.top_chains)
            .with_top_quantities(config.top_quantities)
    }

    pub fn with_price_basis(mut self, price_basis: PriceBasis) -> Self {
        self.price_basis = price_basis;
        self
    }

    pub fn with_top_chains(mut self, n: usize) -> Self {
        self.top_chains = n;
        self
    }

    pub fn with_top_quantities(mut self, n: usize) -> Self {
        self.top_quantities = n;
        self
    }

    /// Claim metrics per (pharmacy, drug), ordered by NPI then NDC
    ///
    /// Reverted claims count toward `claim_count` and `revert_count` only;
    /// prices cover non-reverted priced claims. A claim whose price would push
    /// the group's sums out of `f64` range counts as unpriced. A group with no
    /// priced claim reports zero prices.
    pub fn claim_metrics(&self) -> Vec<MetricRow> {
        let mut groups: BTreeMap<(&Npi, &Ndc), MetricAccumulator> = BTreeMap::new();

        for joined in &self.joined.claims {
            let claim = joined.claim;
            let acc = groups.entry((&claim.npi, &claim.ndc)).or_default();
            acc.claim_count += 1;

            if joined.reverted {
                acc.revert_count += 1;
                continue;
            }

            if let (true, Some(price), Some(quantity)) = (claim.is_priced(), claim.price, claim.quantity) {
                let (unit_price, line_total) = self.price_basis.split(price, quantity);
                let unit_price_sum = acc.unit_price_sum + unit_price;
                let total_price = acc.total_price + line_total;
                if !(unit_price_sum.is_finite() && total_price.is_finite()) {
                    log::debug!("Claim {} price out of range; counted as unpriced", claim.id);
                    continue;
                }
                acc.priced_claims += 1;
                acc.unit_price_sum = unit_price_sum;
                acc.total_price = total_price;
            }
        }

        groups
            .into_iter()
            .map(|((npi, ndc), acc)| MetricRow {
                npi: npi.clone(),
                ndc: ndc.clone(),
                claim_count: acc.claim_count,
                revert_count: acc.revert_count,
                avg_unit_price: if acc.priced_claims > 0 {
                    acc.unit_price_sum / acc.priced_claims as f64
                } else {
                    0.0
                },
                total_price: acc.total_price,
                priced_claims: acc.priced_claims,
            })
            .collect()
    }

    /// Cheapest chains per drug, ordered by NDC
    ///
    /// A chain's price for a drug is the mean of its pharmacies' average unit
    /// prices weighted by their priced claim counts. Pharmacies without a known
    /// chain and chains without priced claims are left out. Chains rank by
    /// price rounded to cents, then by name.
    pub fn chain_recommendations(&self, metrics: &[MetricRow]) -> Vec<RecommendationRow> {
        // ndc -> chain -> (weighted price sum, priced claims)
        let mut by_drug: BTreeMap<&Ndc, HashMap<&str, (f64, usize)>> = BTreeMap::new();

        for row in metrics {
            if row.priced_claims == 0 {
                continue;
            }
            let Some(chain) = self.joined.chain_of(&row.npi) else {
                continue;
            };
            let entry = by_drug.entry(&row.ndc).or_default().entry(chain).or_insert((0.0, 0));
            let weighted_sum = entry.0 + row.avg_unit_price * row.priced_claims as f64;
            if !weighted_sum.is_finite() {
                log::debug!("Price of {} at {} out of range; left out of chain {}", row.ndc, row.npi, chain);
                continue;
            }
            entry.0 = weighted_sum;
            entry.1 += row.priced_claims;
        }

        by_drug
            .into_iter()
            .map(|(ndc, chains)| {
                let mut ranked: Vec<ChainPrice> = chains
                    .into_iter()
                    .map(|(name, (weighted_sum, count))| ChainPrice {
                        name: name.to_string(),
                        avg_price: round_cents(weighted_sum / count as f64),
                    })
                    .collect();
                ranked.sort_by(|a, b| {
                    a.avg_price
                        .total_cmp(&b.avg_price)
                        .then_with(|| a.name.cmp(&b.name))
                });
                ranked.truncate(self.top_chains);
                RecommendationRow { ndc: ndc.clone(), chain: ranked }
            })
            .collect()
    }

    /// Most prescribed quantities per drug, ordered by NDC
    ///
    /// Every joined claim with a numeric quantity counts, reverted or not.
    /// Quantities rank by frequency, then by value ascending.
    pub fn common_quantities(&self) -> Vec<QuantityRow> {
        let mut by_drug: BTreeMap<&Ndc, HashMap<Quantity, usize>> = BTreeMap::new();

        for joined in &self.joined.claims {
            let Some(quantity) = joined.claim.quantity.and_then(Quantity::new) else {
                continue;
            };
            *by_drug
                .entry(&joined.claim.ndc)
                .or_default()
                .entry(quantity)
                .or_insert(0) += 1;
        }

        by_drug
            .into_iter()
            .map(|(ndc, counts)| {
                let mut ranked: Vec<QuantityCount> = counts
                    .into_iter()
                    .map(|(quantity, count)| QuantityCount { quantity, count })
                    .collect();
                ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.quantity.cmp(&b.quantity)));
                ranked.truncate(self.top_quantities);
                QuantityRow { ndc: ndc.clone(), most_prescribed_quantity: ranked }
            })
            .collect()
    }
}

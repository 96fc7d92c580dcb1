/*!
 * Data type definitions for pharmacy, claim, and revert records
 *
 * Input records are normalized from heterogeneous JSON/CSV sources; report rows
 * are the derived tables written by the pipeline.
 */

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize, Serializer};

/// The three kinds of input record the pipeline loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Pharmacy,
    Claim,
    Revert,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Pharmacy => write!(f, "pharmacy"),
            RecordKind::Claim => write!(f, "claims"),
            RecordKind::Revert => write!(f, "reverts"),
        }
    }
}

/// NPI (National Provider Identifier) of a pharmacy
///
/// Kept as text so identifiers with leading zeros survive CSV round trips.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Npi(pub String);

impl Npi {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Npi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Npi {
    fn from(s: &str) -> Self {
        Npi(s.to_string())
    }
}

/// NDC (National Drug Code)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ndc(pub String);

impl Ndc {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ndc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Ndc {
    fn from(s: &str) -> Self {
        Ndc(s.to_string())
    }
}

/// Identifier of a claim event, referenced by reverts
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimId(pub String);

impl ClaimId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ClaimId {
    fn from(s: &str) -> Self {
        ClaimId(s.to_string())
    }
}

/// Pharmacy reference data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PharmacyRecord {
    pub npi: Npi,
    pub chain: String,
}

/// A single claim event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: ClaimId,
    pub npi: Npi,
    pub ndc: Ndc,
    /// Prescribed quantity; `None` when absent or not numeric
    pub quantity: Option<f64>,
    /// Price as found in the source; see [`crate::config::PriceBasis`]
    pub price: Option<f64>,
    pub timestamp: Option<NaiveDateTime>,
}

impl ClaimRecord {
    /// Whether the claim carries a usable price and a positive quantity
    pub fn is_priced(&self) -> bool {
        matches!(
            (self.price, self.quantity),
            (Some(p), Some(q)) if p.is_finite() && q.is_finite() && q > 0.0
        )
    }
}

/// Cancellation of a prior claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevertRecord {
    pub id: Option<String>,
    pub claim_id: ClaimId,
    pub timestamp: Option<NaiveDateTime>,
}

/// A prescribed quantity usable as a grouping key
///
/// Equality and ordering follow `f64::total_cmp`; `-0.0` is folded into `0.0`
/// at construction so equal values hash equally.
#[derive(Debug, Clone, Copy)]
pub struct Quantity(f64);

impl Quantity {
    /// `None` for NaN and infinities
    pub fn new(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        Some(Quantity(if value == 0.0 { 0.0 } else { value }))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        // Whole quantities print as integers (30, not 30.0)
        if self.0.fract() == 0.0 && self.0.abs() < 9_007_199_254_740_992.0 {
            serializer.serialize_i64(self.0 as i64)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Round a price to cents
///
/// Values too large to scale are already beyond cent precision and come back
/// unchanged.
pub fn round_cents(value: f64) -> f64 {
    let scaled = value * 100.0;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / 100.0
}

fn serialize_cents<S: Serializer>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_f64(round_cents(*value))
}

/// Aggregate metrics for one (pharmacy, drug) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRow {
    pub npi: Npi,
    pub ndc: Ndc,
    /// All claims in the group, reverted ones included
    #[serde(rename = "fills")]
    pub claim_count: usize,
    #[serde(rename = "reverted")]
    pub revert_count: usize,
    /// Mean unit price over non-reverted priced claims (unrounded)
    #[serde(rename = "avg_price", serialize_with = "serialize_cents")]
    pub avg_unit_price: f64,
    #[serde(serialize_with = "serialize_cents")]
    pub total_price: f64,
    /// Number of claims behind `avg_unit_price`; weights chain averages
    #[serde(skip)]
    pub priced_claims: usize,
}

/// A chain and its average unit price for one drug
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainPrice {
    pub name: String,
    /// Rounded to cents
    pub avg_price: f64,
}

/// Cheapest chains for a drug, ascending by price
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationRow {
    pub ndc: Ndc,
    pub chain: Vec<ChainPrice>,
}

/// How often a quantity was prescribed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantityCount {
    pub quantity: Quantity,
    pub count: usize,
}

/// Most common quantities for a drug, descending by frequency
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuantityRow {
    pub ndc: Ndc,
    pub most_prescribed_quantity: Vec<QuantityCount>,
}

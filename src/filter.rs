// Results filtering and sorting
// Pure recomputation over an in-memory result list, callers rerun `apply`
// whenever the filter changes.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::offer::Offer;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterSpecError {
    #[error("Invalid price range: min {min} is greater than max {max}")]
    InvalidPriceRange { min: f64, max: f64 },

    #[error("Invalid hour range: {from}..{to} must satisfy 0 <= from <= to <= 24")]
    InvalidHourRange { from: u32, to: u32 },

    #[error("Price bound must be a finite number")]
    NonFinitePrice,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopFilter {
    #[default]
    Any,
    Nonstop,
    OneStop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
    // Keeps the order the search API returned
    #[default]
    Relevance,
    PriceAsc,
    PriceDesc,
    Duration,
    DepartureTime,
    ArrivalTime,
}

/// Inclusive price bounds. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPriceRange")]
pub struct PriceRange {
    min: Option<f64>,
    max: Option<f64>,
}

// Deserialized bounds are checked by `PriceRange::new`
#[derive(Deserialize)]
struct RawPriceRange {
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

impl TryFrom<RawPriceRange> for PriceRange {
    type Error = FilterSpecError;

    fn try_from(raw: RawPriceRange) -> Result<Self, Self::Error> {
        PriceRange::new(raw.min, raw.max)
    }
}

impl PriceRange {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Result<Self, FilterSpecError> {
        if min.iter().chain(max.iter()).any(|v| !v.is_finite()) {
            return Err(FilterSpecError::NonFinitePrice);
        }

        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(FilterSpecError::InvalidPriceRange { min, max });
            }
        }

        Ok(Self { min, max })
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn contains(&self, amount: f64) -> bool {
        if amount.is_nan() {
            return false;
        }
        self.min.map_or(true, |min| amount >= min) && self.max.map_or(true, |max| amount <= max)
    }
}

/// Hour-of-day window `[from, to)`. `to == 24` covers the last hour of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHourRange")]
pub struct HourRange {
    from: u32,
    to: u32,
}

#[derive(Deserialize)]
struct RawHourRange {
    from: u32,
    to: u32,
}

impl TryFrom<RawHourRange> for HourRange {
    type Error = FilterSpecError;

    fn try_from(raw: RawHourRange) -> Result<Self, Self::Error> {
        HourRange::new(raw.from, raw.to)
    }
}

impl Default for HourRange {
    fn default() -> Self {
        Self::FULL_DAY
    }
}

impl HourRange {
    pub const FULL_DAY: HourRange = HourRange { from: 0, to: 24 };

    pub fn new(from: u32, to: u32) -> Result<Self, FilterSpecError> {
        if from > to || to > 24 {
            return Err(FilterSpecError::InvalidHourRange { from, to });
        }
        Ok(Self { from, to })
    }

    pub fn start(&self) -> u32 {
        self.from
    }

    pub fn end(&self) -> u32 {
        self.to
    }

    pub fn is_full_day(&self) -> bool {
        *self == Self::FULL_DAY
    }

    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.from && hour < self.to
    }

    // An inactive window never excludes, even offers without timestamps
    fn admits(&self, hour: Option<u32>) -> bool {
        if self.is_full_day() {
            return true;
        }
        hour.map_or(false, |h| self.contains(h))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    pub price: PriceRange,
    pub carriers: BTreeSet<String>,
    pub stops: StopFilter,
    pub refundable_only: bool,
    pub departure_hours: HourRange,
    pub arrival_hours: HourRange,
    pub sort: SortKey,
}

impl FilterSpec {
    pub fn permissive() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, min: Option<f64>, max: Option<f64>) -> Result<Self, FilterSpecError> {
        self.price = PriceRange::new(min, max)?;
        Ok(self)
    }

    pub fn with_carriers<I, S>(mut self, carriers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.carriers = carriers.into_iter().map(Into::into).collect();
        self
    }

    pub fn toggle_carrier(mut self, carrier: &str) -> Self {
        if !self.carriers.remove(carrier) {
            self.carriers.insert(carrier.to_string());
        }
        self
    }

    pub fn with_stops(mut self, stops: StopFilter) -> Self {
        self.stops = stops;
        self
    }

    pub fn with_refundable_only(mut self, refundable_only: bool) -> Self {
        self.refundable_only = refundable_only;
        self
    }

    pub fn with_departure_hours(mut self, from: u32, to: u32) -> Result<Self, FilterSpecError> {
        self.departure_hours = HourRange::new(from, to)?;
        Ok(self)
    }

    pub fn with_arrival_hours(mut self, from: u32, to: u32) -> Result<Self, FilterSpecError> {
        self.arrival_hours = HourRange::new(from, to)?;
        Ok(self)
    }

    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    pub fn matches(&self, offer: &Offer) -> bool {
        let price_ok = self.price.contains(offer.price.amount);

        let carrier_ok = self.carriers.is_empty()
            || offer
                .carrier
                .as_ref()
                .map_or(false, |c| self.carriers.contains(c));

        let stops_ok = match self.stops {
            StopFilter::Any => true,
            StopFilter::Nonstop => offer.segment_count() == 1,
            StopFilter::OneStop => offer.segment_count() == 2,
        };

        let refund_ok = !self.refundable_only || offer.refundable;

        let departure_ok = self.departure_hours.admits(offer.departure_hour());
        let arrival_ok = self.arrival_hours.admits(offer.arrival_hour());

        price_ok && carrier_ok && stops_ok && refund_ok && departure_ok && arrival_ok
    }

    pub fn apply(&self, offers: &[Offer]) -> Vec<Offer> {
        apply(offers, self)
    }
}

/// Derive the displayed list: every offer satisfying all active predicates,
/// stably sorted by the requested key.
pub fn apply(offers: &[Offer], spec: &FilterSpec) -> Vec<Offer> {
    let mut filtered: Vec<Offer> = offers.iter().filter(|o| spec.matches(o)).cloned().collect();

    sort_offers(&mut filtered, spec.sort);

    debug!(
        total = offers.len(),
        shown = filtered.len(),
        sort = ?spec.sort,
        "filtered search results"
    );

    filtered
}

// Missing keys always sort last regardless of direction
fn cmp_optional<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

pub fn sort_offers(offers: &mut [Offer], key: SortKey) {
    match key {
        SortKey::Relevance => {}
        SortKey::PriceAsc => offers.sort_by(|a, b| a.price.amount.total_cmp(&b.price.amount)),
        SortKey::PriceDesc => offers.sort_by(|a, b| b.price.amount.total_cmp(&a.price.amount)),
        SortKey::Duration => offers.sort_by(|a, b| {
            cmp_optional(a.total_duration_minutes(), b.total_duration_minutes())
        }),
        SortKey::DepartureTime => offers.sort_by(|a, b| cmp_optional(a.departure(), b.departure())),
        SortKey::ArrivalTime => offers.sort_by(|a, b| cmp_optional(a.arrival(), b.arrival())),
    }
}

/// Summary of a result list used to seed filter controls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Facets {
    pub carriers: BTreeMap<String, usize>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub nonstop: usize,
    pub one_stop: usize,
    pub multi_stop: usize,
    pub refundable: usize,
}

impl Facets {
    pub fn from_offers(offers: &[Offer]) -> Self {
        let mut facets = Facets::default();

        for offer in offers {
            if let Some(carrier) = &offer.carrier {
                *facets.carriers.entry(carrier.clone()).or_insert(0) += 1;
            }

            let amount = offer.price.amount;
            if amount.is_finite() {
                facets.min_price = Some(facets.min_price.map_or(amount, |m| m.min(amount)));
                facets.max_price = Some(facets.max_price.map_or(amount, |m| m.max(amount)));
            }

            match offer.segment_count() {
                0 => {}
                1 => facets.nonstop += 1,
                2 => facets.one_stop += 1,
                _ => facets.multi_stop += 1,
            }

            if offer.refundable {
                facets.refundable += 1;
            }
        }

        facets
    }

    // Price bounds spanning every offer, so a fresh slider excludes nothing
    pub fn price_range(&self) -> PriceRange {
        PriceRange {
            min: self.min_price,
            max: self.max_price,
        }
    }
}

// Normalized search results shared by flights and hotels

use chrono::{DateTime, FixedOffset, Timelike};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferKind {
    Flight,
    Hotel,
}

// Whole currency units, the backend never sends minor units
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: f64,
    pub currency: String,
}

impl Price {
    pub fn new(amount: f64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub origin: String,
    pub destination: String,
    pub departure: Option<DateTime<FixedOffset>>,
    pub arrival: Option<DateTime<FixedOffset>>,
    pub flight_number: Option<String>,
}

/// A single priced, bookable result. Offers are produced wholesale by
/// ingestion and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub id: String,
    pub kind: OfferKind,
    pub name: Option<String>,
    pub carrier: Option<String>,
    pub price: Price,
    pub duration_minutes: Option<u32>,
    pub segments: Vec<Segment>,
    pub refundable: bool,
}

impl Offer {
    pub fn flight(id: impl Into<String>, carrier: impl Into<String>, price: Price) -> Self {
        Self {
            id: id.into(),
            kind: OfferKind::Flight,
            name: None,
            carrier: Some(carrier.into()),
            price,
            duration_minutes: None,
            segments: vec![],
            refundable: false,
        }
    }

    pub fn hotel(id: impl Into<String>, name: impl Into<String>, price: Price) -> Self {
        Self {
            id: id.into(),
            kind: OfferKind::Hotel,
            name: Some(name.into()),
            carrier: None,
            price,
            duration_minutes: None,
            segments: vec![],
            refundable: false,
        }
    }

    pub fn with_segments(mut self, segments: Vec<Segment>) -> Self {
        self.segments = segments;
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    pub fn refundable(mut self, refundable: bool) -> Self {
        self.refundable = refundable;
        self
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Number of intermediate stops, `None` when the offer carries no segments.
    pub fn stops(&self) -> Option<usize> {
        self.segments.len().checked_sub(1)
    }

    pub fn departure(&self) -> Option<DateTime<FixedOffset>> {
        self.segments.first().and_then(|s| s.departure)
    }

    pub fn arrival(&self) -> Option<DateTime<FixedOffset>> {
        self.segments.last().and_then(|s| s.arrival)
    }

    // Hours are taken in the timestamp's own offset, i.e. airport local time
    pub fn departure_hour(&self) -> Option<u32> {
        self.departure().map(|t| t.hour())
    }

    pub fn arrival_hour(&self) -> Option<u32> {
        self.arrival().map(|t| t.hour())
    }

    /// Explicit duration if the supplier sent one, otherwise departure to arrival.
    pub fn total_duration_minutes(&self) -> Option<u32> {
        if let Some(minutes) = self.duration_minutes {
            return Some(minutes);
        }

        let (dep, arr) = (self.departure()?, self.arrival()?);
        let minutes = (arr - dep).num_minutes();
        u32::try_from(minutes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc3339(s).ok()
    }

    fn leg(origin: &str, destination: &str, dep: &str, arr: &str) -> Segment {
        Segment {
            origin: origin.to_string(),
            destination: destination.to_string(),
            departure: ts(dep),
            arrival: ts(arr),
            flight_number: None,
        }
    }

    #[test]
    fn test_stops_from_segments() {
        let offer = Offer::flight("F1", "6E", Price::new(4200.0, "INR"));
        assert_eq!(offer.stops(), None);

        let offer = offer.with_segments(vec![
            leg("DEL", "BOM", "2025-03-01T06:00:00+05:30", "2025-03-01T08:10:00+05:30"),
            leg("BOM", "GOI", "2025-03-01T09:30:00+05:30", "2025-03-01T10:45:00+05:30"),
        ]);
        assert_eq!(offer.stops(), Some(1));
        assert_eq!(offer.segment_count(), 2);
    }

    #[test]
    fn test_local_hours_and_duration() {
        let offer = Offer::flight("F2", "AI", Price::new(5100.0, "INR")).with_segments(vec![leg(
            "DEL",
            "DXB",
            "2025-03-01T23:40:00+05:30",
            "2025-03-02T01:55:00+04:00",
        )]);

        assert_eq!(offer.departure_hour(), Some(23));
        assert_eq!(offer.arrival_hour(), Some(1));
        assert_eq!(offer.total_duration_minutes(), Some(225));

        let explicit = offer.clone().with_duration(230);
        assert_eq!(explicit.total_duration_minutes(), Some(230));
    }

    #[test]
    fn test_hotel_has_no_schedule() {
        let hotel = Offer::hotel("H1", "Sea View", Price::new(84.82, "GBP"));
        assert_eq!(hotel.departure_hour(), None);
        assert_eq!(hotel.total_duration_minutes(), None);
        assert_eq!(hotel.kind, OfferKind::Hotel);
    }
}

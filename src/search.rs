// Upstream search ingestion
// Normalizes supplier payloads into Offers. A document that cannot be read at
// all is an error; a single bad record is excluded and reported.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::offer::{Offer, OfferKind, Price, Segment};

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("XML parse error: {0}")]
    XmlParseError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(#[from] serde_json::Error),
}

/// A record excluded from the result list.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataShapeError {
    #[error("record {index}: malformed: {reason}")]
    Malformed { index: usize, reason: String },

    #[error("record {index}: missing {field}")]
    MissingField { index: usize, field: &'static str },

    #[error("record {index} ({id}): invalid price {value}")]
    InvalidPrice { index: usize, id: String, value: f64 },
}

#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub search_id: String,
    pub offers: Vec<Offer>,
    pub rejected: Vec<DataShapeError>,
}

impl SearchResults {
    fn reject(&mut self, err: DataShapeError) {
        warn!(error = %err, "excluded malformed search record");
        self.rejected.push(err);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightSearchResponse {
    #[serde(default)]
    search_id: String,
    currency: Option<String>,
    #[serde(default)]
    flights: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamFlight {
    id: Option<String>,
    airline_code: Option<String>,
    fare: Option<UpstreamFare>,
    #[serde(default)]
    segments: Vec<UpstreamSegment>,
    duration_minutes: Option<u32>,
    #[serde(default)]
    refundable: bool,
}

#[derive(Debug, Deserialize)]
struct UpstreamFare {
    base: Option<f64>,
    taxes: Option<f64>,
    total: Option<f64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamSegment {
    #[serde(default)]
    origin: String,
    #[serde(default)]
    destination: String,
    departure: Option<String>,
    arrival: Option<String>,
    flight_number: Option<String>,
}

/// Timestamps with an offset keep it; naive ones are taken as already local.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts);
    }

    let naive = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())?;

    FixedOffset::east_opt(0)?.from_local_datetime(&naive).single()
}

fn fare_total(fare: &UpstreamFare) -> Option<f64> {
    fare.total
        .or_else(|| Some(fare.base? + fare.taxes.unwrap_or(0.0)))
}

fn normalize_flight(
    index: usize,
    raw: serde_json::Value,
    default_currency: Option<&str>,
) -> Result<Offer, DataShapeError> {
    let flight: UpstreamFlight = serde_json::from_value(raw).map_err(|e| DataShapeError::Malformed {
        index,
        reason: e.to_string(),
    })?;

    let id = flight
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or(DataShapeError::MissingField { index, field: "id" })?;
    let fare = flight
        .fare
        .ok_or(DataShapeError::MissingField { index, field: "fare" })?;
    let amount = fare_total(&fare).ok_or(DataShapeError::MissingField {
        index,
        field: "fare.total",
    })?;

    if !amount.is_finite() || amount < 0.0 {
        return Err(DataShapeError::InvalidPrice {
            index,
            id,
            value: amount,
        });
    }

    let currency = fare
        .currency
        .or_else(|| default_currency.map(str::to_string))
        .ok_or(DataShapeError::MissingField {
            index,
            field: "fare.currency",
        })?;

    // Unreadable times stay None and simply fail time-based filters
    let segments = flight
        .segments
        .into_iter()
        .map(|s| Segment {
            origin: s.origin,
            destination: s.destination,
            departure: s.departure.as_deref().and_then(parse_timestamp),
            arrival: s.arrival.as_deref().and_then(parse_timestamp),
            flight_number: s.flight_number,
        })
        .collect();

    Ok(Offer {
        id,
        kind: OfferKind::Flight,
        name: None,
        carrier: flight.airline_code.filter(|c| !c.trim().is_empty()),
        price: Price::new(amount, currency),
        duration_minutes: flight.duration_minutes,
        segments,
        refundable: flight.refundable,
    })
}

/// Normalize a flight search response, keeping the supplier's order.
pub fn normalize_flights(json: &str) -> Result<SearchResults, ProcessingError> {
    let response: FlightSearchResponse = serde_json::from_str(json)?;

    let mut results = SearchResults {
        search_id: response.search_id,
        ..Default::default()
    };

    for (index, raw) in response.flights.into_iter().enumerate() {
        match normalize_flight(index, raw, response.currency.as_deref()) {
            Ok(offer) => results.offers.push(offer),
            Err(err) => results.reject(err),
        }
    }

    debug!(
        search_id = %results.search_id,
        offers = results.offers.len(),
        rejected = results.rejected.len(),
        "normalized flight search"
    );
    Ok(results)
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

#[derive(Default)]
struct PendingOption {
    price: Option<Result<Price, String>>,
    refundable: bool,
    token: Option<String>,
}

#[derive(Default)]
struct PendingHotel {
    code: Option<String>,
    name: Option<String>,
    meal_plan: Option<String>,
}

fn finish_option(index: usize, hotel: &PendingHotel, option: PendingOption) -> Result<Offer, DataShapeError> {
    let code = hotel
        .code
        .clone()
        .ok_or(DataShapeError::MissingField { index, field: "Hotel@code" })?;

    let price = match option.price {
        None => return Err(DataShapeError::MissingField { index, field: "Price" }),
        Some(Err(reason)) => return Err(DataShapeError::Malformed { index, reason }),
        Some(Ok(price)) => price,
    };

    let meal_plan = hotel.meal_plan.clone().unwrap_or_default();
    let id = option
        .token
        .unwrap_or_else(|| format!("{code}-{meal_plan}"));

    if !price.amount.is_finite() || price.amount < 0.0 {
        return Err(DataShapeError::InvalidPrice {
            index,
            id,
            value: price.amount,
        });
    }

    let name = match (&hotel.name, meal_plan.is_empty()) {
        (Some(name), false) => Some(format!("{name} ({meal_plan})")),
        (name, _) => name.clone(),
    };

    Ok(Offer {
        id,
        kind: OfferKind::Hotel,
        name,
        carrier: Some(code),
        price,
        duration_minutes: None,
        segments: vec![],
        refundable: option.refundable,
    })
}

fn read_price(e: &BytesStart<'_>) -> Result<Price, String> {
    let currency = attr(e, b"currency").ok_or("Price without currency")?;
    let amount = attr(e, b"amount")
        .ok_or("Price without amount")?
        .parse::<f64>()
        .map_err(|err| format!("bad amount: {err}"))?;
    Ok(Price { amount, currency })
}

/// Normalize an `AvailRS` hotel availability document: one offer per hotel
/// option (meal plan), priced by the option-level `Price`.
pub fn normalize_hotels_xml(xml: &str) -> Result<SearchResults, ProcessingError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut buf = Vec::new();

    let mut results = SearchResults::default();
    let mut hotel = PendingHotel::default();
    let mut option: Option<PendingOption> = None;
    let mut index = 0;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ProcessingError::XmlParseError(e.to_string()))?;

        match event {
            Event::Start(e) | Event::Empty(e) => match e.name().as_ref() {
                b"AvailRS" => {
                    if let Some(id) = attr(&e, b"searchId") {
                        results.search_id = id;
                    }
                }
                b"Hotel" => {
                    hotel = PendingHotel {
                        code: attr(&e, b"code"),
                        name: attr(&e, b"name"),
                        meal_plan: None,
                    };
                }
                b"MealPlan" => hotel.meal_plan = attr(&e, b"code"),
                b"Option" => {
                    option = Some(PendingOption {
                        refundable: true,
                        ..Default::default()
                    });
                }
                b"Price" => {
                    if let Some(opt) = option.as_mut() {
                        if opt.price.is_none() {
                            opt.price = Some(read_price(&e));
                        }
                    }
                }
                b"Room" => {
                    if let Some(opt) = option.as_mut() {
                        // Only an explicit nonRefundable="false" keeps the option refundable
                        if attr(&e, b"nonRefundable").as_deref() != Some("false") {
                            opt.refundable = false;
                        }
                    }
                }
                b"Parameter" => {
                    if let Some(opt) = option.as_mut() {
                        if attr(&e, b"key").as_deref() == Some("search_token") {
                            opt.token = attr(&e, b"value");
                        }
                    }
                }
                _ => {}
            },
            Event::End(e) => match e.name().as_ref() {
                b"Option" => {
                    if let Some(opt) = option.take() {
                        match finish_option(index, &hotel, opt) {
                            Ok(offer) => results.offers.push(offer),
                            Err(err) => results.reject(err),
                        }
                        index += 1;
                    }
                }
                b"MealPlan" => hotel.meal_plan = None,
                b"Hotel" => hotel = PendingHotel::default(),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }

        buf.clear();
    }

    debug!(
        offers = results.offers.len(),
        rejected = results.rejected.len(),
        "normalized hotel availability"
    );
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterSpec, StopFilter};

    const FLIGHTS_JSON: &str = r#"{
        "searchId": "S-100",
        "currency": "INR",
        "flights": [
            {
                "id": "F-1",
                "airlineCode": "6E",
                "fare": { "base": 4200, "taxes": 800 },
                "segments": [
                    { "origin": "DEL", "destination": "BOM", "departure": "2025-06-01T06:00:00+05:30", "arrival": "2025-06-01T08:05:00+05:30" },
                    { "origin": "BOM", "destination": "GOI", "departure": "2025-06-01T09:30:00+05:30", "arrival": "2025-06-01T10:40:00+05:30" }
                ]
            },
            {
                "id": "F-2",
                "airlineCode": "AI",
                "fare": { "total": 3000, "currency": "INR" },
                "segments": [
                    { "origin": "DEL", "destination": "GOI", "departure": "2025-06-01T13:15:00", "arrival": "not a time", "flightNumber": "AI 883" }
                ],
                "durationMinutes": 155,
                "refundable": true
            },
            { "airlineCode": "UK", "fare": { "total": 5100 } },
            { "id": "F-4", "airlineCode": "SG", "fare": { "total": -1 } },
            { "id": "F-5", "segments": "oops" }
        ]
    }"#;

    const SMALL_AVAIL_XML: &str = r#"
<AvailRS searchId="H-77">
  <Hotels>
    <Hotel code="10443" name="Harbour Lights">
      <MealPlans>
        <MealPlan code="BB">
          <Options>
            <Option type="Hotel" paymentType="MerchantPay" status="OK">
              <Price currency="GBP" amount="120.50"/>
              <Rooms>
                <Room id="1#DBL" code="DBL" description="DOUBLE ROOM" nonRefundable="false">
                  <Price currency="GBP" amount="120.50"/>
                </Room>
              </Rooms>
              <Parameters>
                <Parameter key="search_token" value="10443|2025-06-11|2025-06-12|BB"/>
              </Parameters>
            </Option>
          </Options>
        </MealPlan>
        <MealPlan code="RO">
          <Options>
            <Option type="Hotel" paymentType="MerchantPay" status="OK">
              <Price currency="GBP" amount="98.00"/>
              <Rooms>
                <Room id="1#DBL" code="DBL" description="DOUBLE ROOM" nonRefundable="true"/>
              </Rooms>
            </Option>
          </Options>
        </MealPlan>
      </MealPlans>
    </Hotel>
    <Hotel code="20981" name="Old Mill">
      <MealPlans>
        <MealPlan code="HB">
          <Options>
            <Option type="Hotel" paymentType="MerchantPay" status="OK">
              <Price currency="GBP" amount="n/a"/>
            </Option>
          </Options>
        </MealPlan>
      </MealPlans>
    </Hotel>
  </Hotels>
</AvailRS>
"#;

    #[test]
    fn test_normalize_flights_excludes_bad_records() {
        let results = normalize_flights(FLIGHTS_JSON).unwrap();
        assert_eq!(results.search_id, "S-100");

        let ids: Vec<&str> = results.offers.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["F-1", "F-2"]);
        assert_eq!(results.rejected.len(), 3);
        assert!(matches!(
            results.rejected[0],
            DataShapeError::MissingField { index: 2, field: "id" }
        ));
        assert!(matches!(results.rejected[1], DataShapeError::InvalidPrice { index: 3, .. }));
        assert!(matches!(results.rejected[2], DataShapeError::Malformed { index: 4, .. }));
    }

    #[test]
    fn test_flight_fields() {
        let results = normalize_flights(FLIGHTS_JSON).unwrap();
        let first = &results.offers[0];
        assert_eq!(first.price, Price::new(5000.0, "INR"));
        assert_eq!(first.stops(), Some(1));
        assert_eq!(first.departure_hour(), Some(6));
        assert_eq!(first.total_duration_minutes(), Some(280));

        let second = &results.offers[1];
        assert!(second.refundable);
        assert_eq!(second.departure_hour(), Some(13));
        assert_eq!(second.arrival(), None);
        assert_eq!(second.total_duration_minutes(), Some(155));

        let nonstop = FilterSpec::default().with_stops(StopFilter::Nonstop);
        assert_eq!(nonstop.apply(&results.offers).len(), 1);

        // Unparseable arrival only fails an active arrival window
        let late = FilterSpec::default().with_arrival_hours(12, 24).unwrap();
        assert!(late.apply(&results.offers).is_empty());
    }

    #[test]
    fn test_unreadable_json_is_error() {
        assert!(matches!(
            normalize_flights("{not json"),
            Err(ProcessingError::JsonParseError(_))
        ));
    }

    #[test]
    fn test_normalize_hotels_xml() {
        let results = normalize_hotels_xml(SMALL_AVAIL_XML).unwrap();
        assert_eq!(results.search_id, "H-77");
        assert_eq!(results.offers.len(), 2);
        assert_eq!(results.rejected.len(), 1);

        let bb = &results.offers[0];
        assert_eq!(bb.id, "10443|2025-06-11|2025-06-12|BB");
        assert_eq!(bb.name.as_deref(), Some("Harbour Lights (BB)"));
        assert_eq!(bb.carrier.as_deref(), Some("10443"));
        assert_eq!(bb.price, Price::new(120.5, "GBP"));
        assert!(bb.refundable);

        let ro = &results.offers[1];
        assert_eq!(ro.id, "10443-RO");
        assert!(!ro.refundable);

        assert!(matches!(results.rejected[0], DataShapeError::Malformed { index: 2, .. }));

        let refundable = FilterSpec::default().with_refundable_only(true);
        assert_eq!(refundable.apply(&results.offers).len(), 1);
    }

    #[test]
    fn test_room_without_refund_flag_is_non_refundable() {
        let xml = r#"
<AvailRS searchId="H-78">
  <Hotel code="30112" name="Quayside">
    <MealPlan code="RO">
      <Option>
        <Price currency="EUR" amount="75.00"/>
        <Room id="1#SGL" code="SGL"/>
      </Option>
      <Option>
        <Price currency="EUR" amount="90.00"/>
        <Room id="1#SGL" code="SGL" nonRefundable="false"/>
        <Room id="2#SGL" code="SGL"/>
      </Option>
    </MealPlan>
  </Hotel>
</AvailRS>
"#;
        let results = normalize_hotels_xml(xml).unwrap();
        assert_eq!(results.offers.len(), 2);
        assert!(!results.offers[0].refundable);
        // One unflagged room is enough to lose refundability
        assert!(!results.offers[1].refundable);
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert_eq!(
            parse_timestamp("2025-06-01T22:15:00+05:30").map(|t| t.to_rfc3339()),
            Some("2025-06-01T22:15:00+05:30".to_string())
        );
        assert!(parse_timestamp("2025-06-01 22:15").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}

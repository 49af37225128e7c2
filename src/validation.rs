// Per-step validation predicates
// Every check is total: bad input becomes a FieldError, never a panic.

use std::{fmt, sync::OnceLock};

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    draft::{Contact, Passenger, PassengerType, PaymentMethod, StepSlice},
    offer::Offer,
};

// Age bands on the travel date, in completed years
pub const CHILD_MIN_AGE: u32 = 2;
pub const ADULT_MIN_AGE: u32 = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
            .expect("email pattern is valid")
    })
}

fn upi_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9.\-_]{2,256}@[A-Za-z]{2,64}$").expect("upi pattern is valid")
    })
}

/// Validate the slice of the draft owned by one step.
/// `today` anchors card expiry and the fallback travel date.
pub fn validate_step(slice: StepSlice<'_>, today: NaiveDate) -> Vec<FieldError> {
    match slice {
        StepSlice::Selection { outbound, .. } => validate_selection(outbound),
        StepSlice::Details {
            passengers,
            contact,
            travel_date,
        } => validate_details(passengers, contact, travel_date.unwrap_or(today), today),
        // Optional step
        StepSlice::AddOns { .. } => vec![],
        StepSlice::Payment { payment } => validate_payment(payment, today),
    }
}

pub fn validate_selection(outbound: Option<&Offer>) -> Vec<FieldError> {
    match outbound {
        Some(_) => vec![],
        None => vec![FieldError::new("outbound", "Select an offer to continue")],
    }
}

// Completed years between two dates, None when `dob` is after `on`
pub fn age_on(dob: NaiveDate, on: NaiveDate) -> Option<u32> {
    let mut years = on.year() - dob.year();
    if (on.month(), on.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

fn age_band_ok(passenger_type: PassengerType, age: u32) -> bool {
    match passenger_type {
        PassengerType::Adult => age >= ADULT_MIN_AGE,
        PassengerType::Child => (CHILD_MIN_AGE..ADULT_MIN_AGE).contains(&age),
        PassengerType::Infant => age < CHILD_MIN_AGE,
    }
}

fn validate_passenger(
    index: usize,
    passenger: &Passenger,
    travel_date: NaiveDate,
    today: NaiveDate,
    errors: &mut Vec<FieldError>,
) {
    let field = |name: &str| format!("passengers[{index}].{name}");

    if passenger.first_name.trim().is_empty() {
        errors.push(FieldError::new(field("first_name"), "First name is required"));
    }
    if passenger.last_name.trim().is_empty() {
        errors.push(FieldError::new(field("last_name"), "Last name is required"));
    }

    match passenger.date_of_birth {
        None => errors.push(FieldError::new(field("date_of_birth"), "Date of birth is required")),
        Some(dob) if dob > today => errors.push(FieldError::new(
            field("date_of_birth"),
            "Date of birth cannot be in the future",
        )),
        Some(dob) => match age_on(dob, travel_date) {
            Some(age) if age_band_ok(passenger.passenger_type, age) => {}
            _ => errors.push(FieldError::new(
                field("date_of_birth"),
                format!(
                    "Date of birth does not match passenger type {:?}",
                    passenger.passenger_type
                ),
            )),
        },
    }

    if let Some(doc) = &passenger.document {
        if doc.number.trim().is_empty() {
            errors.push(FieldError::new(field("document.number"), "Document number is required"));
        }
        if let Some(expiry) = doc.expires_on {
            if expiry < travel_date {
                errors.push(FieldError::new(
                    field("document.expires_on"),
                    "Document expires before the travel date",
                ));
            }
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    email_re().is_match(email.trim())
}

pub fn is_valid_phone(phone: &str) -> bool {
    let compact: String = phone
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect();
    let digits = compact.strip_prefix('+').unwrap_or(&compact);

    (10..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn validate_details(
    passengers: &[Passenger],
    contact: &Contact,
    travel_date: NaiveDate,
    today: NaiveDate,
) -> Vec<FieldError> {
    let mut errors = vec![];

    if passengers.is_empty() {
        errors.push(FieldError::new("passengers", "Add at least one passenger"));
    }

    for (i, passenger) in passengers.iter().enumerate() {
        validate_passenger(i, passenger, travel_date, today, &mut errors);
    }

    let count = |t: PassengerType| passengers.iter().filter(|p| p.passenger_type == t).count();
    if count(PassengerType::Infant) > count(PassengerType::Adult) {
        errors.push(FieldError::new(
            "passengers",
            "Each infant must travel with an adult",
        ));
    }

    if !is_valid_email(&contact.email) {
        errors.push(FieldError::new("contact.email", "Enter a valid email address"));
    }
    if !is_valid_phone(&contact.phone) {
        errors.push(FieldError::new("contact.phone", "Enter a valid phone number"));
    }

    errors
}

pub fn luhn_valid(number: &str) -> bool {
    let mut sum = 0;
    for (i, c) in number.chars().rev().enumerate() {
        let Some(mut d) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    sum % 10 == 0
}

pub fn validate_payment(payment: Option<&PaymentMethod>, today: NaiveDate) -> Vec<FieldError> {
    let mut errors = vec![];

    let Some(payment) = payment else {
        errors.push(FieldError::new("payment", "Choose a payment method"));
        return errors;
    };

    match payment {
        PaymentMethod::Card(card) => {
            if card.holder_name.trim().is_empty() {
                errors.push(FieldError::new("payment.holder_name", "Card holder name is required"));
            }

            let number: String = card.number.chars().filter(|c| *c != ' ').collect();
            let shaped = (13..=19).contains(&number.len()) && number.chars().all(|c| c.is_ascii_digit());
            if !shaped || !luhn_valid(&number) {
                errors.push(FieldError::new("payment.number", "Enter a valid card number"));
            }

            if !(1..=12).contains(&card.expiry_month) {
                errors.push(FieldError::new("payment.expiry_month", "Expiry month must be 1-12"));
            } else if (card.expiry_year, card.expiry_month) < (today.year(), today.month()) {
                errors.push(FieldError::new("payment.expiry_year", "Card has expired"));
            }

            let cvv_ok = (3..=4).contains(&card.cvv.len()) && card.cvv.chars().all(|c| c.is_ascii_digit());
            if !cvv_ok {
                errors.push(FieldError::new("payment.cvv", "Enter a valid CVV"));
            }
        }
        PaymentMethod::Upi { vpa } => {
            if !upi_re().is_match(vpa.trim()) {
                errors.push(FieldError::new("payment.vpa", "Enter a valid UPI id"));
            }
        }
        PaymentMethod::NetBanking { bank_code } => {
            if bank_code.trim().is_empty() {
                errors.push(FieldError::new("payment.bank_code", "Choose a bank"));
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::{CardDetails, TravelDocument};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn today() -> NaiveDate {
        date(2025, 5, 1)
    }

    fn contact() -> Contact {
        Contact {
            email: "asha@example.com".to_string(),
            phone: "+91 98765-43210".to_string(),
        }
    }

    fn adult(first: &str, last: &str) -> Passenger {
        Passenger::new(PassengerType::Adult, first, last, Some(date(1990, 1, 15)))
    }

    fn card(number: &str) -> PaymentMethod {
        PaymentMethod::Card(CardDetails {
            holder_name: "Asha Rao".to_string(),
            number: number.to_string(),
            expiry_month: 8,
            expiry_year: 2027,
            cvv: "123".to_string(),
        })
    }

    #[test]
    fn test_missing_last_name_is_single_error() {
        let errors = validate_details(&[adult("Asha", "")], &contact(), today(), today());
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "passengers[0].last_name");
    }

    #[test]
    fn test_empty_passenger_list_fails() {
        let errors = validate_details(&[], &contact(), today(), today());
        assert_eq!(errors, vec![FieldError::new("passengers", "Add at least one passenger")]);
    }

    #[test]
    fn test_age_bands() {
        let travel = date(2025, 6, 1);
        let child = Passenger::new(PassengerType::Child, "Ira", "Rao", Some(date(2015, 6, 2)));
        let infant = Passenger::new(PassengerType::Infant, "Veer", "Rao", Some(date(2024, 12, 1)));
        let too_old_infant = Passenger::new(PassengerType::Infant, "Kai", "Rao", Some(date(2023, 5, 31)));

        let ok = validate_details(
            &[adult("Asha", "Rao"), child.clone(), infant],
            &contact(),
            travel,
            today(),
        );
        assert!(ok.is_empty(), "{ok:?}");

        let errors = validate_details(
            &[adult("Asha", "Rao"), too_old_infant],
            &contact(),
            travel,
            today(),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "passengers[1].date_of_birth");

        // Child turning 12 the day before travel is now an adult
        let aged_out = Passenger::new(PassengerType::Child, "Ira", "Rao", Some(date(2013, 5, 31)));
        let errors = validate_details(&[adult("A", "B"), aged_out], &contact(), travel, today());
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_future_birth_and_infant_ratio() {
        let unborn = Passenger::new(PassengerType::Infant, "X", "Y", Some(date(2025, 9, 1)));
        let infant = Passenger::new(PassengerType::Infant, "Z", "Y", Some(date(2025, 1, 1)));

        let errors = validate_details(&[unborn, infant], &contact(), date(2025, 10, 1), today());
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["passengers[0].date_of_birth", "passengers"]);
    }

    #[test]
    fn test_document_expiry() {
        let mut p = adult("Asha", "Rao");
        p.document = Some(TravelDocument {
            number: "Z1234567".to_string(),
            nationality: Some("IN".to_string()),
            expires_on: Some(date(2025, 5, 20)),
        });

        let errors = validate_details(&[p], &contact(), date(2025, 6, 1), today());
        assert_eq!(errors[0].field, "passengers[0].document.expires_on");
    }

    #[test]
    fn test_contact_formats() {
        assert!(is_valid_email("a.b+tag@mail.example.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("no-at-sign.com"));

        assert!(is_valid_phone("9876543210"));
        assert!(is_valid_phone("+44 20 7946 0958"));
        assert!(!is_valid_phone("12345"));
        assert!(!is_valid_phone("98765abc10"));
    }

    #[test]
    fn test_card_checks() {
        assert!(validate_payment(Some(&card("4111 1111 1111 1111")), today()).is_empty());

        let errors = validate_payment(Some(&card("4111111111111112")), today());
        assert_eq!(errors[0].field, "payment.number");

        let expired = PaymentMethod::Card(CardDetails {
            holder_name: "".to_string(),
            number: "4111111111111111".to_string(),
            expiry_month: 4,
            expiry_year: 2025,
            cvv: "12".to_string(),
        });
        let fields: Vec<String> = validate_payment(Some(&expired), today())
            .into_iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec!["payment.holder_name", "payment.expiry_year", "payment.cvv"]
        );
    }

    #[test]
    fn test_upi_and_missing_method() {
        let upi = PaymentMethod::Upi {
            vpa: "asha.rao@okaxis".to_string(),
        };
        assert!(validate_payment(Some(&upi), today()).is_empty());

        let bad = PaymentMethod::Upi {
            vpa: "asha@123".to_string(),
        };
        assert_eq!(validate_payment(Some(&bad), today()).len(), 1);

        assert_eq!(validate_payment(None, today())[0].field, "payment");
    }

    #[test]
    fn test_luhn() {
        assert!(luhn_valid("79927398713"));
        assert!(!luhn_valid("79927398710"));
        assert!(!luhn_valid("7992x398713"));
    }
}

// Booking draft accumulated across the wizard steps

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::offer::Offer;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TripType {
    #[default]
    OneWay,
    RoundTrip,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassengerType {
    #[default]
    Adult,
    Child,
    Infant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Female,
    Male,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelDocument {
    pub number: String,
    pub nationality: Option<String>,
    pub expires_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Passenger {
    pub passenger_type: PassengerType,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub document: Option<TravelDocument>,
}

impl Passenger {
    pub fn new(
        passenger_type: PassengerType,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        date_of_birth: Option<NaiveDate>,
    ) -> Self {
        Self {
            passenger_type,
            first_name: first_name.into(),
            last_name: last_name.into(),
            date_of_birth,
            gender: None,
            document: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOnSelection {
    pub id: String,
    pub quantity: u32,
}

impl AddOnSelection {
    pub fn new(id: impl Into<String>, quantity: u32) -> Self {
        Self {
            id: id.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    pub holder_name: String,
    pub number: String,
    pub expiry_month: u32,
    pub expiry_year: i32,
    pub cvv: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PaymentMethod {
    Card(CardDetails),
    Upi { vpa: String },
    NetBanking { bank_code: String },
}

/// The in-progress booking. Owned by exactly one wizard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingDraft {
    pub trip: TripType,
    pub outbound: Option<Offer>,
    pub inbound: Option<Offer>,
    pub passengers: Vec<Passenger>,
    pub contact: Contact,
    pub add_ons: Vec<AddOnSelection>,
    pub promo_code: Option<String>,
    pub payment: Option<PaymentMethod>,
    // Stable across submission retries so the backend can dedupe
    pub idempotency_key: String,
}

impl Default for BookingDraft {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingDraft {
    pub fn new() -> Self {
        Self {
            trip: TripType::default(),
            outbound: None,
            inbound: None,
            passengers: vec![],
            contact: Contact::default(),
            add_ons: vec![],
            promo_code: None,
            payment: None,
            idempotency_key: new_idempotency_key(),
        }
    }

    pub fn merge(&mut self, patch: DraftPatch) {
        let DraftPatch {
            trip,
            outbound,
            inbound,
            passengers,
            email,
            phone,
            add_ons,
            promo_code,
            payment,
        } = patch;

        if let Some(trip) = trip {
            self.trip = trip;
            if trip == TripType::OneWay {
                self.inbound = None;
            }
        }
        if let Some(outbound) = outbound {
            self.outbound = Some(outbound);
        }
        if let Some(inbound) = inbound {
            self.inbound = Some(inbound);
            self.trip = TripType::RoundTrip;
        }
        if let Some(passengers) = passengers {
            self.passengers = passengers;
        }
        if let Some(email) = email {
            self.contact.email = email.trim().to_string();
        }
        if let Some(phone) = phone {
            self.contact.phone = phone.trim().to_string();
        }
        if let Some(add_ons) = add_ons {
            self.add_ons = add_ons.into_iter().filter(|a| a.quantity > 0).collect();
        }
        if let Some(code) = promo_code {
            let code = code.trim().to_uppercase();
            self.promo_code = (!code.is_empty()).then_some(code);
        }
        if let Some(payment) = payment {
            self.payment = Some(payment);
        }
    }

    // Drops the return leg and treats the booking as one-way
    pub fn skip_return(&mut self) {
        self.trip = TripType::OneWay;
        self.inbound = None;
    }

    /// Travel date used for age bands and document expiry.
    pub fn travel_date(&self) -> Option<NaiveDate> {
        self.outbound
            .as_ref()
            .and_then(|o| o.departure())
            .map(|t| t.date_naive())
    }

    pub fn slice(&self, step: crate::wizard::WizardStep) -> StepSlice<'_> {
        use crate::wizard::WizardStep;

        match step {
            WizardStep::Selection => StepSlice::Selection {
                outbound: self.outbound.as_ref(),
                inbound: self.inbound.as_ref(),
            },
            WizardStep::Details => StepSlice::Details {
                passengers: &self.passengers,
                contact: &self.contact,
                travel_date: self.travel_date(),
            },
            WizardStep::AddOns => StepSlice::AddOns {
                add_ons: &self.add_ons,
                promo_code: self.promo_code.as_deref(),
            },
            WizardStep::Payment => StepSlice::Payment {
                payment: self.payment.as_ref(),
            },
        }
    }
}

/// The part of the draft a single step reads and validates.
#[derive(Debug, Clone, Copy)]
pub enum StepSlice<'a> {
    Selection {
        outbound: Option<&'a Offer>,
        inbound: Option<&'a Offer>,
    },
    Details {
        passengers: &'a [Passenger],
        contact: &'a Contact,
        travel_date: Option<NaiveDate>,
    },
    AddOns {
        add_ons: &'a [AddOnSelection],
        promo_code: Option<&'a str>,
    },
    Payment {
        payment: Option<&'a PaymentMethod>,
    },
}

/// Partial update; every `Some` field replaces the draft's value.
/// An empty promo code clears it.
#[derive(Debug, Clone, Default)]
pub struct DraftPatch {
    pub trip: Option<TripType>,
    pub outbound: Option<Offer>,
    pub inbound: Option<Offer>,
    pub passengers: Option<Vec<Passenger>>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub add_ons: Option<Vec<AddOnSelection>>,
    pub promo_code: Option<String>,
    pub payment: Option<PaymentMethod>,
}

impl DraftPatch {
    pub fn outbound(offer: Offer) -> Self {
        Self {
            outbound: Some(offer),
            ..Default::default()
        }
    }

    pub fn passengers(passengers: Vec<Passenger>) -> Self {
        Self {
            passengers: Some(passengers),
            ..Default::default()
        }
    }

    pub fn contact(email: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            phone: Some(phone.into()),
            ..Default::default()
        }
    }

    pub fn payment(payment: PaymentMethod) -> Self {
        Self {
            payment: Some(payment),
            ..Default::default()
        }
    }
}

fn new_idempotency_key() -> String {
    format!("bk-{:016x}", rand::random::<u64>())
}

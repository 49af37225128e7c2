// Travel booking core: search result filtering and the booking wizard

pub mod circuit_breaker;
pub mod client;
pub mod draft;
pub mod filter;
pub mod offer;
pub mod search;
pub mod store;
pub mod validation;
pub mod wizard;

// Re-export key types for convenience
pub use client::{BookingApi, BookingSubmission, ClientConfig, Confirmation, HttpBookingClient, SubmissionError};
pub use draft::{BookingDraft, DraftPatch, Passenger, PassengerType, PaymentMethod};
pub use filter::{apply, Facets, FilterSpec, FilterSpecError, SortKey, StopFilter};
pub use offer::{Offer, OfferKind, Price, Segment};
pub use search::{normalize_flights, normalize_hotels_xml, DataShapeError, ProcessingError, SearchResults};
pub use store::{DraftStore, MemoryDraftStore};
pub use validation::FieldError;
pub use wizard::{Advance, BookingWizard, WizardError, WizardState, WizardStep};

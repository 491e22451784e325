pub mod fhir;

pub use fhir::{FhirClient, FhirError};

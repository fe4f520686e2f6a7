pub mod claims;

pub use claims::{claim_middleware, ActingClaim};

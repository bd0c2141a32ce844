/// Phone Ownership System
///
/// Normalizes raw phone input into canonical forms, tracks which account
/// currently owns a number over time, and runs the claim workflow used to
/// transfer ownership between contending accounts.
pub mod claims;
pub mod ledger;
pub mod normalize;

pub use claims::{
    ClaimAction, ClaimRequestOutcome, ClaimResponseOutcome, ClaimStatus, ClaimWorkflow, PhoneClaim,
};
pub use ledger::{OwnerHistory, PhoneLedger, PhoneLink};
pub use normalize::{display_form, lookup_key};

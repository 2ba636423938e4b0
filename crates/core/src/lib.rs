pub mod auth;
pub mod checkout;
pub mod clock;
pub mod config;
pub mod coupons;
pub mod document;
pub mod error;
pub mod fulfillment;
pub mod issuance;
pub mod ledger;
pub mod mail;
pub mod payment;
pub mod pricing;
pub mod retry;
pub mod success;
pub mod types;

pub use error::{CheckoutError, CheckoutResult};

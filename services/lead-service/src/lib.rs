//! Lead service: contact-form intake over HTTP.
//!
//! Wires the [`leadkit`] handlers to a contact-form adapter, an HTTP
//! rendering engine and SMTP delivery.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod config;

pub use adapter::{ContactFormAdapter, ContactLead};
pub use config::{LeadServiceConfig, LogFormat};

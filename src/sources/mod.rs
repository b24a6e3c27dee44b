//! Concrete data sources.
//!
//! Each source implements the full [`DataSource`](crate::harvest::DataSource)
//! capability set for one provider:
//! - `smn` - Argentine national weather service (SMN) radar network

pub mod smn;

pub use smn::SmnSource;

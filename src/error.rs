//! Module containing the universal error type
use thiserror::Error;

/// Universal error type for this crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("region is empty or inverted on at least one axis")]
    InvalidRegion,

    #[error("region contains a non-finite coordinate")]
    NonFiniteRegion,
}

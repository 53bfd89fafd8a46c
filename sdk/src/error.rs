use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid subnet id")]
    InvalidID,
    #[error("invalid hierarchical address")]
    InvalidHcAddr,
    #[error("fvm shared address error")]
    FVMAddress(#[from] fvm_shared::address::Error),
}

use std::fmt;
use std::str::FromStr;

use fvm_shared::address::Address;
use serde_tuple::{Deserialize_tuple, Serialize_tuple};

use crate::error::Error;
use crate::subnet_id::SubnetID;

/// Separator between the subnet path and the raw address in the string
/// form of a hierarchical address.
const HC_ADDR_SEPARATOR: &str = "::";

/// An address qualified by the subnet the actor lives in.
///
/// Raw addresses are only meaningful within a single chain; cross-net
/// messages carry hierarchical addresses so that both endpoints stay
/// resolvable at every hop of the route.
#[derive(PartialEq, Eq, Hash, Clone, Debug, Serialize_tuple, Deserialize_tuple)]
pub struct HcAddress {
    subnet_id: SubnetID,
    raw_address: Address,
}

impl HcAddress {
    pub fn new(sn: &SubnetID, addr: &Address) -> Result<Self, Error> {
        Ok(Self {
            subnet_id: sn.clone(),
            raw_address: *addr,
        })
    }

    /// Subnet the address belongs to.
    pub fn subnet(&self) -> Result<SubnetID, Error> {
        Ok(self.subnet_id.clone())
    }

    /// The address within its subnet.
    pub fn raw_addr(&self) -> Result<Address, Error> {
        Ok(self.raw_address)
    }

    pub fn to_string(&self) -> Result<String, Error> {
        Ok(format!(
            "{}{}{}",
            self.subnet_id, HC_ADDR_SEPARATOR, self.raw_address
        ))
    }
}

impl FromStr for HcAddress {
    type Err = Error;

    fn from_str(addr: &str) -> Result<Self, Error> {
        let (sn, raw) = addr
            .split_once(HC_ADDR_SEPARATOR)
            .ok_or(Error::InvalidHcAddr)?;
        Ok(Self {
            subnet_id: SubnetID::from_str(sn).map_err(|_| Error::InvalidHcAddr)?,
            raw_address: Address::from_str(raw).map_err(|_| Error::InvalidHcAddr)?,
        })
    }
}

impl fmt::Display for HcAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_string() {
            Ok(s) => write!(f, "{}", s),
            Err(_) => Err(fmt::Error),
        }
    }
}

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use fvm_shared::address::Address;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Hierarchical identifier of a subnet.
///
/// A subnet id is the path of subnet actor addresses from the root
/// network down to the subnet, e.g. `/root/f0101/f0202`. The id of a
/// child subnet is its parent's path extended with the address of the
/// actor governing the child in the parent.
#[derive(PartialEq, Eq, Hash, Clone, Debug, Serialize, Deserialize)]
pub struct SubnetID {
    parent: String,
    actor: Address,
}

lazy_static! {
    pub static ref ROOTNET_ID: SubnetID = SubnetID {
        parent: String::from("/root"),
        actor: Address::new_id(0)
    };
    pub static ref UNDEF: SubnetID = SubnetID {
        parent: String::from("/"),
        actor: Address::new_id(0)
    };
}

impl SubnetID {
    pub fn new_from_parent(parent: &SubnetID, subnet_act: Address) -> Self {
        Self {
            parent: parent.to_string(),
            actor: subnet_act,
        }
    }

    /// Stable byte encoding of the id, used as key in subnet registries.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Address of the actor governing the subnet in its parent.
    pub fn subnet_actor(&self) -> Address {
        self.actor
    }

    /// The id one level up the path, `None` at the root.
    pub fn parent(&self) -> Option<SubnetID> {
        if *self == *ROOTNET_ID {
            return None;
        }
        SubnetID::from_str(&self.parent).ok()
    }

    /// Computes the closest common ancestor of the two subnets, along
    /// with the index of the last shared path component.
    pub fn common_parent(&self, other: &SubnetID) -> Option<(usize, SubnetID)> {
        let (index, prefix) = common_prefix(&self.to_string(), &other.to_string());
        if prefix.components().next().is_none() {
            return Some((index, ROOTNET_ID.clone()));
        }
        match SubnetID::from_str(prefix.to_str()?) {
            Ok(p) => Some((index, p)),
            Err(_) => None,
        }
    }

    /// Returns the next subnet in the route from `from` towards the
    /// current subnet, one level deeper than `from`. `None` when the
    /// current id is not underneath `from`.
    pub fn down(&self, from: &SubnetID) -> Option<SubnetID> {
        let a = self.to_string();
        let b = from.to_string();
        let (index, mut prefix) = common_prefix(&a, &b);
        // `from` needs to be a proper prefix of the current id for
        // there to be a way down.
        if prefix.components().next().is_none()
            || Path::new(&b).components().nth(index + 1).is_some()
        {
            return None;
        }
        prefix.push(Path::new(&a).components().nth(index + 1)?.as_os_str());
        SubnetID::from_str(prefix.to_str()?).ok()
    }

    /// Returns the next subnet in the route from `from` towards the
    /// root, one level above `from`.
    pub fn up(&self, from: &SubnetID) -> Option<SubnetID> {
        if self == &*ROOTNET_ID || from == &*ROOTNET_ID {
            return None;
        }
        let a = self.to_string();
        let b = from.to_string();
        let (index, mut prefix) = common_prefix(&a, &b);
        if prefix.components().next().is_none()
            || Path::new(&b).components().nth(index + 1).is_some()
        {
            return None;
        }
        prefix.pop();
        SubnetID::from_str(prefix.to_str()?).ok()
    }
}

/// Longest shared prefix of two subnet paths, with the index of the
/// last shared component.
fn common_prefix(a: &str, b: &str) -> (usize, PathBuf) {
    let mut prefix = PathBuf::new();
    let mut index = 0;
    for (i, (one, two)) in Path::new(a)
        .components()
        .zip(Path::new(b).components())
        .enumerate()
    {
        if one != two {
            break;
        }
        prefix.push(one.as_os_str());
        index = i;
    }
    (index, prefix)
}

impl fmt::Display for SubnetID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parent == "/root" && self.actor == Address::new_id(0) {
            return write!(f, "{}", self.parent);
        }
        match Path::new(&self.parent)
            .join(format!("{}", self.actor))
            .to_str()
        {
            Some(r) => write!(f, "{}", r),
            None => Err(fmt::Error),
        }
    }
}

impl Default for SubnetID {
    fn default() -> Self {
        Self {
            parent: String::from(""),
            actor: Address::new_id(0),
        }
    }
}

impl FromStr for SubnetID {
    type Err = Error;

    fn from_str(addr: &str) -> Result<Self, Error> {
        if addr == ROOTNET_ID.to_string() {
            return Ok(ROOTNET_ID.clone());
        }

        let id = Path::new(addr);
        let actor = match id.file_name().and_then(|s| s.to_str()) {
            Some(act_str) => Address::from_str(act_str).map_err(|_| Error::InvalidID)?,
            None => return Err(Error::InvalidID),
        };
        let parent = match id.parent().and_then(|p| p.to_str()) {
            Some(par_str) if !par_str.is_empty() => String::from(par_str),
            _ => return Err(Error::InvalidID),
        };

        Ok(Self { parent, actor })
    }
}

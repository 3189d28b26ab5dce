//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;

use serde::{Deserialize, Serialize};

// The protocols known to the multicast control plane.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    DIRECT,
    IGMP,
    MLD,
    PIMSM,
    STATIC,
}

// ===== impl Protocol =====

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::DIRECT => write!(f, "direct"),
            Protocol::IGMP => write!(f, "igmp"),
            Protocol::MLD => write!(f, "mld"),
            Protocol::PIMSM => write!(f, "pim-sm"),
            Protocol::STATIC => write!(f, "static"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "direct" => Ok(Protocol::DIRECT),
            "igmp" => Ok(Protocol::IGMP),
            "mld" => Ok(Protocol::MLD),
            "pim-sm" => Ok(Protocol::PIMSM),
            "static" => Ok(Protocol::STATIC),
            _ => Err(()),
        }
    }
}

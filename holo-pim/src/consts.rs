//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use holo_utils::ip::AddressFamily;

// IP protocol number carried by all PIM messages.
pub const PIM_IP_PROTO: u8 = 103;

// Destination of multicast PIM messages (IPv4).
pub const ALL_PIM_ROUTERS_V4: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 13);

// Destination of multicast PIM messages (IPv6).
pub const ALL_PIM_ROUTERS_V6: Ipv6Addr =
    Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x000d);

// TTL/hop limit of link-scoped PIM messages.
pub const PIM_TTL: u8 = 1;

// TTL/hop limit of unicast PIM messages (Register, Candidate-RP-Adv).
pub const PIM_UNICAST_TTL: u8 = 64;

// Default Hello timing.
pub const HELLO_PERIOD: u16 = 30;
pub const HELLO_HOLDTIME: u16 = 105;
pub const HELLO_TRIGGERED_DELAY: u16 = 5;

// Default DR priority advertised in Hello messages.
pub const DR_PRIORITY: u32 = 1;

// Default LAN prune delay fields, in milliseconds.
pub const PROPAGATION_DELAY_MSEC: u16 = 500;
pub const OVERRIDE_INTERVAL_MSEC: u16 = 2500;

// Default Join/Prune timing.
pub const JOIN_PRUNE_PERIOD: u16 = 60;
pub const JOIN_PRUNE_HOLDTIME: u16 = 210;

// (S,G) keepalive period on downstream routers.
pub const KEEPALIVE_PERIOD: u32 = 210;

// Register timing at the DR.
pub const REGISTER_SUPPRESSION_TIME: u32 = 60;
pub const REGISTER_PROBE_TIME: u32 = 5;

// (S,G) keepalive period at the RP. The RP must not tear down (S,G)
// state while the DR is still suppressing data Registers, so the period
// covers three suppression cycles plus the probe time.
pub const RP_KEEPALIVE_PERIOD: u32 =
    3 * REGISTER_SUPPRESSION_TIME + REGISTER_PROBE_TIME;

// Assert timing.
pub const ASSERT_TIME: u32 = 180;
pub const ASSERT_OVERRIDE_INTERVAL: u32 = 3;

// Bootstrap protocol timing.
pub const BOOTSTRAP_PERIOD: u32 = 60;
pub const BOOTSTRAP_TIMEOUT: u32 = 130;
pub const SCOPE_ZONE_TIMEOUT: u32 = 1300;

// Candidate-RP advertisement timing.
pub const CAND_RP_ADV_PERIOD: u32 = 60;
pub const CAND_RP_HOLDTIME: u16 = 150;

// Returns the all-PIM-routers destination of the given address family.
pub fn all_pim_routers(af: AddressFamily) -> IpAddr {
    match af {
        AddressFamily::Ipv4 => IpAddr::V4(ALL_PIM_ROUTERS_V4),
        AddressFamily::Ipv6 => IpAddr::V6(ALL_PIM_ROUTERS_V6),
    }
}

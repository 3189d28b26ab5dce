//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod bytes;
pub mod ibus;
pub mod ip;
pub mod mifset;
pub mod protocol;
pub mod southbound;
pub mod task;

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader features layered on the core
//!
//! - `registry`: direct access to Loads (`get`, `set`, `share`, `delete`)
//! - `named`: modules registered under explicit ids
//! - `require`: the synchronous front-end
//! - `evaluate`: sources to declarations, and in-memory source files

pub mod evaluate;
pub(crate) mod named;
pub mod registry;
pub mod require;

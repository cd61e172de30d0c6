// Copyright 2026 the MAVL Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Conformance test crate; see `tests/conformance.rs`.

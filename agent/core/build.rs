// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Build Script for tether-agent-core
//!
//! Compiles the control-plane Protocol Buffer definitions into tonic client
//! and server stubs.
//!
//! # Code Generation
//!
//! - `../../proto/tether/agent/v1/control_plane.proto` - agent <-> control plane RPCs
//!
//! Generated code is placed in `OUT_DIR` and included via `tonic::include_proto!`
//! in `src/infrastructure/control_plane/proto.rs`.
//!
//! # Dependencies
//!
//! - **protoc**: Protocol buffer compiler (vendored via `protoc-bin-vendored`)
//! - **tonic-prost-build**: Code generator for Rust gRPC stubs
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Implements internal responsibilities for build

use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Point prost-build at the vendored protoc binary
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().map_err(|e| e.to_string())?);

    let proto_root = PathBuf::from("../../proto");
    let well_known = protoc_bin_vendored::include_path().map_err(|e| e.to_string())?;
    let control_plane = proto_root.join("tether/agent/v1/control_plane.proto");

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&[control_plane.clone()], &[proto_root, well_known])?;

    println!("cargo:rerun-if-changed={}", control_plane.display());

    Ok(())
}

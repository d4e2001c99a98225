// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// This file includes the generated protobuf code from tonic/prost

pub mod tether {
    pub mod agent {
        pub mod v1 {
            tonic::include_proto!("tether.agent.v1");
        }
    }
}

pub use tether::agent::v1::*;

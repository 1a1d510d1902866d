// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![allow(clippy::derive_partial_eq_without_eq)]

// NOTE: These modules are maintained in the shape `prost-build`/`tonic-build`
// emit for the corresponding `.proto` packages. Prost relies on the existence
// of this nested module structure because it uses multiple `super` references
// (e.g., `super::super::super::Foo`) to traverse out of a module to refer to
// protos in other modules. `bytes` fields are declared as `bytes::Bytes`
// (the equivalent of `config.bytes(["."])`) so decoding from a `Bytes` input
// shares storage instead of copying.

pub mod google {
    pub mod longrunning {
        include!("google.longrunning.rs");
    }
    pub mod rpc {
        include!("google.rpc.rs");
    }
}

pub mod build {
    pub mod bazel {
        pub mod remote {
            pub mod execution {
                pub mod v2 {
                    include!("build.bazel.remote.execution.v2.rs");
                }
            }
        }
        pub mod semver {
            include!("build.bazel.semver.rs");
        }
    }
}

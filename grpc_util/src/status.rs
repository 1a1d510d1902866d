// Copyright 2023 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use tonic::{Code, Status};

/// Prepend human-readable context to a status, preserving its code. The
/// innermost cause stays at the end of the message, so repeated wrapping
/// reads outside-in.
pub fn error_wrap(context: &str, status: Status) -> Status {
    Status::new(status.code(), format!("{context}: {}", status.message()))
}

/// Whether a failed call may be safely retried against the same or another
/// backend. Mirrors the code set gRPC clients conventionally treat as
/// transient.
pub fn is_retriable(status: &Status) -> bool {
    matches!(
        status.code(),
        Code::Aborted
            | Code::Cancelled
            | Code::Internal
            | Code::ResourceExhausted
            | Code::Unavailable
            | Code::Unknown
    )
}

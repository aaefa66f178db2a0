// Copyright 2024 The Synapse-NG Development Community
// SPDX-License-Identifier: BSD-3-Clause

/// Implemented by error types that can represent a "not found" condition, so
/// that callers can turn `Err(NotFound)` into `Ok(None)` with `.optional()?`.
pub trait IsNotFoundError {
    fn is_not_found_error(&self) -> bool;
}

pub trait Optional<T> {
    type Error;

    fn optional(self) -> Result<Option<T>, Self::Error>;
}

impl<T, E> Optional<T> for Result<T, E>
where E: IsNotFoundError
{
    type Error = E;

    fn optional(self) -> Result<Option<T>, Self::Error> {
        match self {
            Ok(t) => Ok(Some(t)),
            Err(e) if e.is_not_found_error() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

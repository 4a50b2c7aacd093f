// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `status_reasons.rs`

#[cfg(test)]
mod tests {
    use crate::status_reasons::*;

    #[test]
    fn test_condition_status_values() {
        assert_eq!(CONDITION_STATUS_TRUE, "True");
        assert_eq!(CONDITION_STATUS_FALSE, "False");
        assert_eq!(CONDITION_STATUS_UNKNOWN, "Unknown");
    }

    #[test]
    fn test_reasons_match_gateway_api_names() {
        assert_eq!(REASON_INVALID_PARAMETERS, "InvalidParameters");
        assert_eq!(REASON_NO_MATCHING_PARENT, "NoMatchingParent");
        assert_eq!(REASON_BACKEND_NOT_FOUND, "BackendNotFound");
        assert_eq!(REASON_REF_NOT_PERMITTED, "RefNotPermitted");
        assert_eq!(REASON_INVALID_KIND, "InvalidKind");
    }

    #[test]
    fn test_reasons_are_camel_case() {
        for reason in [
            REASON_ACCEPTED,
            REASON_INVALID_PARAMETERS,
            REASON_PROGRAMMED,
            REASON_PENDING,
            REASON_NO_MATCHING_PARENT,
            REASON_RESOLVED_REFS,
            REASON_BACKEND_NOT_FOUND,
            REASON_REF_NOT_PERMITTED,
            REASON_INVALID_KIND,
        ] {
            assert!(reason.chars().next().unwrap().is_ascii_uppercase(), "{reason}");
            assert!(reason.chars().all(|c| c.is_ascii_alphabetic()), "{reason}");
        }
    }
}

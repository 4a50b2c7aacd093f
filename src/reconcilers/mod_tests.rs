// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the shared error policy.

#[cfg(test)]
mod tests {
    use super::super::requeue_for_error;
    use crate::constants::AUTH_ERROR_REQUEUE_SECS;
    use crate::errors::ControllerError;
    use crate::reconcilers::retry::RequeueBackoff;
    use kube::runtime::controller::Action;
    use std::time::Duration;

    fn backoff() -> RequeueBackoff {
        RequeueBackoff::new(Duration::from_secs(1), Duration::from_secs(8))
    }

    #[test]
    fn test_transient_errors_back_off_per_key() {
        let backoff = backoff();
        let err = ControllerError::Transient("timeout".into());

        let first = requeue_for_error("Gateway", "web/public", &err, &backoff);
        let second = requeue_for_error("Gateway", "web/public", &err, &backoff);
        let other = requeue_for_error("Gateway", "web/other", &err, &backoff);

        assert_eq!(first, Action::requeue(Duration::from_secs(1)));
        assert_eq!(second, Action::requeue(Duration::from_secs(2)));
        assert_eq!(other, Action::requeue(Duration::from_secs(1)));
    }

    #[test]
    fn test_auth_errors_wait_at_least_the_auth_delay() {
        let action = requeue_for_error(
            "TunnelConfig",
            "production",
            &ControllerError::Auth("401".into()),
            &backoff(),
        );
        assert_eq!(
            action,
            Action::requeue(Duration::from_secs(AUTH_ERROR_REQUEUE_SECS))
        );
    }

    #[test]
    fn test_terminal_errors_wait_for_change() {
        for err in [
            ControllerError::Validation("bad tunnelID".into()),
            ControllerError::NotFound("gone".into()),
            ControllerError::PermissionDenied("no grant".into()),
        ] {
            assert_eq!(
                requeue_for_error("Gateway", "web/public", &err, &backoff()),
                Action::await_change(),
                "{err}"
            );
        }
    }

    #[test]
    fn test_reset_restarts_backoff() {
        let backoff = backoff();
        let err = ControllerError::Transient("503".into());
        requeue_for_error("Gateway", "web/public", &err, &backoff);
        requeue_for_error("Gateway", "web/public", &err, &backoff);
        backoff.reset("web/public");

        assert_eq!(
            requeue_for_error("Gateway", "web/public", &err, &backoff),
            Action::requeue(Duration::from_secs(1))
        );
    }
}

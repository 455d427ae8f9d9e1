//! Subject derivation and validation.
//!
//! A subject is the bus address of one endpoint:
//! `{service}.{endpoint}`. Subjects are derived on demand, never stored.
//! Neither segment may contain the delimiter, otherwise two different
//! (service, endpoint) pairs could route to the same subject.

use crate::error::{Error, Result};

/// Hierarchical separator understood by the bus.
pub const DELIMITER: char = '.';

/// Validate one subject segment (a service or endpoint name).
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment.contains(DELIMITER) {
        return Err(Error::InvalidSubject(segment.to_string()));
    }
    Ok(())
}

/// Derive the subject for an endpoint of a service.
pub fn for_endpoint(service: &str, endpoint: &str) -> Result<String> {
    validate_segment(service)?;
    validate_segment(endpoint)?;
    Ok(format!("{service}{DELIMITER}{endpoint}"))
}

/// Extract the endpoint name from an inbound subject, given the service
/// whose subscription received it.
///
/// Returns `None` when the subject does not start with `{service}.`;
/// messages delivered through this crate's own subscriptions always do,
/// but the dispatcher still checks.
pub fn endpoint_of<'a>(subject: &'a str, service: &str) -> Option<&'a str> {
    subject
        .strip_prefix(service)?
        .strip_prefix(DELIMITER)
        .filter(|endpoint| !endpoint.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_endpoint() {
        assert_eq!(for_endpoint("billing", "charge").unwrap(), "billing.charge");
    }

    #[test]
    fn test_segments_reject_delimiter_and_empty() {
        assert!(matches!(
            for_endpoint("billing.v2", "charge"),
            Err(Error::InvalidSubject(_))
        ));
        assert!(matches!(
            for_endpoint("billing", "charge.card"),
            Err(Error::InvalidSubject(_))
        ));
        assert!(matches!(for_endpoint("", "charge"), Err(Error::InvalidSubject(_))));
        assert!(matches!(for_endpoint("billing", ""), Err(Error::InvalidSubject(_))));
    }

    #[test]
    fn test_endpoint_of() {
        assert_eq!(endpoint_of("billing.charge", "billing"), Some("charge"));
        assert_eq!(endpoint_of("billing.charge", "inventory"), None);
        assert_eq!(endpoint_of("billing.", "billing"), None);
        assert_eq!(endpoint_of("billing", "billing"), None);
    }

    #[test]
    fn test_endpoint_names_may_contain_dashes() {
        assert_eq!(
            for_endpoint("svc", "healthz-node-1").unwrap(),
            "svc.healthz-node-1"
        );
        assert_eq!(endpoint_of("svc.healthz-node-1", "svc"), Some("healthz-node-1"));
    }
}

/// Validates an email address shape.
///
/// This is a client-side sanity check, not RFC 5322 parsing. A valid email:
/// - Has exactly one `@`
/// - Has a non-empty local part
/// - Has a domain with at least one `.` that neither starts nor ends the domain
/// - Contains no whitespace
#[must_use]
pub fn is_valid_email(s: &str) -> bool {
    if s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_email() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("first.last+tag@shop.example.co"));
    }

    #[test]
    fn test_invalid_email_missing_parts() {
        assert!(!is_valid_email(""));
        assert!(!is_valid_email("a.b.com"));
        assert!(!is_valid_email("@b.com"));
        assert!(!is_valid_email("a@"));
        assert!(!is_valid_email("a@localhost"));
    }

    #[test]
    fn test_invalid_email_bad_domain() {
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a@b.com."));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn test_invalid_email_whitespace() {
        assert!(!is_valid_email("a @b.com"));
        assert!(!is_valid_email("a@b.com "));
    }
}

/// Phone number normalization
///
/// Every phone comparison in the system goes through `lookup_key`; the
/// display form is only ever shown back to users and never compared.

/// Minimum digit count for a phone number to be considered valid
const MIN_DIGITS: usize = 8;

/// Digits kept for the canonical lookup key
const KEY_DIGITS: usize = 10;

/// Canonical lookup key for a raw phone string.
///
/// Strips all non-digit characters. Inputs longer than ten digits keep only
/// the last ten; inputs shorter than eight digits are invalid and map to the
/// empty key. An empty key never matches any stored record.
pub fn lookup_key(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() < MIN_DIGITS {
        return String::new();
    }

    if digits.len() > KEY_DIGITS {
        digits[digits.len() - KEY_DIGITS..].to_string()
    } else {
        digits
    }
}

/// Canonical display form: all digits, preserving a leading `+` when the
/// original input started with one.
pub fn display_form(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if raw.trim_start().starts_with('+') {
        format!("+{}", digits)
    } else {
        digits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_key_strips_formatting() {
        assert_eq!(lookup_key("(555) 123-4567"), "5551234567");
        assert_eq!(lookup_key("555.123.4567"), "5551234567");
    }

    #[test]
    fn test_lookup_key_keeps_last_ten_digits() {
        assert_eq!(lookup_key("+1 555 123 4567"), "5551234567");
        assert_eq!(lookup_key("0049 171 555 1234"), "1715551234");
    }

    #[test]
    fn test_lookup_key_short_input_is_invalid() {
        assert_eq!(lookup_key("1234567"), "");
        assert_eq!(lookup_key(""), "");
        assert_eq!(lookup_key("abc"), "");
    }

    #[test]
    fn test_lookup_key_eight_digits_kept_as_is() {
        assert_eq!(lookup_key("12345678"), "12345678");
    }

    #[test]
    fn test_lookup_key_is_idempotent() {
        for raw in ["+1 (555) 123-4567", "12345678", "123", ""] {
            let once = lookup_key(raw);
            assert_eq!(lookup_key(&once), once);
        }
    }

    #[test]
    fn test_display_form_preserves_plus() {
        assert_eq!(display_form("+1 (555) 123-4567"), "+15551234567");
        assert_eq!(display_form("555 123 4567"), "5551234567");
        assert_eq!(display_form(" +49 171 5551234"), "+491715551234");
    }

    #[test]
    fn test_same_number_different_formats_share_key() {
        assert_eq!(lookup_key("+15551234567"), lookup_key("(555) 123-4567"));
    }
}

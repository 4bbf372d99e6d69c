//! Phone-number normalization shared by the store and the protocol layer.

/// Server part of a regular user address.
pub const USER_SERVER: &str = "s.whatsapp.net";

/// Country code assumed for bare national numbers.
const DEFAULT_COUNTRY_CODE: &str = "55";

/// Normalize a number or user address to the stored form.
///
/// Strips the `@s.whatsapp.net` suffix, any device part (`:12`) and
/// non-digit characters, then prefixes the default country code when the
/// remainder looks like a national number (10 or 11 digits).
pub fn normalize_number(raw: &str) -> String {
    let user = raw.split('@').next().unwrap_or(raw);
    let user = user.split(':').next().unwrap_or(user);
    let digits: String = user.chars().filter(char::is_ascii_digit).collect();
    if matches!(digits.len(), 10 | 11) {
        format!("{DEFAULT_COUNTRY_CODE}{digits}")
    } else {
        digits
    }
}

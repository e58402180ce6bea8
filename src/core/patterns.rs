//! Character-class checks for the pattern-constrained attributes of the
//! CFDI 3.3 schema.

/// RFC: 3 (legal entity) or 4 (individual) letters, a YYMMDD date and a
/// 3-character homoclave.
pub fn is_rfc(value: &str) -> bool {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() != 12 && chars.len() != 13 {
        return false;
    }
    let name_len = chars.len() - 9;
    let (name, rest) = chars.split_at(name_len);
    let (date, homoclave) = rest.split_at(6);

    if !name
        .iter()
        .all(|c| c.is_ascii_uppercase() || *c == '&' || *c == 'Ñ')
    {
        return false;
    }
    if !date.iter().all(char::is_ascii_digit) {
        return false;
    }
    let month = two_digits(date[2], date[3]);
    let day = two_digits(date[4], date[5]);
    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return false;
    }
    homoclave[..2]
        .iter()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        && (homoclave[2].is_ascii_digit() || homoclave[2] == 'A')
}

fn two_digits(a: char, b: char) -> u32 {
    a.to_digit(10).unwrap_or(0) * 10 + b.to_digit(10).unwrap_or(0)
}

/// Free text of 1..=`max` characters. The pipe is excluded because it is
/// the cadena original delimiter; control characters are excluded as well.
pub fn is_free_text(value: &str, max: usize) -> bool {
    let count = value.chars().count();
    !value.trim().is_empty()
        && count <= max
        && !value.chars().any(|c| c == '|' || c.is_control())
}

/// `LugarExpedicion`: five-digit postal code.
pub fn is_postal_code(value: &str) -> bool {
    value.len() == 5 && value.bytes().all(|b| b.is_ascii_digit())
}

/// `Confirmacion`: five alphanumeric characters.
pub fn is_confirmation_key(value: &str) -> bool {
    value.len() == 5 && value.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// `NoCertificado`: twenty digits.
pub fn is_certificate_number(value: &str) -> bool {
    value.len() == 20 && value.bytes().all(|b| b.is_ascii_digit())
}

/// Hyphenated 8-4-4-4-12 UUID, either case.
pub fn is_uuid(value: &str) -> bool {
    value.len() == 36 && uuid::Uuid::try_parse(value).is_ok()
}

/// `NumeroPedimento`: "YY  AA  PPPP  NNNNNNN" (two spaces between groups).
pub fn is_customs_number(value: &str) -> bool {
    let groups: Vec<&str> = value.split("  ").collect();
    groups.len() == 4
        && groups
            .iter()
            .zip([2usize, 2, 4, 7])
            .all(|(g, len)| g.len() == len && g.bytes().all(|b| b.is_ascii_digit()))
}

/// `CuentaPredial/@Numero`: 1..=150 digits.
pub fn is_property_account(value: &str) -> bool {
    !value.is_empty() && value.len() <= 150 && value.bytes().all(|b| b.is_ascii_digit())
}

/// ISO 3166-1 alpha-3 shape.
pub fn is_country_code(value: &str) -> bool {
    value.len() == 3 && value.bytes().all(|b| b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc_valid() {
        assert!(is_rfc("EKU9003173C9"));
        assert!(is_rfc("XAXX010101000"));
        assert!(is_rfc("XEXX010101000"));
        assert!(is_rfc("CACX7605101P8"));
        assert!(is_rfc("ÑAÑ850101AB1"));
        assert!(is_rfc("A&C850101AB1"));
    }

    #[test]
    fn rfc_invalid() {
        assert!(!is_rfc(""));
        assert!(!is_rfc("EKU9003173C"));
        assert!(!is_rfc("eku9003173C9"));
        assert!(!is_rfc("EKU9013173C9"), "month 13");
        assert!(!is_rfc("EKU9003323C9"), "day 32");
        assert!(!is_rfc("EKU9003173CB"), "last char must be digit or A");
        assert!(!is_rfc("EKUU90031733C9"));
    }

    #[test]
    fn free_text() {
        assert!(is_free_text("Servicio de consultoría", 100));
        assert!(!is_free_text("", 100));
        assert!(!is_free_text("   ", 100));
        assert!(!is_free_text("a|b", 100));
        assert!(!is_free_text("line\nbreak", 100));
        assert!(is_free_text("ñññ", 3), "length counts characters, not bytes");
        assert!(!is_free_text("abcd", 3));
    }

    #[test]
    fn codes() {
        assert!(is_postal_code("06600"));
        assert!(!is_postal_code("6600"));
        assert!(is_confirmation_key("ECVH1"));
        assert!(!is_confirmation_key("EC-H1"));
        assert!(is_certificate_number("30001000000400002434"));
        assert!(!is_certificate_number("3000100000040000243"));
        assert!(is_country_code("USA"));
        assert!(!is_country_code("US"));
    }

    #[test]
    fn uuid() {
        assert!(is_uuid("5FB2822E-396D-4725-8521-CDC4BDD20CCF"));
        assert!(is_uuid("5fb2822e-396d-4725-8521-cdc4bdd20ccf"));
        assert!(!is_uuid("5FB2822E396D47258521CDC4BDD20CCF"));
        assert!(!is_uuid("5FB2822E-396D-4725-8521-CDC4BDD20CCG"));
        assert!(!is_uuid("{5FB2822E-396D-4725-8521-CDC4BDD20CC}"));
        assert!(!is_uuid("5FB2822E-396D4-725-8521-CDC4BDD20CCF"));
    }

    #[test]
    fn customs_and_property() {
        assert!(is_customs_number("15  48  3009  0001234"));
        assert!(!is_customs_number("15 48 3009 0001234"));
        assert!(!is_customs_number("15  48  3009  000123"));
        assert!(is_property_account("123456"));
        assert!(!is_property_account("12A"));
        assert!(!is_property_account(""));
    }
}

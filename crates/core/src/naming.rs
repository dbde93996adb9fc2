//! Key conversions between wire names (snake_case) and YAML keys (camelCase).

/// `secretName` -> `secret_name`, `IPAddress` -> `ip_address`, `x-foo` -> `x_foo`.
pub fn snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == '.' || c == ' ' {
            if !out.is_empty() && !out.ends_with('_') { out.push('_'); }
            continue;
        }
        if c.is_ascii_uppercase() {
            let prev = if i > 0 { Some(chars[i - 1]) } else { None };
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                // end of an acronym: "IPAddress" splits before the 'A' of "Address"
                Some(p) if p.is_ascii_uppercase() => next.map(|n| n.is_ascii_lowercase()).unwrap_or(false),
                _ => false,
            };
            if boundary && !out.is_empty() && !out.ends_with('_') { out.push('_'); }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `secret_name` -> `secretName`. Leading segment keeps its case.
pub fn camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut upper_next = false;
    for c in s.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_handles_acronyms_and_separators() {
        assert_eq!(snake_case("secretName"), "secret_name");
        assert_eq!(snake_case("IPAddress"), "ip_address");
        assert_eq!(snake_case("podCIDRs"), "pod_cid_rs");
        assert_eq!(snake_case("x-forwarded-for"), "x_forwarded_for");
        assert_eq!(snake_case("v1alpha1"), "v1alpha1");
        assert_eq!(snake_case("Certificate"), "certificate");
    }

    #[test]
    fn camel_case_joins_segments() {
        assert_eq!(camel_case("secret_name"), "secretName");
        assert_eq!(camel_case("ip_address"), "ipAddress");
        assert_eq!(camel_case("name"), "name");
        assert_eq!(camel_case("_private"), "private");
    }
}

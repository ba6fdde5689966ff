//! Distinguished names and search filters.

use ldap3::ldap_escape;
use ldapsync_core::types::RunTimestamp;

/// The value of a DN's leading `cn=` RDN, unescaped. `None` when the DN does
/// not start with a common name.
pub fn leading_cn(dn: &str) -> Option<String> {
    let rdn = first_rdn(dn);
    let (attr, value) = rdn.split_once('=')?;
    if !attr.trim().eq_ignore_ascii_case("cn") {
        return None;
    }
    let value = unescape_dn_value(value.trim_start());
    (!value.is_empty()).then_some(value)
}

fn first_rdn(dn: &str) -> &str {
    let mut escaped = false;
    for (i, ch) in dn.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            ',' | '+' => return &dn[..i],
            _ => {}
        }
    }
    dn
}

fn unescape_dn_value(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 1 < bytes.len() {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            match hex {
                Some(b) => {
                    out.push(b);
                    i += 3;
                }
                None => {
                    out.push(bytes[i + 1]);
                    i += 2;
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Escape a value for use inside an RDN (RFC 4514).
pub fn escape_dn_value(value: &str) -> String {
    let last = value.chars().count().saturating_sub(1);
    let mut out = String::with_capacity(value.len() * 2);
    for (i, ch) in value.chars().enumerate() {
        match ch {
            ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=' => {
                out.push('\\');
                out.push(ch);
            }
            '\0' => out.push_str("\\00"),
            ' ' if i == 0 || i == last => out.push_str("\\20"),
            '#' if i == 0 => out.push_str("\\23"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn cn_dn(cn: &str, base: &str) -> String {
    format!("cn={},{}", escape_dn_value(cn), base)
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

fn modified_since(since: &RunTimestamp) -> String {
    format!("(modifyTimestamp>={})", ldap_escape(since.as_str()))
}

fn and_since(clause: String, since: Option<&RunTimestamp>) -> String {
    match since {
        Some(ts) => format!("(&{clause}{})", modified_since(ts)),
        None => clause,
    }
}

/// Groups whose cn starts with `prefix`.
pub fn prefix_filter(prefix: &str, since: Option<&RunTimestamp>) -> String {
    and_since(format!("(cn={}*)", ldap_escape(prefix)), since)
}

/// The single entry named `cn`.
pub fn cn_filter(cn: &str, since: Option<&RunTimestamp>) -> String {
    and_since(format!("(cn={})", ldap_escape(cn)), since)
}

pub fn users_filter(since: Option<&RunTimestamp>) -> String {
    and_since("(cn=*)".to_string(), since)
}

pub fn any_modified_filter(since: &RunTimestamp) -> String {
    modified_since(since)
}

/// Groups with cn starting with `prefix` that list `member_dn`.
pub fn membership_filter(prefix: &str, member_dn: &str) -> String {
    format!(
        "(&(cn={}*)(member={}))",
        ldap_escape(prefix),
        ldap_escape(member_dn)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leading_cn_extracts_user_id() {
        assert_eq!(
            leading_cn("cn=alice,ou=people,dc=example,dc=com").as_deref(),
            Some("alice")
        );
        assert_eq!(leading_cn("CN=Bob ,ou=people").as_deref(), Some("Bob "));
        assert_eq!(leading_cn("uid=carol,ou=people"), None);
        assert_eq!(leading_cn("cn=,ou=people"), None);
    }

    #[test]
    fn leading_cn_handles_escapes() {
        assert_eq!(
            leading_cn(r"cn=Smith\, John,ou=people").as_deref(),
            Some("Smith, John")
        );
        assert_eq!(leading_cn(r"cn=a\2Bb,ou=people").as_deref(), Some("a+b"));
        assert_eq!(leading_cn("cn=multi+uid=x,ou=people").as_deref(), Some("multi"));
    }

    #[test]
    fn escape_and_parse_agree() {
        for name in ["plain", "Smith, John", " padded ", "#hash", "a=b;c"] {
            let dn = cn_dn(name, "ou=people,dc=example,dc=com");
            assert_eq!(leading_cn(&dn).as_deref(), Some(name), "dn was {dn}");
        }
    }

    #[test]
    fn filters_escape_values() {
        assert_eq!(prefix_filter("site-", None), "(cn=site-*)");
        assert_eq!(cn_filter("a*b", None), r"(cn=a\2ab)");
        let ts = RunTimestamp::new("20240101000000Z");
        assert_eq!(
            prefix_filter("open-", Some(&ts)),
            "(&(cn=open-*)(modifyTimestamp>=20240101000000Z))"
        );
        assert_eq!(
            membership_filter("site-", "cn=bob (x),ou=people"),
            r"(&(cn=site-*)(member=cn=bob \28x\29,ou=people))"
        );
    }
}

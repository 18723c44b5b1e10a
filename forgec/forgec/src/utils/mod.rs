//! Naming helpers shared by the normalizer, planner and emitters, so entity,
//! table and inverse-relation names stay consistent across every artifact.

/// `AuditLog` -> `audit_log`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `audit_log` -> `audit_logs`, `company` -> `companies`, `box` -> `boxes`.
pub fn pluralize(name: &str) -> String {
    let lower = name.to_lowercase();
    if let Some(stem) = name.strip_suffix('y') {
        let before = stem.chars().last();
        if before.map_or(false, |c| !"aeiou".contains(c)) {
            return format!("{stem}ies");
        }
    }
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        return format!("{name}es");
    }
    format!("{name}s")
}

/// SQL table name for an entity: pluralized snake_case.
pub fn table_name(entity: &str) -> String {
    pluralize(&snake_case(entity))
}

/// `log_activity` -> `logActivity` (for the emitted TypeScript surface).
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
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
    fn test_snake_case() {
        assert_eq!(snake_case("User"), "user");
        assert_eq!(snake_case("AuditLog"), "audit_log");
        assert_eq!(snake_case("already_snake"), "already_snake");
    }

    #[test]
    fn test_pluralize() {
        assert_eq!(pluralize("user"), "users");
        assert_eq!(pluralize("company"), "companies");
        assert_eq!(pluralize("box"), "boxes");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("class"), "classes");
    }

    #[test]
    fn test_table_name() {
        assert_eq!(table_name("AuditLog"), "audit_logs");
        assert_eq!(table_name("User"), "users");
    }

    #[test]
    fn test_camel_case() {
        assert_eq!(camel_case("log_activity"), "logActivity");
        assert_eq!(camel_case("close"), "close");
    }
}

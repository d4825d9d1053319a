//! Input validation utilities.

/// Validate that a string is not empty.
pub fn validate_non_empty(s: &str, field: &str) -> crate::types::Result<()> {
    if s.is_empty() {
        return Err(crate::types::Error::validation(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(())
}

/// Validate that a value is positive.
pub fn validate_positive(n: u64, field: &str) -> crate::types::Result<()> {
    if n == 0 {
        return Err(crate::types::Error::validation(format!(
            "{} must be positive",
            field
        )));
    }
    Ok(())
}

/// Validate a tube name against the beanstalk name rules: 1..=200 bytes of
/// letters, digits and `-+/;.$_()`, not starting with a hyphen.
pub fn validate_tube_name(name: &str) -> crate::types::Result<()> {
    validate_non_empty(name, "tube name")?;
    if name.len() > 200 {
        return Err(crate::types::Error::validation(format!(
            "tube name longer than 200 bytes: {}",
            name
        )));
    }
    if name.starts_with('-') {
        return Err(crate::types::Error::validation(format!(
            "tube name cannot start with '-': {}",
            name
        )));
    }
    let valid = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-+/;.$_()".contains(c));
    if !valid {
        return Err(crate::types::Error::validation(format!(
            "tube name has invalid characters: {}",
            name
        )));
    }
    Ok(())
}

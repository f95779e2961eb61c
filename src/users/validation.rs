use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref PASSWORD_CHARSET_RE: Regex = Regex::new(r"^[A-Za-z\d@$!%*?&]{8,}$").unwrap();
}

const PASSWORD_SPECIALS: &str = "@$!%*?&";

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn validate_name(name: &str) -> Result<(), String> {
    let len = name.trim().chars().count();
    if len < 2 {
        return Err("User name must be at least 2 characters.".into());
    }
    if len > 10 {
        return Err("User name cannot be more than 10 characters.".into());
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err("Please provide a valid email address.".into())
    }
}

/// At least 8 characters from `[A-Za-z0-9@$!%*?&]`, with one lowercase,
/// one uppercase, one digit and one special character.
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    let strong = PASSWORD_CHARSET_RE.is_match(password)
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_digit())
        && password.chars().any(|c| PASSWORD_SPECIALS.contains(c));
    if strong {
        Ok(())
    } else {
        Err(format!(
            "Password must be at least 8 characters and contain a lowercase letter, \
             an uppercase letter, a digit and one of {PASSWORD_SPECIALS}."
        ))
    }
}

pub fn validate_password_pair(password: &str, confirm: &str) -> Result<(), String> {
    validate_password_strength(password)?;
    if password != confirm {
        return Err("Passwords are not the same!".into());
    }
    Ok(())
}

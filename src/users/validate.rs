use lazy_static::lazy_static;
use regex::Regex;

pub const MIN_PASSWORD_LEN: usize = 8;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Expects an already normalized address.
pub fn check_email(email: &str, errors: &mut Vec<String>) {
    if email.is_empty() {
        errors.push("Please provide your email".into());
    } else if !is_valid_email(email) {
        errors.push("Please type the correct format of email".into());
    }
}

pub fn check_password(password: &str, confirm: &str, errors: &mut Vec<String>) {
    if password.is_empty() {
        errors.push("Please provide a password".into());
    } else if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        ));
    }
    if confirm.is_empty() {
        errors.push("Please confirm your password".into());
    } else if confirm != password {
        errors.push("Passwords are not the same".into());
    }
}

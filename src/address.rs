use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Accepts either `Display Name <user@host.tld>` or a bare `user@host.tld`.
/// The pattern is searched rather than anchored, so an address embedded in
/// surrounding text is still extracted. Top-level domains are limited to a
/// small allow-list; extend the alternation to accept more.
static ADDRESS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?P<name>([\w.,]+\s+)*[\w.,]+)\s*<)?(?P<email>[\w.+-]+@([\w.]+\.)+(com|org|edu))>?")
        .expect("Invalid address regex pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressTuple {
    pub display_name: Option<String>,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Empty email address")]
    Empty,

    #[error("Missing email address field")]
    Missing,

    #[error("No email address found in: {0}")]
    NoMatch(String),
}

/// Extracts the display name and address from a single recipient field.
pub fn parse_address(input: &str) -> Result<AddressTuple, AddressError> {
    if input.is_empty() {
        return Err(AddressError::Empty);
    }

    let Some(captures) = ADDRESS_REGEX.captures(input) else {
        return Err(AddressError::NoMatch(input.to_string()));
    };

    let Some(email) = captures.name("email") else {
        return Err(AddressError::NoMatch(input.to_string()));
    };

    Ok(AddressTuple {
        display_name: captures.name("name").map(|m| m.as_str().to_string()),
        address: email.as_str().to_string(),
    })
}

/// Parses a whole recipient list, preserving order and length. An absent
/// list yields an empty vector; an absent entry yields a `Missing` error in
/// its position.
pub fn parse_address_list<I, S>(inputs: I) -> Vec<Result<AddressTuple, AddressError>>
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    inputs
        .into_iter()
        .map(|entry| match entry {
            Some(value) => parse_address(value.as_ref()),
            None => Err(AddressError::Missing),
        })
        .collect()
}

pub fn is_valid(input: Option<&str>) -> bool {
    match input {
        Some(value) => parse_address(value).is_ok(),
        None => false,
    }
}

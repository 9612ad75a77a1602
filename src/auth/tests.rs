use super::*;
use axum::http::HeaderMap;

fn headers(name: &'static str, value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(name, value.parse().unwrap());
    headers
}

#[test]
fn valid_bearer_token() {
    let result = extract_bearer_token(&headers("authorization", "Bearer api-ada-7f3c"));
    assert_eq!(result, Ok("api-ada-7f3c".to_string()));
}

#[test]
fn bearer_scheme_is_case_insensitive_and_trimmed() {
    let result = extract_bearer_token(&headers("authorization", "bearer   api-ada-7f3c  "));
    assert_eq!(result, Ok("api-ada-7f3c".to_string()));
}

#[test]
fn missing_authorization_header() {
    assert_eq!(extract_bearer_token(&HeaderMap::new()), Err(TokenError::Missing));
}

#[test]
fn wrong_scheme_rejected() {
    let result = extract_bearer_token(&headers("authorization", "Basic dXNlcjpwYXNz"));
    assert_eq!(result, Err(TokenError::InvalidFormat));
}

#[test]
fn token_without_scheme_rejected() {
    let result = extract_bearer_token(&headers("authorization", "api-ada-7f3c"));
    assert_eq!(result, Err(TokenError::InvalidFormat));
}

#[test]
fn blank_token_rejected() {
    let result = extract_bearer_token(&headers("authorization", "Bearer    "));
    assert_eq!(result, Err(TokenError::Empty));
}

#[test]
fn client_identifier_uses_first_forwarded_hop() {
    let h = headers("x-forwarded-for", "203.0.113.9, 10.0.0.2");
    assert_eq!(client_identifier(&h), "203.0.113.9");
}

#[test]
fn client_identifier_falls_back_to_direct() {
    assert_eq!(client_identifier(&HeaderMap::new()), DIRECT_CLIENT);
    assert_eq!(client_identifier(&headers("x-forwarded-for", " ")), DIRECT_CLIENT);
}

use crate::schemas::UserId;
use actix_web::{
    dev::Payload, error::ErrorUnauthorized, http::header::HeaderValue, web, FromRequest,
    HttpRequest,
};
use hmac::{digest::InvalidLength, Hmac, Mac};
use sha2::{Digest, Sha256};
use std::future::{ready, Ready};
use std::num::ParseIntError;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies bearer tokens of the form `<user id>.<hex signature>`.
#[derive(Clone)]
pub struct AuthKey {
    mac: HmacSha256,
}

impl AuthKey {
    pub fn new(secret: &str) -> Result<Self, InvalidLength> {
        let mut sha256_hasher = Sha256::new();
        sha256_hasher.update(secret.as_bytes());
        let secret_hash = sha256_hasher.finalize();
        Ok(Self {
            mac: HmacSha256::new_from_slice(&secret_hash)?,
        })
    }

    pub fn issue_token(&self, user: &UserId) -> String {
        let mut mac = self.mac.clone();
        mac.update(user.as_str().as_bytes());
        let signature = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        format!("{user}.{signature}")
    }

    pub fn verify(&self, token: &str) -> Option<UserId> {
        let (user, signature) = token.rsplit_once('.')?;
        let signature = signature
            .chars()
            .collect::<Vec<_>>()
            .chunks(2)
            .map(|n| u8::from_str_radix(&String::from_iter(n), 16))
            .collect::<Result<Vec<u8>, ParseIntError>>()
            .ok()?;
        let mut mac = self.mac.clone();
        mac.update(user.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(UserId::new(user))
    }
}

/// The authenticated user a request acts on behalf of.
#[derive(Clone, Debug, PartialEq)]
pub struct Caller(pub UserId);

pub fn check_authorization(request: &HttpRequest) -> Option<Caller> {
    let authorization = request
        .headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .map(HeaderValue::to_str)?
        .ok()?;
    let token = authorization.strip_prefix("Bearer ")?;
    let key = request.app_data::<web::Data<AuthKey>>()?;
    key.verify(token.trim()).map(Caller)
}

impl FromRequest for Caller {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(request: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(
            check_authorization(request)
                .ok_or_else(|| ErrorUnauthorized("Missing or invalid bearer token")),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_verify() {
        let key = AuthKey::new("s3cret").unwrap();
        let user = UserId::new("4b1c7e0e-alice");
        let token = key.issue_token(&user);
        assert_eq!(key.verify(&token), Some(user));
    }

    #[test]
    fn tampered_tokens_are_rejected() {
        let key = AuthKey::new("s3cret").unwrap();
        let token = key.issue_token(&UserId::new("alice"));
        let forged = token.replacen("alice", "bob", 1);
        assert_eq!(key.verify(&forged), None);
        assert_eq!(key.verify("alice"), None);
        assert_eq!(key.verify("alice.zz"), None);
    }

    #[test]
    fn tokens_are_bound_to_the_secret() {
        let token = AuthKey::new("one")
            .unwrap()
            .issue_token(&UserId::new("alice"));
        assert_eq!(AuthKey::new("two").unwrap().verify(&token), None);
    }
}

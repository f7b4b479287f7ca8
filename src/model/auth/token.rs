use std::marker::PhantomData;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
use rand::Rng;
use rocket::{
    http::{Cookie, SameSite, Status},
    request::{FromRequest, Outcome},
    Request,
};

use crate::error::Error;

use super::rights::{Principal, RequiredRights, RightsMask};

pub const AUTH_TOKEN_COOKIE: &str = "vot-tok";

/// Length of a generated signing secret, in bytes.
pub const SECRET_LEN: usize = 512;

/// Issues and validates session tokens.
///
/// Tokens are HS256 JWTs whose claims are exactly a [`Principal`]. Nothing is
/// stored server-side: a token is valid iff its signature verifies under the
/// current secret, so replacing the signer invalidates every token at once.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        // Tokens live as long as the browser session, so there is no expiry claim.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// A signer with a fresh random secret.
    pub fn random() -> Self {
        let mut secret = vec![0_u8; SECRET_LEN];
        rand::thread_rng().fill(&mut secret[..]);
        Self::new(&secret)
    }

    /// A signer with a fixed all-zero secret, so that tokens survive restarts.
    /// Only for debugging.
    pub fn fixed() -> Self {
        Self::new(&[0_u8; SECRET_LEN])
    }

    /// Create a token for the given principal.
    pub fn issue(&self, principal: &Principal) -> String {
        jsonwebtoken::encode(&Header::default(), principal, &self.encoding)
            .expect("JWT encoding is infallible with default settings")
    }

    /// Recover the principal from a token, if the token is genuine and of one of
    /// the accepted classes. All failures look the same to the caller.
    pub fn validate(&self, token: &str, accepted: RightsMask) -> Option<Principal> {
        jsonwebtoken::decode(token, &self.decoding, &self.validation)
            .ok()
            .map(|data: TokenData<Principal>| data.claims)
            .filter(|principal| accepted.contains(principal.rights))
    }
}

/// Build the cookie that carries a session token. It has no expiry, so it
/// disappears when the browser session ends.
pub fn session_cookie(token: String) -> Cookie<'static> {
    Cookie::build(AUTH_TOKEN_COOKIE, token)
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .finish()
}

/// Request guard for a validated session token accepted by `R`.
pub struct AuthToken<R> {
    principal: Principal,
    phantom: PhantomData<R>,
}

impl<R> AuthToken<R> {
    pub fn id(&self) -> &str {
        &self.principal.id
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}

#[rocket::async_trait]
impl<'r, R> FromRequest<'r> for AuthToken<R>
where
    R: RequiredRights + Send,
{
    type Error = Error;

    /// Validate the session cookie against the rights `R` accepts. A missing,
    /// forged, or wrong-class token is rejected the same way in every case.
    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let signer = match req.rocket().state::<TokenSigner>() {
            Some(signer) => signer,
            None => {
                return Outcome::Failure((
                    Status::InternalServerError,
                    Error::Internal("Token signer is not managed".to_string()),
                ))
            }
        };

        let principal = req
            .cookies()
            .get(AUTH_TOKEN_COOKIE)
            .and_then(|cookie| signer.validate(cookie.value(), R::MASK));

        match principal {
            Some(principal) => Outcome::Success(Self {
                principal,
                phantom: PhantomData,
            }),
            None => Outcome::Failure((Status::Unauthorized, Error::Unauthenticated)),
        }
    }
}

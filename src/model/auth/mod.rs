mod rights;
mod token;

pub use rights::{
    Admin, AnyRights, Principal, Regular, RequiredRights, Rights, RightsMask, ADMIN_ID,
};
pub use token::{session_cookie, AuthToken, TokenSigner, AUTH_TOKEN_COOKIE, SECRET_LEN};

//! Stateless session tokens.
//!
//! Tokens are HMAC-signed and carry their own expiry, so no server-side
//! session store exists. There is no revocation list: a token stays valid
//! until `exp` even after the client drops its cookie.

pub mod domain;
pub mod signer;
pub mod token;

pub use domain::{
    clear_session_cookie, session_cookie, token_from_request, Identity, SessionDomain,
    ADMIN_SESSION_HEADER,
};
pub use signer::SigningKey;
pub use token::{SessionSigner, SessionTokenPayload, SignedToken, TOKEN_VERSION};

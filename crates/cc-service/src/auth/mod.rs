//! Authentication module for the Call Controller.
//!
//! User access tokens are EdDSA-signed JWTs issued by the application's login
//! flow. The verifying key is configured statically (`JWT_PUBLIC_KEY`).

pub mod jwt;

pub use jwt::JwtValidator;

pub mod authority;
pub mod broadcast;
pub mod kv;
pub mod login_security;
pub mod presence;
pub mod revocation;

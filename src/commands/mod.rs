pub mod admin;
pub mod confirm;
pub mod general;
pub mod verification;

pub use admin::verifyset;
pub use general::{help, ping};
pub use verification::{unverify, verify};

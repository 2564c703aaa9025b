pub mod role_manager;
pub mod verification_manager;

pub use role_manager::{RoleGrant, RoleManager};
pub use verification_manager::{
    create_shared_verification_manager, SharedVerificationManager, VerificationManager,
};

pub mod answer;
pub mod challenge;
pub mod question;
pub mod redeem;
pub mod token;

pub use answer::normalize_answer;
pub use challenge::{run_challenge, ChallengeRequest, ChallengeState};
pub use redeem::{redeem, CallbackPayload, RecordOrdering, RedeemError};
pub use token::{TokenCodec, VerificationClaims};

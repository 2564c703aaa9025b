pub mod guild_config;
pub mod incorrect_answers;
pub mod store;
pub mod verified_members;

pub use guild_config::ConfigStore;
pub use incorrect_answers::IncorrectAnswerLedger;
pub use verified_members::VerifiedMemberStore;

pub mod add;
pub mod common;
pub mod completions;
pub mod delete;
pub mod edit;
pub mod list;
pub mod pending;
pub mod resolve;
pub mod restore;
pub mod sign_out;
pub mod status;
pub mod sync;
pub mod watch;

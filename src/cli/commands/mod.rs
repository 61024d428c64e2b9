//! One module per subcommand.

pub mod cancel;
pub mod costs;
pub mod init;
pub mod lanes;
pub mod maintain;
pub mod provision;
pub mod run;
pub mod runs;
pub mod show;
